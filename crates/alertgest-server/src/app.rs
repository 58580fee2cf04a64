use crate::state::AppState;
use crate::{api, logging};
use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::get;
use axum::{Json, Router};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Alertgest API",
        description = "夜间告警摘要服务：接收 Alertmanager 告警，按捕获窗口生成摘要并投递到 Teams",
    ),
    tags(
        (name = "Health", description = "存活与就绪探针"),
        (name = "Webhook", description = "Alertmanager webhook 接收"),
        (name = "Windows", description = "捕获窗口查询与管理"),
        (name = "Digests", description = "摘要查询与人工核对"),
        (name = "Scheduler", description = "摘要调度器状态")
    )
)]
struct ApiDoc;

pub fn build_http_app(state: AppState) -> Router {
    let (router, spec) = api::routes().split_for_parts();

    let mut merged_spec = ApiDoc::openapi();
    merged_spec.merge(spec);
    let spec = Arc::new(merged_spec);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    router
        .with_state(state)
        .route(
            "/v1/openapi.json",
            get(move || {
                let spec = spec.clone();
                async move { Json(spec.as_ref().clone()) }
            }),
        )
        // 请求体上限由日志中间件统一执行，提取器使用同一上限
        .layer(DefaultBodyLimit::max(logging::MAX_REQUEST_BODY_BYTES))
        .layer(cors)
        .layer(middleware::from_fn(logging::request_logging))
}
