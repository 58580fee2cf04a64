use crate::api::pagination::PaginationParams;
use crate::api::{
    error_response, storage_error_response, success_empty_response, success_paginated_response,
    success_response,
};
use crate::logging::TraceId;
use crate::state::AppState;
use alertgest_common::{AlertRecord, CaptureWindowRow, DigestRow, WindowStatus};
use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use utoipa::IntoParams;
use utoipa_axum::{router::OpenApiRouter, routes};

/// 捕获窗口列表查询参数
#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
struct ListWindowsParams {
    /// 状态精确匹配（active / closed / digested / delivered / failed）
    #[param(required = false, rename = "status__eq")]
    #[serde(default, rename = "status__eq")]
    status_eq: Option<String>,
    /// 每页条数（默认 20）
    #[param(required = false)]
    #[serde(default, deserialize_with = "crate::api::pagination::lenient_u64")]
    limit: Option<u64>,
    /// 偏移量（默认 0）
    #[param(required = false)]
    #[serde(default, deserialize_with = "crate::api::pagination::lenient_u64")]
    offset: Option<u64>,
}

/// 分页查询捕获窗口。
/// 默认排序：`window_start` 倒序；默认分页：`limit=20&offset=0`。
#[utoipa::path(
    get,
    path = "/v1/windows",
    tag = "Windows",
    params(ListWindowsParams),
    responses(
        (status = 200, description = "捕获窗口分页列表", body = Vec<CaptureWindowRow>),
        (status = 400, description = "状态参数无效", body = crate::api::ApiError)
    )
)]
async fn list_windows(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Query(params): Query<ListWindowsParams>,
) -> Response {
    let status = match params.status_eq.as_deref().map(str::parse::<WindowStatus>) {
        None => None,
        Some(Ok(status)) => Some(status),
        Some(Err(e)) => {
            return error_response(StatusCode::BAD_REQUEST, &trace_id, "bad_request", &e)
        }
    };
    let limit = PaginationParams::resolve_limit(params.limit);
    let offset = PaginationParams::resolve_offset(params.offset);

    let total = match state.store.count_windows(status).await {
        Ok(total) => total,
        Err(e) => return storage_error_response(&trace_id, &e),
    };
    match state.store.list_windows(status, limit, offset).await {
        Ok(items) => success_paginated_response(&trace_id, items, total, limit, offset),
        Err(e) => storage_error_response(&trace_id, &e),
    }
}

/// 获取单个捕获窗口
#[utoipa::path(
    get,
    path = "/v1/windows/{id}",
    tag = "Windows",
    params(("id" = String, Path, description = "窗口 ID")),
    responses(
        (status = 200, description = "捕获窗口", body = CaptureWindowRow),
        (status = 404, description = "窗口不存在", body = crate::api::ApiError)
    )
)]
async fn get_window(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    match state.store.require_window(&id).await {
        Ok(window) => success_response(StatusCode::OK, &trace_id, window),
        Err(e) => storage_error_response(&trace_id, &e),
    }
}

/// 删除捕获窗口。
/// 同时删除其全部摘要；窗口内的告警保留但解除关联。
#[utoipa::path(
    delete,
    path = "/v1/windows/{id}",
    tag = "Windows",
    params(("id" = String, Path, description = "窗口 ID")),
    responses(
        (status = 200, description = "已删除"),
        (status = 404, description = "窗口不存在", body = crate::api::ApiError)
    )
)]
async fn delete_window(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    match state.store.delete_window(&id).await {
        Ok(true) => {
            tracing::info!(window_id = %id, "Capture window deleted");
            success_empty_response(StatusCode::OK, &trace_id, "deleted")
        }
        Ok(false) => error_response(
            StatusCode::NOT_FOUND,
            &trace_id,
            "not_found",
            &format!("capture window {id} not found"),
        ),
        Err(e) => storage_error_response(&trace_id, &e),
    }
}

/// 分页查询窗口内的告警（按接收时间正序）
#[utoipa::path(
    get,
    path = "/v1/windows/{id}/alerts",
    tag = "Windows",
    params(("id" = String, Path, description = "窗口 ID"), PaginationParams),
    responses(
        (status = 200, description = "告警分页列表", body = Vec<AlertRecord>),
        (status = 404, description = "窗口不存在", body = crate::api::ApiError)
    )
)]
async fn list_window_alerts(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(pagination): Query<PaginationParams>,
) -> Response {
    if let Err(e) = state.store.require_window(&id).await {
        return storage_error_response(&trace_id, &e);
    }
    let (limit, offset) = (pagination.limit(), pagination.offset());
    let total = match state.store.count_alerts_for_window(&id).await {
        Ok(total) => total,
        Err(e) => return storage_error_response(&trace_id, &e),
    };
    match state.store.list_alerts_for_window(&id, limit, offset).await {
        Ok(items) => success_paginated_response(&trace_id, items, total, limit, offset),
        Err(e) => storage_error_response(&trace_id, &e),
    }
}

/// 窗口的全部摘要尝试（按生成时间正序）
#[utoipa::path(
    get,
    path = "/v1/windows/{id}/digests",
    tag = "Windows",
    params(("id" = String, Path, description = "窗口 ID")),
    responses(
        (status = 200, description = "摘要列表", body = Vec<DigestRow>),
        (status = 404, description = "窗口不存在", body = crate::api::ApiError)
    )
)]
async fn list_window_digests(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    if let Err(e) = state.store.require_window(&id).await {
        return storage_error_response(&trace_id, &e);
    }
    match state.store.list_digests_for_window(&id).await {
        Ok(digests) => success_response(StatusCode::OK, &trace_id, digests),
        Err(e) => storage_error_response(&trace_id, &e),
    }
}

pub fn window_routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(list_windows))
        .routes(routes!(get_window, delete_window))
        .routes(routes!(list_window_alerts))
        .routes(routes!(list_window_digests))
}
