use crate::api::pagination::PaginationParams;
use crate::api::{
    error_response, storage_error_response, success_paginated_response, success_response,
};
use crate::logging::TraceId;
use crate::state::AppState;
use alertgest_common::DigestRow;
use alertgest_storage::Reconciliation;
use axum::body::Bytes;
use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use serde::Deserialize;
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

/// 人工核对结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileOutcome {
    /// 消息已送达频道
    Sent,
    /// 消息未送达，允许自动重试
    NotSent,
}

/// 核对投递状态未知的摘要
#[derive(Debug, Deserialize, ToSchema)]
pub struct ReconcileRequest {
    pub outcome: ReconcileOutcome,
    /// 频道中找到的消息 ID（仅 sent 时使用）
    #[serde(default)]
    pub message_id: Option<String>,
}

impl ReconcileRequest {
    fn into_verdict(self) -> Reconciliation {
        match self.outcome {
            ReconcileOutcome::Sent => Reconciliation::Sent {
                message_id: self.message_id.filter(|id| !id.trim().is_empty()),
            },
            ReconcileOutcome::NotSent => Reconciliation::NotSent,
        }
    }
}

/// 投递结果未知、等待人工核对的摘要（按更新时间正序）
#[utoipa::path(
    get,
    path = "/v1/digests/unreconciled",
    tag = "Digests",
    params(PaginationParams),
    responses((status = 200, description = "待核对摘要分页列表", body = Vec<DigestRow>))
)]
async fn list_unreconciled(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Query(pagination): Query<PaginationParams>,
) -> Response {
    let (limit, offset) = (pagination.limit(), pagination.offset());
    let total = match state.store.count_unreconciled().await {
        Ok(total) => total,
        Err(e) => return storage_error_response(&trace_id, &e),
    };
    match state.store.list_unreconciled(limit, offset).await {
        Ok(items) => success_paginated_response(&trace_id, items, total, limit, offset),
        Err(e) => storage_error_response(&trace_id, &e),
    }
}

/// 获取单个摘要
#[utoipa::path(
    get,
    path = "/v1/digests/{id}",
    tag = "Digests",
    params(("id" = String, Path, description = "摘要 ID")),
    responses(
        (status = 200, description = "摘要", body = DigestRow),
        (status = 404, description = "摘要不存在", body = crate::api::ApiError)
    )
)]
async fn get_digest(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    match state.store.require_digest(&id).await {
        Ok(digest) => success_response(StatusCode::OK, &trace_id, digest),
        Err(e) => storage_error_response(&trace_id, &e),
    }
}

/// 人工核对投递状态为 unknown 的摘要。
/// `sent` 将窗口标记为已投递；`not_sent` 使摘要在下一次调度时重试。
#[utoipa::path(
    post,
    path = "/v1/digests/{id}/reconcile",
    tag = "Digests",
    params(("id" = String, Path, description = "摘要 ID")),
    request_body = ReconcileRequest,
    responses(
        (status = 200, description = "核对后的摘要", body = DigestRow),
        (status = 400, description = "请求体无效", body = crate::api::ApiError),
        (status = 404, description = "摘要不存在", body = crate::api::ApiError),
        (status = 409, description = "摘要状态不是 unknown", body = crate::api::ApiError)
    )
)]
async fn reconcile_digest(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Response {
    let request: ReconcileRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                &trace_id,
                "bad_request",
                &format!("invalid reconcile request: {e}"),
            )
        }
    };
    match state.delivery.reconcile(&id, request.into_verdict()).await {
        Ok(digest) => success_response(StatusCode::OK, &trace_id, digest),
        Err(e) => storage_error_response(&trace_id, &e),
    }
}

pub fn digest_routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(list_unreconciled))
        .routes(routes!(get_digest))
        .routes(routes!(reconcile_digest))
}
