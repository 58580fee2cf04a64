pub mod digests;
pub mod pagination;
pub mod windows;

use alertgest_common::{WebhookAck, WebhookPayload};
use alertgest_storage::StorageError;
use axum::body::Bytes;
use axum::extract::{Extension, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use utoipa::ToSchema;
use utoipa_axum::{router::OpenApiRouter, routes};

use crate::capture::IngestError;
use crate::logging::TraceId;
use crate::scheduler::SchedulerStatus;
use crate::state::AppState;

/// API 错误响应
#[derive(Serialize, ToSchema)]
pub struct ApiError {
    /// 错误码
    pub err_code: i32,
    /// 错误信息
    pub err_msg: String,
    /// 链路追踪 ID
    pub trace_id: String,
}

/// API 统一响应包裹
#[derive(Serialize)]
pub struct ApiResponse<T>
where
    T: Serialize,
{
    /// 错误码（成功时为 0）
    pub err_code: i32,
    /// 错误信息（成功时为 success）
    pub err_msg: String,
    pub trace_id: String,
    pub data: Option<T>,
}

/// 分页数据结构
#[derive(Serialize, ToSchema)]
pub struct PaginatedData<T>
where
    T: Serialize,
{
    pub items: Vec<T>,
    pub total: u64,
    pub limit: usize,
    pub offset: usize,
}

pub fn success_response<T>(status: StatusCode, trace_id: &str, data: T) -> Response
where
    T: Serialize,
{
    (
        status,
        Json(ApiResponse {
            err_code: 0,
            err_msg: "success".to_string(),
            trace_id: trace_id.to_string(),
            data: Some(data),
        }),
    )
        .into_response()
}

pub fn success_empty_response(status: StatusCode, trace_id: &str, msg: &str) -> Response {
    (
        status,
        Json(ApiResponse::<Value> {
            err_code: 0,
            err_msg: msg.to_string(),
            trace_id: trace_id.to_string(),
            data: None,
        }),
    )
        .into_response()
}

pub fn success_paginated_response<T>(
    trace_id: &str,
    items: Vec<T>,
    total: u64,
    limit: usize,
    offset: usize,
) -> Response
where
    T: Serialize,
{
    success_response(
        StatusCode::OK,
        trace_id,
        PaginatedData {
            items,
            total,
            limit,
            offset,
        },
    )
}

fn to_custom_error_code(code: &str) -> i32 {
    match code {
        "bad_request" => 1001,
        "not_found" => 1004,
        "conflict" => 1005,
        "payload_too_large" => 1013,
        "invalid_payload" => 1101,
        "invalid_state" => 1102,
        "internal_error" => 1500,
        "storage_error" => 1501,
        _ => 1999,
    }
}

pub fn error_response(status: StatusCode, trace_id: &str, code: &str, msg: &str) -> Response {
    (
        status,
        Json(ApiResponse::<Value> {
            err_code: to_custom_error_code(code),
            err_msg: msg.to_string(),
            trace_id: trace_id.to_string(),
            data: None,
        }),
    )
        .into_response()
}

/// Maps a storage failure onto the HTTP error envelope.
pub fn storage_error_response(trace_id: &str, err: &StorageError) -> Response {
    match err {
        StorageError::NotFound { .. } => {
            error_response(StatusCode::NOT_FOUND, trace_id, "not_found", &err.to_string())
        }
        StorageError::InvalidState { .. } => {
            error_response(StatusCode::CONFLICT, trace_id, "invalid_state", &err.to_string())
        }
        StorageError::Conflict { .. } => {
            error_response(StatusCode::CONFLICT, trace_id, "conflict", &err.to_string())
        }
        _ => {
            tracing::error!(trace_id = %trace_id, error = %err, "Storage error");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                trace_id,
                "storage_error",
                "storage error",
            )
        }
    }
}

/// 探针响应
#[derive(Serialize, ToSchema)]
struct HealthResponse {
    status: String,
}

fn health_body(status: &str) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: status.to_string(),
    })
}

/// Liveness check.
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses((status = 200, description = "进程存活", body = HealthResponse))
)]
async fn health() -> impl IntoResponse {
    health_body("healthy")
}

/// Readiness check: ready once the database answers.
#[utoipa::path(
    get,
    path = "/ready",
    tag = "Health",
    responses(
        (status = 200, description = "可以接收流量", body = HealthResponse),
        (status = 503, description = "数据库不可用", body = HealthResponse)
    )
)]
async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.ping().await {
        Ok(()) => (StatusCode::OK, health_body("ready")),
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            (StatusCode::SERVICE_UNAVAILABLE, health_body("not_ready"))
        }
    }
}

/// Alertmanager webhook receiver.
///
/// The body is parsed here rather than by the `Json` extractor so that every
/// malformed payload gets the same 400 error envelope.
#[utoipa::path(
    post,
    path = "/alerts",
    tag = "Webhook",
    request_body = WebhookPayload,
    responses(
        (status = 200, description = "告警已接收", body = WebhookAck),
        (status = 400, description = "请求体无效", body = ApiError),
        (status = 500, description = "存储失败，Alertmanager 将重试", body = ApiError)
    )
)]
async fn receive_alerts(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    body: Bytes,
) -> Response {
    let received_at = Utc::now();
    let payload: WebhookPayload = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                &trace_id,
                "bad_request",
                &format!("invalid JSON payload: {e}"),
            )
        }
    };

    match state.windows.ingest(&payload, received_at).await {
        Ok(ack) => (StatusCode::OK, Json(ack)).into_response(),
        Err(IngestError::Payload(e)) => error_response(
            StatusCode::BAD_REQUEST,
            &trace_id,
            "invalid_payload",
            &e.to_string(),
        ),
        Err(IngestError::Storage(e)) => storage_error_response(&trace_id, &e),
    }
}

/// 调度器当前状态
#[utoipa::path(
    get,
    path = "/v1/scheduler",
    tag = "Scheduler",
    responses((status = 200, description = "调度器状态", body = SchedulerStatus))
)]
async fn scheduler_status(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let status = state.scheduler_status.borrow().clone();
    success_response(StatusCode::OK, &trace_id, status)
}

pub fn routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(health))
        .routes(routes!(ready))
        .routes(routes!(receive_alerts))
        .routes(routes!(scheduler_status))
        .merge(windows::window_routes())
        .merge(digests::digest_routes())
}
