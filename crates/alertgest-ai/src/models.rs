use serde::{Deserialize, Serialize};

/// Ollama `/api/generate` 请求体（非流式）
#[derive(Debug, Clone, Serialize)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    pub stream: bool,
    pub options: GenerateOptions,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerateOptions {
    pub temperature: f32,
    /// Upper bound on generated tokens.
    pub num_predict: u32,
}

/// Ollama `/api/generate` 响应体
#[derive(Debug, Clone, Deserialize)]
pub struct GenerateResponse {
    pub model: Option<String>,
    pub response: Option<String>,
    pub done: Option<bool>,
    pub prompt_eval_count: Option<i64>,
    pub eval_count: Option<i64>,
}

/// Ollama error body, e.g. `{"error":"model 'x' not found"}`.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
