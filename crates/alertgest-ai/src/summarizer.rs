use async_trait::async_trait;
use std::time::Duration;

/// 摘要请求
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryRequest {
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// 摘要结果
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    /// Model that actually produced the text (may be the fallback).
    pub model: String,
    pub prompt_tokens: Option<i32>,
    pub completion_tokens: Option<i32>,
    /// Response body exactly as received.
    pub raw_response: String,
}

#[derive(Debug, thiserror::Error)]
pub enum SummarizeError {
    #[error("summarizer timed out after {0:?}")]
    Timeout(Duration),

    #[error("summarizer returned HTTP {status}: {body}")]
    Api { status: u16, body: String },

    #[error("malformed summarizer response: {reason}")]
    Malformed { reason: String, raw: Option<String> },

    #[error("summarizer transport error: {0}")]
    Transport(String),
}

impl SummarizeError {
    /// Whatever body the collaborator sent back before the failure.
    pub fn raw_response(&self) -> Option<&str> {
        match self {
            SummarizeError::Api { body, .. } if !body.is_empty() => Some(body),
            SummarizeError::Malformed { raw, .. } => raw.as_deref(),
            _ => None,
        }
    }
}

/// External text-summarization collaborator.
#[async_trait]
pub trait Summarizer: Send + Sync {
    fn provider(&self) -> &str;

    fn model_name(&self) -> &str;

    async fn summarize(&self, request: &SummaryRequest) -> Result<Completion, SummarizeError>;
}
