use crate::models::{ErrorResponse, GenerateOptions, GenerateRequest, GenerateResponse};
use crate::summarizer::{Completion, SummarizeError, Summarizer, SummaryRequest};
use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

/// Ollama Provider（本地 / 集群内部署的开源模型）
///
/// Tries the primary model first. When the server answers but the model
/// fails (non-2xx, or an unusable body) the fallback model gets one try.
/// Timeouts and transport errors are returned as-is: a second model on the
/// same unreachable server would not help.
#[derive(Clone)]
pub struct OllamaProvider {
    base_url: String,
    model: String,
    fallback_model: Option<String>,
    client: Client,
    timeout: Duration,
}

impl OllamaProvider {
    pub fn new(
        base_url: String,
        model: String,
        fallback_model: Option<String>,
        timeout_secs: u64,
    ) -> Result<Self> {
        let timeout = Duration::from_secs(timeout_secs.max(1));
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            fallback_model: fallback_model.filter(|m| !m.trim().is_empty()),
            client,
            timeout,
        })
    }

    async fn generate(
        &self,
        model: &str,
        request: &SummaryRequest,
    ) -> std::result::Result<Completion, SummarizeError> {
        let body = GenerateRequest {
            model: model.to_string(),
            prompt: request.prompt.clone(),
            stream: false,
            options: GenerateOptions {
                temperature: request.temperature,
                num_predict: request.max_tokens,
            },
        };

        tracing::debug!(
            model = %model,
            prompt_length = request.prompt.len(),
            "Calling Ollama generate"
        );

        let resp = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = resp.status();
        let text = resp.text().await.map_err(|e| self.classify(e))?;

        if !status.is_success() {
            let detail = serde_json::from_str::<ErrorResponse>(&text)
                .map(|e| e.error)
                .unwrap_or_else(|_| text.clone());
            tracing::error!(status = %status, model = %model, error = %detail, "Ollama request failed");
            return Err(SummarizeError::Api {
                status: status.as_u16(),
                body: text,
            });
        }

        let parsed: GenerateResponse =
            serde_json::from_str(&text).map_err(|e| SummarizeError::Malformed {
                reason: e.to_string(),
                raw: Some(text.clone()),
            })?;

        let completion = parsed
            .response
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .ok_or_else(|| SummarizeError::Malformed {
                reason: "empty 'response' field".to_string(),
                raw: Some(text.clone()),
            })?
            .to_string();

        tracing::debug!(
            model = %model,
            prompt_tokens = ?parsed.prompt_eval_count,
            completion_tokens = ?parsed.eval_count,
            "Ollama response received"
        );

        Ok(Completion {
            text: completion,
            model: parsed.model.unwrap_or_else(|| model.to_string()),
            prompt_tokens: parsed.prompt_eval_count.map(clamp_tokens),
            completion_tokens: parsed.eval_count.map(clamp_tokens),
            raw_response: text,
        })
    }

    fn classify(&self, err: reqwest::Error) -> SummarizeError {
        if err.is_timeout() {
            SummarizeError::Timeout(self.timeout)
        } else {
            SummarizeError::Transport(err.to_string())
        }
    }
}

fn clamp_tokens(count: i64) -> i32 {
    count.clamp(0, i32::MAX as i64) as i32
}

#[async_trait]
impl Summarizer for OllamaProvider {
    fn provider(&self) -> &str {
        "ollama"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn summarize(
        &self,
        request: &SummaryRequest,
    ) -> std::result::Result<Completion, SummarizeError> {
        let primary = match self.generate(&self.model, request).await {
            Ok(completion) => return Ok(completion),
            Err(err) => err,
        };

        let Some(fallback) = self.fallback_model.as_deref() else {
            return Err(primary);
        };
        if matches!(
            primary,
            SummarizeError::Timeout(_) | SummarizeError::Transport(_)
        ) {
            return Err(primary);
        }

        tracing::warn!(
            model = %self.model,
            fallback = %fallback,
            error = %primary,
            "Primary model failed, trying fallback"
        );
        self.generate(fallback, request).await
    }
}
