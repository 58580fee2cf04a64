use alertgest_ai::{
    build_digest_prompt, Completion, DigestInput, SummarizeError, Summarizer, SummaryRequest,
};
use alertgest_common::{CaptureWindowRow, DigestRow, DigestStats, NewDigest, WindowStatus};
use alertgest_notify::DigestRenderer;
use alertgest_storage::{Store, StorageError};
use chrono_tz::Tz;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("window {id} is {status}, expected closed")]
    NotClosed { id: String, status: WindowStatus },

    /// The attempt was recorded; the window stays `closed` unless
    /// `window_failed` is set.
    #[error("digest generation for window {window_id} failed (attempt {attempts}): {source}")]
    Summarize {
        window_id: String,
        attempts: i32,
        window_failed: bool,
        #[source]
        source: SummarizeError,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Clone)]
pub struct GeneratorSettings {
    pub timezone: Tz,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Upper bound for one summarizer call, fallback model included.
    pub call_timeout: Duration,
    pub max_attempts: i32,
    pub samples_per_alertname: usize,
}

/// 摘要生成器：为已关闭的捕获窗口生成摘要
pub struct DigestGenerator {
    store: Arc<Store>,
    summarizer: Arc<dyn Summarizer>,
    settings: GeneratorSettings,
}

impl DigestGenerator {
    pub fn new(
        store: Arc<Store>,
        summarizer: Arc<dyn Summarizer>,
        settings: GeneratorSettings,
    ) -> Self {
        Self {
            store,
            summarizer,
            settings,
        }
    }

    /// Produces the digest for a `closed` window.
    ///
    /// The window's status is re-read from storage, so a stale row never
    /// causes a second digest. A window without alerts gets a fixed
    /// "No notable alerts" digest and the summarizer is not called.
    pub async fn generate(&self, window: &CaptureWindowRow) -> Result<DigestRow, GenerationError> {
        let window = self.store.require_window(&window.id).await?;
        if window.status != WindowStatus::Closed {
            return Err(GenerationError::NotClosed {
                id: window.id,
                status: window.status,
            });
        }

        // 空窗口直接写入固定摘要，不调用模型
        let alerts = self.store.alerts_for_window(&window.id).await?;
        if alerts.is_empty() {
            tracing::info!(window_id = %window.id, "Window captured no alerts, skipping summarizer");
            let digest = NewDigest {
                formatted_output: Some(DigestRenderer::render_quiet(
                    window.window_start,
                    window.window_end,
                    self.settings.timezone,
                )),
                ..Default::default()
            };
            return self.complete(&window, &digest).await;
        }

        let prompt = build_digest_prompt(&DigestInput {
            window_start: window.window_start,
            window_end: window.window_end,
            timezone: self.settings.timezone,
            alerts: &alerts,
            samples_per_alertname: self.settings.samples_per_alertname,
        });
        let request = SummaryRequest {
            prompt,
            max_tokens: self.settings.max_tokens,
            temperature: self.settings.temperature,
        };

        tracing::info!(
            window_id = %window.id,
            alerts = alerts.len(),
            provider = self.summarizer.provider(),
            model = self.summarizer.model_name(),
            "Generating digest"
        );

        match self.summarize(&request).await {
            Ok(completion) => {
                let stats = DigestStats::from_alerts(&alerts);
                let digest = success_digest(request.prompt, &stats, completion);
                self.complete(&window, &digest).await
            }
            Err(err) => {
                // 失败记录保留提示词和部分响应
                let digest = NewDigest {
                    llm_model: Some(self.summarizer.model_name().to_string()),
                    raw_prompt: Some(request.prompt),
                    raw_response: err.raw_response().map(str::to_string),
                    error_message: Some(err.to_string()),
                    ..Default::default()
                };
                let (_, outcome) = self
                    .store
                    .record_generation_failure(&window.id, &digest, self.settings.max_attempts)
                    .await?;
                if outcome.window_failed {
                    tracing::error!(
                        window_id = %window.id,
                        attempts = outcome.attempts,
                        error = %err,
                        "Digest generation failed, attempts exhausted"
                    );
                } else {
                    tracing::warn!(
                        window_id = %window.id,
                        attempts = outcome.attempts,
                        error = %err,
                        "Digest generation failed, will retry"
                    );
                }
                Err(GenerationError::Summarize {
                    window_id: window.id,
                    attempts: outcome.attempts,
                    window_failed: outcome.window_failed,
                    source: err,
                })
            }
        }
    }

    async fn summarize(&self, request: &SummaryRequest) -> Result<Completion, SummarizeError> {
        let timeout = self.settings.call_timeout;
        match tokio::time::timeout(timeout, self.summarizer.summarize(request)).await {
            Ok(result) => result,
            Err(_) => Err(SummarizeError::Timeout(timeout)),
        }
    }

    async fn complete(
        &self,
        window: &CaptureWindowRow,
        digest: &NewDigest,
    ) -> Result<DigestRow, GenerationError> {
        match self.store.complete_generation(&window.id, digest).await? {
            Some(row) => {
                tracing::info!(window_id = %window.id, digest_id = %row.id, "Digest generated");
                Ok(row)
            }
            None => {
                let current = self.store.require_window(&window.id).await?;
                Err(GenerationError::NotClosed {
                    id: current.id,
                    status: current.status,
                })
            }
        }
    }
}

fn success_digest(prompt: String, stats: &DigestStats, completion: Completion) -> NewDigest {
    NewDigest {
        formatted_output: Some(DigestRenderer::render(
            stats,
            &completion.text,
            &completion.model,
        )),
        llm_model: Some(completion.model),
        prompt_tokens: completion.prompt_tokens,
        completion_tokens: completion.completion_tokens,
        raw_prompt: Some(prompt),
        raw_response: Some(completion.raw_response),
        error_message: None,
    }
}
