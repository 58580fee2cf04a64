use alertgest_common::{CaptureWindowRow, DeliveryStatus, DigestRow, WindowStatus};
use alertgest_notify::{ChatChannel, ChatError, DigestRenderer};
use alertgest_storage::{Reconciliation, Store, StorageError};
use chrono_tz::Tz;
use std::sync::Arc;
use std::time::Duration;

/// What one delivery pass did for a window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Sent { message_id: Option<String> },
    /// Definite failure; retried on a later pass unless the window failed.
    Failed { attempts: i32, window_failed: bool },
    /// The request may have arrived. Never resent automatically and never
    /// fails the window; an operator reconciles it.
    Unknown { attempts: i32 },
    /// No chat channel is configured.
    Skipped,
    /// The latest attempt is `unknown` and waits for an operator.
    AwaitingReconciliation,
    /// Attempts were already used up; the window was marked failed.
    Exhausted,
}

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("digest {id} is {status}, expected pending")]
    NotPending { id: String, status: DeliveryStatus },

    #[error("window {id} is {status}, expected digested")]
    NotDigested { id: String, status: WindowStatus },

    #[error("window {0} has no digest with formatted output")]
    NoDigest(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// 摘要投递协调器
pub struct DeliveryCoordinator {
    store: Arc<Store>,
    channel: Option<Arc<dyn ChatChannel>>,
    timezone: Tz,
    send_timeout: Duration,
    max_attempts: i32,
}

impl DeliveryCoordinator {
    pub fn new(
        store: Arc<Store>,
        channel: Option<Arc<dyn ChatChannel>>,
        timezone: Tz,
        send_timeout: Duration,
        max_attempts: i32,
    ) -> Self {
        Self {
            store,
            channel,
            timezone,
            send_timeout,
            max_attempts,
        }
    }

    /// Posts a `pending` digest once and records the outcome.
    ///
    /// A timeout or a connection lost after the request was written is
    /// recorded as `unknown`; only a definite failure becomes `failed`.
    pub async fn deliver(
        &self,
        digest: &DigestRow,
        window: &CaptureWindowRow,
    ) -> Result<DeliveryOutcome, DeliveryError> {
        let Some(channel) = self.channel.as_ref() else {
            return Ok(DeliveryOutcome::Skipped);
        };

        // 重新读取摘要和窗口，以数据库中的状态为准
        let digest = self.store.require_digest(&digest.id).await?;
        if digest.delivery_status != DeliveryStatus::Pending {
            return Err(DeliveryError::NotPending {
                id: digest.id,
                status: digest.delivery_status,
            });
        }
        let Some(text) = digest.formatted_output.as_deref() else {
            return Err(DeliveryError::NoDigest(window.id.clone()));
        };
        let window = self.store.require_window(&window.id).await?;
        if window.status != WindowStatus::Digested {
            return Err(DeliveryError::NotDigested {
                id: window.id,
                status: window.status,
            });
        }

        let message =
            DigestRenderer::message(window.window_start, window.window_end, self.timezone, text);
        // 超时视为结果未知，不能当作未发送
        let result = match tokio::time::timeout(self.send_timeout, channel.send(&message)).await {
            Ok(result) => result,
            Err(_) => Err(ChatError::Ambiguous(format!(
                "no response within {}s",
                self.send_timeout.as_secs()
            ))),
        };

        match result {
            Ok(receipt) => {
                self.store
                    .record_delivery_success(&digest.id, &window.id, receipt.message_id.clone())
                    .await?;
                tracing::info!(
                    window_id = %window.id,
                    digest_id = %digest.id,
                    channel = channel.channel_name(),
                    message_id = receipt.message_id.as_deref().unwrap_or("-"),
                    http_status = receipt.http_status,
                    "Digest delivered"
                );
                Ok(DeliveryOutcome::Sent {
                    message_id: receipt.message_id,
                })
            }
            Err(err) if err.is_ambiguous() => {
                let outcome = self
                    .store
                    .record_delivery_unknown(&digest.id, &window.id, &err.to_string())
                    .await?;
                tracing::warn!(
                    window_id = %window.id,
                    digest_id = %digest.id,
                    attempts = outcome.attempts,
                    error = %err,
                    "Digest delivery outcome unknown, awaiting reconciliation"
                );
                Ok(DeliveryOutcome::Unknown {
                    attempts: outcome.attempts,
                })
            }
            Err(err) => {
                let outcome = self
                    .store
                    .record_delivery_failure(
                        &digest.id,
                        &window.id,
                        &err.to_string(),
                        self.max_attempts,
                    )
                    .await?;
                tracing::warn!(
                    window_id = %window.id,
                    digest_id = %digest.id,
                    attempts = outcome.attempts,
                    window_failed = outcome.window_failed,
                    error = %err,
                    "Digest delivery failed"
                );
                Ok(DeliveryOutcome::Failed {
                    attempts: outcome.attempts,
                    window_failed: outcome.window_failed,
                })
            }
        }
    }

    /// Applies the retry policy to a `digested` window.
    pub async fn deliver_window(
        &self,
        window: &CaptureWindowRow,
    ) -> Result<DeliveryOutcome, DeliveryError> {
        if self.channel.is_none() {
            tracing::debug!(window_id = %window.id, "No chat channel configured, delivery skipped");
            return Ok(DeliveryOutcome::Skipped);
        }

        let window = self.store.require_window(&window.id).await?;
        if window.status != WindowStatus::Digested {
            return Err(DeliveryError::NotDigested {
                id: window.id,
                status: window.status,
            });
        }
        let digest = self
            .store
            .deliverable_digest(&window.id)
            .await?
            .ok_or_else(|| DeliveryError::NoDigest(window.id.clone()))?;

        // 按最新摘要的投递状态决定下一步
        match digest.delivery_status {
            DeliveryStatus::Pending => self.deliver(&digest, &window).await,
            DeliveryStatus::Failed if window.delivery_attempts >= self.max_attempts => {
                self.store
                    .transition_window(&window.id, WindowStatus::Failed)
                    .await?;
                tracing::error!(
                    window_id = %window.id,
                    attempts = window.delivery_attempts,
                    "Digest delivery attempts exhausted"
                );
                Ok(DeliveryOutcome::Exhausted)
            }
            DeliveryStatus::Failed => {
                // 未到上限：重新入队后再发一次
                self.store.requeue_digest(&digest.id).await?;
                self.deliver(&digest, &window).await
            }
            DeliveryStatus::Unknown => {
                tracing::debug!(
                    window_id = %window.id,
                    digest_id = %digest.id,
                    "Digest awaits reconciliation, not resending"
                );
                Ok(DeliveryOutcome::AwaitingReconciliation)
            }
            DeliveryStatus::Sent => {
                // 摘要已发送但窗口仍是 digested：补完状态切换
                self.store
                    .transition_window(&window.id, WindowStatus::Delivered)
                    .await?;
                Ok(DeliveryOutcome::Sent {
                    message_id: digest.teams_message_id,
                })
            }
        }
    }

    /// Operator resolution of an `unknown` digest.
    pub async fn reconcile(
        &self,
        digest_id: &str,
        verdict: Reconciliation,
    ) -> Result<DigestRow, StorageError> {
        let sent = matches!(verdict, Reconciliation::Sent { .. });
        let digest = self.store.reconcile_digest(digest_id, verdict).await?;
        tracing::info!(
            digest_id = %digest.id,
            window_id = %digest.capture_window_id,
            sent,
            "Digest reconciled"
        );
        Ok(digest)
    }
}
