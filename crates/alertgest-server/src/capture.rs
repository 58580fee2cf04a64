//! Capture Window Manager: maps alert arrival times to stored windows.

use alertgest_common::{
    CaptureInterval, CaptureWindowRow, PayloadError, WebhookAck, WebhookPayload, WindowStatus,
};
use alertgest_storage::{Store, StorageError};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Insert races on `window_start` are resolved by looking the row up again;
/// the second pass always finds it, so this bound is never hit in practice.
const MAX_RESOLVE_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub enum WindowResolution {
    Window(CaptureWindowRow),
    /// The timestamp is outside every capture window.
    NoWindow,
}

impl WindowResolution {
    pub fn window(&self) -> Option<&CaptureWindowRow> {
        match self {
            WindowResolution::Window(w) => Some(w),
            WindowResolution::NoWindow => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("invalid webhook payload: {0}")]
    Payload(#[from] PayloadError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub struct WindowManager {
    store: Arc<Store>,
    interval: CaptureInterval,
}

impl WindowManager {
    pub fn new(store: Arc<Store>, interval: CaptureInterval) -> Self {
        Self { store, interval }
    }

    /// Finds or creates the window containing `ts`.
    ///
    /// Concurrent callers for the same occurrence all get the same row: a
    /// losing insert hits the unique `window_start` index and the lookup is
    /// repeated. An occurrence that would overlap a stored window (possible
    /// after the interval configuration changed) resolves to
    /// [`WindowResolution::NoWindow`].
    pub async fn resolve_window(
        &self,
        ts: DateTime<Utc>,
    ) -> Result<WindowResolution, StorageError> {
        for attempt in 1..=MAX_RESOLVE_ATTEMPTS {
            // 已有窗口直接复用
            if let Some(window) = self.store.find_window_containing(ts).await? {
                return Ok(WindowResolution::Window(window));
            }

            // 时间点不在任何捕获区间内
            let Some(occurrence) = self.interval.occurrence_containing(ts) else {
                return Ok(WindowResolution::NoWindow);
            };

            let overlapping = self
                .store
                .find_windows_overlapping(occurrence.start, occurrence.end)
                .await?;
            if let Some(existing) = overlapping.first() {
                tracing::warn!(
                    ts = %ts,
                    occurrence_start = %occurrence.start,
                    occurrence_end = %occurrence.end,
                    existing_id = %existing.id,
                    existing_start = %existing.window_start,
                    existing_end = %existing.window_end,
                    "Capture occurrence overlaps a stored window, leaving alert unassociated"
                );
                return Ok(WindowResolution::NoWindow);
            }

            // 插入新窗口；唯一索引冲突说明并发创建，重新查找
            match self.store.insert_window(occurrence.start, occurrence.end).await {
                Ok(window) => {
                    tracing::info!(
                        window_id = %window.id,
                        start = %window.window_start,
                        end = %window.window_end,
                        "Capture window opened"
                    );
                    return Ok(WindowResolution::Window(window));
                }
                Err(e) if e.is_conflict() => {
                    tracing::debug!(
                        attempt,
                        start = %occurrence.start,
                        "Window created concurrently, resolving again"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        Ok(match self.store.find_window_containing(ts).await? {
            Some(window) => WindowResolution::Window(window),
            None => WindowResolution::NoWindow,
        })
    }

    /// Closes every active window whose end has passed. Returns only the
    /// windows this call closed, so repeated calls are harmless.
    pub async fn close_due_windows(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<CaptureWindowRow>, StorageError> {
        let closed = self.store.close_windows_due(now).await?;
        for window in &closed {
            tracing::info!(
                window_id = %window.id,
                alert_count = window.alert_count,
                end = %window.window_end,
                "Capture window closed"
            );
        }
        Ok(closed)
    }

    /// Validates and stores one webhook delivery.
    ///
    /// The payload is checked in full before anything is written. All alerts
    /// of the payload share `received_at` and land in one transaction.
    pub async fn ingest(
        &self,
        payload: &WebhookPayload,
        received_at: DateTime<Utc>,
    ) -> Result<WebhookAck, IngestError> {
        // 先完整校验，失败时不写入任何告警
        let alerts = payload.to_new_alerts()?;
        if alerts.is_empty() {
            return Ok(WebhookAck::received(0));
        }

        let mut retried = false;
        loop {
            let window = match self.resolve_window(received_at).await? {
                WindowResolution::Window(w) if w.status == WindowStatus::Active => Some(w),
                WindowResolution::Window(w) => {
                    tracing::warn!(
                        window_id = %w.id,
                        status = %w.status,
                        "Alert arrived for a window that is no longer active, storing unassociated"
                    );
                    None
                }
                WindowResolution::NoWindow => None,
            };
            let window_id = window.as_ref().map(|w| w.id.as_str());

            match self.store.insert_alerts(&alerts, window_id, received_at).await {
                Ok(stored) => {
                    tracing::info!(
                        count = stored.len(),
                        window_id = window_id.unwrap_or("-"),
                        receiver = %payload.receiver,
                        "Alerts ingested"
                    );
                    return Ok(WebhookAck::received(stored.len()));
                }
                // 解析与插入之间窗口已关闭，重新解析一次
                Err(StorageError::InvalidState { .. }) if !retried => {
                    retried = true;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}
