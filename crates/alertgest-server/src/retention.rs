use alertgest_storage::{Store, StorageError};
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time;

/// Deletes alerts older than `retention_days` that no live window needs.
pub async fn run_cleanup(store: &Store, retention_days: i64) -> Result<u64, StorageError> {
    let cutoff = Utc::now() - ChronoDuration::days(retention_days);
    store.cleanup_alerts(cutoff).await
}

pub struct RetentionTask {
    store: Arc<Store>,
    retention_days: i64,
    interval: Duration,
}

impl RetentionTask {
    pub fn new(store: Arc<Store>, retention_days: i64, interval: Duration) -> Self {
        Self {
            store,
            retention_days,
            interval,
        }
    }

    pub async fn start(self: Arc<Self>) {
        tracing::info!(
            retention_days = self.retention_days,
            interval_secs = self.interval.as_secs(),
            "Alert retention cleanup started"
        );
        let mut tick = time::interval(self.interval);
        loop {
            tick.tick().await;
            match run_cleanup(&self.store, self.retention_days).await {
                Ok(removed) if removed > 0 => {
                    tracing::info!(removed, "Cleaned up expired alerts")
                }
                Err(e) => tracing::error!(error = %e, "Alert cleanup failed"),
                _ => {}
            }
        }
    }
}
