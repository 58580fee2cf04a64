//! Digest scheduler: close due windows, generate, then deliver.

use alertgest_common::{CaptureWindowRow, WindowStatus};
use alertgest_storage::Store;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinError;
use utoipa::ToSchema;

use crate::capture::WindowManager;
use crate::digest::{
    DeliveryCoordinator, DeliveryError, DeliveryOutcome, DigestGenerator, GenerationError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerPhase {
    Idle,
    ClosingWindows,
    Generating,
    Delivering,
}

/// Counters for one scheduler tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct TickReport {
    /// Windows moved `active → closed`.
    pub closed: usize,
    pub generated: usize,
    pub generation_failed: usize,
    pub delivered: usize,
    pub delivery_failed: usize,
    /// Deliveries recorded as `unknown`.
    pub delivery_unknown: usize,
    /// Windows left alone (no channel, awaiting reconciliation, moved on).
    pub skipped: usize,
    /// Storage errors and panics.
    pub errors: usize,
}

/// 调度器状态快照
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SchedulerStatus {
    pub phase: SchedulerPhase,
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_tick_started_at: Option<DateTime<Utc>>,
    pub last_tick_finished_at: Option<DateTime<Utc>>,
    pub last_report: Option<TickReport>,
}

impl Default for SchedulerStatus {
    fn default() -> Self {
        Self {
            phase: SchedulerPhase::Idle,
            next_run_at: None,
            last_tick_started_at: None,
            last_tick_finished_at: None,
            last_report: None,
        }
    }
}

pub struct DigestScheduler {
    store: Arc<Store>,
    windows: Arc<WindowManager>,
    generator: Arc<DigestGenerator>,
    delivery: Arc<DeliveryCoordinator>,
    schedule: Schedule,
    timezone: Tz,
    max_concurrent: usize,
    status: watch::Sender<SchedulerStatus>,
}

impl DigestScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<Store>,
        windows: Arc<WindowManager>,
        generator: Arc<DigestGenerator>,
        delivery: Arc<DeliveryCoordinator>,
        schedule: Schedule,
        timezone: Tz,
        max_concurrent: usize,
    ) -> Self {
        let (status, _) = watch::channel(SchedulerStatus::default());
        Self {
            store,
            windows,
            generator,
            delivery,
            schedule,
            timezone,
            max_concurrent: max_concurrent.max(1),
            status,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SchedulerStatus> {
        self.status.subscribe()
    }

    /// Next trigger strictly after `now`, evaluated in the digest timezone.
    pub fn next_run_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule
            .after(&now.with_timezone(&self.timezone))
            .next()
            .map(|t| t.with_timezone(&Utc))
    }

    pub async fn start(self: Arc<Self>) {
        tracing::info!(
            timezone = %self.timezone,
            max_concurrent = self.max_concurrent,
            "Digest scheduler started"
        );

        loop {
            let now = Utc::now();
            let Some(next) = self.next_run_after(now) else {
                tracing::error!("Digest schedule has no upcoming run, scheduler stopped");
                return;
            };
            self.status.send_modify(|s| s.next_run_at = Some(next));
            tracing::debug!(next = %next, "Next digest run scheduled");

            // 计算出的时间已过去时立即执行
            let wait = (next - now).to_std().unwrap_or_default();
            tokio::time::sleep(wait).await;

            let report = self.tick(Utc::now()).await;
            if report.errors > 0 {
                tracing::error!(
                    errors = report.errors,
                    "Digest scheduler tick finished with errors"
                );
            }
        }
    }

    /// Runs the three phases once. Each window is handled in its own task;
    /// an error or panic in one is counted and does not stop the rest.
    pub async fn tick(&self, now: DateTime<Utc>) -> TickReport {
        let mut report = TickReport::default();
        self.status.send_modify(|s| {
            s.last_tick_started_at = Some(Utc::now());
        });

        // 阶段一：关闭到期窗口
        self.set_phase(SchedulerPhase::ClosingWindows);
        match self.windows.close_due_windows(now).await {
            Ok(closed) => report.closed = closed.len(),
            Err(e) => {
                tracing::error!(error = %e, "Failed to close due windows");
                report.errors += 1;
            }
        }

        // 阶段二：为已关闭窗口生成摘要
        self.set_phase(SchedulerPhase::Generating);
        if let Some(closed) = self.load(WindowStatus::Closed, &mut report).await {
            let generator = self.generator.clone();
            let results = self
                .for_each_window(closed, move |window| {
                    let generator = generator.clone();
                    async move { generator.generate(&window).await }
                })
                .await;
            for (window_id, result) in results {
                match result {
                    Ok(Ok(_)) => report.generated += 1,
                    Ok(Err(GenerationError::Summarize { .. })) => report.generation_failed += 1,
                    Ok(Err(GenerationError::NotClosed { status, .. })) => {
                        tracing::debug!(window_id = %window_id, status = %status, "Window moved on before generation");
                        report.skipped += 1;
                    }
                    Ok(Err(e @ GenerationError::Storage(_))) => {
                        tracing::error!(window_id = %window_id, error = %e, "Digest generation failed");
                        report.errors += 1;
                    }
                    Err(e) => record_join_error(&window_id, "generation", &e, &mut report),
                }
            }
        }

        // 阶段三：投递已生成的摘要
        self.set_phase(SchedulerPhase::Delivering);
        if let Some(digested) = self.load(WindowStatus::Digested, &mut report).await {
            let delivery = self.delivery.clone();
            let results = self
                .for_each_window(digested, move |window| {
                    let delivery = delivery.clone();
                    async move { delivery.deliver_window(&window).await }
                })
                .await;
            for (window_id, result) in results {
                match result {
                    Ok(Ok(DeliveryOutcome::Sent { .. })) => report.delivered += 1,
                    Ok(Ok(DeliveryOutcome::Failed { .. } | DeliveryOutcome::Exhausted)) => {
                        report.delivery_failed += 1
                    }
                    Ok(Ok(DeliveryOutcome::Unknown { .. })) => report.delivery_unknown += 1,
                    Ok(Ok(
                        DeliveryOutcome::Skipped | DeliveryOutcome::AwaitingReconciliation,
                    )) => report.skipped += 1,
                    Ok(Err(DeliveryError::NotDigested { status, .. })) => {
                        tracing::debug!(window_id = %window_id, status = %status, "Window moved on before delivery");
                        report.skipped += 1;
                    }
                    Ok(Err(e)) => {
                        tracing::error!(window_id = %window_id, error = %e, "Digest delivery failed");
                        report.errors += 1;
                    }
                    Err(e) => record_join_error(&window_id, "delivery", &e, &mut report),
                }
            }
        }

        tracing::info!(
            closed = report.closed,
            generated = report.generated,
            generation_failed = report.generation_failed,
            delivered = report.delivered,
            delivery_failed = report.delivery_failed,
            delivery_unknown = report.delivery_unknown,
            skipped = report.skipped,
            errors = report.errors,
            "Digest scheduler tick finished"
        );
        let finished = report.clone();
        self.status.send_modify(|s| {
            s.phase = SchedulerPhase::Idle;
            s.last_tick_finished_at = Some(Utc::now());
            s.last_report = Some(finished);
        });
        report
    }

    fn set_phase(&self, phase: SchedulerPhase) {
        self.status.send_modify(|s| s.phase = phase);
    }

    async fn load(
        &self,
        status: WindowStatus,
        report: &mut TickReport,
    ) -> Option<Vec<CaptureWindowRow>> {
        match self.store.windows_with_status(status).await {
            Ok(windows) => Some(windows),
            Err(e) => {
                tracing::error!(status = %status, error = %e, "Failed to load windows");
                report.errors += 1;
                None
            }
        }
    }

    /// Spawns `work` for every window, at most `max_concurrent` at a time,
    /// and collects each result keyed by window id.
    async fn for_each_window<F, Fut, T>(
        &self,
        windows: Vec<CaptureWindowRow>,
        work: F,
    ) -> Vec<(String, Result<T, JoinError>)>
    where
        F: Fn(CaptureWindowRow) -> Fut,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut handles = Vec::with_capacity(windows.len());

        for window in windows {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    tracing::error!(error = %e, "Scheduler semaphore closed");
                    break;
                }
            };
            let window_id = window.id.clone();
            let task = work(window);
            let handle = tokio::spawn(async move {
                // 任务结束时释放许可
                let _permit = permit;
                task.await
            });
            handles.push((window_id, handle));
        }

        let mut results = Vec::with_capacity(handles.len());
        // 任务内的 panic 以 JoinError 返回，由调用方计数
        for (window_id, handle) in handles {
            results.push((window_id, handle.await));
        }
        results
    }
}

fn record_join_error(window_id: &str, phase: &str, err: &JoinError, report: &mut TickReport) {
    if err.is_panic() {
        tracing::error!(window_id = %window_id, phase, "Window task panicked");
    } else {
        tracing::error!(window_id = %window_id, phase, error = %err, "Window task cancelled");
    }
    report.errors += 1;
}
