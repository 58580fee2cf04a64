mod common;

use alertgest_ai::SummarizeError;
use alertgest_common::{DeliveryStatus, WindowStatus};
use alertgest_notify::NO_NOTABLE_ALERTS;
use alertgest_server::capture::{IngestError, WindowResolution};
use alertgest_server::digest::{DeliveryOutcome, GenerationError};
use alertgest_server::scheduler::SchedulerPhase;
use alertgest_storage::Reconciliation;
use common::{
    alert_json, build_test_context, build_with, completion, payload, single, utc, TestSetup,
};
use std::time::Duration;

fn window_of(resolution: &WindowResolution) -> &alertgest_common::CaptureWindowRow {
    resolution.window().expect("timestamp should fall inside a window")
}

#[tokio::test]
async fn resolve_window_is_idempotent() {
    let ctx = build_test_context().await.expect("test context should build");
    let ts = utc("2024-01-15T19:00:00Z");

    let first = ctx.windows.resolve_window(ts).await.unwrap();
    let second = ctx.windows.resolve_window(ts).await.unwrap();
    let later = ctx.windows.resolve_window(utc("2024-01-16T07:59:59Z")).await.unwrap();

    assert_eq!(window_of(&first).id, window_of(&second).id);
    assert_eq!(window_of(&first).id, window_of(&later).id);
    assert_eq!(window_of(&first).window_start, utc("2024-01-15T18:00:00Z"));
    assert_eq!(window_of(&first).window_end, utc("2024-01-16T08:00:00Z"));
    assert_eq!(ctx.store.count_windows(None).await.unwrap(), 1);
}

#[tokio::test]
async fn daytime_alert_has_no_window() {
    let ctx = build_test_context().await.expect("test context should build");
    let resolution = ctx.windows.resolve_window(utc("2024-01-16T12:00:00Z")).await.unwrap();
    assert_eq!(resolution, WindowResolution::NoWindow);
    assert_eq!(ctx.store.count_windows(None).await.unwrap(), 0);
}

#[tokio::test]
async fn overnight_alerts_are_digested_and_delivered() {
    let ctx = build_test_context().await.expect("test context should build");

    ctx.windows
        .ingest(&single("HighCPU"), utc("2024-01-15T19:00:00Z"))
        .await
        .unwrap();
    ctx.windows
        .ingest(&single("DiskFull"), utc("2024-01-15T23:30:00Z"))
        .await
        .unwrap();
    // 恰好在 window_end：不属于夜间窗口
    ctx.windows
        .ingest(&single("LateAlert"), utc("2024-01-16T08:00:00Z"))
        .await
        .unwrap();

    let windows = ctx.store.list_windows(None, 10, 0).await.unwrap();
    assert_eq!(windows.len(), 1);
    let window = &windows[0];
    assert_eq!(window.alert_count, 2);
    assert_eq!(ctx.store.count_unassociated_alerts().await.unwrap(), 1);

    let report = ctx.scheduler.tick(utc("2024-01-16T08:00:00Z")).await;
    assert_eq!(report.closed, 1);
    assert_eq!(report.generated, 1);
    assert_eq!(report.delivered, 1);
    assert_eq!(report.errors, 0);

    assert_eq!(ctx.summarizer.calls(), 1);
    let prompt = &ctx.summarizer.prompts()[0];
    assert!(prompt.contains("HighCPU"));
    assert!(prompt.contains("DiskFull"));
    assert!(!prompt.contains("LateAlert"));

    let window = ctx.store.require_window(&window.id).await.unwrap();
    assert_eq!(window.status, WindowStatus::Delivered);
    assert!(window.digest_generated_at.is_some());
    assert!(window.digest_sent_at.is_some());

    let digests = ctx.store.list_digests_for_window(&window.id).await.unwrap();
    assert_eq!(digests.len(), 1);
    assert_eq!(digests[0].delivery_status, DeliveryStatus::Sent);
    assert_eq!(digests[0].teams_message_id.as_deref(), Some("msg-1"));
    assert_eq!(digests[0].llm_model.as_deref(), Some("fake-model"));
    assert_eq!(digests[0].prompt_tokens, Some(120));

    let sent = ctx.channel.sent();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].text.contains("**2 alerts**"));
    assert!(sent[0].text.contains("All quiet."));
}

#[tokio::test]
async fn contiguous_interval_hands_boundary_alert_to_next_window() {
    let ctx = build_with(TestSetup {
        start: "08:00",
        end: "08:00",
        ..TestSetup::default()
    })
    .await
    .expect("test context should build");

    ctx.windows
        .ingest(&single("HighCPU"), utc("2024-01-15T19:00:00Z"))
        .await
        .unwrap();
    ctx.windows
        .ingest(&single("LateAlert"), utc("2024-01-16T08:00:00Z"))
        .await
        .unwrap();

    let windows = ctx.store.list_windows(None, 10, 0).await.unwrap();
    assert_eq!(windows.len(), 2);
    // Newest first.
    assert_eq!(windows[0].window_start, utc("2024-01-16T08:00:00Z"));
    assert_eq!(windows[1].window_end, utc("2024-01-16T08:00:00Z"));
    assert_eq!(windows[0].alert_count, 1);
    assert_eq!(windows[1].alert_count, 1);
    assert_eq!(ctx.store.count_unassociated_alerts().await.unwrap(), 0);
}

#[tokio::test]
async fn empty_window_gets_quiet_digest_without_summarizer() {
    let ctx = build_with(TestSetup {
        with_channel: false,
        ..TestSetup::default()
    })
    .await
    .expect("test context should build");

    let resolution = ctx.windows.resolve_window(utc("2024-01-15T18:00:00Z")).await.unwrap();
    let window = window_of(&resolution).clone();

    let report = ctx.scheduler.tick(utc("2024-01-16T09:00:00Z")).await;
    assert_eq!(report.generated, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(ctx.summarizer.calls(), 0);

    let window = ctx.store.require_window(&window.id).await.unwrap();
    assert_eq!(window.status, WindowStatus::Digested);
    let digests = ctx.store.list_digests_for_window(&window.id).await.unwrap();
    assert_eq!(digests.len(), 1);
    assert!(digests[0]
        .formatted_output
        .as_deref()
        .unwrap()
        .starts_with(NO_NOTABLE_ALERTS));
    assert_eq!(digests[0].delivery_status, DeliveryStatus::Pending);
    assert_eq!(digests[0].llm_model, None);
}

#[tokio::test]
async fn repeated_ticks_do_not_duplicate_work() {
    let ctx = build_test_context().await.expect("test context should build");
    ctx.windows
        .ingest(&single("HighCPU"), utc("2024-01-15T19:00:00Z"))
        .await
        .unwrap();

    let now = utc("2024-01-16T08:30:00Z");
    let first = ctx.scheduler.tick(now).await;
    let second = ctx.scheduler.tick(now).await;

    assert_eq!((first.closed, first.generated, first.delivered), (1, 1, 1));
    assert_eq!((second.closed, second.generated, second.delivered), (0, 0, 0));
    assert_eq!(ctx.summarizer.calls(), 1);
    assert_eq!(ctx.channel.calls(), 1);
}

#[tokio::test]
async fn active_window_is_left_alone_before_its_end() {
    let ctx = build_test_context().await.expect("test context should build");
    ctx.windows
        .ingest(&single("HighCPU"), utc("2024-01-15T19:00:00Z"))
        .await
        .unwrap();

    let report = ctx.scheduler.tick(utc("2024-01-16T07:59:59Z")).await;
    assert_eq!(report.closed, 0);
    assert_eq!(ctx.summarizer.calls(), 0);
    assert_eq!(
        ctx.store.windows_with_status(WindowStatus::Active).await.unwrap().len(),
        1
    );
}

#[tokio::test]
async fn delivery_failures_exhaust_attempts() {
    let ctx = build_test_context().await.expect("test context should build");
    for _ in 0..3 {
        ctx.channel.push_rejected();
    }
    ctx.windows
        .ingest(&single("HighCPU"), utc("2024-01-15T19:00:00Z"))
        .await
        .unwrap();
    let now = utc("2024-01-16T08:00:00Z");

    let report = ctx.scheduler.tick(now).await;
    assert_eq!(report.delivery_failed, 1);
    let window = &ctx.store.list_windows(None, 1, 0).await.unwrap()[0];
    assert_eq!(window.status, WindowStatus::Digested);
    assert_eq!(window.delivery_attempts, 1);

    ctx.scheduler.tick(now).await;
    let report = ctx.scheduler.tick(now).await;
    assert_eq!(report.delivery_failed, 1);
    assert_eq!(ctx.channel.calls(), 3);

    let window = ctx.store.require_window(&window.id).await.unwrap();
    assert_eq!(window.status, WindowStatus::Failed);
    assert_eq!(window.delivery_attempts, 3);

    let report = ctx.scheduler.tick(now).await;
    assert_eq!(report.delivery_failed + report.delivered, 0);
    assert_eq!(ctx.channel.calls(), 3);

    // 只有一条摘要记录，原地重试
    let digests = ctx.store.list_digests_for_window(&window.id).await.unwrap();
    assert_eq!(digests.len(), 1);
    assert_eq!(digests[0].delivery_status, DeliveryStatus::Failed);
    assert!(digests[0].error_message.as_deref().unwrap().contains("400"));
}

#[tokio::test]
async fn delivery_recovers_after_a_failure() {
    let ctx = build_test_context().await.expect("test context should build");
    ctx.channel.push_rejected();
    ctx.windows
        .ingest(&single("HighCPU"), utc("2024-01-15T19:00:00Z"))
        .await
        .unwrap();
    let now = utc("2024-01-16T08:00:00Z");

    ctx.scheduler.tick(now).await;
    let report = ctx.scheduler.tick(now).await;
    assert_eq!(report.delivered, 1);

    let window = &ctx.store.list_windows(None, 1, 0).await.unwrap()[0];
    assert_eq!(window.status, WindowStatus::Delivered);
    assert_eq!(window.delivery_attempts, 1);
    assert_eq!(ctx.channel.calls(), 2);
}

#[tokio::test]
async fn ambiguous_delivery_is_never_resent() {
    let ctx = build_test_context().await.expect("test context should build");
    ctx.channel.push_ambiguous();
    ctx.windows
        .ingest(&single("HighCPU"), utc("2024-01-15T19:00:00Z"))
        .await
        .unwrap();
    let now = utc("2024-01-16T08:00:00Z");

    let report = ctx.scheduler.tick(now).await;
    assert_eq!(report.delivery_unknown, 1);
    let report = ctx.scheduler.tick(now).await;
    assert_eq!(report.skipped, 1);
    assert_eq!(ctx.channel.calls(), 1);

    let unreconciled = ctx.store.list_unreconciled(10, 0).await.unwrap();
    assert_eq!(unreconciled.len(), 1);
    let digest = &unreconciled[0];
    assert_eq!(digest.delivery_status, DeliveryStatus::Unknown);

    let window = ctx.store.require_window(&digest.capture_window_id).await.unwrap();
    assert_eq!(window.status, WindowStatus::Digested);
    assert_eq!(window.delivery_attempts, 1);

    let reconciled = ctx
        .delivery
        .reconcile(
            &digest.id,
            Reconciliation::Sent {
                message_id: Some("found-in-channel".to_string()),
            },
        )
        .await
        .unwrap();
    assert_eq!(reconciled.delivery_status, DeliveryStatus::Sent);
    assert_eq!(reconciled.teams_message_id.as_deref(), Some("found-in-channel"));

    let window = ctx.store.require_window(&window.id).await.unwrap();
    assert_eq!(window.status, WindowStatus::Delivered);
    assert_eq!(ctx.store.count_unreconciled().await.unwrap(), 0);
}

#[tokio::test]
async fn reconciled_as_not_sent_is_retried() {
    let ctx = build_test_context().await.expect("test context should build");
    ctx.channel.push_ambiguous();
    ctx.windows
        .ingest(&single("HighCPU"), utc("2024-01-15T19:00:00Z"))
        .await
        .unwrap();
    let now = utc("2024-01-16T08:00:00Z");

    ctx.scheduler.tick(now).await;
    let digest = ctx.store.list_unreconciled(10, 0).await.unwrap().remove(0);
    ctx.delivery
        .reconcile(&digest.id, Reconciliation::NotSent)
        .await
        .unwrap();

    let report = ctx.scheduler.tick(now).await;
    assert_eq!(report.delivered, 1);
    assert_eq!(ctx.channel.calls(), 2);
    let digest = ctx.store.require_digest(&digest.id).await.unwrap();
    assert_eq!(digest.delivery_status, DeliveryStatus::Sent);
}

#[tokio::test]
async fn reconcile_requires_unknown_digest() {
    let ctx = build_test_context().await.expect("test context should build");
    ctx.windows
        .ingest(&single("HighCPU"), utc("2024-01-15T19:00:00Z"))
        .await
        .unwrap();
    ctx.scheduler.tick(utc("2024-01-16T08:00:00Z")).await;

    let window = &ctx.store.list_windows(None, 1, 0).await.unwrap()[0];
    let digest = ctx.store.deliverable_digest(&window.id).await.unwrap().unwrap();
    assert_eq!(digest.delivery_status, DeliveryStatus::Sent);

    let err = ctx
        .delivery
        .reconcile(&digest.id, Reconciliation::NotSent)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("expected unknown"), "{err}");
    assert!(ctx
        .delivery
        .reconcile("missing", Reconciliation::NotSent)
        .await
        .unwrap_err()
        .is_not_found());
}

#[tokio::test]
async fn ambiguous_last_attempt_waits_for_operator() {
    let ctx = build_test_context().await.expect("test context should build");
    ctx.channel.push_rejected();
    ctx.channel.push_rejected();
    ctx.channel.push_ambiguous();
    ctx.windows
        .ingest(&single("HighCPU"), utc("2024-01-15T19:00:00Z"))
        .await
        .unwrap();
    let now = utc("2024-01-16T08:00:00Z");

    ctx.scheduler.tick(now).await;
    ctx.scheduler.tick(now).await;
    let report = ctx.scheduler.tick(now).await;
    assert_eq!(report.delivery_unknown, 1);

    let window = ctx.store.list_windows(None, 1, 0).await.unwrap().remove(0);
    assert_eq!(window.status, WindowStatus::Digested);
    assert_eq!(window.delivery_attempts, 3);

    let report = ctx.scheduler.tick(now).await;
    assert_eq!(report.skipped, 1);
    assert_eq!(ctx.channel.calls(), 3);

    let digest = ctx.store.list_unreconciled(10, 0).await.unwrap().remove(0);
    ctx.delivery
        .reconcile(&digest.id, Reconciliation::Sent { message_id: None })
        .await
        .unwrap();
    let window = ctx.store.require_window(&window.id).await.unwrap();
    assert_eq!(window.status, WindowStatus::Delivered);
    assert!(window.digest_sent_at.is_some());
}

#[tokio::test]
async fn ambiguous_last_attempt_reconciled_as_not_sent_exhausts_window() {
    let ctx = build_test_context().await.expect("test context should build");
    ctx.channel.push_rejected();
    ctx.channel.push_rejected();
    ctx.channel.push_ambiguous();
    ctx.windows
        .ingest(&single("HighCPU"), utc("2024-01-15T19:00:00Z"))
        .await
        .unwrap();
    let now = utc("2024-01-16T08:00:00Z");
    for _ in 0..3 {
        ctx.scheduler.tick(now).await;
    }

    let digest = ctx.store.list_unreconciled(10, 0).await.unwrap().remove(0);
    ctx.delivery
        .reconcile(&digest.id, Reconciliation::NotSent)
        .await
        .unwrap();

    let report = ctx.scheduler.tick(now).await;
    assert_eq!(report.delivery_failed, 1);
    assert_eq!(ctx.channel.calls(), 3);
    let window = ctx.store.require_window(&digest.capture_window_id).await.unwrap();
    assert_eq!(window.status, WindowStatus::Failed);
}

#[tokio::test]
async fn send_timeout_is_recorded_as_unknown() {
    let ctx = build_with(TestSetup {
        send_timeout: Duration::from_millis(100),
        ..TestSetup::default()
    })
    .await
    .expect("test context should build");
    ctx.channel.set_delay(Duration::from_secs(2));
    ctx.windows
        .ingest(&single("HighCPU"), utc("2024-01-15T19:00:00Z"))
        .await
        .unwrap();

    let report = ctx.scheduler.tick(utc("2024-01-16T08:00:00Z")).await;
    assert_eq!(report.delivery_unknown, 1);
    let digest = ctx.store.list_unreconciled(10, 0).await.unwrap().remove(0);
    assert!(digest.error_message.as_deref().unwrap().contains("unknown"));
}

#[tokio::test]
async fn generation_failures_are_capped() {
    let ctx = build_test_context().await.expect("test context should build");
    for _ in 0..3 {
        ctx.summarizer.push_api_error();
    }
    ctx.windows
        .ingest(&single("HighCPU"), utc("2024-01-15T19:00:00Z"))
        .await
        .unwrap();
    let now = utc("2024-01-16T08:00:00Z");

    let report = ctx.scheduler.tick(now).await;
    assert_eq!(report.generation_failed, 1);
    let window = &ctx.store.list_windows(None, 1, 0).await.unwrap()[0];
    assert_eq!(window.status, WindowStatus::Closed);
    assert_eq!(window.generation_attempts, 1);

    ctx.scheduler.tick(now).await;
    ctx.scheduler.tick(now).await;
    let window = ctx.store.require_window(&window.id).await.unwrap();
    assert_eq!(window.status, WindowStatus::Failed);
    assert_eq!(window.generation_attempts, 3);

    ctx.scheduler.tick(now).await;
    assert_eq!(ctx.summarizer.calls(), 3);
    assert_eq!(ctx.channel.calls(), 0);

    let digests = ctx.store.list_digests_for_window(&window.id).await.unwrap();
    assert_eq!(digests.len(), 3);
    for digest in &digests {
        assert_eq!(digest.delivery_status, DeliveryStatus::Failed);
        assert!(digest.formatted_output.is_none());
        assert!(digest.raw_prompt.as_deref().unwrap().contains("HighCPU"));
        assert_eq!(digest.raw_response.as_deref(), Some("model crashed"));
        assert!(digest.error_message.as_deref().unwrap().contains("500"));
    }
}

#[tokio::test]
async fn generation_retries_then_succeeds() {
    let ctx = build_test_context().await.expect("test context should build");
    ctx.summarizer.push(Err(SummarizeError::Transport("connection refused".into())));
    ctx.summarizer.push(Ok(completion("Disk filled up twice.")));
    ctx.windows
        .ingest(&single("DiskFull"), utc("2024-01-15T19:00:00Z"))
        .await
        .unwrap();
    let now = utc("2024-01-16T08:00:00Z");

    let first = ctx.scheduler.tick(now).await;
    let second = ctx.scheduler.tick(now).await;
    assert_eq!((first.generation_failed, first.delivered), (1, 0));
    assert_eq!((second.generated, second.delivered), (1, 1));

    let window = &ctx.store.list_windows(None, 1, 0).await.unwrap()[0];
    assert_eq!(window.status, WindowStatus::Delivered);
    let digests = ctx.store.list_digests_for_window(&window.id).await.unwrap();
    assert_eq!(digests.len(), 2);
    let deliverable: Vec<_> = digests.iter().filter(|d| d.is_deliverable()).collect();
    assert_eq!(deliverable.len(), 1);
    assert!(deliverable[0]
        .formatted_output
        .as_deref()
        .unwrap()
        .contains("Disk filled up twice."));
}

#[tokio::test]
async fn summarizer_timeout_counts_as_failed_attempt() {
    let ctx = build_with(TestSetup {
        call_timeout: Duration::from_millis(50),
        ..TestSetup::default()
    })
    .await
    .expect("test context should build");

    // A summarizer that never answers within the bound.
    struct Slow;
    #[async_trait::async_trait]
    impl alertgest_ai::Summarizer for Slow {
        fn provider(&self) -> &str {
            "slow"
        }
        fn model_name(&self) -> &str {
            "slow-model"
        }
        async fn summarize(
            &self,
            _request: &alertgest_ai::SummaryRequest,
        ) -> Result<alertgest_ai::Completion, SummarizeError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(completion("late"))
        }
    }
    let generator = alertgest_server::digest::DigestGenerator::new(
        ctx.store.clone(),
        std::sync::Arc::new(Slow),
        alertgest_server::digest::GeneratorSettings {
            timezone: chrono_tz::UTC,
            max_tokens: 128,
            temperature: 0.3,
            call_timeout: Duration::from_millis(50),
            max_attempts: 3,
            samples_per_alertname: 3,
        },
    );

    ctx.windows
        .ingest(&single("HighCPU"), utc("2024-01-15T19:00:00Z"))
        .await
        .unwrap();
    let closed = ctx
        .windows
        .close_due_windows(utc("2024-01-16T08:00:00Z"))
        .await
        .unwrap();
    let err = generator.generate(&closed[0]).await.unwrap_err();
    match err {
        GenerationError::Summarize {
            attempts,
            window_failed,
            source: SummarizeError::Timeout(_),
            ..
        } => {
            assert_eq!(attempts, 1);
            assert!(!window_failed);
        }
        other => panic!("unexpected error: {other}"),
    }
    let window = ctx.store.require_window(&closed[0].id).await.unwrap();
    assert_eq!(window.status, WindowStatus::Closed);
}

#[tokio::test]
async fn stale_window_row_cannot_be_regenerated() {
    let ctx = build_test_context().await.expect("test context should build");
    ctx.windows
        .ingest(&single("HighCPU"), utc("2024-01-15T19:00:00Z"))
        .await
        .unwrap();
    let closed = ctx
        .windows
        .close_due_windows(utc("2024-01-16T08:00:00Z"))
        .await
        .unwrap();
    let stale = closed[0].clone();

    ctx.generator.generate(&stale).await.unwrap();
    let err = ctx.generator.generate(&stale).await.unwrap_err();
    assert!(matches!(
        err,
        GenerationError::NotClosed {
            status: WindowStatus::Digested,
            ..
        }
    ));
    assert_eq!(ctx.summarizer.calls(), 1);
    assert_eq!(
        ctx.store.list_digests_for_window(&stale.id).await.unwrap().len(),
        1
    );
}

#[tokio::test]
async fn deliver_rejects_digest_that_is_not_pending() {
    let ctx = build_test_context().await.expect("test context should build");
    ctx.windows
        .ingest(&single("HighCPU"), utc("2024-01-15T19:00:00Z"))
        .await
        .unwrap();
    let closed = ctx
        .windows
        .close_due_windows(utc("2024-01-16T08:00:00Z"))
        .await
        .unwrap();
    let digest = ctx.generator.generate(&closed[0]).await.unwrap();
    let window = ctx.store.require_window(&closed[0].id).await.unwrap();

    let outcome = ctx.delivery.deliver(&digest, &window).await.unwrap();
    assert_eq!(
        outcome,
        DeliveryOutcome::Sent {
            message_id: Some("msg-1".to_string())
        }
    );
    assert!(ctx.delivery.deliver(&digest, &window).await.is_err());
    assert_eq!(ctx.channel.calls(), 1);
}

#[tokio::test]
async fn duplicate_fingerprints_are_kept_as_separate_events() {
    let ctx = build_test_context().await.expect("test context should build");
    let batch = payload(vec![
        alert_json("HighCPU", "firing", "critical", "web-0"),
        alert_json("HighCPU", "firing", "critical", "web-0"),
    ]);
    let ack = ctx
        .windows
        .ingest(&batch, utc("2024-01-15T19:00:00Z"))
        .await
        .unwrap();
    assert_eq!(ack.alert_count, 2);
    ctx.windows
        .ingest(&batch, utc("2024-01-15T20:00:00Z"))
        .await
        .unwrap();

    let window = &ctx.store.list_windows(None, 1, 0).await.unwrap()[0];
    assert_eq!(window.alert_count, 4);
    let alerts = ctx.store.alerts_for_window(&window.id).await.unwrap();
    assert_eq!(alerts.len(), 4);
    assert!(alerts.iter().all(|a| a.fingerprint == alerts[0].fingerprint));
}

#[tokio::test]
async fn invalid_payload_writes_nothing() {
    let ctx = build_test_context().await.expect("test context should build");
    let mut nameless = alert_json("X", "firing", "warning", "web-1");
    nameless["labels"]
        .as_object_mut()
        .unwrap()
        .remove("alertname");
    let batch = payload(vec![alert_json("HighCPU", "firing", "warning", "web-0"), nameless]);

    let err = ctx
        .windows
        .ingest(&batch, utc("2024-01-15T19:00:00Z"))
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::Payload(_)));
    assert_eq!(ctx.store.count_windows(None).await.unwrap(), 0);
    assert_eq!(ctx.store.count_unassociated_alerts().await.unwrap(), 0);
}

#[tokio::test]
async fn empty_payload_is_acknowledged_without_writes() {
    let ctx = build_test_context().await.expect("test context should build");
    let ack = ctx
        .windows
        .ingest(&payload(vec![]), utc("2024-01-15T19:00:00Z"))
        .await
        .unwrap();
    assert_eq!(ack.alert_count, 0);
    assert_eq!(ctx.store.count_windows(None).await.unwrap(), 0);
}

#[tokio::test]
async fn alert_for_closed_window_is_stored_unassociated() {
    let ctx = build_test_context().await.expect("test context should build");
    let resolution = ctx.windows.resolve_window(utc("2024-01-15T19:00:00Z")).await.unwrap();
    let window = window_of(&resolution).clone();
    ctx.windows
        .close_due_windows(utc("2024-01-16T08:00:00Z"))
        .await
        .unwrap();

    ctx.windows
        .ingest(&single("Straggler"), utc("2024-01-15T23:00:00Z"))
        .await
        .unwrap();

    let window = ctx.store.require_window(&window.id).await.unwrap();
    assert_eq!(window.status, WindowStatus::Closed);
    assert_eq!(window.alert_count, 0);
    assert_eq!(ctx.store.count_unassociated_alerts().await.unwrap(), 1);
}

#[tokio::test]
async fn concurrent_resolution_creates_one_window() {
    let ctx = build_test_context().await.expect("test context should build");
    let mut handles = Vec::new();
    for minute in 0..10 {
        let windows = ctx.windows.clone();
        let ts = utc(&format!("2024-01-15T19:{minute:02}:00Z"));
        handles.push(tokio::spawn(async move { windows.resolve_window(ts).await }));
    }

    let mut ids = Vec::new();
    for handle in handles {
        let resolution = handle.await.unwrap().unwrap();
        ids.push(window_of(&resolution).id.clone());
    }
    ids.dedup();
    assert_eq!(ids.len(), 1);
    assert_eq!(ctx.store.count_windows(None).await.unwrap(), 1);
}

#[tokio::test]
async fn occurrence_overlapping_a_stored_window_is_not_created() {
    let ctx = build_test_context().await.expect("test context should build");
    // 旧配置 20:00-10:00 遗留的窗口
    ctx.store
        .insert_window(utc("2024-01-14T20:00:00Z"), utc("2024-01-15T19:00:00Z"))
        .await
        .unwrap();

    let resolution = ctx.windows.resolve_window(utc("2024-01-15T19:30:00Z")).await.unwrap();
    assert_eq!(resolution, WindowResolution::NoWindow);
    assert_eq!(ctx.store.count_windows(None).await.unwrap(), 1);
}

#[tokio::test]
async fn one_failing_window_does_not_block_others() {
    let ctx = build_test_context().await.expect("test context should build");
    ctx.summarizer.panic_on("ExplodingAlert");
    ctx.windows
        .ingest(&single("ExplodingAlert"), utc("2024-01-14T19:00:00Z"))
        .await
        .unwrap();
    ctx.windows
        .ingest(&single("HealthyAlert"), utc("2024-01-15T19:00:00Z"))
        .await
        .unwrap();

    let report = ctx.scheduler.tick(utc("2024-01-16T08:00:00Z")).await;
    assert_eq!(report.closed, 2);
    assert_eq!(report.generated, 1);
    assert_eq!(report.errors, 1);
    assert_eq!(report.delivered, 1);

    let windows = ctx.store.list_windows(None, 10, 0).await.unwrap();
    let healthy = windows
        .iter()
        .find(|w| w.window_start == utc("2024-01-15T18:00:00Z"))
        .unwrap();
    let exploding = windows
        .iter()
        .find(|w| w.window_start == utc("2024-01-14T18:00:00Z"))
        .unwrap();
    assert_eq!(healthy.status, WindowStatus::Delivered);
    assert_eq!(exploding.status, WindowStatus::Closed);
}

#[tokio::test]
async fn deleting_a_window_keeps_its_alerts() {
    let ctx = build_test_context().await.expect("test context should build");
    ctx.windows
        .ingest(&single("HighCPU"), utc("2024-01-15T19:00:00Z"))
        .await
        .unwrap();
    ctx.scheduler.tick(utc("2024-01-16T08:00:00Z")).await;
    let window = ctx.store.list_windows(None, 1, 0).await.unwrap().remove(0);

    assert!(ctx.store.delete_window(&window.id).await.unwrap());
    assert!(ctx.store.get_window(&window.id).await.unwrap().is_none());
    assert!(ctx
        .store
        .list_digests_for_window(&window.id)
        .await
        .unwrap()
        .is_empty());
    assert_eq!(ctx.store.count_unassociated_alerts().await.unwrap(), 1);
}

#[tokio::test]
async fn scheduler_publishes_status() {
    let ctx = build_test_context().await.expect("test context should build");
    let status = ctx.scheduler.subscribe();
    assert_eq!(status.borrow().phase, SchedulerPhase::Idle);
    assert!(status.borrow().last_report.is_none());

    let report = ctx.scheduler.tick(utc("2024-01-16T08:00:00Z")).await;
    let snapshot = status.borrow().clone();
    assert_eq!(snapshot.phase, SchedulerPhase::Idle);
    assert_eq!(snapshot.last_report, Some(report));
    assert!(snapshot.last_tick_finished_at.is_some());
}

#[tokio::test]
async fn next_run_follows_the_cron_in_local_time() {
    let ctx = build_test_context().await.expect("test context should build");
    let next = ctx
        .scheduler
        .next_run_after(utc("2024-01-16T08:00:00Z"))
        .unwrap();
    assert_eq!(next, utc("2024-01-17T08:00:00Z"));
}

#[tokio::test]
async fn end_to_end_with_http_collaborators() {
    use alertgest_ai::OllamaProvider;
    use alertgest_notify::TeamsChannel;
    use common::{build_with_collaborators, FakeChannel, FakeSummarizer};
    use std::sync::Arc;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    let ollama = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .and(body_partial_json(serde_json::json!({"model": "llama3.1:8b", "stream": false})))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "model": "llama3.1:8b",
            "response": "HighCPU fired on web-0 overnight.",
            "done": true,
            "prompt_eval_count": 310,
            "eval_count": 22
        })))
        .expect(1)
        .mount(&ollama)
        .await;

    let teams = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/webhook"))
        .respond_with(ResponseTemplate::new(200).set_body_string("1"))
        .expect(1)
        .mount(&teams)
        .await;

    let summarizer = Arc::new(
        OllamaProvider::new(ollama.uri(), "llama3.1:8b".to_string(), None, 5).unwrap(),
    );
    let channel = Arc::new(TeamsChannel::new(&format!("{}/webhook", teams.uri()), 5).unwrap());
    let ctx = build_with_collaborators(
        TestSetup::default(),
        summarizer,
        Some(channel),
        Arc::new(FakeSummarizer::default()),
        Arc::new(FakeChannel::default()),
    )
    .await
    .expect("test context should build");

    ctx.windows
        .ingest(&single("HighCPU"), utc("2024-01-15T19:00:00Z"))
        .await
        .unwrap();
    let report = ctx.scheduler.tick(utc("2024-01-16T08:00:00Z")).await;
    assert_eq!(report.delivered, 1);

    let window = ctx.store.list_windows(None, 1, 0).await.unwrap().remove(0);
    assert_eq!(window.status, WindowStatus::Delivered);
    let digest = ctx.store.deliverable_digest(&window.id).await.unwrap().unwrap();
    assert_eq!(digest.llm_model.as_deref(), Some("llama3.1:8b"));
    assert_eq!(digest.prompt_tokens, Some(310));
    assert_eq!(digest.completion_tokens, Some(22));
    assert_eq!(digest.teams_message_id.as_deref(), Some("1"));
    assert!(digest.raw_response.as_deref().unwrap().contains("overnight"));
}

#[tokio::test]
async fn retention_spares_alerts_of_live_windows() {
    use alertgest_server::retention::run_cleanup;

    let ctx = build_test_context().await.expect("test context should build");
    ctx.windows
        .ingest(&single("HighCPU"), utc("2024-01-15T19:00:00Z"))
        .await
        .unwrap();
    ctx.windows
        .ingest(&single("Daytime"), utc("2024-01-15T12:00:00Z"))
        .await
        .unwrap();

    assert_eq!(run_cleanup(&ctx.store, 30).await.unwrap(), 1);
    assert_eq!(ctx.store.count_unassociated_alerts().await.unwrap(), 0);

    ctx.scheduler.tick(utc("2024-01-16T08:00:00Z")).await;
    assert_eq!(run_cleanup(&ctx.store, 30).await.unwrap(), 1);
    let window = ctx.store.list_windows(None, 1, 0).await.unwrap().remove(0);
    assert_eq!(ctx.store.count_alerts_for_window(&window.id).await.unwrap(), 0);
}
