#![allow(dead_code)]

use alertgest_ai::{Completion, SummarizeError, Summarizer, SummaryRequest};
use alertgest_common::{CaptureInterval, WebhookPayload};
use alertgest_notify::{ChatChannel, ChatError, ChatMessage, SendReceipt};
use alertgest_server::app;
use alertgest_server::capture::WindowManager;
use alertgest_server::digest::{DeliveryCoordinator, DigestGenerator, GeneratorSettings};
use alertgest_server::scheduler::DigestScheduler;
use alertgest_server::state::AppState;
use alertgest_storage::Store;
use anyhow::Result;
use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tower::util::ServiceExt;

pub fn utc(s: &str) -> DateTime<Utc> {
    s.parse().expect("timestamp should parse")
}

pub fn completion(text: &str) -> Completion {
    Completion {
        text: text.to_string(),
        model: "fake-model".to_string(),
        prompt_tokens: Some(120),
        completion_tokens: Some(40),
        raw_response: json!({"response": text}).to_string(),
    }
}

/// Summarizer that replays scripted results, then answers "All quiet.".
#[derive(Default)]
pub struct FakeSummarizer {
    script: Mutex<VecDeque<Result<Completion, SummarizeError>>>,
    prompts: Mutex<Vec<String>>,
    panic_marker: Mutex<Option<String>>,
    calls: AtomicUsize,
}

impl FakeSummarizer {
    pub fn push(&self, result: Result<Completion, SummarizeError>) {
        self.script.lock().unwrap().push_back(result);
    }

    pub fn push_api_error(&self) {
        self.push(Err(SummarizeError::Api {
            status: 500,
            body: "model crashed".to_string(),
        }));
    }

    /// Panics on any prompt mentioning `marker`.
    pub fn panic_on(&self, marker: &str) {
        *self.panic_marker.lock().unwrap() = Some(marker.to_string());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Summarizer for FakeSummarizer {
    fn provider(&self) -> &str {
        "fake"
    }

    fn model_name(&self) -> &str {
        "fake-model"
    }

    async fn summarize(&self, request: &SummaryRequest) -> Result<Completion, SummarizeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(request.prompt.clone());
        let marker = self.panic_marker.lock().unwrap().clone();
        if let Some(marker) = marker {
            if request.prompt.contains(&marker) {
                panic!("summarizer exploded on {marker}");
            }
        }
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(completion("All quiet.")))
    }
}

/// Chat channel that replays scripted results, then confirms every send.
#[derive(Default)]
pub struct FakeChannel {
    script: Mutex<VecDeque<Result<SendReceipt, ChatError>>>,
    delay: Mutex<Option<Duration>>,
    sent: Mutex<Vec<ChatMessage>>,
    calls: AtomicUsize,
}

impl FakeChannel {
    pub fn push(&self, result: Result<SendReceipt, ChatError>) {
        self.script.lock().unwrap().push_back(result);
    }

    pub fn push_rejected(&self) {
        self.push(Err(ChatError::Rejected {
            status: 400,
            body: "Bad payload".to_string(),
        }));
    }

    pub fn push_ambiguous(&self) {
        self.push(Err(ChatError::Ambiguous("connection reset".to_string())));
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<ChatMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatChannel for FakeChannel {
    async fn send(&self, message: &ChatMessage) -> Result<SendReceipt, ChatError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.sent.lock().unwrap().push(message.clone());
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| {
            Ok(SendReceipt {
                message_id: Some(format!("msg-{n}")),
                http_status: 200,
            })
        })
    }

    fn channel_name(&self) -> &str {
        "fake"
    }
}

pub struct TestSetup {
    pub start: &'static str,
    pub end: &'static str,
    pub timezone: &'static str,
    pub with_channel: bool,
    pub max_generation_attempts: i32,
    pub max_delivery_attempts: i32,
    pub call_timeout: Duration,
    pub send_timeout: Duration,
}

impl Default for TestSetup {
    fn default() -> Self {
        Self {
            start: "18:00",
            end: "08:00",
            timezone: "UTC",
            with_channel: true,
            max_generation_attempts: 3,
            max_delivery_attempts: 3,
            call_timeout: Duration::from_secs(5),
            send_timeout: Duration::from_secs(5),
        }
    }
}

pub struct TestContext {
    pub temp_dir: TempDir,
    pub store: Arc<Store>,
    pub windows: Arc<WindowManager>,
    pub generator: Arc<DigestGenerator>,
    pub delivery: Arc<DeliveryCoordinator>,
    pub scheduler: Arc<DigestScheduler>,
    pub summarizer: Arc<FakeSummarizer>,
    pub channel: Arc<FakeChannel>,
    pub app: axum::Router,
}

pub async fn build_test_context() -> Result<TestContext> {
    build_with(TestSetup::default()).await
}

pub async fn build_with(setup: TestSetup) -> Result<TestContext> {
    let summarizer = Arc::new(FakeSummarizer::default());
    let channel = Arc::new(FakeChannel::default());
    let chat: Option<Arc<dyn ChatChannel>> = if setup.with_channel {
        Some(channel.clone())
    } else {
        None
    };
    build_with_collaborators(setup, summarizer.clone(), chat, summarizer, channel).await
}

/// Wires the services around real collaborators (e.g. HTTP clients pointed at
/// mock servers).
pub async fn build_with_collaborators(
    setup: TestSetup,
    summarizer: Arc<dyn Summarizer>,
    chat: Option<Arc<dyn ChatChannel>>,
    fake_summarizer: Arc<FakeSummarizer>,
    fake_channel: Arc<FakeChannel>,
) -> Result<TestContext> {
    let temp_dir = tempfile::tempdir()?;
    let url = format!("sqlite://{}/alertgest.db?mode=rwc", temp_dir.path().display());
    let store = Arc::new(Store::new(&url, 5).await?);

    let interval = CaptureInterval::parse(setup.start, setup.end, setup.timezone)?;
    let timezone = interval.timezone;
    let windows = Arc::new(WindowManager::new(store.clone(), interval));
    let generator = Arc::new(DigestGenerator::new(
        store.clone(),
        summarizer,
        GeneratorSettings {
            timezone,
            max_tokens: 512,
            temperature: 0.3,
            call_timeout: setup.call_timeout,
            max_attempts: setup.max_generation_attempts,
            samples_per_alertname: 3,
        },
    ));
    let delivery = Arc::new(DeliveryCoordinator::new(
        store.clone(),
        chat,
        timezone,
        setup.send_timeout,
        setup.max_delivery_attempts,
    ));
    let scheduler = Arc::new(DigestScheduler::new(
        store.clone(),
        windows.clone(),
        generator.clone(),
        delivery.clone(),
        cron::Schedule::from_str("0 0 8 * * *")?,
        timezone,
        4,
    ));

    let state = AppState {
        store: store.clone(),
        windows: windows.clone(),
        delivery: delivery.clone(),
        scheduler_status: scheduler.subscribe(),
    };
    let app = app::build_http_app(state);

    Ok(TestContext {
        temp_dir,
        store,
        windows,
        generator,
        delivery,
        scheduler,
        summarizer: fake_summarizer,
        channel: fake_channel,
        app,
    })
}

pub fn alert_json(alertname: &str, status: &str, severity: &str, pod: &str) -> Value {
    json!({
        "status": status,
        "labels": {
            "alertname": alertname,
            "severity": severity,
            "namespace": "apps",
            "pod": pod
        },
        "annotations": {"summary": format!("{alertname} on {pod}")},
        "startsAt": "2024-01-15T17:55:00Z",
        "endsAt": "0001-01-01T00:00:00Z",
        "generatorURL": "http://prometheus:9090/graph"
    })
}

pub fn payload_json(alerts: Vec<Value>) -> Value {
    json!({
        "version": "4",
        "groupKey": "{}:{alertname=\"grouped\"}",
        "status": "firing",
        "receiver": "alertgest",
        "groupLabels": {},
        "commonLabels": {},
        "commonAnnotations": {},
        "externalURL": "http://alertmanager:9093",
        "alerts": alerts
    })
}

pub fn payload(alerts: Vec<Value>) -> WebhookPayload {
    serde_json::from_value(payload_json(alerts)).expect("payload should deserialize")
}

pub fn single(alertname: &str) -> WebhookPayload {
    payload(vec![alert_json(alertname, "firing", "warning", "web-0")])
}

pub async fn request_json(
    app: &axum::Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value, Option<String>) {
    let body = body.map(|b| b.to_string()).unwrap_or_default();
    request_raw(app, method, uri, body).await
}

pub async fn request_raw(
    app: &axum::Router,
    method: &str,
    uri: &str,
    body: String,
) -> (StatusCode, Value, Option<String>) {
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .header("Content-Type", "application/json")
        .body(Body::from(body))
        .expect("request should build");

    let resp = app
        .clone()
        .oneshot(req)
        .await
        .expect("request should be handled");

    let status = resp.status();
    let trace_id = resp
        .headers()
        .get("x-trace-id")
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string());
    let bytes = to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("body should read");
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice::<Value>(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).to_string()))
    };
    (status, json, trace_id)
}

pub fn assert_ok_envelope(body: &Value) {
    assert_eq!(body["err_code"], 0, "unexpected body: {body}");
    assert_eq!(body["err_msg"], "success");
    assert!(body["trace_id"].is_string());
}

pub fn assert_err_envelope(body: &Value, err_code: i64) {
    assert_eq!(body["err_code"], err_code, "unexpected body: {body}");
    assert!(body["data"].is_null());
}
