use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Alert state as reported by Alertmanager.
///
/// # Examples
///
/// ```
/// use alertgest_common::AlertStatus;
///
/// let status: AlertStatus = "Firing".parse().unwrap();
/// assert_eq!(status, AlertStatus::Firing);
/// assert_eq!(status.to_string(), "firing");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Firing,
    Resolved,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Firing => "firing",
            AlertStatus::Resolved => "resolved",
        }
    }
}

impl std::fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AlertStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "firing" => Ok(AlertStatus::Firing),
            "resolved" => Ok(AlertStatus::Resolved),
            _ => Err(format!("unknown alert status: {s}")),
        }
    }
}

/// Lifecycle state of a capture window.
///
/// The only legal moves are `active → closed → digested → delivered` plus
/// `closed → failed` and `digested → failed`. `delivered` and `failed` are
/// terminal.
///
/// # Examples
///
/// ```
/// use alertgest_common::WindowStatus;
///
/// assert!(WindowStatus::Closed.can_transition_to(WindowStatus::Digested));
/// assert!(!WindowStatus::Digested.can_transition_to(WindowStatus::Closed));
/// assert!(WindowStatus::Failed.is_terminal());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum WindowStatus {
    Active,
    Closed,
    Digested,
    Delivered,
    Failed,
}

impl WindowStatus {
    pub const ALL: [WindowStatus; 5] = [
        WindowStatus::Active,
        WindowStatus::Closed,
        WindowStatus::Digested,
        WindowStatus::Delivered,
        WindowStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WindowStatus::Active => "active",
            WindowStatus::Closed => "closed",
            WindowStatus::Digested => "digested",
            WindowStatus::Delivered => "delivered",
            WindowStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, WindowStatus::Delivered | WindowStatus::Failed)
    }

    pub fn can_transition_to(&self, next: WindowStatus) -> bool {
        use WindowStatus::*;
        matches!(
            (self, next),
            (Active, Closed)
                | (Closed, Digested)
                | (Digested, Delivered)
                | (Closed, Failed)
                | (Digested, Failed)
        )
    }

    /// Statuses from which `next` may be reached in a single step.
    pub fn predecessors(next: WindowStatus) -> Vec<WindowStatus> {
        Self::ALL
            .into_iter()
            .filter(|s| s.can_transition_to(next))
            .collect()
    }
}

impl std::fmt::Display for WindowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WindowStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown window status: {s}"))
    }
}

/// Delivery state of a single digest row.
///
/// `Unknown` marks an attempt whose outcome could not be determined (the
/// request may or may not have reached the chat service). Such digests are
/// never re-sent automatically and wait for operator reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Failed,
    Unknown,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Failed => "failed",
            DeliveryStatus::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DeliveryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(DeliveryStatus::Pending),
            "sent" => Ok(DeliveryStatus::Sent),
            "failed" => Ok(DeliveryStatus::Failed),
            "unknown" => Ok(DeliveryStatus::Unknown),
            _ => Err(format!("unknown delivery status: {s}")),
        }
    }
}

/// A validated alert ready to be persisted. `received_at` and the window
/// association are assigned by the store at insert time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAlert {
    pub fingerprint: String,
    pub alertname: String,
    pub status: AlertStatus,
    pub severity: Option<String>,
    pub namespace: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: Option<DateTime<Utc>>,
}

/// One persisted alert ingestion event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct AlertRecord {
    pub id: String,
    pub fingerprint: String,
    pub alertname: String,
    pub status: AlertStatus,
    pub severity: Option<String>,
    pub namespace: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: Option<DateTime<Utc>>,
    pub received_at: DateTime<Utc>,
    pub capture_window_id: Option<String>,
}

impl AlertRecord {
    /// Short human description taken from the usual Alertmanager annotations.
    pub fn summary(&self) -> Option<&str> {
        self.annotations
            .get("summary")
            .or_else(|| self.annotations.get("description"))
            .or_else(|| self.annotations.get("message"))
            .map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct CaptureWindowRow {
    pub id: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub status: WindowStatus,
    pub alert_count: i64,
    /// Failed generation attempts recorded so far.
    pub generation_attempts: i32,
    /// Delivery attempts that did not end in a confirmed send.
    pub delivery_attempts: i32,
    pub digest_generated_at: Option<DateTime<Utc>>,
    pub digest_sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CaptureWindowRow {
    /// Half-open membership: `window_start <= ts < window_end`.
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.window_start <= ts && ts < self.window_end
    }

    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.window_start < end && start < self.window_end
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct DigestRow {
    pub id: String,
    pub capture_window_id: String,
    pub generated_at: DateTime<Utc>,
    pub llm_model: Option<String>,
    pub prompt_tokens: Option<i32>,
    pub completion_tokens: Option<i32>,
    pub raw_prompt: Option<String>,
    pub raw_response: Option<String>,
    pub formatted_output: Option<String>,
    pub teams_message_id: Option<String>,
    pub delivery_status: DeliveryStatus,
    pub error_message: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl DigestRow {
    /// Failed generation attempts are recorded without formatted output and
    /// can never be delivered.
    pub fn is_deliverable(&self) -> bool {
        self.formatted_output.is_some()
    }
}

/// Everything the generator knows about one generation attempt.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewDigest {
    pub llm_model: Option<String>,
    pub prompt_tokens: Option<i32>,
    pub completion_tokens: Option<i32>,
    pub raw_prompt: Option<String>,
    pub raw_response: Option<String>,
    pub formatted_output: Option<String>,
    pub error_message: Option<String>,
}
