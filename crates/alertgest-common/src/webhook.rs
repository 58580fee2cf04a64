//! Alertmanager webhook payload (notifier format version 4).

use crate::types::{AlertStatus, NewAlert};
use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use std::collections::BTreeMap;
use std::fmt::Write;

#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub group_key: Option<String>,
    pub status: String,
    pub receiver: String,
    pub alerts: Vec<WebhookAlert>,
    #[serde(default)]
    pub group_labels: BTreeMap<String, String>,
    #[serde(default)]
    pub common_labels: BTreeMap<String, String>,
    #[serde(default)]
    pub common_annotations: BTreeMap<String, String>,
    #[serde(default, rename = "externalURL")]
    pub external_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WebhookAlert {
    pub status: String,
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    pub starts_at: DateTime<Utc>,
    #[serde(default)]
    pub ends_at: Option<DateTime<Utc>>,
    #[serde(default, rename = "generatorURL")]
    pub generator_url: Option<String>,
    #[serde(default)]
    pub fingerprint: Option<String>,
}

/// Body returned to the notifier once a payload has been stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct WebhookAck {
    pub status: String,
    pub alert_count: usize,
}

impl WebhookAck {
    pub fn received(alert_count: usize) -> Self {
        Self {
            status: "received".to_string(),
            alert_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PayloadError {
    #[error("alert #{index} is missing the 'alertname' label")]
    MissingAlertName { index: usize },

    #[error("alert #{index} has unknown status '{status}'")]
    UnknownStatus { index: usize, status: String },

    #[error("alert #{index} has an empty fingerprint")]
    EmptyFingerprint { index: usize },
}

impl WebhookPayload {
    /// Validates every alert in the payload. Either all alerts convert or the
    /// first problem is returned, so callers can reject without partial writes.
    pub fn to_new_alerts(&self) -> Result<Vec<NewAlert>, PayloadError> {
        self.alerts
            .iter()
            .enumerate()
            .map(|(index, alert)| alert.to_new_alert(index))
            .collect()
    }
}

impl WebhookAlert {
    pub fn to_new_alert(&self, index: usize) -> Result<NewAlert, PayloadError> {
        let alertname = self
            .labels
            .get("alertname")
            .filter(|name| !name.trim().is_empty())
            .cloned()
            .ok_or(PayloadError::MissingAlertName { index })?;

        let status: AlertStatus = self.status.parse().map_err(|_| PayloadError::UnknownStatus {
            index,
            status: self.status.clone(),
        })?;

        let fingerprint = match &self.fingerprint {
            Some(fp) if fp.trim().is_empty() => {
                return Err(PayloadError::EmptyFingerprint { index })
            }
            Some(fp) => fp.trim().to_string(),
            None => fingerprint_labels(&self.labels),
        };

        Ok(NewAlert {
            fingerprint,
            alertname,
            status,
            severity: self.labels.get("severity").cloned(),
            namespace: self.labels.get("namespace").cloned(),
            labels: self.labels.clone(),
            annotations: self.annotations.clone(),
            starts_at: self.starts_at,
            ends_at: self.ends_at.filter(|ts| !is_zero_time(ts)),
        })
    }
}

/// Alertmanager encodes "no end yet" as `0001-01-01T00:00:00Z`.
fn is_zero_time(ts: &DateTime<Utc>) -> bool {
    ts.year() <= 1
}

/// Stable 16-hex-digit identity for a label set, used when the notifier does
/// not send its own fingerprint.
///
/// # Examples
///
/// ```
/// use std::collections::BTreeMap;
/// use alertgest_common::webhook::fingerprint_labels;
///
/// let mut labels = BTreeMap::new();
/// labels.insert("alertname".to_string(), "HighMemory".to_string());
/// let fp = fingerprint_labels(&labels);
/// assert_eq!(fp.len(), 16);
/// assert_eq!(fp, fingerprint_labels(&labels.clone()));
/// ```
pub fn fingerprint_labels(labels: &BTreeMap<String, String>) -> String {
    let mut hasher = Sha256::new();
    for (key, value) in labels {
        hasher.update(key.as_bytes());
        hasher.update([0xff]);
        hasher.update(value.as_bytes());
        hasher.update([0xff]);
    }
    let digest = hasher.finalize();
    let mut out = String::with_capacity(16);
    for byte in &digest[..8] {
        let _ = write!(out, "{byte:02x}");
    }
    out
}
