use crate::types::{AlertRecord, AlertStatus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Label used for alerts that carry no `severity`.
pub const UNSPECIFIED_SEVERITY: &str = "unspecified";

/// Aggregate counts over the alerts of one capture window.
///
/// Maps are ordered so any rendering of the stats is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestStats {
    pub total: usize,
    pub firing: usize,
    pub resolved: usize,
    pub by_severity: BTreeMap<String, usize>,
    pub by_alertname: BTreeMap<String, usize>,
    pub by_namespace: BTreeMap<String, usize>,
    pub distinct_fingerprints: usize,
}

impl DigestStats {
    pub fn from_alerts(alerts: &[AlertRecord]) -> Self {
        let mut stats = Self {
            total: alerts.len(),
            ..Default::default()
        };
        let mut fingerprints = std::collections::BTreeSet::new();

        for alert in alerts {
            match alert.status {
                AlertStatus::Firing => stats.firing += 1,
                AlertStatus::Resolved => stats.resolved += 1,
            }
            let severity = alert
                .severity
                .clone()
                .unwrap_or_else(|| UNSPECIFIED_SEVERITY.to_string());
            *stats.by_severity.entry(severity).or_default() += 1;
            *stats.by_alertname.entry(alert.alertname.clone()).or_default() += 1;
            if let Some(ns) = &alert.namespace {
                *stats.by_namespace.entry(ns.clone()).or_default() += 1;
            }
            fingerprints.insert(alert.fingerprint.as_str());
        }

        stats.distinct_fingerprints = fingerprints.len();
        stats
    }

    /// Alert names sorted by descending count, ties broken by name.
    pub fn top_alertnames(&self, limit: usize) -> Vec<(&str, usize)> {
        let mut names: Vec<(&str, usize)> = self
            .by_alertname
            .iter()
            .map(|(name, count)| (name.as_str(), *count))
            .collect();
        names.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        names.truncate(limit);
        names
    }
}
