use alertgest_common::{AlertRecord, AlertStatus, DigestStats};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::collections::BTreeMap;
use std::fmt::Write;

pub const DEFAULT_SAMPLES_PER_ALERTNAME: usize = 3;

/// Annotation text longer than this is cut in samples.
const MAX_SUMMARY_CHARS: usize = 200;

/// 摘要输入：一个捕获窗口的边界及其全部告警
#[derive(Debug, Clone)]
pub struct DigestInput<'a> {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    /// Timezone the window bounds are shown in, next to UTC.
    pub timezone: Tz,
    pub alerts: &'a [AlertRecord],
    pub samples_per_alertname: usize,
}

/// Builds the summarization prompt for one window.
///
/// The text depends only on the window bounds and the alert set: alerts are
/// sorted internally, so any permutation of the same alerts gives the same
/// bytes, and no clock is read.
pub fn build_digest_prompt(input: &DigestInput<'_>) -> String {
    let mut alerts: Vec<&AlertRecord> = input.alerts.iter().collect();
    alerts.sort_by(|a, b| {
        a.alertname
            .cmp(&b.alertname)
            .then_with(|| a.received_at.cmp(&b.received_at))
            .then_with(|| a.starts_at.cmp(&b.starts_at))
            .then_with(|| a.fingerprint.cmp(&b.fingerprint))
            .then_with(|| a.id.cmp(&b.id))
    });

    let stats = DigestStats::from_alerts(input.alerts);

    // 单次拼接：告警内容只写入一次，不会再被模板替换
    let mut out = String::with_capacity(PROMPT_INTRO.len() + PROMPT_INSTRUCTIONS.len() + 1024);
    out.push_str(PROMPT_INTRO);
    let _ = writeln!(out, "\n\nCapture window: {}\n", format_window(input));
    let _ = writeln!(out, "## Overview\n{}", format_overview(&stats));
    let _ = writeln!(out, "## Alerts by name\n{}", format_by_name(&alerts));
    let _ = writeln!(
        out,
        "## Representative samples\n{}",
        format_samples(&alerts, input.samples_per_alertname)
    );
    out.push_str(PROMPT_INSTRUCTIONS);
    out
}

fn format_window(input: &DigestInput<'_>) -> String {
    let fmt = "%Y-%m-%d %H:%M %Z";
    format!(
        "{} to {} ({} to {})",
        input.window_start.format("%Y-%m-%dT%H:%M:%SZ"),
        input.window_end.format("%Y-%m-%dT%H:%M:%SZ"),
        input.window_start.with_timezone(&input.timezone).format(fmt),
        input.window_end.with_timezone(&input.timezone).format(fmt),
    )
}

fn format_overview(stats: &DigestStats) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "- Total alert notifications: {} (firing: {}, resolved: {})",
        stats.total, stats.firing, stats.resolved
    );
    let _ = writeln!(out, "- Distinct alert fingerprints: {}", stats.distinct_fingerprints);
    let _ = writeln!(out, "- Distinct alert names: {}", stats.by_alertname.len());
    out.push_str("- By severity:\n");
    for (severity, count) in &stats.by_severity {
        let _ = writeln!(out, "  - {severity}: {count}");
    }
    if !stats.by_namespace.is_empty() {
        out.push_str("- By namespace:\n");
        for (ns, count) in &stats.by_namespace {
            let _ = writeln!(out, "  - {ns}: {count}");
        }
    }
    out
}

fn format_by_name(alerts: &[&AlertRecord]) -> String {
    let mut per_name: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
    for alert in alerts {
        let entry = per_name.entry(alert.alertname.as_str()).or_default();
        match alert.status {
            AlertStatus::Firing => entry.0 += 1,
            AlertStatus::Resolved => entry.1 += 1,
        }
    }

    let mut out = String::new();
    out.push_str("| Alert | Total | Firing | Resolved |\n");
    out.push_str("|-------|-------|--------|----------|\n");
    for (name, (firing, resolved)) in per_name {
        let _ = writeln!(
            out,
            "| {} | {} | {} | {} |",
            name,
            firing + resolved,
            firing,
            resolved
        );
    }
    out
}

fn format_samples(alerts: &[&AlertRecord], per_name: usize) -> String {
    let mut grouped: BTreeMap<&str, Vec<&AlertRecord>> = BTreeMap::new();
    for alert in alerts {
        grouped.entry(alert.alertname.as_str()).or_default().push(alert);
    }

    let mut out = String::new();
    for (name, group) in grouped {
        let _ = writeln!(out, "### {name}");
        for alert in group.iter().take(per_name) {
            let _ = write!(
                out,
                "- [{}] severity={} starts={}",
                alert.status,
                alert.severity.as_deref().unwrap_or("unspecified"),
                alert.starts_at.format("%Y-%m-%dT%H:%M:%SZ"),
            );
            if let Some(ns) = &alert.namespace {
                let _ = write!(out, " namespace={ns}");
            }
            if let Some(summary) = alert.summary() {
                let _ = write!(out, " summary=\"{}\"", clip(summary, MAX_SUMMARY_CHARS));
            }
            out.push('\n');
        }
        if group.len() > per_name {
            let _ = writeln!(out, "- … and {} more", group.len() - per_name);
        }
    }
    out
}

fn clip(text: &str, max_chars: usize) -> String {
    let single_line = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if single_line.chars().count() <= max_chars {
        single_line
    } else {
        let cut: String = single_line.chars().take(max_chars).collect();
        format!("{cut}…")
    }
}

const PROMPT_INTRO: &str = "You are an experienced site reliability engineer writing the morning digest of alerts that fired overnight. The on-call team reads it at the start of the working day.";

const PROMPT_INSTRUCTIONS: &str = r#"Write a concise digest in Markdown with these sections:
1. **Summary**: two or three sentences on how noisy the night was and whether anything needs attention.
2. **Needs attention**: alerts still firing, most severe first, with a short note on likely impact.
3. **Resolved overnight**: alerts that fired and cleared on their own.
4. **Noise**: alerts that flapped or repeated many times and might need tuning.

Only use facts present in the data above. Do not invent hosts, namespaces or causes."#;
