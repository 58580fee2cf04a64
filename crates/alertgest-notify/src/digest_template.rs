use alertgest_common::DigestStats;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::fmt::Write;

use crate::ChatMessage;

/// Formatted output used for windows that captured nothing.
pub const NO_NOTABLE_ALERTS: &str = "No notable alerts";

/// Alert names listed in the header line.
const HEADLINE_NAMES: usize = 5;

/// 摘要消息渲染器
pub struct DigestRenderer;

impl DigestRenderer {
    /// Card title naming the window in local time.
    pub fn title(window_start: DateTime<Utc>, window_end: DateTime<Utc>, tz: Tz) -> String {
        format!(
            "Alert digest {} to {}",
            window_start.with_timezone(&tz).format("%a %d %b %H:%M"),
            window_end.with_timezone(&tz).format("%a %d %b %H:%M %Z"),
        )
    }

    /// Wraps the model's summary with a deterministic header and footer.
    pub fn render(stats: &DigestStats, summary: &str, model: &str) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "**{} alerts** ({} firing, {} resolved) across {} distinct alert names",
            stats.total,
            stats.firing,
            stats.resolved,
            stats.by_alertname.len()
        );
        if !stats.by_severity.is_empty() {
            let severities: Vec<String> = stats
                .by_severity
                .iter()
                .map(|(severity, count)| format!("{severity}: {count}"))
                .collect();
            let _ = writeln!(out, "\nSeverity: {}", severities.join(" | "));
        }
        let top = stats.top_alertnames(HEADLINE_NAMES);
        if !top.is_empty() {
            let names: Vec<String> = top
                .iter()
                .map(|(name, count)| format!("{name} ({count})"))
                .collect();
            let _ = writeln!(out, "\nTop alerts: {}", names.join(", "));
        }
        let _ = writeln!(out, "\n---\n\n{}\n", summary.trim());
        let _ = write!(out, "_Summarized by {model}_");
        out
    }

    /// Output for a window with no alerts; no model is involved.
    pub fn render_quiet(window_start: DateTime<Utc>, window_end: DateTime<Utc>, tz: Tz) -> String {
        format!(
            "{NO_NOTABLE_ALERTS} between {} and {}.",
            window_start.with_timezone(&tz).format("%a %d %b %H:%M"),
            window_end.with_timezone(&tz).format("%a %d %b %H:%M %Z"),
        )
    }

    pub fn message(
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        tz: Tz,
        formatted_output: &str,
    ) -> ChatMessage {
        ChatMessage {
            title: Self::title(window_start, window_end, tz),
            text: formatted_output.to_string(),
        }
    }
}
