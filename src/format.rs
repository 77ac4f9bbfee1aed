// ABOUTME: Session list formatting: turns records into display text for the presentation layer.
// ABOUTME: SessionFormatter is the seam; PlainFormatter is the default used by the CLI.

use chrono::{Local, TimeZone};

use crate::store::SessionRecord;

/// Renders the session list whenever it changes.
pub trait SessionFormatter: Send + Sync {
    fn format(&self, records: &[SessionRecord]) -> String;
}

/// Human label for a quality rating.
pub fn quality_label(quality: i32) -> &'static str {
    match quality {
        0 => "Very bad",
        1 => "Poor",
        2 => "So-so",
        3 => "OK",
        4 => "Pretty good",
        5 => "Excellent",
        _ => "Unrated",
    }
}

/// Format a duration in milliseconds as e.g. "7h 05m" or "42m".
pub fn format_duration(ms: i64) -> String {
    let minutes = ms.max(0) / 60_000;
    let (hours, minutes) = (minutes / 60, minutes % 60);
    if hours > 0 {
        format!("{}h {:02}m", hours, minutes)
    } else {
        format!("{}m", minutes)
    }
}

/// One line per record, newest first, in local time.
pub struct PlainFormatter {
    time_format: String,
}

impl PlainFormatter {
    pub fn new(time_format: impl Into<String>) -> Self {
        Self {
            time_format: time_format.into(),
        }
    }

    fn timestamp(&self, ms: i64) -> String {
        match Local.timestamp_millis_opt(ms).single() {
            Some(dt) => dt.format(&self.time_format).to_string(),
            None => ms.to_string(),
        }
    }
}

impl Default for PlainFormatter {
    fn default() -> Self {
        Self::new("%a %b %d %Y %H:%M")
    }
}

impl SessionFormatter for PlainFormatter {
    fn format(&self, records: &[SessionRecord]) -> String {
        if records.is_empty() {
            return "No sleep sessions recorded".to_string();
        }
        records
            .iter()
            .map(|record| {
                let id = record.id.map(|id| id.to_string()).unwrap_or_else(|| "-".to_string());
                let start = self.timestamp(record.start_time_ms);
                if record.is_open() {
                    format!("#{id} {start}: still sleeping")
                } else {
                    format!(
                        "#{id} {start} -> {}: {} ({})",
                        self.timestamp(record.end_time_ms),
                        format_duration(record.duration_ms()),
                        quality_label(record.quality),
                    )
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
