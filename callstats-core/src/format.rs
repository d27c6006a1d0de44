//! Formatting helpers for command-line output.

use chrono::{DateTime, Utc};

/// Format a timestamp relative to `now` (e.g., "2m ago").
pub fn format_relative_time(ts: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let duration = now.signed_duration_since(ts);

    if duration.num_seconds() < 0 {
        "just now".to_string()
    } else if duration.num_seconds() < 60 {
        format!("{}s ago", duration.num_seconds())
    } else if duration.num_minutes() < 60 {
        format!("{}m ago", duration.num_minutes())
    } else if duration.num_hours() < 24 {
        format!("{}h ago", duration.num_hours())
    } else if duration.num_days() < 7 {
        format!("{}d ago", duration.num_days())
    } else {
        ts.format("%b %d").to_string()
    }
}

/// Format an average duration in seconds as `1m 05s`, or `-` when absent.
pub fn format_avg_seconds(secs: Option<f64>) -> String {
    match secs {
        None => "-".to_string(),
        Some(s) => {
            let total = s.round() as i64;
            if total < 60 {
                format!("{}s", total)
            } else {
                format!("{}m {:02}s", total / 60, total % 60)
            }
        }
    }
}

/// Format a run duration in milliseconds.
pub fn format_duration_ms(ms: i64) -> String {
    if ms < 1000 {
        format!("{}ms", ms)
    } else {
        format!("{:.1}s", ms as f64 / 1000.0)
    }
}
