//! Timestamp utilities

use chrono::{DateTime, Utc};

/// Current time as fractional seconds since the Unix epoch
pub fn epoch_seconds() -> f64 {
    to_epoch_seconds(&Utc::now())
}

/// Convert a timestamp to fractional epoch seconds
pub fn to_epoch_seconds(ts: &DateTime<Utc>) -> f64 {
    ts.timestamp_millis() as f64 / 1000.0
}

/// Format a remaining-time estimate compactly: `1h 2m 3s`, `4m 5s`, `6s`.
///
/// Non-positive or non-finite inputs render as `0s`.
pub fn format_eta(seconds: f64) -> String {
    if !seconds.is_finite() || seconds <= 0.0 {
        return "0s".to_string();
    }

    let total = seconds as u64;
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let secs = total % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, secs)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, secs)
    } else {
        format!("{}s", secs)
    }
}
