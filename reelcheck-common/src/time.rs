//! Timestamp utilities

use chrono::{DateTime, Datelike, Utc};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Current calendar year (UTC)
pub fn current_year() -> i32 {
    Utc::now().year()
}

/// Convert milliseconds to duration
pub fn millis_to_duration(millis: u64) -> std::time::Duration {
    std::time::Duration::from_millis(millis)
}

/// Convert a whole number of days to a chrono duration
pub fn days(days: u32) -> chrono::Duration {
    chrono::Duration::days(i64::from(days))
}
