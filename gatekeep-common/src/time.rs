//! Timestamp utilities

use chrono::{DateTime, Utc};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Whole hours elapsed between `since` and `at`; negative spans count as zero
pub fn hours_between(since: DateTime<Utc>, at: DateTime<Utc>) -> i64 {
    (at - since).num_hours().max(0)
}

/// Convert seconds to a std duration
pub fn secs_to_duration(secs: u64) -> std::time::Duration {
    std::time::Duration::from_secs(secs)
}
