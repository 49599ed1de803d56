//! Millisecond-precision wall clock helpers.
//!
//! All persisted timestamps are milliseconds since the Unix epoch, stored as
//! `i64` so they serialize compactly and compare cheaply.

use chrono::Utc;

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Convert whole seconds to milliseconds, saturating on overflow.
pub fn secs_to_millis(secs: i64) -> i64 {
    secs.saturating_mul(1000)
}
