//! Session-clock helpers
//!
//! Minute keys and trading days are computed in the session-local zone,
//! expressed as a fixed UTC offset in hours (default +9). The offset is a
//! deployment setting, not a per-call argument, so every function takes it
//! explicitly and the callers thread their configured value through.

use chrono::{DateTime, NaiveDateTime, Utc};

/// Milliseconds since epoch, now.
#[must_use]
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Seconds since epoch, now.
#[must_use]
pub fn now_secs() -> i64 {
    Utc::now().timestamp()
}

fn shifted(epoch_secs: i64, offset_hours: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(epoch_secs + offset_hours * 3600, 0)
}

/// `YYYYMMDDHHmm` minute key for an epoch second in the session zone.
///
/// Lexicographic order of these keys is chronological, which the live-candle
/// script relies on.
#[must_use]
pub fn minute_key(epoch_secs: i64, offset_hours: i64) -> String {
    shifted(epoch_secs, offset_hours)
        .map(|dt| dt.format("%Y%m%d%H%M").to_string())
        .unwrap_or_default()
}

/// `YYYYMMDD` trading day for an epoch second in the session zone.
#[must_use]
pub fn trading_day(epoch_secs: i64, offset_hours: i64) -> String {
    shifted(epoch_secs, offset_hours)
        .map(|dt| dt.format("%Y%m%d").to_string())
        .unwrap_or_default()
}

/// Parse a `YYYYMMDDHHmm` minute key back to UTC epoch seconds.
///
/// Returns 0 for malformed keys, matching the tolerant decode of the
/// aggregation path (a zero-epoch candle is dropped downstream).
#[must_use]
pub fn minute_key_to_epoch(ymdhm: &str, offset_hours: i64) -> i64 {
    if ymdhm.len() < 12 {
        return 0;
    }
    NaiveDateTime::parse_from_str(ymdhm, "%Y%m%d%H%M")
        .map(|dt| dt.and_utc().timestamp() - offset_hours * 3600)
        .unwrap_or(0)
}
