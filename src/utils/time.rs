use chrono::Utc;

/// Wall-clock milliseconds since the unix epoch.
#[inline(always)]
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
