pub const MILLIS_PER_DAY: u64 = 24 * 60 * 60 * 1_000;

/// Returns the current Unix timestamp in milliseconds.
pub fn current_unix_timestamp_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}

pub fn days_to_ms(days: u64) -> u64 {
    days.saturating_mul(MILLIS_PER_DAY)
}

/// Returns the instant `max_age_days` before `now_unix_ms`, clamped at the epoch.
pub fn age_cutoff_unix_ms(now_unix_ms: u64, max_age_days: u64) -> u64 {
    now_unix_ms.saturating_sub(days_to_ms(max_age_days))
}

/// Strict comparison: a record stamped exactly at the cutoff is still retained.
pub fn is_older_than_cutoff(timestamp_unix_ms: u64, cutoff_unix_ms: u64) -> bool {
    timestamp_unix_ms < cutoff_unix_ms
}
