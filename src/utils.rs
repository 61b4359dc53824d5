use chrono::{DateTime, Datelike, TimeZone, Utc};
use std::time::{SystemTime, UNIX_EPOCH};

pub fn get_current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

pub fn format_store_key(prefix: &str, key: &str) -> String {
    format!("{}:{}", prefix, key)
}

/// Calendar period key used for quota accounting, e.g. "2026-08".
pub fn period_key(now: DateTime<Utc>) -> String {
    now.format("%Y-%m").to_string()
}

/// First instant of the period following `now`. Quota counters reset here.
pub fn next_period_start(now: DateTime<Utc>) -> DateTime<Utc> {
    let first_of_month = now
        .date_naive()
        .with_day(1)
        .unwrap_or_else(|| now.date_naive());
    let next = first_of_month + chrono::Months::new(1);
    let midnight = next
        .and_hms_opt(0, 0, 0)
        .unwrap_or_else(|| now.naive_utc());
    Utc.from_utc_datetime(&midnight)
}
