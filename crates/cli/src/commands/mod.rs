pub mod config;
pub mod hosts;
pub mod inspect;

/// Seconds since the Unix epoch rendered as RFC 3339, or the raw number if
/// it is out of range.
pub(crate) fn format_epoch(secs: u64) -> String {
    i64::try_from(secs)
        .ok()
        .and_then(|s| chrono::DateTime::from_timestamp(s, 0))
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| secs.to_string())
}
