use std::time::Duration;

/// Current time as a `Duration` since the Unix epoch.
///
/// # Panics
/// Panics if the system clock reports a time before the epoch.
#[must_use]
pub fn get_current_timestamp() -> Duration {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock is before the Unix epoch")
}
