use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Converts a timestamp to signed milliseconds relative to the UNIX epoch.
pub fn to_epoch_ms(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(after) => after.as_millis().try_into().unwrap_or(i64::MAX),
        Err(err) => {
            let before: i64 = err.duration().as_millis().try_into().unwrap_or(i64::MAX);
            -before
        }
    }
}

/// Converts signed epoch milliseconds back to a timestamp.
///
/// Returns `None` when the platform cannot represent the instant.
pub fn from_epoch_ms(ms: i64) -> Option<SystemTime> {
    let magnitude = Duration::from_millis(ms.unsigned_abs());
    if ms >= 0 {
        UNIX_EPOCH.checked_add(magnitude)
    } else {
        UNIX_EPOCH.checked_sub(magnitude)
    }
}
