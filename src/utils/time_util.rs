use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Seconds since `1970-1-1 00:00:00`, named as [UNIX_EPOCH].
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
}

/// Truncated stamp for the superblock's 16-bit mount/write times.
pub fn low_precision_now() -> u16 {
    epoch_secs() as u16
}

/// Inode timestamps back to a [SystemTime] for the bridge.
pub fn system_time(secs: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(secs)
}
