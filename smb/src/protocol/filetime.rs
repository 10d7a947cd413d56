use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Seconds between 1601-01-01 and the unix epoch.
const SECONDS_BETWEEN_1601_AND_EPOCH: u64 = 11_644_473_600;
const INTERVALS_PER_SECOND: u64 = 10_000_000;

/// Windows FILETIME: 100ns intervals since 1601-01-01 UTC.
#[derive(Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Clone, Copy, Default)]
pub struct FileTime(u64);

impl FileTime {
    pub fn from_raw(intervals: u64) -> Self {
        Self(intervals)
    }

    pub fn from_unix(unix_seconds: u64) -> Self {
        Self((unix_seconds + SECONDS_BETWEEN_1601_AND_EPOCH) * INTERVALS_PER_SECOND)
    }

    pub fn now() -> Self {
        SystemTime::now().into()
    }

    pub fn raw(&self) -> u64 {
        self.0
    }

    /// Whole seconds since the unix epoch, 0 for earlier times.
    pub fn to_unix(&self) -> u64 {
        (self.0 / INTERVALS_PER_SECOND).saturating_sub(SECONDS_BETWEEN_1601_AND_EPOCH)
    }

    pub fn as_bytes(&self) -> [u8; 8] {
        self.0.to_le_bytes()
    }
}

impl From<SystemTime> for FileTime {
    fn from(value: SystemTime) -> Self {
        let since_epoch = value.duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO);
        let intervals = (since_epoch.as_secs() + SECONDS_BETWEEN_1601_AND_EPOCH) * INTERVALS_PER_SECOND
            + since_epoch.subsec_nanos() as u64 / 100;
        Self(intervals)
    }
}
