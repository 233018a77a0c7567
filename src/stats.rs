use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Current wall-clock time as a duration since the unix epoch.
///
/// A clock set before the epoch reads as `Duration::ZERO`.
pub(crate) fn now() -> Duration {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO)
}

/// Minute-of-hour for the given time since the epoch.
pub(crate) fn minute_of_hour(t: Duration) -> u8 {
    ((t.as_secs() / 60) % 60) as u8
}

/// Counts events and the rate at which they arrived during the last
/// completed wall-clock minute.
///
/// Buckets are keyed on minute-of-hour, so two events exactly an hour
/// apart land in the same bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinuteCounter {
    /// Every event ever recorded.
    pub total: u64,
    /// Minute-of-hour of the bucket currently being filled.
    pub current_minute: u8,
    /// Events recorded inside `current_minute`.
    pub in_current_minute: u64,
    /// Events recorded inside the previous bucket.
    pub last_per_minute: u64,
}

impl MinuteCounter {
    pub(crate) fn record(&mut self) {
        self.record_at(minute_of_hour(now()))
    }

    pub(crate) fn record_at(&mut self, minute: u8) {
        self.total += 1;
        if minute != self.current_minute {
            log::trace!(
                "minute bucket rolled over from {} to {} after {} events",
                self.current_minute,
                minute,
                self.in_current_minute
            );
            self.current_minute = minute;
            self.last_per_minute = self.in_current_minute;
            self.in_current_minute = 1;
        } else {
            self.in_current_minute += 1;
        }
    }
}

/// Usage statistics for one database space.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpaceStats {
    /// Attempted adds, including ones the engine refused.
    pub adds: MinuteCounter,
    /// Queries of any kind.
    pub queries: MinuteCounter,
    /// Successful adds since this space was last saved.
    pub adds_since_last_save: u64,
}

impl SpaceStats {
    pub(crate) fn count_add(&mut self) {
        self.adds.record();
    }

    pub(crate) fn count_query(&mut self) {
        self.queries.record();
    }

    pub fn add_count(&self) -> u64 {
        self.adds.total
    }

    pub fn add_per_minute(&self) -> u64 {
        self.adds.last_per_minute
    }

    pub fn query_count(&self) -> u64 {
        self.queries.total
    }

    pub fn query_per_minute(&self) -> u64 {
        self.queries.last_per_minute
    }
}
