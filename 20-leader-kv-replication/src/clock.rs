use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};

use crate::message::Timestamp;

/// Wall-clock timestamps for writes accepted by the leader.
///
/// Readings never go backwards even if the system clock does. Two writes in
/// the same millisecond get the same timestamp.
#[derive(Debug, Default)]
pub struct LeaderClock {
    last: AtomicU64,
}

impl LeaderClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> Timestamp {
        self.observe(wall_clock_millis())
    }

    /// Folds a reading into the clock and returns the timestamp to use for it.
    fn observe(&self, reading: Timestamp) -> Timestamp {
        let previous = self.last.fetch_max(reading, Ordering::SeqCst);
        previous.max(reading)
    }

    pub fn last(&self) -> Timestamp {
        self.last.load(Ordering::SeqCst)
    }
}

fn wall_clock_millis() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as Timestamp)
        .unwrap_or_default()
}
