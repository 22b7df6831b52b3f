//! Presentation clock for samples handed to the transmit side

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Instant;

use super::types::Timestamp;

/// Monotonic presentation clock
///
/// Timestamps are derived from the elapsed time since the clock base, but
/// every call to [`MediaClock::next_pts`] returns a value strictly greater
/// than the previous one, even when two frames are stamped within the same
/// microsecond.
///
/// # Thread Safety
///
/// The clock can be cloned and shared; state is kept in atomics.
#[derive(Clone)]
pub struct MediaClock {
    /// Base instant when the clock started
    base: Arc<Instant>,

    /// Last timestamp handed out (microseconds)
    last_pts: Arc<AtomicI64>,
}

impl MediaClock {
    /// Create a new media clock starting now
    pub fn new() -> Self {
        Self {
            base: Arc::new(Instant::now()),
            last_pts: Arc::new(AtomicI64::new(-1)),
        }
    }

    /// Stamp a new sample: never equal to or below the previous stamp
    pub fn next_pts(&self) -> Timestamp {
        let now = self.base.elapsed().as_micros() as i64;
        let prev = self
            .last_pts
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or_else(|last| last);
        Timestamp::from_micros(now.max(prev + 1))
    }
}

impl Default for MediaClock {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MediaClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaClock")
            .field("elapsed", &self.base.elapsed())
            .field("last_pts", &self.last_pts.load(Ordering::Relaxed))
            .finish()
    }
}
