//! Health counters for a relay session

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::utils::format_bytes;

fn now_micros() -> u64 {
    chrono::Utc::now().timestamp_micros().max(0) as u64
}

/// Health metrics for a relay session
///
/// Tracks counters and the time of the last relayed frame. All fields use
/// atomic operations so the producer task, the loop and the stats ticker
/// can update and read them concurrently.
pub struct PipelineHealth {
    /// Samples taken from the capture side
    pub samples_pulled: AtomicU64,

    /// Frames pushed successfully to the transmit side (or consumed when
    /// there is none)
    pub frames_relayed: AtomicU64,

    /// Frames skipped after a recoverable decode error
    pub frames_skipped: AtomicU64,

    /// Samples the capture side discarded because one was still pending
    pub capture_drops: AtomicU64,

    /// Samples the transmit side rejected
    pub push_failures: AtomicU64,

    /// Total bytes handed to the transmit side
    pub bytes_pushed: AtomicU64,

    /// Timestamp (as Unix microseconds) of the last relayed frame
    pub last_frame_time: AtomicU64,
}

impl PipelineHealth {
    /// Create a new health metrics instance
    pub fn new() -> Self {
        Self {
            samples_pulled: AtomicU64::new(0),
            frames_relayed: AtomicU64::new(0),
            frames_skipped: AtomicU64::new(0),
            capture_drops: AtomicU64::new(0),
            push_failures: AtomicU64::new(0),
            bytes_pushed: AtomicU64::new(0),
            last_frame_time: AtomicU64::new(now_micros()),
        }
    }

    pub fn record_pull(&self) {
        self.samples_pulled.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a frame skipped after a per-frame error
    pub fn record_skip(&self) {
        self.frames_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_push_failure(&self) {
        self.push_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Capture drops are counted by the capture side; keep the latest total
    pub fn set_capture_drops(&self, total: u64) {
        self.capture_drops.fetch_max(total, Ordering::Relaxed);
    }

    /// Record a successfully relayed frame of `size` bytes
    pub fn record_frame(&self, size: usize) {
        self.last_frame_time.store(now_micros(), Ordering::Relaxed);
        self.frames_relayed.fetch_add(1, Ordering::Relaxed);
        self.bytes_pushed.fetch_add(size as u64, Ordering::Relaxed);
    }

    pub fn samples_pulled(&self) -> u64 {
        self.samples_pulled.load(Ordering::Relaxed)
    }

    pub fn frames_relayed(&self) -> u64 {
        self.frames_relayed.load(Ordering::Relaxed)
    }

    pub fn frames_skipped(&self) -> u64 {
        self.frames_skipped.load(Ordering::Relaxed)
    }

    pub fn capture_drops(&self) -> u64 {
        self.capture_drops.load(Ordering::Relaxed)
    }

    pub fn push_failures(&self) -> u64 {
        self.push_failures.load(Ordering::Relaxed)
    }

    pub fn bytes_pushed(&self) -> u64 {
        self.bytes_pushed.load(Ordering::Relaxed)
    }

    /// Get the timestamp of the last frame (Unix microseconds)
    pub fn last_frame_time(&self) -> u64 {
        self.last_frame_time.load(Ordering::Relaxed)
    }

    /// Share of produced frames that never reached the transform, in percent
    pub fn drop_rate(&self) -> f64 {
        let lost = self.capture_drops() + self.frames_skipped();
        let produced = self.samples_pulled() + self.capture_drops();
        if produced == 0 {
            return 0.0;
        }
        (lost as f64 / produced as f64) * 100.0
    }

    /// Check if the session has stalled (no frames for given duration)
    pub fn is_stalled(&self, threshold: Duration) -> bool {
        let elapsed_micros = now_micros().saturating_sub(self.last_frame_time());
        elapsed_micros > threshold.as_micros() as u64
    }

    /// Get a summary of health metrics
    pub fn summary(&self) -> HealthSummary {
        HealthSummary {
            samples_pulled: self.samples_pulled(),
            frames_relayed: self.frames_relayed(),
            frames_skipped: self.frames_skipped(),
            capture_drops: self.capture_drops(),
            push_failures: self.push_failures(),
            bytes_pushed: self.bytes_pushed(),
            drop_rate: self.drop_rate(),
        }
    }
}

impl Default for PipelineHealth {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of health metrics
#[derive(Debug, Clone, PartialEq)]
pub struct HealthSummary {
    pub samples_pulled: u64,
    pub frames_relayed: u64,
    pub frames_skipped: u64,
    pub capture_drops: u64,
    pub push_failures: u64,
    pub bytes_pushed: u64,
    pub drop_rate: f64,
}

impl std::fmt::Display for HealthSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Health: {} relayed / {} pulled ({} skipped, {} dropped, {:.2}%), {} push failures, {}",
            self.frames_relayed,
            self.samples_pulled,
            self.frames_skipped,
            self.capture_drops,
            self.drop_rate,
            self.push_failures,
            format_bytes(self.bytes_pushed)
        )
    }
}
