//! Statistics for relay sessions

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Live counters for one relay session
///
/// Updated from the pump task and from join/leave; read via [`snapshot`](Self::snapshot).
#[derive(Debug)]
pub struct RelayStats {
    started_at: Instant,
    upstream_connects: AtomicU64,
    upstream_errors: AtomicU64,
    chunks_relayed: AtomicU64,
    bytes_relayed: AtomicU64,
    markers_repaired: AtomicU64,
    viewers_joined: AtomicU64,
    viewers_left: AtomicU64,
    viewer_write_failures: AtomicU64,
}

impl RelayStats {
    /// Create a zeroed stats tracker
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            upstream_connects: AtomicU64::new(0),
            upstream_errors: AtomicU64::new(0),
            chunks_relayed: AtomicU64::new(0),
            bytes_relayed: AtomicU64::new(0),
            markers_repaired: AtomicU64::new(0),
            viewers_joined: AtomicU64::new(0),
            viewers_left: AtomicU64::new(0),
            viewer_write_failures: AtomicU64::new(0),
        }
    }

    pub(crate) fn record_connect(&self) {
        self.upstream_connects.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_upstream_error(&self) {
        self.upstream_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_chunk(&self, bytes: usize) {
        self.chunks_relayed.fetch_add(1, Ordering::Relaxed);
        self.bytes_relayed.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_repairs(&self, count: u64) {
        if count > 0 {
            self.markers_repaired.fetch_add(count, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_join(&self) {
        self.viewers_joined.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_leave(&self) {
        self.viewers_left.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_write_failure(&self) {
        self.viewer_write_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a point-in-time copy of the counters
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            uptime: self.started_at.elapsed(),
            upstream_connects: self.upstream_connects.load(Ordering::Relaxed),
            upstream_errors: self.upstream_errors.load(Ordering::Relaxed),
            chunks_relayed: self.chunks_relayed.load(Ordering::Relaxed),
            bytes_relayed: self.bytes_relayed.load(Ordering::Relaxed),
            markers_repaired: self.markers_repaired.load(Ordering::Relaxed),
            viewers_joined: self.viewers_joined.load(Ordering::Relaxed),
            viewers_left: self.viewers_left.load(Ordering::Relaxed),
            viewer_write_failures: self.viewer_write_failures.load(Ordering::Relaxed),
        }
    }
}

impl Default for RelayStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time relay statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Time since the session was created
    pub uptime: Duration,
    /// Upstream connections opened
    pub upstream_connects: u64,
    /// Failed connects and mid-stream upstream errors
    pub upstream_errors: u64,
    /// Chunks read from upstream and broadcast
    pub chunks_relayed: u64,
    /// Bytes broadcast (after framing repair), counted once per chunk
    pub bytes_relayed: u64,
    /// Delimiters that needed a CRLF inserted
    pub markers_repaired: u64,
    /// Viewers attached
    pub viewers_joined: u64,
    /// Viewers detached (disconnect, write failure, or stream end)
    pub viewers_left: u64,
    /// Sink writes that failed
    pub viewer_write_failures: u64,
}

impl StatsSnapshot {
    /// Current audience size implied by the counters
    pub fn active_viewers(&self) -> u64 {
        self.viewers_joined.saturating_sub(self.viewers_left)
    }

    /// Average relay bitrate in bits per second
    pub fn bitrate(&self) -> u64 {
        let secs = self.uptime.as_secs();
        if secs > 0 {
            (self.bytes_relayed * 8) / secs
        } else {
            0
        }
    }
}
