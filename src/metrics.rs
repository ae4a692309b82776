//! # Pipeline Metrics
//!
//! Plain atomic counters for the attempts/drops/in-flight/pool-exhaustion
//! numbers spec.md §4.3/§4.4/§5 call for, plus a point-in-time snapshot.
//! Not a metrics-export crate: this workspace only needs the counters the
//! watchdog and diagnostics logging read back.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct PipelineMetrics {
    pub frames_captured: AtomicU64,
    pub frames_paced_out: AtomicU64,
    pub frames_copied: AtomicU64,
    pub frames_encoded: AtomicU64,
    pub frames_dropped_in_flight: AtomicU64,
    pub frames_dropped_pool_exhausted: AtomicU64,
    pub datagrams_sent: AtomicU64,
    pub datagrams_send_failed: AtomicU64,
    pub reassembly_checksum_drops: AtomicU64,
    pub reassembly_evictions: AtomicU64,
    pub capture_restarts: AtomicU64,
    pub capture_stalls: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub frames_captured: u64,
    pub frames_paced_out: u64,
    pub frames_copied: u64,
    pub frames_encoded: u64,
    pub frames_dropped_in_flight: u64,
    pub frames_dropped_pool_exhausted: u64,
    pub datagrams_sent: u64,
    pub datagrams_send_failed: u64,
    pub reassembly_checksum_drops: u64,
    pub reassembly_evictions: u64,
    pub capture_restarts: u64,
    pub capture_stalls: u64,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            frames_captured: self.frames_captured.load(Ordering::Relaxed),
            frames_paced_out: self.frames_paced_out.load(Ordering::Relaxed),
            frames_copied: self.frames_copied.load(Ordering::Relaxed),
            frames_encoded: self.frames_encoded.load(Ordering::Relaxed),
            frames_dropped_in_flight: self.frames_dropped_in_flight.load(Ordering::Relaxed),
            frames_dropped_pool_exhausted: self
                .frames_dropped_pool_exhausted
                .load(Ordering::Relaxed),
            datagrams_sent: self.datagrams_sent.load(Ordering::Relaxed),
            datagrams_send_failed: self.datagrams_send_failed.load(Ordering::Relaxed),
            reassembly_checksum_drops: self.reassembly_checksum_drops.load(Ordering::Relaxed),
            reassembly_evictions: self.reassembly_evictions.load(Ordering::Relaxed),
            capture_restarts: self.capture_restarts.load(Ordering::Relaxed),
            capture_stalls: self.capture_stalls.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_recorded_counts() {
        let metrics = PipelineMetrics::new();
        metrics.frames_captured.fetch_add(5, Ordering::Relaxed);
        metrics
            .frames_dropped_in_flight
            .fetch_add(2, Ordering::Relaxed);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.frames_captured, 5);
        assert_eq!(snapshot.frames_dropped_in_flight, 2);
        assert_eq!(snapshot.frames_encoded, 0);
    }
}
