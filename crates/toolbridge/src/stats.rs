//! Bridge counters.
//!
//! Everything the bridge drops on the floor (malformed lines, late replies,
//! saturation rejections) is counted here so it shows up in the health check.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct BridgeStats {
    sent: AtomicU64,
    resolved: AtomicU64,
    timed_out: AtomicU64,
    worker_errors: AtomicU64,
    malformed_lines: AtomicU64,
    unmatched_responses: AtomicU64,
    rejected_saturated: AtomicU64,
    restarts: AtomicU64,
}

impl BridgeStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_resolved(&self) {
        self.resolved.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timed_out(&self) {
        self.timed_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_worker_error(&self) {
        self.worker_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed_line(&self) {
        self.malformed_lines.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unmatched(&self) {
        self.unmatched_responses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_saturated(&self) {
        self.rejected_saturated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_restart(&self) {
        self.restarts.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy. `pending` comes from the correlator.
    pub fn snapshot(&self, pending: usize) -> StatsSnapshot {
        StatsSnapshot {
            sent: self.sent.load(Ordering::Relaxed),
            resolved: self.resolved.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            worker_errors: self.worker_errors.load(Ordering::Relaxed),
            malformed_lines: self.malformed_lines.load(Ordering::Relaxed),
            unmatched_responses: self.unmatched_responses.load(Ordering::Relaxed),
            rejected_saturated: self.rejected_saturated.load(Ordering::Relaxed),
            pending,
            restarts: self.restarts.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub sent: u64,
    pub resolved: u64,
    pub timed_out: u64,
    pub worker_errors: u64,
    pub malformed_lines: u64,
    pub unmatched_responses: u64,
    pub rejected_saturated: u64,
    pub pending: usize,
    pub restarts: u64,
}
