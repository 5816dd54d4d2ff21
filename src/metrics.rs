//! Settlement counters

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::ledger::types::Chips;

pub struct SettlementMetrics {
    start_time: Instant,
    requested: AtomicU64,
    settled: AtomicU64,
    rejected: AtomicU64,
    conflicts: AtomicU64,
    alerts: AtomicU64,
    wagered: AtomicU64,
    paid_out: AtomicU64,
    collected: AtomicU64,
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub requested: u64,
    pub settled: u64,
    pub rejected: u64,
    pub conflicts: u64,
    pub alerts: u64,
    pub wagered: u64,
    /// Chips the house paid to winners
    pub paid_out: u64,
    /// Chips the house took from losers
    pub collected: u64,
}

impl Default for SettlementMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl SettlementMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            requested: AtomicU64::new(0),
            settled: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            conflicts: AtomicU64::new(0),
            alerts: AtomicU64::new(0),
            wagered: AtomicU64::new(0),
            paid_out: AtomicU64::new(0),
            collected: AtomicU64::new(0),
        }
    }

    pub fn record_request(&self) {
        self.requested.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejection(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_conflict(&self) {
        self.conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_alert(&self) {
        self.alerts.fetch_add(1, Ordering::Relaxed);
    }

    /// A committed round with the player's signed delta
    pub fn record_settlement(&self, stake: Chips, user_delta: Chips) {
        self.settled.fetch_add(1, Ordering::Relaxed);
        self.wagered.fetch_add(stake.max(0) as u64, Ordering::Relaxed);
        if user_delta > 0 {
            self.paid_out.fetch_add(user_delta as u64, Ordering::Relaxed);
        } else {
            self.collected.fetch_add(user_delta.unsigned_abs(), Ordering::Relaxed);
        }
    }

    pub fn total_runtime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Settled rounds per second since start
    pub fn average_rate(&self) -> f64 {
        let total_seconds = self.total_runtime().as_secs_f64();
        if total_seconds < 1.0 {
            return 0.0;
        }
        self.settled.load(Ordering::Relaxed) as f64 / total_seconds
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requested: self.requested.load(Ordering::Relaxed),
            settled: self.settled.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
            alerts: self.alerts.load(Ordering::Relaxed),
            wagered: self.wagered.load(Ordering::Relaxed),
            paid_out: self.paid_out.load(Ordering::Relaxed),
            collected: self.collected.load(Ordering::Relaxed),
        }
    }
}
