//! # Sync Metrics
//!
//! Counters describing drain activity, exposed for status output and tests.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncMetrics {
    pub total_drains: u64,
    pub coalesced_drains: u64,
    pub executions: u64,
    pub successes: u64,
    pub retries_scheduled: u64,
    pub failures: u64,
    pub timeouts: u64,
    pub last_drain_duration: Option<Duration>,
    pub last_drain_start: Option<Instant>,
}

impl SyncMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_drain_start(&mut self) {
        self.last_drain_start = Some(Instant::now());
        self.total_drains += 1;
    }

    pub fn record_drain_end(&mut self) {
        if let Some(start) = self.last_drain_start {
            self.last_drain_duration = Some(start.elapsed());
        }
    }

    pub fn record_coalesced(&mut self) {
        self.coalesced_drains += 1;
    }

    pub fn record_execution(&mut self) {
        self.executions += 1;
    }

    pub fn record_success(&mut self) {
        self.successes += 1;
    }

    pub fn record_retry(&mut self) {
        self.retries_scheduled += 1;
    }

    pub fn record_failure(&mut self) {
        self.failures += 1;
    }

    pub fn record_timeout(&mut self) {
        self.timeouts += 1;
    }

    pub fn success_rate(&self) -> f64 {
        if self.executions == 0 {
            0.0
        } else {
            self.successes as f64 / self.executions as f64
        }
    }
}
