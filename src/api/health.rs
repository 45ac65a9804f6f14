//! Shared health state for the /health endpoint.
//! Updated by the refresh orchestrator after every cycle.

use std::sync::atomic::{AtomicU64, Ordering};

/// Shared health metrics. Updated by the orchestrator, read by API.
#[derive(Default)]
pub struct HealthState {
    /// Nanosecond timestamp of the last completed refresh cycle (0 = none).
    pub last_cycle_at_ns: AtomicU64,
    /// Refresh cycles that reached the recompute step.
    pub cycles_completed: AtomicU64,
    /// Per-exchange fetches that errored or timed out, across all cycles.
    pub fetch_failures: AtomicU64,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_cycle(&self, at_ns: u64, failures: u64) {
        self.last_cycle_at_ns.store(at_ns, Ordering::Relaxed);
        self.cycles_completed.fetch_add(1, Ordering::Relaxed);
        self.fetch_failures.fetch_add(failures, Ordering::Relaxed);
    }

    pub fn last_cycle_at_ns(&self) -> u64 {
        self.last_cycle_at_ns.load(Ordering::Relaxed)
    }

    pub fn cycles_completed(&self) -> u64 {
        self.cycles_completed.load(Ordering::Relaxed)
    }

    pub fn fetch_failures(&self) -> u64 {
        self.fetch_failures.load(Ordering::Relaxed)
    }
}
