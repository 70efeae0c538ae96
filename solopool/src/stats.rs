//! Share accounting counters.
//!
//! Counters are atomics so session tasks, the validator, and the status
//! API can touch them without coordination. Best-share difficulty is an
//! f64 stored as its bit pattern behind a compare-and-swap loop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;

/// Process-wide counters backing the status API.
#[derive(Debug)]
pub struct PoolCounters {
    started: Instant,
    accepted_shares: AtomicU64,
    rejected_shares: AtomicU64,
    blocks_found: AtomicU64,
    best_difficulty: AtomicU64,
}

impl Default for PoolCounters {
    fn default() -> Self {
        Self {
            started: Instant::now(),
            accepted_shares: AtomicU64::new(0),
            rejected_shares: AtomicU64::new(0),
            blocks_found: AtomicU64::new(0),
            best_difficulty: AtomicU64::new(0f64.to_bits()),
        }
    }
}

impl PoolCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_accepted(&self, share_difficulty: f64) {
        self.accepted_shares.fetch_add(1, Ordering::Relaxed);
        update_best(&self.best_difficulty, share_difficulty);
    }

    pub fn record_rejected(&self) {
        self.rejected_shares.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_block(&self) {
        self.blocks_found.fetch_add(1, Ordering::Relaxed);
    }

    pub fn accepted(&self) -> u64 {
        self.accepted_shares.load(Ordering::Relaxed)
    }

    pub fn rejected(&self) -> u64 {
        self.rejected_shares.load(Ordering::Relaxed)
    }

    pub fn blocks(&self) -> u64 {
        self.blocks_found.load(Ordering::Relaxed)
    }

    pub fn best_difficulty(&self) -> f64 {
        f64::from_bits(self.best_difficulty.load(Ordering::Relaxed))
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started.elapsed().as_secs()
    }
}

/// Per-session counters, shared between the session task and the registry.
#[derive(Debug, Default)]
pub struct SessionStats {
    worker: Mutex<Option<String>>,
    accepted_shares: AtomicU64,
    rejected_shares: AtomicU64,
    best_difficulty: AtomicU64,
}

impl SessionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_worker(&self, worker: String) {
        *self.worker.lock() = Some(worker);
    }

    pub fn worker(&self) -> Option<String> {
        self.worker.lock().clone()
    }

    pub fn record_accepted(&self, share_difficulty: f64) {
        self.accepted_shares.fetch_add(1, Ordering::Relaxed);
        update_best(&self.best_difficulty, share_difficulty);
    }

    pub fn record_rejected(&self) {
        self.rejected_shares.fetch_add(1, Ordering::Relaxed);
    }

    pub fn accepted(&self) -> u64 {
        self.accepted_shares.load(Ordering::Relaxed)
    }

    pub fn rejected(&self) -> u64 {
        self.rejected_shares.load(Ordering::Relaxed)
    }

    pub fn best_difficulty(&self) -> f64 {
        f64::from_bits(self.best_difficulty.load(Ordering::Relaxed))
    }
}

fn update_best(slot: &AtomicU64, candidate: f64) {
    let mut current = slot.load(Ordering::Relaxed);
    while candidate > f64::from_bits(current) {
        match slot.compare_exchange_weak(
            current,
            candidate.to_bits(),
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(seen) => current = seen,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn best_difficulty_only_rises() {
        let counters = PoolCounters::new();
        counters.record_accepted(100.0);
        counters.record_accepted(50.0);
        assert_eq!(counters.best_difficulty(), 100.0);
        counters.record_accepted(250.0);
        assert_eq!(counters.best_difficulty(), 250.0);
        assert_eq!(counters.accepted(), 3);
    }

    #[test]
    fn session_stats_track_worker() {
        let stats = SessionStats::new();
        assert!(stats.worker().is_none());
        stats.set_worker("bc1q.worker".into());
        assert_eq!(stats.worker().as_deref(), Some("bc1q.worker"));
    }
}
