//! Transaction counters
//!
//! Monotonic, reset only on process start. Relaxed atomics; readers may see
//! counters from slightly different instants.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct MetricsRegistry {
    watch_sessions: AtomicU64,
    watch_commits: AtomicU64,
    watch_conflicts: AtomicU64,
    batches_executed: AtomicU64,
    batches_aborted: AtomicU64,
    command_faults: AtomicU64,
    mutator_writes: AtomicU64,
    store_failures: AtomicU64,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_watch_sessions(&self) {
        self.watch_sessions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_watch_commits(&self) {
        self.watch_commits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_watch_conflicts(&self) {
        self.watch_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_batches_executed(&self) {
        self.batches_executed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_batches_aborted(&self) {
        self.batches_aborted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_command_faults(&self, n: u64) {
        self.command_faults.fetch_add(n, Ordering::Relaxed);
    }

    pub fn increment_mutator_writes(&self) {
        self.mutator_writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_store_failures(&self) {
        self.store_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            watch_sessions: self.watch_sessions.load(Ordering::Relaxed),
            watch_commits: self.watch_commits.load(Ordering::Relaxed),
            watch_conflicts: self.watch_conflicts.load(Ordering::Relaxed),
            batches_executed: self.batches_executed.load(Ordering::Relaxed),
            batches_aborted: self.batches_aborted.load(Ordering::Relaxed),
            command_faults: self.command_faults.load(Ordering::Relaxed),
            mutator_writes: self.mutator_writes.load(Ordering::Relaxed),
            store_failures: self.store_failures.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of every counter
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub watch_sessions: u64,
    pub watch_commits: u64,
    pub watch_conflicts: u64,
    pub batches_executed: u64,
    pub batches_aborted: u64,
    pub command_faults: u64,
    pub mutator_writes: u64,
    pub store_failures: u64,
}
