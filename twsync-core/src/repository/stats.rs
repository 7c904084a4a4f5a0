//! Counters for pending-table activity

use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters, updated with relaxed atomics from any thread
#[derive(Debug, Default)]
pub struct RepositoryStats {
    registered: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    duplicates: AtomicU64,
    not_connected: AtomicU64,
    issue_failures: AtomicU64,
    dropped_events: AtomicU64,
}

/// Point-in-time copy of [`RepositoryStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Requests accepted into the table
    pub registered: u64,
    /// Requests resolved with a value
    pub completed: u64,
    /// Requests resolved with an error
    pub failed: u64,
    /// Waiters released by their deadline
    pub timed_out: u64,
    /// Registrations rejected as duplicates
    pub duplicates: u64,
    /// Registrations rejected while disconnected
    pub not_connected: u64,
    /// Registrations whose send action failed
    pub issue_failures: u64,
    /// Events for unknown or finished requests
    pub dropped_events: u64,
}

impl StatsSnapshot {
    /// Requests resolved by any means
    pub fn resolved(&self) -> u64 {
        self.completed + self.failed + self.timed_out
    }
}

impl RepositoryStats {
    pub fn record_registered(&self) {
        self.registered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timed_out(&self) {
        self.timed_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicate(&self) {
        self.duplicates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_not_connected(&self) {
        self.not_connected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_issue_failure(&self) {
        self.issue_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.dropped_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            registered: self.registered.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            not_connected: self.not_connected.load(Ordering::Relaxed),
            issue_failures: self.issue_failures.load(Ordering::Relaxed),
            dropped_events: self.dropped_events.load(Ordering::Relaxed),
        }
    }
}
