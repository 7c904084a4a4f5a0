//! Reconnect scheduling on top of the deferred action timer
//!
//! This is the building block a reconnect supervisor drives; it does not
//! decide *when* the connection is lost or *how* to reconnect. The
//! supervisor calls [`ReconnectScheduler::schedule`] after a disconnect,
//! [`ReconnectScheduler::connected`] once the transport is back, and
//! [`ReconnectScheduler::poll`] from its periodic loop.

use super::backoff::{BackoffConfig, ExponentialBackoff};
use super::timer::DeferredAction;
use parking_lot::Mutex;
use std::time::{Duration, Instant};
use tracing::{error, info};

/// Connection state as seen by the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Connected and operational
    Connected,
    /// Disconnected, a reconnect attempt is scheduled or running
    Reconnecting,
    /// Backoff exhausted, no further attempts will be scheduled
    Failed,
}

/// Counters for reconnect activity
#[derive(Debug, Clone, Default)]
pub struct ReconnectionStats {
    /// Attempts scheduled
    pub reconnection_attempts: u64,
    /// Transitions back to connected
    pub successful_reconnections: u64,
    /// Last time the connection came back
    pub last_reconnection: Option<Instant>,
}

struct SchedulerState {
    backoff: ExponentialBackoff,
    state: ConnectionState,
    stats: ReconnectionStats,
}

pub struct ReconnectScheduler {
    inner: Mutex<SchedulerState>,
    timer: DeferredAction,
}

impl ReconnectScheduler {
    /// Scheduler for a connection that is currently up
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            inner: Mutex::new(SchedulerState {
                backoff: ExponentialBackoff::with_config(config),
                state: ConnectionState::Connected,
                stats: ReconnectionStats::default(),
            }),
            timer: DeferredAction::new(),
        }
    }

    /// Arm the next reconnect attempt after the current backoff delay
    ///
    /// Returns false, and moves to `Failed`, once retries are exhausted.
    pub fn schedule<F>(&self, attempt: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let delay = {
            let mut inner = self.inner.lock();
            match inner.backoff.next_delay() {
                Some(delay) => {
                    inner.state = ConnectionState::Reconnecting;
                    inner.stats.reconnection_attempts += 1;
                    info!(
                        "Reconnect attempt #{} scheduled in {:?}",
                        inner.backoff.attempt_number(),
                        delay
                    );
                    delay
                }
                None => {
                    inner.state = ConnectionState::Failed;
                    error!(
                        "Reconnect attempts exhausted after {} tries",
                        inner.backoff.attempt_number()
                    );
                    return false;
                }
            }
        };

        // The attempt may report success synchronously, so no lock is held here
        self.timer.start(delay, attempt);
        true
    }

    /// Connection re-established: cancel pending attempts and reset backoff
    pub fn connected(&self) {
        self.timer.reset();
        let mut inner = self.inner.lock();
        if inner.state != ConnectionState::Connected {
            inner.stats.successful_reconnections += 1;
            inner.stats.last_reconnection = Some(Instant::now());
            info!(
                "Reconnected after {} attempt(s)",
                inner.backoff.attempt_number()
            );
        }
        inner.backoff.reset();
        inner.state = ConnectionState::Connected;
    }

    /// Fire the pending attempt if due
    pub fn poll(&self) -> bool {
        self.timer.poll()
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    /// Whether an attempt is armed and waiting
    pub fn is_pending(&self) -> bool {
        self.timer.is_running()
    }

    /// Time until the armed attempt fires
    pub fn next_attempt_in(&self) -> Option<Duration> {
        self.timer.remaining()
    }

    pub fn stats(&self) -> ReconnectionStats {
        self.inner.lock().stats.clone()
    }
}

impl Default for ReconnectScheduler {
    fn default() -> Self {
        Self::new(BackoffConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_zero_delay_attempt_runs_inline() {
        let scheduler = ReconnectScheduler::new(BackoffConfig::fixed(Duration::ZERO));
        let attempts = Arc::new(AtomicUsize::new(0));
        let a = attempts.clone();

        assert!(scheduler.schedule(move || {
            a.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.state(), ConnectionState::Reconnecting);
        assert!(!scheduler.is_pending());
    }

    #[test]
    fn test_delayed_attempt_waits_for_poll() {
        let scheduler = ReconnectScheduler::new(BackoffConfig::fixed(Duration::from_millis(5)));
        let attempts = Arc::new(AtomicUsize::new(0));
        let a = attempts.clone();

        scheduler.schedule(move || {
            a.fetch_add(1, Ordering::SeqCst);
        });
        assert!(scheduler.is_pending());
        assert!(scheduler.next_attempt_in().is_some());

        std::thread::sleep(Duration::from_millis(10));
        assert!(scheduler.poll());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_exhaustion_moves_to_failed() {
        let config = BackoffConfig {
            max_retries: Some(1),
            ..BackoffConfig::fixed(Duration::from_millis(1))
        };
        let scheduler = ReconnectScheduler::new(config);

        assert!(scheduler.schedule(|| {}));
        assert!(!scheduler.schedule(|| {}));
        assert_eq!(scheduler.state(), ConnectionState::Failed);
        assert_eq!(scheduler.stats().reconnection_attempts, 1);
    }

    #[test]
    fn test_connected_cancels_and_resets() {
        let config = BackoffConfig {
            max_retries: Some(1),
            ..BackoffConfig::fixed(Duration::from_secs(60))
        };
        let scheduler = ReconnectScheduler::new(config);

        assert!(scheduler.schedule(|| {}));
        scheduler.connected();
        assert!(!scheduler.is_pending());
        assert_eq!(scheduler.state(), ConnectionState::Connected);
        assert_eq!(scheduler.stats().successful_reconnections, 1);

        // Backoff budget restored
        assert!(scheduler.schedule(|| {}));
    }
}
