//! Single-shot, resettable delayed action
//!
//! No thread per timer: an external driver calls [`DeferredAction::poll`]
//! periodically and the action fires on the driver's thread once its trigger
//! time has passed.
//!
//! ```text
//! start(0, a)   → a() runs now, timer stays idle
//! start(d, a)   → armed at now + d (replaces any armed action)
//! reset()       → idle
//! poll()        → if armed and due: disarm, run a()
//! ```

use parking_lot::Mutex;
use std::fmt;
use std::time::{Duration, Instant};

type Action = Box<dyn FnOnce() + Send>;

struct Armed {
    trigger_at: Instant,
    action: Action,
}

#[derive(Default)]
pub struct DeferredAction {
    armed: Mutex<Option<Armed>>,
}

impl DeferredAction {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the timer, or run `action` immediately when `delay` is zero
    pub fn start<F>(&self, delay: Duration, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if delay.is_zero() {
            self.reset();
            action();
            return;
        }

        let now = Instant::now();
        let trigger_at = now
            .checked_add(delay)
            .or_else(|| now.checked_add(Duration::from_secs(u32::MAX as u64)))
            .unwrap_or(now);
        *self.armed.lock() = Some(Armed {
            trigger_at,
            action: Box::new(action),
        });
    }

    /// Cancel any armed action
    pub fn reset(&self) {
        self.armed.lock().take();
    }

    /// Whether a trigger time is set
    pub fn is_running(&self) -> bool {
        self.armed.lock().is_some()
    }

    /// Time left before the armed action is due
    pub fn remaining(&self) -> Option<Duration> {
        self.armed
            .lock()
            .as_ref()
            .map(|armed| armed.trigger_at.saturating_duration_since(Instant::now()))
    }

    /// Fire the action if it is due. Returns true if it ran.
    pub fn poll(&self) -> bool {
        self.poll_at(Instant::now())
    }

    fn poll_at(&self, now: Instant) -> bool {
        let due = {
            let mut armed = self.armed.lock();
            let is_due = armed.as_ref().map_or(false, |a| a.trigger_at <= now);
            if is_due {
                armed.take()
            } else {
                None
            }
        };

        match due {
            Some(armed) => {
                (armed.action)();
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for DeferredAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredAction")
            .field("remaining", &self.remaining())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counter() -> (Arc<AtomicUsize>, impl FnOnce() + Send + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        (count, move || {
            c.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_zero_delay_runs_immediately() {
        let timer = DeferredAction::new();
        let (count, action) = counter();
        timer.start(Duration::ZERO, action);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!timer.is_running());
    }

    #[test]
    fn test_fires_once_when_due() {
        let timer = DeferredAction::new();
        let (count, action) = counter();
        timer.start(Duration::from_millis(50), action);
        assert!(timer.is_running());

        assert!(!timer.poll());
        assert_eq!(count.load(Ordering::SeqCst), 0);

        let later = Instant::now() + Duration::from_millis(100);
        assert!(timer.poll_at(later));
        assert!(!timer.poll_at(later));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!timer.is_running());
    }

    #[test]
    fn test_reset_cancels() {
        let timer = DeferredAction::new();
        let (count, action) = counter();
        timer.start(Duration::from_millis(1), action);
        timer.reset();
        assert!(!timer.is_running());
        assert!(!timer.poll_at(Instant::now() + Duration::from_secs(1)));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_restart_replaces_action() {
        let timer = DeferredAction::new();
        let (first, first_action) = counter();
        let (second, second_action) = counter();

        timer.start(Duration::from_millis(1), first_action);
        timer.start(Duration::from_millis(1), second_action);
        assert!(timer.poll_at(Instant::now() + Duration::from_secs(1)));

        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_remaining() {
        let timer = DeferredAction::new();
        assert_eq!(timer.remaining(), None);
        timer.start(Duration::from_secs(10), || {});
        let remaining = timer.remaining().unwrap();
        assert!(remaining <= Duration::from_secs(10));
        assert!(remaining > Duration::from_secs(9));
    }
}
