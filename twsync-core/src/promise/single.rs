//! Blocking single-assignment result cell
//!
//! ```text
//!            set_done(v)
//!   PENDING ─────────────→ DONE(v)
//!      │  set_error(e)
//!      ├─────────────────→ FAILED(e)
//!      │  get_timeout expiry
//!      └─────────────────→ TIMED_OUT
//! ```
//!
//! Every terminal state is final: later `set_*` calls return false and
//! leave the delivered outcome untouched, and every `get` after the
//! transition returns the same outcome without blocking.
//!
//! Completion hooks run exactly once, after the transition, outside the
//! state lock. The repository uses them to deregister the request, so the
//! promise never holds a reference back to the table.

use crate::core::RequestError;
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

type Hook = Box<dyn FnOnce() + Send>;

enum State<T> {
    Pending,
    Done(T),
    Failed(RequestError),
    TimedOut(Duration),
}

impl<T> State<T> {
    fn is_pending(&self) -> bool {
        matches!(self, State::Pending)
    }

    fn name(&self) -> &'static str {
        match self {
            State::Pending => "Pending",
            State::Done(_) => "Done",
            State::Failed(_) => "Failed",
            State::TimedOut(_) => "TimedOut",
        }
    }
}

impl<T: Clone> State<T> {
    fn outcome(&self) -> Option<Result<T, RequestError>> {
        match self {
            State::Pending => None,
            State::Done(value) => Some(Ok(value.clone())),
            State::Failed(err) => Some(Err(err.clone())),
            State::TimedOut(timeout) => Some(Err(RequestError::ResponseTimeout { timeout: *timeout })),
        }
    }
}

struct Inner<T> {
    state: State<T>,
    hooks: Vec<Hook>,
    on_timeout: Vec<Hook>,
}

struct Shared<T> {
    inner: Mutex<Inner<T>>,
    ready: Condvar,
}

/// Thread-safe, blocking-readable result of one request
///
/// Cloning yields another handle to the same cell.
pub struct Promise<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Promise<T> {
    /// Create a pending promise
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    state: State::Pending,
                    hooks: Vec::new(),
                    on_timeout: Vec::new(),
                }),
                ready: Condvar::new(),
            }),
        }
    }

    /// Resolve with a value. Returns false if already terminal.
    pub fn set_done(&self, value: T) -> bool {
        self.settle(State::Done(value))
    }

    /// Resolve exceptionally. Returns false if already terminal.
    pub fn set_error(&self, err: RequestError) -> bool {
        self.settle(State::Failed(err))
    }

    /// Whether a terminal state has been reached
    pub fn is_done(&self) -> bool {
        !self.shared.inner.lock().state.is_pending()
    }

    /// Register a hook run once on the terminal transition
    ///
    /// If the promise is already terminal the hook runs immediately on the
    /// calling thread.
    pub fn on_complete<F>(&self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut inner = self.shared.inner.lock();
        if inner.state.is_pending() {
            inner.hooks.push(Box::new(hook));
            return;
        }
        drop(inner);
        hook();
    }

    /// Add a side effect run by the waiter whose deadline expires first
    ///
    /// Actions run in registration order, before completion hooks. Ignored
    /// once terminal.
    pub fn on_timeout<F>(&self, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut inner = self.shared.inner.lock();
        if inner.state.is_pending() {
            inner.on_timeout.push(Box::new(action));
        }
    }

    fn settle(&self, next: State<T>) -> bool {
        let hooks = {
            let mut inner = self.shared.inner.lock();
            if !inner.state.is_pending() {
                return false;
            }
            inner.state = next;
            inner.on_timeout.clear();
            std::mem::take(&mut inner.hooks)
        };

        self.shared.ready.notify_all();
        for hook in hooks {
            hook();
        }
        true
    }
}

impl<T: Clone> Promise<T> {
    /// Block until terminal and return the outcome
    pub fn get(&self) -> Result<T, RequestError> {
        let mut inner = self.shared.inner.lock();
        loop {
            if let Some(outcome) = inner.state.outcome() {
                return outcome;
            }
            self.shared.ready.wait(&mut inner);
        }
    }

    /// Block until terminal or until `timeout` elapses
    ///
    /// On expiry the promise moves to `TimedOut`, the timeout action and
    /// completion hooks run, and `ResponseTimeout` is returned. A value that
    /// lands before the deadline wins.
    pub fn get_timeout(&self, timeout: Duration) -> Result<T, RequestError> {
        let deadline = match Instant::now().checked_add(timeout) {
            Some(deadline) => deadline,
            None => return self.get(),
        };

        let mut inner = self.shared.inner.lock();
        loop {
            if let Some(outcome) = inner.state.outcome() {
                return outcome;
            }
            if self.shared.ready.wait_until(&mut inner, deadline).timed_out() {
                break;
            }
        }

        if let Some(outcome) = inner.state.outcome() {
            return outcome;
        }

        inner.state = State::TimedOut(timeout);
        let actions = std::mem::take(&mut inner.on_timeout);
        let hooks = std::mem::take(&mut inner.hooks);
        drop(inner);

        self.shared.ready.notify_all();
        for action in actions {
            action();
        }
        for hook in hooks {
            hook();
        }
        Err(RequestError::ResponseTimeout { timeout })
    }

    /// Outcome without blocking, `None` while pending
    pub fn try_get(&self) -> Option<Result<T, RequestError>> {
        self.shared.inner.lock().state.outcome()
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("state", &self.shared.inner.lock().state.name())
            .finish()
    }
}
