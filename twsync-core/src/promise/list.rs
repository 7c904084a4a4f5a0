//! Promise whose value accumulates across partial deliveries
//!
//! Elements are appended in delivery order by the callback thread; `finish`
//! hands the accumulated sequence to the underlying [`Promise`] and unblocks
//! waiters. Appends after finalization (or after a timeout/failure) are
//! ignored, and the buffer is released on whichever terminal transition
//! comes first.

use super::single::Promise;
use crate::core::RequestError;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub struct ListPromise<T> {
    promise: Promise<Vec<T>>,
    // None once finalized
    items: Arc<Mutex<Option<Vec<T>>>>,
}

impl<T> Clone for ListPromise<T> {
    fn clone(&self) -> Self {
        Self {
            promise: self.promise.clone(),
            items: Arc::clone(&self.items),
        }
    }
}

impl<T: Send + 'static> Default for ListPromise<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> ListPromise<T> {
    pub fn new() -> Self {
        let promise = Promise::new();
        let items = Arc::new(Mutex::new(Some(Vec::new())));

        // Drop whatever is still buffered when the promise times out
        let buffer = Arc::clone(&items);
        promise.on_complete(move || {
            buffer.lock().take();
        });

        Self { promise, items }
    }
}

impl<T> ListPromise<T> {
    /// Append one element. Returns false if the list is no longer open.
    pub fn append(&self, item: T) -> bool {
        if self.promise.is_done() {
            return false;
        }
        match self.items.lock().as_mut() {
            Some(items) => {
                items.push(item);
                true
            }
            None => false,
        }
    }

    /// Finalize with every element appended so far
    ///
    /// Returns false if the list was already finalized or the promise had
    /// already failed or timed out.
    pub fn finish(&self) -> bool {
        let items = self.items.lock().take();
        match items {
            Some(items) => self.promise.set_done(items),
            None => false,
        }
    }

    /// Resolve exceptionally, discarding buffered elements
    pub fn set_error(&self, err: RequestError) -> bool {
        self.items.lock().take();
        self.promise.set_error(err)
    }

    /// Elements buffered so far (0 once finalized)
    pub fn len(&self) -> usize {
        self.items.lock().as_ref().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_done(&self) -> bool {
        self.promise.is_done()
    }

    pub fn on_complete<F>(&self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.promise.on_complete(hook);
    }

    pub fn on_timeout<F>(&self, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.promise.on_timeout(action);
    }

    /// Underlying single-value promise
    pub fn as_promise(&self) -> &Promise<Vec<T>> {
        &self.promise
    }
}

impl<T: Clone> ListPromise<T> {
    pub fn get(&self) -> Result<Vec<T>, RequestError> {
        self.promise.get()
    }

    pub fn get_timeout(&self, timeout: Duration) -> Result<Vec<T>, RequestError> {
        self.promise.get_timeout(timeout)
    }

    pub fn try_get(&self) -> Option<Result<Vec<T>, RequestError>> {
        self.promise.try_get()
    }
}

impl<T> fmt::Debug for ListPromise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListPromise")
            .field("promise", &self.promise)
            .field("buffered", &self.len())
            .finish()
    }
}
