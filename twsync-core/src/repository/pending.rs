//! Type-erased view of a waiter, as stored in the pending table
//!
//! Requests of different result types share one table, so completions
//! travel as `Box<dyn Any>` and are downcast here. A value of the wrong type
//! (or a list operation on a single-value request) fails the waiter with
//! `TypeMismatch` rather than leaving it blocked.

use crate::core::{RequestError, RequestKey};
use crate::promise::{ListPromise, Promise};
use std::any::{type_name, Any};
use tracing::error;

pub(crate) type Payload = Box<dyn Any + Send>;

/// What a delivery did to the waiter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    /// Accepted: resolved the waiter, or buffered a list element
    Accepted,
    /// Wrong payload type; the waiter was failed with `TypeMismatch`
    Mismatched,
    /// The waiter had already reached a terminal state
    Missed,
}

impl Delivery {
    fn accepted(won: bool) -> Self {
        if won {
            Delivery::Accepted
        } else {
            Delivery::Missed
        }
    }

    fn mismatched(won: bool) -> Self {
        if won {
            Delivery::Mismatched
        } else {
            Delivery::Missed
        }
    }
}

pub(crate) trait PendingRequest: Send + Sync {
    /// Resolve with a single value
    fn complete(&self, key: &RequestKey, value: Payload) -> Delivery;

    /// Add one element to a list result
    fn append(&self, key: &RequestKey, element: Payload) -> Delivery;

    /// Finalize a list result
    fn finish(&self, key: &RequestKey) -> Delivery;

    /// Resolve exceptionally
    fn fail(&self, err: RequestError) -> bool;

    /// Run `hook` once the waiter reaches a terminal state
    fn on_complete(&self, hook: Box<dyn FnOnce() + Send>);

    /// Add a side effect for deadline expiry
    fn on_timeout(&self, action: Box<dyn FnOnce() + Send>);
}

fn mismatch<T>(key: &RequestKey, what: &str) -> RequestError {
    let expected = type_name::<T>();
    error!("{} for request {} does not match waiter type {}", what, key, expected);
    RequestError::TypeMismatch { key: *key, expected }
}

impl<T: Send + 'static> PendingRequest for Promise<T> {
    fn complete(&self, key: &RequestKey, value: Payload) -> Delivery {
        match value.downcast::<T>() {
            Ok(value) => Delivery::accepted(self.set_done(*value)),
            Err(_) => Delivery::mismatched(self.set_error(mismatch::<T>(key, "Completion value"))),
        }
    }

    fn append(&self, key: &RequestKey, _element: Payload) -> Delivery {
        Delivery::mismatched(self.set_error(mismatch::<T>(key, "List element")))
    }

    fn finish(&self, key: &RequestKey) -> Delivery {
        Delivery::mismatched(self.set_error(mismatch::<T>(key, "List completion")))
    }

    fn fail(&self, err: RequestError) -> bool {
        self.set_error(err)
    }

    fn on_complete(&self, hook: Box<dyn FnOnce() + Send>) {
        Promise::on_complete(self, hook);
    }

    fn on_timeout(&self, action: Box<dyn FnOnce() + Send>) {
        Promise::on_timeout(self, action);
    }
}

impl<T: Send + 'static> PendingRequest for ListPromise<T> {
    fn complete(&self, key: &RequestKey, value: Payload) -> Delivery {
        // A whole list delivered at once is accepted
        match value.downcast::<Vec<T>>() {
            Ok(items) => {
                for item in *items {
                    ListPromise::append(self, item);
                }
                Delivery::accepted(ListPromise::finish(self))
            }
            Err(_) => Delivery::mismatched(ListPromise::set_error(
                self,
                mismatch::<Vec<T>>(key, "Completion value"),
            )),
        }
    }

    fn append(&self, key: &RequestKey, element: Payload) -> Delivery {
        match element.downcast::<T>() {
            Ok(item) => Delivery::accepted(ListPromise::append(self, *item)),
            Err(_) => Delivery::mismatched(ListPromise::set_error(self, mismatch::<T>(key, "List element"))),
        }
    }

    fn finish(&self, _key: &RequestKey) -> Delivery {
        Delivery::accepted(ListPromise::finish(self))
    }

    fn fail(&self, err: RequestError) -> bool {
        ListPromise::set_error(self, err)
    }

    fn on_complete(&self, hook: Box<dyn FnOnce() + Send>) {
        ListPromise::on_complete(self, hook);
    }

    fn on_timeout(&self, action: Box<dyn FnOnce() + Send>) {
        ListPromise::on_timeout(self, action);
    }
}
