//! Promise bound to a subscribe/unsubscribe lifecycle
//!
//! Streaming requests both register an ongoing callback and resolve a
//! one-time "subscription accepted" value. The caller supplies how to
//! register (which yields the promise for that value) and how to
//! unregister; reads fail with `IllegalState` until `subscribe` succeeds.

use super::single::Promise;
use crate::core::RequestError;
use parking_lot::Mutex;
use std::fmt;
use std::time::Duration;
use tracing::debug;

type RegisterFn<T> = Box<dyn Fn(i32) -> Result<Promise<T>, RequestError> + Send + Sync>;
type UnregisterFn = Box<dyn Fn(i32) + Send + Sync>;

pub struct SubscriptionPromise<T> {
    register: RegisterFn<T>,
    unregister: UnregisterFn,
    active: Mutex<Option<(i32, Promise<T>)>>,
}

impl<T> SubscriptionPromise<T> {
    pub fn new<R, U>(register: R, unregister: U) -> Self
    where
        R: Fn(i32) -> Result<Promise<T>, RequestError> + Send + Sync + 'static,
        U: Fn(i32) + Send + Sync + 'static,
    {
        Self {
            register: Box::new(register),
            unregister: Box::new(unregister),
            active: Mutex::new(None),
        }
    }

    /// Establish the subscription under `id`
    ///
    /// Fails with `IllegalState` if a subscription is already active, or
    /// with whatever the register function returns.
    pub fn subscribe(&self, id: i32) -> Result<(), RequestError> {
        let mut active = self.active.lock();
        if let Some((current, _)) = active.as_ref() {
            return Err(RequestError::IllegalState(format!(
                "already subscribed with id {}",
                current
            )));
        }
        let promise = (self.register)(id)?;
        debug!("Subscription {} established", id);
        *active = Some((id, promise));
        Ok(())
    }

    /// Tear down the active subscription, if any
    ///
    /// Returns the id that was unsubscribed.
    pub fn unsubscribe(&self) -> Option<i32> {
        let previous = self.active.lock().take();
        previous.map(|(id, _)| {
            (self.unregister)(id);
            debug!("Subscription {} cancelled", id);
            id
        })
    }

    /// Id of the active subscription
    pub fn id(&self) -> Option<i32> {
        self.active.lock().as_ref().map(|(id, _)| *id)
    }

    pub fn is_subscribed(&self) -> bool {
        self.active.lock().is_some()
    }

    fn current(&self) -> Result<Promise<T>, RequestError> {
        self.active
            .lock()
            .as_ref()
            .map(|(_, promise)| promise.clone())
            .ok_or_else(|| RequestError::IllegalState("not subscribed".to_string()))
    }
}

impl<T: Clone> SubscriptionPromise<T> {
    pub fn get(&self) -> Result<T, RequestError> {
        self.current()?.get()
    }

    pub fn get_timeout(&self, timeout: Duration) -> Result<T, RequestError> {
        self.current()?.get_timeout(timeout)
    }
}

impl<T> fmt::Debug for SubscriptionPromise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionPromise")
            .field("id", &self.id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;
    use std::sync::Arc;

    fn recording() -> (SubscriptionPromise<String>, Arc<PlMutex<Vec<String>>>) {
        let log = Arc::new(PlMutex::new(Vec::new()));
        let log_register = log.clone();
        let log_unregister = log.clone();

        let sub = SubscriptionPromise::new(
            move |id| {
                log_register.lock().push(format!("register {}", id));
                let promise = Promise::new();
                promise.set_done(format!("accepted {}", id));
                Ok(promise)
            },
            move |id| log_unregister.lock().push(format!("unregister {}", id)),
        );
        (sub, log)
    }

    #[test]
    fn test_get_before_subscribe_is_illegal() {
        let (sub, _) = recording();
        assert!(matches!(sub.get(), Err(RequestError::IllegalState(_))));
        assert!(matches!(
            sub.get_timeout(Duration::from_millis(1)),
            Err(RequestError::IllegalState(_))
        ));
    }

    #[test]
    fn test_subscribe_get_unsubscribe() {
        let (sub, log) = recording();
        sub.subscribe(12).unwrap();
        assert_eq!(sub.id(), Some(12));
        assert_eq!(sub.get().unwrap(), "accepted 12");

        assert_eq!(sub.unsubscribe(), Some(12));
        assert!(!sub.is_subscribed());
        assert_eq!(sub.unsubscribe(), None);
        assert_eq!(*log.lock(), vec!["register 12", "unregister 12"]);
    }

    #[test]
    fn test_double_subscribe_rejected() {
        let (sub, log) = recording();
        sub.subscribe(1).unwrap();
        assert!(matches!(sub.subscribe(2), Err(RequestError::IllegalState(_))));
        assert_eq!(log.lock().len(), 1);
    }

    #[test]
    fn test_register_failure_leaves_unsubscribed() {
        let sub: SubscriptionPromise<()> = SubscriptionPromise::new(
            |_| Err(RequestError::NotConnected(crate::core::RequestKey::id_only(5))),
            |_| {},
        );
        assert!(sub.subscribe(5).is_err());
        assert!(!sub.is_subscribed());
    }
}
