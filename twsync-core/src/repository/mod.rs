//! Pending-request table
//!
//! Owns the mapping from in-flight request keys to the futures callers are
//! blocked on, and routes completions, list elements and errors arriving
//! on the callback thread to the right waiter.
//!
//! # Lookup paths
//!
//! Entries are indexed by [`RequestSlot`]: the request id when present,
//! otherwise the event kind.
//!
//! - Completion and list paths (`complete_single`, `append_to_list`,
//!   `complete_list`, `fail_request`) require the full key to match the key
//!   stored at registration. An event for the right slot but the wrong event
//!   kind is dropped and logged.
//! - `fail(id, ..)` is the only id-only path, for broker error notifications
//!   that carry nothing but the id.
//!
//! # Lifecycle
//!
//! ```text
//! register_* ── not connected ──→ NotConnected
//!     │
//!     ├── slot occupied ────────→ DuplicatedRequest (issue not called)
//!     │
//!     ├── dropped during insert ─→ entry removed, NotConnected (issue not called)
//!     │
//!     ├── insert, then issue() ─ Err ─→ entry removed, IssueFailed
//!     │
//!     └── in flight ─┬─ complete_* / fail* ──→ entry removed, waiter resolved
//!                    └─ get_timeout expiry ──→ entry removed by completion hook
//! ```
//!
//! The connection is checked again once the entry is published. A
//! disconnect that lands between the first check and the insert may run
//! `fail_all` before the entry is visible; the second check releases that
//! waiter instead of leaving it blocked.
//!
//! Counters only move for the transition that actually resolved a waiter,
//! so `completed + failed + timed_out` never exceeds `registered`.
//!
//! Futures deregister themselves through a completion hook installed here;
//! the hook holds a weak reference to the table and only removes the entry
//! it was created for, so a newer request reusing the slot is never touched.

mod pending;
mod stats;

pub use stats::{RepositoryStats, StatsSnapshot};

use crate::core::{EventKind, RequestError, RequestKey, RequestSlot};
use crate::promise::{ListPromise, Promise, SubscriptionPromise};
use crate::resilience::ConnectionStatus;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use pending::{Delivery, PendingRequest};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, error, warn};

/// Default deadline callers are expected to wait for a response
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

struct PendingEntry {
    key: RequestKey,
    serial: u64,
    request: Arc<dyn PendingRequest>,
}

#[derive(Default)]
struct Table {
    entries: DashMap<RequestSlot, PendingEntry>,
    next_serial: AtomicU64,
    stats: RepositoryStats,
}

/// Registry of in-flight requests
///
/// Cheap to clone; clones share the same table.
#[derive(Clone)]
pub struct RequestRepository {
    table: Arc<Table>,
    connection: Arc<dyn ConnectionStatus>,
    request_timeout: Duration,
}

impl RequestRepository {
    pub fn new<C>(connection: C) -> Self
    where
        C: ConnectionStatus + 'static,
    {
        Self::with_timeout(connection, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout<C>(connection: C, request_timeout: Duration) -> Self
    where
        C: ConnectionStatus + 'static,
    {
        Self {
            table: Arc::new(Table::default()),
            connection: Arc::new(connection),
            request_timeout,
        }
    }

    /// Deadline configured for this repository
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Register a single-value request and send it
    ///
    /// `issue` performs the protocol send. It runs after the entry is
    /// published, so a transport that answers synchronously still finds it.
    pub fn register_single<T, I>(
        &self,
        event: EventKind,
        id: Option<i32>,
        issue: I,
    ) -> Result<Promise<T>, RequestError>
    where
        T: Send + 'static,
        I: FnOnce() -> anyhow::Result<()>,
    {
        let promise = Promise::new();
        self.register(RequestKey::new(event, id), promise.clone(), issue)?;
        Ok(promise)
    }

    /// Register a request whose result arrives as a sequence of elements
    pub fn register_list<T, I>(
        &self,
        event: EventKind,
        id: Option<i32>,
        issue: I,
    ) -> Result<ListPromise<T>, RequestError>
    where
        T: Send + 'static,
        I: FnOnce() -> anyhow::Result<()>,
    {
        let list = ListPromise::new();
        self.register(RequestKey::new(event, id), list.clone(), issue)?;
        Ok(list)
    }

    /// Streaming request resolved once when the subscription is accepted
    ///
    /// `issue` sends the subscribe request for an id; `cancel` sends the
    /// matching unsubscribe. Unsubscribing while the acceptance is still
    /// pending fails that waiter with `IllegalState`.
    pub fn subscription<T, I, C>(&self, event: EventKind, issue: I, cancel: C) -> SubscriptionPromise<T>
    where
        T: Send + 'static,
        I: Fn(i32) -> anyhow::Result<()> + Send + Sync + 'static,
        C: Fn(i32) + Send + Sync + 'static,
    {
        let registering = self.clone();
        let cancelling = self.clone();
        SubscriptionPromise::new(
            move |id| registering.register_single(event, Some(id), || issue(id)),
            move |id| {
                let key = RequestKey::new(event, Some(id));
                if let Some(entry) = cancelling.take_matching(key) {
                    entry.fail(RequestError::IllegalState(format!(
                        "subscription {} cancelled",
                        key
                    )));
                }
                cancel(id);
            },
        )
    }

    fn register<P, I>(&self, key: RequestKey, request: P, issue: I) -> Result<(), RequestError>
    where
        P: PendingRequest + Clone + 'static,
        I: FnOnce() -> anyhow::Result<()>,
    {
        if !self.connection.is_connected() {
            self.table.stats.record_not_connected();
            debug!("Rejecting request {}: not connected", key);
            return Err(RequestError::NotConnected(key));
        }

        let slot = key.slot().ok_or_else(|| {
            RequestError::IllegalState(format!("request key {} cannot be routed", key))
        })?;
        let serial = self.table.next_serial.fetch_add(1, Ordering::Relaxed);

        let weak = Arc::downgrade(&self.table);
        request.on_timeout(Box::new(move || {
            if let Some(table) = weak.upgrade() {
                table.stats.record_timed_out();
            }
            debug!("Request {} timed out waiting for response", key);
        }));
        let weak = Arc::downgrade(&self.table);
        request.on_complete(Box::new(move || deregister(&weak, slot, serial)));

        match self.table.entries.entry(slot) {
            Entry::Occupied(existing) => {
                self.table.stats.record_duplicate();
                warn!(
                    "Duplicated request {}: {} is still in flight",
                    key,
                    existing.get().key
                );
                return Err(RequestError::DuplicatedRequest(key));
            }
            Entry::Vacant(vacant) => {
                vacant.insert(PendingEntry {
                    key,
                    serial,
                    request: Arc::new(request.clone()),
                });
            }
        }

        self.table.stats.record_registered();

        if !self.connection.is_connected() {
            // fail_all may already have released it
            self.table.entries.remove_if(&slot, |_, entry| entry.serial == serial);
            self.table.stats.record_not_connected();
            debug!("Rejecting request {}: connection dropped during registration", key);
            self.record_failure(request.fail(RequestError::NotConnected(key)));
            return Err(RequestError::NotConnected(key));
        }

        if let Err(err) = issue() {
            self.table.entries.remove_if(&slot, |_, entry| entry.serial == serial);
            self.table.stats.record_issue_failure();
            let err = RequestError::IssueFailed {
                key,
                reason: format!("{:#}", err),
            };
            warn!("{}", err);
            request.fail(err.clone());
            return Err(err);
        }

        debug!("Request {} issued", key);
        Ok(())
    }

    /// Add one element to an in-flight list request
    pub fn append_to_list<T>(&self, event: EventKind, id: Option<i32>, element: T)
    where
        T: Send + 'static,
    {
        let key = RequestKey::new(event, id);
        if let Some(request) = self.find_matching(key, "List element") {
            match request.append(&key, Box::new(element)) {
                Delivery::Accepted => {}
                Delivery::Mismatched => self.table.stats.record_failed(),
                Delivery::Missed => {
                    self.table.stats.record_dropped();
                    debug!("List element for finished request {}, dropped", key);
                }
            }
        }
    }

    /// Resolve a single-value request
    ///
    /// Use `()` as the value for bare acknowledgements.
    pub fn complete_single<T>(&self, event: EventKind, id: Option<i32>, value: T)
    where
        T: Send + 'static,
    {
        let key = RequestKey::new(event, id);
        match self.take_matching(key) {
            Some(request) => self.record_delivery(key, request.complete(&key, Box::new(value))),
            None => self.report_unmatched(key, "Completion"),
        }
    }

    /// Finalize a list request with the elements appended so far
    pub fn complete_list(&self, event: EventKind, id: Option<i32>) {
        let key = RequestKey::new(event, id);
        match self.take_matching(key) {
            Some(request) => self.record_delivery(key, request.finish(&key)),
            None => self.report_unmatched(key, "List completion"),
        }
    }

    /// Fail whichever request is in flight under `id`
    ///
    /// This is the path for broker error notifications, which carry only the
    /// id. Returns whether a waiter was found.
    pub fn fail(&self, id: i32, err: RequestError) -> bool {
        match self.table.entries.remove(&RequestSlot::Id(id)) {
            Some((_, entry)) => {
                debug!("Request {} failed: {}", entry.key, err);
                self.record_failure(entry.request.fail(err))
            }
            None => {
                self.table.stats.record_dropped();
                error!("Error for unknown request #{}: {}", id, err);
                false
            }
        }
    }

    /// Fail the request registered under exactly this key
    pub fn fail_request(&self, event: EventKind, id: Option<i32>, err: RequestError) -> bool {
        let key = RequestKey::new(event, id);
        match self.take_matching(key) {
            Some(request) => {
                debug!("Request {} failed: {}", key, err);
                self.record_failure(request.fail(err))
            }
            None => {
                self.report_unmatched(key, "Failure");
                false
            }
        }
    }

    /// Fail every in-flight request, returning how many were released
    ///
    /// Called when the connection drops so no waiter is left blocked.
    pub fn fail_all(&self, err: RequestError) -> usize {
        let slots: Vec<RequestSlot> = self.table.entries.iter().map(|entry| *entry.key()).collect();

        let mut released = 0;
        for slot in slots {
            if let Some((_, entry)) = self.table.entries.remove(&slot) {
                if self.record_failure(entry.request.fail(err.clone())) {
                    released += 1;
                }
            }
        }
        if released > 0 {
            warn!("Failed {} in-flight request(s): {}", released, err);
        }
        released
    }

    pub fn pending_count(&self) -> usize {
        self.table.entries.len()
    }

    /// Whether a request with exactly this key is in flight
    pub fn contains(&self, event: EventKind, id: Option<i32>) -> bool {
        let key = RequestKey::new(event, id);
        key.slot()
            .and_then(|slot| self.table.entries.get(&slot).map(|entry| entry.key == key))
            .unwrap_or(false)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.table.stats.snapshot()
    }

    fn record_delivery(&self, key: RequestKey, delivery: Delivery) {
        match delivery {
            Delivery::Accepted => self.table.stats.record_completed(),
            Delivery::Mismatched => self.table.stats.record_failed(),
            // Lost the race against the caller's deadline, already counted
            Delivery::Missed => debug!("Completion for {} arrived after the waiter gave up", key),
        }
    }

    fn record_failure(&self, won: bool) -> bool {
        if won {
            self.table.stats.record_failed();
        }
        won
    }

    fn take_matching(&self, key: RequestKey) -> Option<Arc<dyn PendingRequest>> {
        let slot = key.slot()?;
        self.table
            .entries
            .remove_if(&slot, |_, entry| entry.key == key)
            .map(|(_, entry)| entry.request)
    }

    fn find_matching(&self, key: RequestKey, what: &str) -> Option<Arc<dyn PendingRequest>> {
        // Clone out of the map: resolving may run hooks that touch the table
        let found = key.slot().and_then(|slot| {
            self.table
                .entries
                .get(&slot)
                .map(|entry| (entry.key, Arc::clone(&entry.request)))
        });
        match found {
            Some((stored, request)) if stored == key => Some(request),
            _ => {
                self.report_unmatched(key, what);
                None
            }
        }
    }

    fn report_unmatched(&self, key: RequestKey, what: &str) {
        self.table.stats.record_dropped();
        let in_flight = key
            .slot()
            .and_then(|slot| self.table.entries.get(&slot).map(|entry| entry.key));
        match in_flight {
            Some(other) => warn!(
                "{} for {} does not match in-flight request {}, dropped",
                what, key, other
            ),
            None => debug!("{} for unknown or finished request {}, dropped", what, key),
        }
    }
}

fn deregister(table: &Weak<Table>, slot: RequestSlot, serial: u64) {
    if let Some(table) = table.upgrade() {
        table.entries.remove_if(&slot, |_, entry| entry.serial == serial);
    }
}

impl std::fmt::Debug for RequestRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestRepository")
            .field("pending", &self.pending_count())
            .field("connected", &self.connection.is_connected())
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}
