//! Correlation keys for in-flight requests
//!
//! A [`RequestKey`] names one outstanding unit of work by event kind and
//! optional request id. Keys compare structurally; the relaxed "id only"
//! matching needed by broker error notifications is expressed through
//! [`RequestSlot`], which the repository uses as its index.
//!
//! ```text
//! (OrderPlace, Some(42))   -> Slot::Id(42)
//! (Positions,  None)       -> Slot::Event(Positions)
//! (None,       Some(42))   -> Slot::Id(42)      // error notification
//! (None,       None)       -> no slot           // unrouted sentinel
//! ```

use std::fmt;

/// Coarse event tags of the broker protocol that requests are issued under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    OrderPlace,
    OrderCancel,
    OpenOrders,
    Executions,
    Positions,
    AccountSummary,
    AccountUpdates,
    ManagedAccounts,
    ContractDetails,
    MatchingSymbols,
    MarketData,
    MarketDataSnapshot,
    HistoricalData,
    CurrentTime,
}

impl EventKind {
    /// Protocol-style name used in log lines
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::OrderPlace => "REQ_ORDER_PLACE",
            EventKind::OrderCancel => "REQ_ORDER_CANCEL",
            EventKind::OpenOrders => "REQ_OPEN_ORDERS",
            EventKind::Executions => "REQ_EXECUTIONS",
            EventKind::Positions => "REQ_POSITIONS",
            EventKind::AccountSummary => "REQ_ACCOUNT_SUMMARY",
            EventKind::AccountUpdates => "REQ_ACCOUNT_UPDATES",
            EventKind::ManagedAccounts => "REQ_MANAGED_ACCOUNTS",
            EventKind::ContractDetails => "REQ_CONTRACT_DETAILS",
            EventKind::MatchingSymbols => "REQ_MATCHING_SYMBOLS",
            EventKind::MarketData => "REQ_MKT_DATA",
            EventKind::MarketDataSnapshot => "REQ_MKT_DATA_SNAPSHOT",
            EventKind::HistoricalData => "REQ_HISTORICAL_DATA",
            EventKind::CurrentTime => "REQ_CURRENT_TIME",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies one outstanding request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestKey {
    event: Option<EventKind>,
    id: Option<i32>,
}

impl RequestKey {
    /// Key for a request issued under `event`, optionally carrying a request id
    pub fn new(event: EventKind, id: Option<i32>) -> Self {
        Self {
            event: Some(event),
            id,
        }
    }

    /// Key as seen by an error notification that only carries the id
    pub fn id_only(id: i32) -> Self {
        Self {
            event: None,
            id: Some(id),
        }
    }

    /// Sentinel for events that cannot be routed to any request
    pub fn unrouted() -> Self {
        Self {
            event: None,
            id: None,
        }
    }

    pub fn event(&self) -> Option<EventKind> {
        self.event
    }

    pub fn id(&self) -> Option<i32> {
        self.id
    }

    /// At least one of event kind or id is present
    pub fn is_routable(&self) -> bool {
        self.event.is_some() || self.id.is_some()
    }

    /// Repository index for this key (`None` for the unrouted sentinel)
    pub fn slot(&self) -> Option<RequestSlot> {
        match (self.id, self.event) {
            (Some(id), _) => Some(RequestSlot::Id(id)),
            (None, Some(event)) => Some(RequestSlot::Event(event)),
            (None, None) => None,
        }
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.event, self.id) {
            (Some(event), Some(id)) => write!(f, "{}#{}", event, id),
            (Some(event), None) => write!(f, "{}", event),
            (None, Some(id)) => write!(f, "#{}", id),
            (None, None) => f.write_str("<unrouted>"),
        }
    }
}

/// Index a request occupies in the pending table
///
/// Requests carrying an id are indexed by id alone, so at most one request
/// per id is in flight and an id-only error finds exactly one waiter.
/// Requests without an id are indexed by event kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestSlot {
    Id(i32),
    Event(EventKind),
}
