//! twsync core - blocking request/response layer over a callback-driven broker protocol
//!
//! The broker answers asynchronously on a single connection, tagging replies
//! with small integer ids and coarse event kinds. This crate lets any number
//! of caller threads issue requests and block on their results while one
//! callback thread feeds completions back in.
//!
//! ## Architecture
//! - Callers register a request in the [`RequestRepository`] *before* it is
//!   sent, and get back a [`Promise`] / [`ListPromise`] to block on
//! - The callback thread routes completions, list elements and errors to the
//!   waiter by key; late and duplicate events are logged and dropped
//! - The [`EntityCache`] holds orders, positions, portfolio lines and ticks,
//!   reconciling order statuses that arrive before their order
//!
//! ## Core Modules
//! - `core`: keys, errors and broker entity types
//! - `promise`: blocking single-assignment futures
//! - `repository`: pending-request table
//! - `cache`: concurrent entity cache
//! - `resilience`: connection flag, deferred action timer, reconnect backoff
//! - `config`: JSON configuration with environment overrides
//! - `utils`: logging setup
//! - `testing`: loopback broker for tests and demos

pub mod cache;
pub mod config;
pub mod core;
pub mod promise;
pub mod repository;
pub mod resilience;
pub mod testing;
pub mod utils;

// Re-export core types
pub use crate::core::{
    CacheError, Contract, ContractId, EventKind, Order, OrderId, OrderState, OrderStatusUpdate,
    PortfolioLine, Position, RequestError, RequestKey, RequestSlot, Side, TickSnapshot, TickerId,
};

pub use cache::{CacheConfig, EntityCache, StatusOutcome};
pub use config::CoreConfig;
pub use promise::{ListPromise, Promise, SubscriptionPromise};
pub use repository::{RequestRepository, StatsSnapshot};
pub use resilience::{ConnectionFlag, ConnectionStatus, DeferredAction, ReconnectScheduler};

// Re-export error types
pub use anyhow::{Error, Result};

/// Commonly used items
pub mod prelude {
    pub use crate::cache::{EntityCache, StatusOutcome};
    pub use crate::core::{EventKind, RequestError};
    pub use crate::promise::{ListPromise, Promise, SubscriptionPromise};
    pub use crate::repository::RequestRepository;
    pub use crate::resilience::{ConnectionFlag, ConnectionStatus};
}
