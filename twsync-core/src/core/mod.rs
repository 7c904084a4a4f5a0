//! Core value types shared by the repository and the entity cache
//!
//! - `RequestKey` / `RequestSlot`: request correlation
//! - `RequestError` / `CacheError`: failure taxonomy
//! - Broker entities (orders, statuses, positions, portfolio lines, ticks)

pub mod errors;
pub mod key;
pub mod types;

pub use errors::{CacheError, RequestError};
pub use key::{EventKind, RequestKey, RequestSlot};
pub use types::{
    Contract, ContractId, Order, OrderId, OrderState, OrderStatusUpdate, OrderType,
    PortfolioLine, Position, PriceField, Side, SizeField, TickSnapshot, TickerId,
    UNRESOLVED_CONTRACT,
};
