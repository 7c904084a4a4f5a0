//! Connection-facing building blocks
//!
//! - Connection status seam consumed by the request repository
//! - Single-shot deferred action timer
//! - Exponential backoff and the reconnect scheduler built from both

pub mod backoff;
pub mod connection;
pub mod reconnect;
pub mod timer;

pub use backoff::{BackoffConfig, ExponentialBackoff};
pub use connection::{ConnectionFlag, ConnectionStatus};
pub use reconnect::{ConnectionState, ReconnectScheduler, ReconnectionStats};
pub use timer::DeferredAction;
