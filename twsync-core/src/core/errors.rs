//! Error types for request correlation and entity caching
//!
//! Registration failures (`NotConnected`, `DuplicatedRequest`, `IssueFailed`)
//! are returned synchronously to the issuing caller. Everything else reaches
//! the caller only through the future it is blocked on.

use super::key::RequestKey;
use std::time::Duration;
use thiserror::Error;

/// Failures observable by a caller waiting on a request
///
/// `Clone` because a resolved future hands the same outcome to every
/// subsequent `get`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    /// Request issued while the transport is down
    #[error("Not connected: request {0} was not sent")]
    NotConnected(RequestKey),

    /// Another request with the same key is still in flight
    #[error("Duplicated request: {0} is already in flight")]
    DuplicatedRequest(RequestKey),

    /// The send action itself failed; the entry was removed before returning
    #[error("Failed to issue request {key}: {reason}")]
    IssueFailed {
        /// Key of the request that could not be sent
        key: RequestKey,
        /// Rendered cause from the transport
        reason: String,
    },

    /// Local wait exceeded its deadline
    #[error("Response timeout after {timeout:?}")]
    ResponseTimeout {
        /// Deadline that expired
        timeout: Duration,
    },

    /// Error notification delivered by the broker for this request
    #[error("Broker error {code}: {message}")]
    Broker {
        /// Protocol error code
        code: i32,
        /// Protocol error text
        message: String,
    },

    /// Connection dropped while the request was pending
    #[error("Disconnected while waiting for response")]
    Disconnected,

    /// A completion carried a value of a different type than the waiter expects
    #[error("Type mismatch for {key}: expected {expected}")]
    TypeMismatch {
        /// Key of the request
        key: RequestKey,
        /// Type name the waiter was registered with
        expected: &'static str,
    },

    /// Operation not valid in the current state
    #[error("Illegal state: {0}")]
    IllegalState(String),
}

impl RequestError {
    /// Convenience constructor for broker error notifications
    pub fn broker(code: i32, message: impl Into<String>) -> Self {
        RequestError::Broker {
            code,
            message: message.into(),
        }
    }

    /// Whether this error was produced by a local timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, RequestError::ResponseTimeout { .. })
    }
}

/// Failures raised by entity cache lookups
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// Argument rejected before lookup
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}
