//! Blocking futures handed to callers
//!
//! - `Promise`: single-assignment cell with optional deadline
//! - `ListPromise`: value accumulated across partial deliveries
//! - `SubscriptionPromise`: promise tied to a subscribe/unsubscribe lifecycle

pub mod list;
pub mod single;
pub mod subscription;

pub use list::ListPromise;
pub use single::Promise;
pub use subscription::SubscriptionPromise;
