//! Testing utilities for integration tests, benches and the demo binary
//!
//! - `LoopbackBroker`: in-process broker answering on its own callback thread

pub mod loopback;

pub use loopback::{
    BrokerEvent, BrokerRequest, LoopbackBroker, LoopbackConfig, LoopbackStats, NO_SECURITY_DEFINITION,
    ORDER_NOT_FOUND,
};
