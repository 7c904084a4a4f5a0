//! Connection status seam between the transport and the repository
//!
//! The repository only needs to know whether the connection is up before it
//! registers a request. The transport owns a [`ConnectionFlag`] and flips it
//! from its connect/disconnect callbacks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

/// "Is the connection currently established" query
pub trait ConnectionStatus: Send + Sync {
    fn is_connected(&self) -> bool;
}

impl<F> ConnectionStatus for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn is_connected(&self) -> bool {
        self()
    }
}

/// Shared atomic connection flag
#[derive(Debug, Clone, Default)]
pub struct ConnectionFlag {
    connected: Arc<AtomicBool>,
}

impl ConnectionFlag {
    /// Flag starting in the disconnected state
    pub fn new() -> Self {
        Self::default()
    }

    /// Flag starting in the connected state
    pub fn connected() -> Self {
        let flag = Self::new();
        flag.connected.store(true, Ordering::Release);
        flag
    }

    /// Update the flag, returning the previous value
    pub fn set_connected(&self, connected: bool) -> bool {
        let previous = self.connected.swap(connected, Ordering::AcqRel);
        if previous != connected {
            info!(
                "Connection state changed: {}",
                if connected { "CONNECTED" } else { "DISCONNECTED" }
            );
        }
        previous
    }
}

impl ConnectionStatus for ConnectionFlag {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_transitions() {
        let flag = ConnectionFlag::new();
        assert!(!flag.is_connected());

        let shared = flag.clone();
        assert!(!shared.set_connected(true));
        assert!(flag.is_connected());
        assert!(flag.set_connected(false));
        assert!(!shared.is_connected());
    }

    #[test]
    fn test_closure_status() {
        let always_up = || true;
        assert!(always_up.is_connected());
        assert!(ConnectionFlag::connected().is_connected());
    }
}
