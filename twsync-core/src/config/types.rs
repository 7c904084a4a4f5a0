use crate::cache::CacheConfig;
use crate::resilience::BackoffConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Runtime configuration for the request core
///
/// Every field has a default, so an empty JSON object is a valid file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Deadline callers wait for a broker response (milliseconds)
    pub request_timeout_ms: u64,

    /// Age after which statuses for never-created orders are dropped (seconds)
    pub orphan_ttl_secs: u64,

    /// Maximum number of order ids with buffered statuses
    pub max_orphan_orders: usize,

    /// Backoff for scheduled reconnect attempts
    pub reconnect: BackoffConfig,

    /// Log level: trace, debug, info, warn, error
    pub log_level: String,

    /// Emit logs as JSON lines
    pub json_logs: bool,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            orphan_ttl_secs: default_orphan_ttl_secs(),
            max_orphan_orders: default_max_orphan_orders(),
            reconnect: BackoffConfig::default(),
            log_level: default_log_level(),
            json_logs: false,
        }
    }
}

impl CoreConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn orphan_ttl(&self) -> Duration {
        Duration::from_secs(self.orphan_ttl_secs)
    }

    /// Entity cache bounds derived from this configuration
    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            orphan_ttl: self.orphan_ttl(),
            max_orphan_orders: self.max_orphan_orders,
        }
    }
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_orphan_ttl_secs() -> u64 {
    300
}

fn default_max_orphan_orders() -> usize {
    1024
}

fn default_log_level() -> String {
    "info".to_string()
}
