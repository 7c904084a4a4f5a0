//! Common utilities for all binaries
//!
//! Shared CLI arguments, configuration loading and logging setup.

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;
use twsync_core::{CoreConfig, StatsSnapshot};

/// Common CLI arguments for all binaries
#[derive(Args, Debug)]
pub struct CommonArgs {
    /// Configuration file, JSON or TOML (TWSYNC_* variables override it)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Log level, overrides the configuration file
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub json_logs: bool,

    /// Print the effective configuration as JSON and exit
    #[arg(long)]
    pub print_config: bool,
}

impl CommonArgs {
    /// Load configuration and apply command-line overrides
    pub fn load_config(&self) -> Result<CoreConfig> {
        let mut config = match &self.config {
            Some(path) => CoreConfig::load(path)
                .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
            None => CoreConfig::from_env()?,
        };

        if let Some(level) = &self.log_level {
            config.log_level = level.to_lowercase();
        }
        if self.json_logs {
            config.json_logs = true;
        }
        config.validate()?;
        Ok(config)
    }
}

/// Initialize tracing/logging
pub fn init_logging(config: &CoreConfig) -> Result<()> {
    twsync_core::utils::init_logger(&config.log_level, config.json_logs)
}

/// Print final statistics
pub fn print_stats(stats: &StatsSnapshot) {
    tracing::info!("=== Repository Statistics ===");
    tracing::info!("Registered: {}", stats.registered);
    tracing::info!("Completed: {}", stats.completed);
    tracing::info!("Failed: {}", stats.failed);
    tracing::info!("Timed out: {}", stats.timed_out);
    tracing::info!("Duplicates rejected: {}", stats.duplicates);
    tracing::info!("Rejected while disconnected: {}", stats.not_connected);
    tracing::info!("Issue failures: {}", stats.issue_failures);
    tracing::info!("Dropped events: {}", stats.dropped_events);

    if stats.registered > 0 {
        let completion_rate = (stats.completed as f64 / stats.registered as f64) * 100.0;
        tracing::info!("Completion rate: {:.2}%", completion_rate);
    }
}
