pub mod types;

pub use types::CoreConfig;

use anyhow::{Context, Result};
use config::{Config as ConfigLoader, Environment, File, FileFormat};
use std::path::Path;

/// Prefix for environment variable overrides, e.g. `TWSYNC_REQUEST_TIMEOUT_MS`
pub const ENV_PREFIX: &str = "TWSYNC";

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

impl CoreConfig {
    /// Load configuration from file with `TWSYNC_*` overrides, then validate
    ///
    /// The format follows the file extension (JSON when there is none).
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::load_layered(Some(path.as_ref()), Self::environment())
    }

    /// Defaults with environment overrides applied, for runs without a file
    pub fn from_env() -> Result<Self> {
        Self::load_layered(None, Self::environment())
    }

    /// Environment source for `TWSYNC_<FIELD>` variables
    ///
    /// Nested fields use a double underscore: `TWSYNC_RECONNECT__MAX_RETRIES`.
    pub fn environment() -> Environment {
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
    }

    /// Layer an optional file and an environment source over the defaults
    pub fn load_layered(path: Option<&Path>, env: Environment) -> Result<Self> {
        let mut builder = ConfigLoader::builder();

        if let Some(config_path) = path {
            let file = File::from(config_path);
            let file = if config_path.extension().is_none() {
                file.format(FileFormat::Json)
            } else {
                file
            };
            builder = builder.add_source(file);
        }

        let config = builder
            .add_source(env)
            .build()
            .with_context(|| match path {
                Some(config_path) => format!("Failed to build configuration from {}", config_path.display()),
                None => format!("Failed to build configuration from {}_* variables", ENV_PREFIX),
            })?;

        let mut cfg: CoreConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        cfg.log_level = cfg.log_level.to_lowercase();

        cfg.validate()?;

        Ok(cfg)
    }

    /// Effective configuration as pretty JSON, usable as a starting file
    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize configuration")
    }

    /// Parse a JSON document without validating
    pub fn from_json_str(raw: &str) -> Result<Self> {
        ConfigLoader::builder()
            .add_source(File::from_str(raw, FileFormat::Json))
            .build()
            .context("Failed to parse configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.request_timeout_ms == 0 {
            anyhow::bail!("request_timeout_ms must be positive");
        }

        if self.orphan_ttl_secs == 0 {
            anyhow::bail!("orphan_ttl_secs must be positive");
        }

        if self.max_orphan_orders == 0 {
            anyhow::bail!("max_orphan_orders must be positive");
        }

        self.reconnect
            .validate()
            .context("Invalid reconnect configuration")?;

        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            anyhow::bail!(
                "Invalid log level '{}', must be one of: {:?}",
                self.log_level,
                VALID_LOG_LEVELS
            );
        }

        Ok(())
    }
}
