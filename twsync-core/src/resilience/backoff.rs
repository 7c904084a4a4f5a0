//! Exponential backoff for reconnect attempts
//!
//! Produces the delay sequence a reconnect scheduler arms its timer with.
//! Jitter spreads clients that lost the same gateway at the same moment.

use anyhow::{bail, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for exponential backoff
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Delay before the first retry
    pub initial_delay_ms: u64,
    /// Upper bound for any delay
    pub max_delay_ms: u64,
    /// Growth factor per attempt
    pub multiplier: f64,
    /// Maximum number of attempts (None = unlimited)
    pub max_retries: Option<u32>,
    /// Randomization of each delay (0.0 to 1.0)
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            max_retries: Some(20),
            jitter_factor: 0.1, // 10% jitter
        }
    }
}

impl BackoffConfig {
    /// Constant delay, no jitter, unlimited attempts
    pub fn fixed(delay: Duration) -> Self {
        let ms = delay.as_millis() as u64;
        Self {
            initial_delay_ms: ms,
            max_delay_ms: ms,
            multiplier: 1.0,
            max_retries: None,
            jitter_factor: 0.0,
        }
    }

    /// Short delays and few attempts (for tests and local gateways)
    pub fn aggressive() -> Self {
        Self {
            initial_delay_ms: 10,
            max_delay_ms: 1_000,
            multiplier: 1.5,
            max_retries: Some(5),
            jitter_factor: 0.1,
        }
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.multiplier < 1.0 || !self.multiplier.is_finite() {
            bail!("backoff multiplier must be >= 1.0, got {}", self.multiplier);
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            bail!("backoff jitter_factor must be within [0, 1], got {}", self.jitter_factor);
        }
        if self.initial_delay_ms > self.max_delay_ms {
            bail!(
                "backoff initial_delay_ms ({}) exceeds max_delay_ms ({})",
                self.initial_delay_ms,
                self.max_delay_ms
            );
        }
        Ok(())
    }
}

/// Exponential backoff state machine
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    config: BackoffConfig,
    current_attempt: u32,
    current_delay: Duration,
}

impl ExponentialBackoff {
    pub fn new() -> Self {
        Self::with_config(BackoffConfig::default())
    }

    pub fn with_config(config: BackoffConfig) -> Self {
        Self {
            current_delay: config.initial_delay(),
            current_attempt: 0,
            config,
        }
    }

    /// Next delay, advancing the state. `None` once retries are exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.can_retry() {
            return None;
        }

        let delay = self.with_jitter(self.current_delay);

        self.current_attempt += 1;
        self.current_delay = std::cmp::min(
            Duration::from_secs_f64(self.current_delay.as_secs_f64() * self.config.multiplier),
            self.config.max_delay(),
        );

        Some(delay)
    }

    fn with_jitter(&self, delay: Duration) -> Duration {
        if self.config.jitter_factor == 0.0 {
            return delay;
        }

        let jitter = rand::thread_rng().gen::<f64>() * self.config.jitter_factor;
        let factor = 1.0 + (jitter - self.config.jitter_factor / 2.0);
        Duration::from_secs_f64(delay.as_secs_f64() * factor)
    }

    pub fn reset(&mut self) {
        self.current_attempt = 0;
        self.current_delay = self.config.initial_delay();
    }

    pub fn attempt_number(&self) -> u32 {
        self.current_attempt
    }

    pub fn can_retry(&self) -> bool {
        match self.config.max_retries {
            Some(max) => self.current_attempt < max,
            None => true,
        }
    }

    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn no_jitter(max_retries: Option<u32>) -> BackoffConfig {
        BackoffConfig {
            initial_delay_ms: 100,
            max_delay_ms: 1_000,
            multiplier: 2.0,
            max_retries,
            jitter_factor: 0.0,
        }
    }

    #[test]
    fn test_exponential_growth_capped() {
        let mut backoff = ExponentialBackoff::with_config(no_jitter(None));
        let delays: Vec<f64> = (0..6)
            .map(|_| backoff.next_delay().unwrap().as_secs_f64())
            .collect();

        assert_relative_eq!(delays[0], 0.1, max_relative = 1e-6);
        assert_relative_eq!(delays[1], 0.2, max_relative = 1e-6);
        assert_relative_eq!(delays[2], 0.4, max_relative = 1e-6);
        assert_relative_eq!(delays[3], 0.8, max_relative = 1e-6);
        assert_relative_eq!(delays[4], 1.0, max_relative = 1e-6);
        assert_relative_eq!(delays[5], 1.0, max_relative = 1e-6);
    }

    #[test]
    fn test_max_retries() {
        let mut backoff = ExponentialBackoff::with_config(no_jitter(Some(2)));
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_none());
        assert!(!backoff.can_retry());

        backoff.reset();
        assert_eq!(backoff.attempt_number(), 0);
        assert!(backoff.can_retry());
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let config = BackoffConfig {
            jitter_factor: 0.2,
            ..no_jitter(None)
        };
        for _ in 0..50 {
            let mut backoff = ExponentialBackoff::with_config(config.clone());
            let delay = backoff.next_delay().unwrap().as_secs_f64();
            assert!(delay >= 0.09 - 1e-9 && delay <= 0.11 + 1e-9, "delay {} out of range", delay);
        }
    }

    #[test]
    fn test_fixed_config() {
        let mut backoff = ExponentialBackoff::with_config(BackoffConfig::fixed(Duration::from_secs(2)));
        for _ in 0..5 {
            assert_eq!(backoff.next_delay(), Some(Duration::from_secs(2)));
        }
    }

    #[test]
    fn test_validate() {
        assert!(BackoffConfig::default().validate().is_ok());
        assert!(BackoffConfig::aggressive().validate().is_ok());

        let bad_multiplier = BackoffConfig {
            multiplier: 0.5,
            ..Default::default()
        };
        assert!(bad_multiplier.validate().is_err());

        let bad_jitter = BackoffConfig {
            jitter_factor: 1.5,
            ..Default::default()
        };
        assert!(bad_jitter.validate().is_err());

        let inverted = BackoffConfig {
            initial_delay_ms: 10_000,
            max_delay_ms: 100,
            ..Default::default()
        };
        assert!(inverted.validate().is_err());
    }
}
