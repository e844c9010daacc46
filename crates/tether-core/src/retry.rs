// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Retry and backoff policies.
//!
//! Two consumers share these types:
//!
//! - the protocol bridge retries failed publications with
//!   [`ExponentialBackoff`] up to a bounded number of attempts;
//! - the connection supervisors reconnect forever using a [`Backoff`]
//!   sequence that resets after every successful connect.
//!
//! Delay formula: `min(initial_delay * multiplier^(attempt-1), max_delay)`,
//! optionally spread by `±jitter` of the computed delay.
//!
//! # Example
//!
//! ```
//! use tether_core::retry::{ExponentialBackoff, RetryConfig, RetryDecision, RetryStrategy};
//! use tether_core::error::PublishError;
//! use std::time::Duration;
//!
//! let strategy = ExponentialBackoff::new(RetryConfig::default());
//! let error = PublishError::BrokerUnavailable;
//!
//! assert_eq!(strategy.should_retry(&error, 1), RetryDecision::Retry(Duration::from_secs(1)));
//! assert_eq!(strategy.should_retry(&error, 2), RetryDecision::Retry(Duration::from_secs(2)));
//! assert_eq!(strategy.should_retry(&error, 5), RetryDecision::DoNotRetry);
//! ```

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{EndpointError, PublishError};

// =============================================================================
// Retry Configuration
// =============================================================================

/// Configuration for retry and backoff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts in total, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry.
    #[serde(default = "default_initial_delay")]
    #[serde(with = "duration_millis")]
    pub initial_delay: Duration,

    /// Upper bound for any single delay.
    #[serde(default = "default_max_delay")]
    #[serde(with = "duration_millis")]
    pub max_delay: Duration,

    /// Growth factor between consecutive delays.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Jitter factor (0.0 to 1.0) applied to each delay.
    #[serde(default)]
    pub jitter: f64,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_multiplier() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            multiplier: default_multiplier(),
            jitter: 0.0,
        }
    }
}

impl RetryConfig {
    /// Creates a new retry configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the default reconnect policy used by connection supervisors.
    ///
    /// Reconnects never give up, so `max_attempts` is unused.
    pub fn reconnect() -> Self {
        Self {
            max_attempts: u32::MAX,
            jitter: 0.2,
            ..Default::default()
        }
    }

    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Sets the maximum number of attempts.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the multiplier.
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Sets the jitter factor.
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Checks the configuration for values that cannot work.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("max_attempts must be at least 1".to_string());
        }
        if self.initial_delay.is_zero() {
            return Err("initial_delay must be greater than zero".to_string());
        }
        if self.max_delay < self.initial_delay {
            return Err("max_delay must not be smaller than initial_delay".to_string());
        }
        if self.multiplier < 1.0 {
            return Err("multiplier must be at least 1.0".to_string());
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err("jitter must be between 0.0 and 1.0".to_string());
        }
        Ok(())
    }

    /// Returns the un-jittered delay before retry number `attempt` (1-based).
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_delay = self.initial_delay.as_millis() as f64;
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let multiplied = base_delay * self.multiplier.powi(exponent);
        let capped = multiplied.min(self.max_delay.as_millis() as f64);

        Duration::from_millis(capped as u64)
    }
}

/// Serde helper for durations expressed in milliseconds.
pub mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    /// Serializes a duration as milliseconds.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    /// Deserializes milliseconds into a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

// =============================================================================
// Retry Decision
// =============================================================================

/// Decision on whether to retry an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry(Duration),
    /// Do not retry, return the error.
    DoNotRetry,
}

// =============================================================================
// Retryable
// =============================================================================

/// Errors that know whether a repeat attempt may succeed.
pub trait Retryable {
    /// Returns `true` if the failed operation may be retried.
    fn is_retryable(&self) -> bool;
}

impl Retryable for PublishError {
    fn is_retryable(&self) -> bool {
        PublishError::is_retryable(self)
    }
}

impl Retryable for EndpointError {
    fn is_retryable(&self) -> bool {
        EndpointError::is_retryable(self)
    }
}

// =============================================================================
// Retry Strategy Trait
// =============================================================================

/// A strategy for deciding when and how to retry failed operations.
pub trait RetryStrategy: Send + Sync {
    /// Returns the name of this strategy for logging.
    fn name(&self) -> &str;

    /// Decides what to do after attempt number `attempt` (1-based) failed.
    fn should_retry(&self, error: &dyn Retryable, attempt: u32) -> RetryDecision;
}

/// A strategy that never retries.
#[derive(Debug, Clone, Default)]
pub struct NoRetry;

impl RetryStrategy for NoRetry {
    fn name(&self) -> &str {
        "no_retry"
    }

    fn should_retry(&self, _error: &dyn Retryable, _attempt: u32) -> RetryDecision {
        RetryDecision::DoNotRetry
    }
}

/// A strategy with exponentially increasing delays.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    config: RetryConfig,
}

impl ExponentialBackoff {
    /// Creates a new exponential backoff strategy.
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }
}

impl RetryStrategy for ExponentialBackoff {
    fn name(&self) -> &str {
        "exponential_backoff"
    }

    fn should_retry(&self, error: &dyn Retryable, attempt: u32) -> RetryDecision {
        if attempt >= self.config.max_attempts {
            return RetryDecision::DoNotRetry;
        }

        if !error.is_retryable() {
            return RetryDecision::DoNotRetry;
        }

        let base_delay = self.config.calculate_delay(attempt);
        RetryDecision::Retry(apply_jitter(base_delay, self.config.jitter))
    }
}

// =============================================================================
// Backoff Sequence
// =============================================================================

/// A stateful, unbounded backoff sequence.
///
/// Used by reconnect loops: every call to [`Backoff::next_delay`] returns the
/// next delay in the sequence, and [`Backoff::reset`] starts over after a
/// success.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: RetryConfig,
    attempt: u32,
}

impl Backoff {
    /// Creates a new sequence.
    pub fn new(config: RetryConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Returns the next delay and advances the sequence.
    pub fn next_delay(&mut self) -> Duration {
        self.attempt = self.attempt.saturating_add(1);
        apply_jitter(self.config.calculate_delay(self.attempt), self.config.jitter)
    }

    /// Restarts the sequence from the initial delay.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Number of delays handed out since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempt
    }
}

fn apply_jitter(duration: Duration, jitter_factor: f64) -> Duration {
    if jitter_factor <= 0.0 {
        return duration;
    }

    let millis = duration.as_millis() as f64;
    let spread = millis * jitter_factor.min(1.0);
    let jittered = rand::thread_rng().gen_range((millis - spread)..=(millis + spread));

    Duration::from_millis(jittered.max(0.0) as u64)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_config_defaults() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.initial_delay, Duration::from_secs(1));
        assert_eq!(config.max_delay, Duration::from_secs(30));
        assert_eq!(config.multiplier, 2.0);
        assert_eq!(config.jitter, 0.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_retry_config_builder() {
        let config = RetryConfig::new()
            .with_max_attempts(3)
            .with_initial_delay(Duration::from_millis(200))
            .with_jitter(1.5);

        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.initial_delay, Duration::from_millis(200));
        assert_eq!(config.jitter, 1.0);
    }

    #[test]
    fn test_retry_config_validate() {
        assert!(RetryConfig::new().with_max_attempts(0).validate().is_err());
        assert!(RetryConfig::new()
            .with_max_delay(Duration::from_millis(10))
            .validate()
            .is_err());
        assert!(RetryConfig::new().with_multiplier(0.5).validate().is_err());
    }

    #[test]
    fn test_retry_config_serde_millis() {
        let config: RetryConfig =
            serde_json::from_str(r#"{"max_attempts": 3, "initial_delay": 250}"#).unwrap();
        assert_eq!(config.initial_delay, Duration::from_millis(250));
        assert_eq!(config.max_delay, Duration::from_secs(30));
    }

    #[test]
    fn test_exponential_backoff_delays() {
        let strategy = ExponentialBackoff::new(RetryConfig::default());
        let error = PublishError::BrokerUnavailable;

        let delays: Vec<_> = (1..5)
            .map(|attempt| strategy.should_retry(&error, attempt))
            .collect();

        assert_eq!(
            delays,
            vec![
                RetryDecision::Retry(Duration::from_secs(1)),
                RetryDecision::Retry(Duration::from_secs(2)),
                RetryDecision::Retry(Duration::from_secs(4)),
                RetryDecision::Retry(Duration::from_secs(8)),
            ]
        );
        assert_eq!(strategy.should_retry(&error, 5), RetryDecision::DoNotRetry);
    }

    #[test]
    fn test_exponential_backoff_rejected_not_retried() {
        let strategy = ExponentialBackoff::new(RetryConfig::default());
        let error = PublishError::rejected("not authorized");
        assert_eq!(strategy.should_retry(&error, 1), RetryDecision::DoNotRetry);
        assert_eq!(NoRetry.should_retry(&PublishError::BrokerUnavailable, 1), RetryDecision::DoNotRetry);
    }

    #[test]
    fn test_delay_capped() {
        let config = RetryConfig::default();
        assert_eq!(config.calculate_delay(6), Duration::from_secs(30));
        assert_eq!(config.calculate_delay(100), Duration::from_secs(30));
    }

    #[test]
    fn test_backoff_sequence_and_reset() {
        let mut backoff = Backoff::new(RetryConfig::default());
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
        assert_eq!(backoff.next_delay(), Duration::from_secs(2));
        assert_eq!(backoff.attempts(), 2);

        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_jitter_within_bounds() {
        let mut backoff = Backoff::new(RetryConfig::reconnect());
        for _ in 0..50 {
            backoff.reset();
            let delay = backoff.next_delay();
            assert!(delay >= Duration::from_millis(800), "{:?}", delay);
            assert!(delay <= Duration::from_millis(1200), "{:?}", delay);
        }
    }
}
