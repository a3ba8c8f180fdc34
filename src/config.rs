//! Retry settings for outbound HTTP services
//!
//! [`HttpServiceConfig`] is the plain, immutable value the rest of the
//! application passes around to build retrying clients. It can be
//! deserialized (missing fields take their defaults) or filled in from the
//! command line, see [`crate::cli::Cli::service_config`].

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::backoff::BackoffOption;
use crate::http::{PredicateClient, RequestExecutor};
use crate::predicate::StatusPredicate;
use crate::retry::{RetryConfig, StopCondition};

/// Invalid retry settings
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("backoff factor must be a finite, non-negative number of seconds, got {0}")]
    InvalidBackoffFactor(f64),

    #[error("{0} is not a valid HTTP status code")]
    InvalidStatus(u16),

    #[error("attempt timeout must be greater than zero")]
    ZeroAttemptTimeout,
}

/// Settings for calling one outbound HTTP service
///
/// # Examples
///
/// ```
/// use backoff_client::config::HttpServiceConfig;
///
/// let config: HttpServiceConfig = serde_json::from_str(r#"{"attempts": 3}"#).unwrap();
/// assert_eq!(config.attempts, 3);
/// assert_eq!(config.statuses_for_retry, vec![401, 408]);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpServiceConfig {
    /// Overall time budget of one retry session, in seconds
    pub requests_timeout_secs: u64,
    /// Maximum attempts per session; zero means unlimited
    pub attempts: u32,
    /// First backoff wait in seconds; later waits double
    pub backoff_factor: f64,
    /// Status codes that trigger a retry
    pub statuses_for_retry: Vec<u16>,
    /// Timeout of each individual attempt, in seconds
    pub attempt_timeout_secs: u64,
    /// Randomize waits with full jitter
    pub jitter: bool,
}

impl Default for HttpServiceConfig {
    fn default() -> Self {
        Self {
            requests_timeout_secs: 5 * 60,
            attempts: 5,
            backoff_factor: 0.1,
            statuses_for_retry: vec![401, 408],
            attempt_timeout_secs: 5,
            jitter: true,
        }
    }
}

impl HttpServiceConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.backoff_factor.is_finite() || self.backoff_factor < 0.0 {
            return Err(ConfigError::InvalidBackoffFactor(self.backoff_factor));
        }
        if let Some(status) = self
            .statuses_for_retry
            .iter()
            .copied()
            .find(|status| !(100..=999).contains(status))
        {
            return Err(ConfigError::InvalidStatus(status));
        }
        if self.attempt_timeout_secs == 0 {
            return Err(ConfigError::ZeroAttemptTimeout);
        }
        Ok(())
    }

    pub fn backoff_option(&self) -> Result<BackoffOption, ConfigError> {
        let base = Duration::try_from_secs_f64(self.backoff_factor)
            .map_err(|_| ConfigError::InvalidBackoffFactor(self.backoff_factor))?;
        Ok(BackoffOption::expo(base))
    }

    pub fn stop_condition(&self) -> StopCondition {
        StopCondition::attempts(self.attempts)
            .with_max_elapsed(Duration::from_secs(self.requests_timeout_secs))
    }

    pub fn predicate(&self) -> StatusPredicate {
        StatusPredicate::new(self.statuses_for_retry.iter().copied())
    }

    pub fn retry_config(&self) -> Result<RetryConfig, ConfigError> {
        self.validate()?;

        let mut config = RetryConfig {
            backoff: self.backoff_option()?,
            stop: self.stop_condition(),
            ..RetryConfig::default()
        };
        if !self.jitter {
            config.jitter = None;
        }
        Ok(config)
    }

    /// Builds a client retrying on [`HttpServiceConfig::statuses_for_retry`]
    pub fn build_client<X: RequestExecutor>(
        &self,
        executor: X,
    ) -> Result<PredicateClient<X>, ConfigError> {
        let client = PredicateClient::new(self.predicate(), executor)
            .with_retry_config(self.retry_config()?)
            .with_attempt_timeout(Duration::from_secs(self.attempt_timeout_secs));
        Ok(client)
    }
}
