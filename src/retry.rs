//! Predicate-driven retry controller
//!
//! This module drives one retry session: it issues an attempt, asks a
//! [`RetryPredicate`] whether the outcome should be retried, consults the stop
//! conditions and, if another attempt is allowed, sleeps for a jittered
//! backoff wait before looping.
//!
//! - Timed-out attempts are absorbed into a synthetic `408` outcome
//! - Other transport failures and predicate failures end the session with an error
//! - Running out of attempts, time or backoff values is not an error by default:
//!   the last outcome is returned and the caller decides what it means
//!
//! Waiting uses `tokio::time::sleep`, so only the calling task is suspended.
//! Dropping the returned future while it sleeps cancels the session.

use std::fmt;
use std::future::Future;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backoff::{Backoff, BackoffOption};
use crate::jitter::{next_wait, FullJitter, Jitter, WaitContext};
use crate::outcome::{Outcome, Response, TransportError};
use crate::predicate::{PredicateError, RetryPredicate};

/// When a retry session gives up
///
/// Either bound may be unset, meaning no limit on that axis.
///
/// # Examples
///
/// ```
/// use backoff_client::retry::StopCondition;
/// use std::time::Duration;
///
/// let stop = StopCondition::attempts(3).with_max_elapsed(Duration::from_secs(60));
/// assert!(!stop.reached(2, Duration::from_secs(10)));
/// assert!(stop.reached(3, Duration::from_secs(10)));
/// assert!(stop.reached(1, Duration::from_secs(60)));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopCondition {
    pub max_attempts: Option<NonZeroU32>,
    pub max_elapsed: Option<Duration>,
}

impl Default for StopCondition {
    fn default() -> Self {
        Self::attempts(5)
    }
}

impl StopCondition {
    /// No limit on attempts or time
    pub fn unlimited() -> Self {
        Self {
            max_attempts: None,
            max_elapsed: None,
        }
    }

    /// At most `max_attempts` attempts; zero means unlimited
    pub fn attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: NonZeroU32::new(max_attempts),
            max_elapsed: None,
        }
    }

    pub fn with_max_elapsed(mut self, max_elapsed: Duration) -> Self {
        self.max_elapsed = Some(max_elapsed);
        self
    }

    /// Whether a session that just finished `attempt` after `elapsed` must stop
    pub fn reached(&self, attempt: u32, elapsed: Duration) -> bool {
        let attempts_exceeded = self
            .max_attempts
            .is_some_and(|max| attempt >= max.get());
        let time_exceeded = self.max_elapsed.is_some_and(|max| elapsed >= max);
        attempts_exceeded || time_exceeded
    }

    /// Time left before the elapsed-time limit, if there is one
    pub fn remaining(&self, elapsed: Duration) -> Option<Duration> {
        self.max_elapsed
            .map(|max| max.saturating_sub(elapsed))
    }
}

/// What to do when a session stops while the predicate still wants a retry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExhaustionPolicy {
    /// Return the last outcome as if it had been accepted
    #[default]
    ReturnLast,
    /// Fail with [`RetryError::Exhausted`]
    Error,
}

/// Configuration shared by every session of a client
///
/// Immutable once built; cloning is cheap.
#[derive(Clone)]
pub struct RetryConfig {
    pub backoff: BackoffOption,
    pub jitter: Option<Arc<dyn Jitter>>,
    pub stop: StopCondition,
    pub exhaustion: ExhaustionPolicy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffOption::default(),
            jitter: Some(Arc::new(FullJitter)),
            stop: StopCondition::default(),
            exhaustion: ExhaustionPolicy::default(),
        }
    }
}

impl fmt::Debug for RetryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryConfig")
            .field("backoff", &self.backoff)
            .field("jitter", &self.jitter.is_some())
            .field("stop", &self.stop)
            .field("exhaustion", &self.exhaustion)
            .finish()
    }
}

/// Errors ending a retry session early
#[derive(Debug, Error)]
pub enum RetryError {
    /// Transport failure other than a timeout
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The caller's predicate failed
    #[error(transparent)]
    Predicate(#[from] PredicateError),

    /// Stop condition reached under [`ExhaustionPolicy::Error`]
    #[error("retries exhausted after {attempts} attempts in {elapsed:?}, last status {}", .outcome.status())]
    Exhausted {
        attempts: u32,
        elapsed: Duration,
        outcome: Box<Outcome>,
    },
}

/// Final outcome of a session together with how it got there
#[derive(Debug, Clone)]
pub struct RetryReport {
    pub outcome: Outcome,
    pub attempts: u32,
    pub elapsed: Duration,
    /// The predicate still wanted a retry when the session stopped
    pub exhausted: bool,
}

struct RetrySession<'a> {
    id: Uuid,
    started: Instant,
    attempt: u32,
    backoff: Backoff<'a>,
}

impl<'a> RetrySession<'a> {
    fn start(backoff: &'a BackoffOption) -> Self {
        Self {
            id: Uuid::new_v4(),
            started: Instant::now(),
            attempt: 0,
            backoff: backoff.iter(),
        }
    }

    fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    fn finish(
        self,
        outcome: Outcome,
        exhausted: bool,
        policy: ExhaustionPolicy,
    ) -> Result<RetryReport, RetryError> {
        let elapsed = self.elapsed();

        if exhausted {
            warn!(
                session = %self.id,
                attempts = self.attempt,
                ?elapsed,
                status = outcome.status().as_u16(),
                "Retries exhausted, returning last outcome"
            );
            if policy == ExhaustionPolicy::Error {
                return Err(RetryError::Exhausted {
                    attempts: self.attempt,
                    elapsed,
                    outcome: Box::new(outcome),
                });
            }
        }

        Ok(RetryReport {
            outcome,
            attempts: self.attempt,
            elapsed,
            exhausted,
        })
    }
}

/// Runs `operation` until `predicate` accepts its outcome or the session stops
///
/// `operation` receives the 1-based attempt number and performs exactly one
/// request. Timeouts it reports become synthetic `408` outcomes; other
/// transport errors end the session.
///
/// # Examples
///
/// ```
/// use backoff_client::outcome::{Outcome, Response};
/// use backoff_client::retry::{retry_on_predicate, RetryConfig, StopCondition};
/// use backoff_client::backoff::BackoffOption;
/// use reqwest::StatusCode;
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), backoff_client::retry::RetryError> {
/// let config = RetryConfig {
///     backoff: BackoffOption::constant(Duration::from_millis(10)),
///     stop: StopCondition::attempts(3),
///     ..RetryConfig::default()
/// };
///
/// let report = retry_on_predicate(
///     |attempt| async move {
///         let status = if attempt < 2 { StatusCode::REQUEST_TIMEOUT } else { StatusCode::OK };
///         Ok(Response::new(status))
///     },
///     &|outcome: &Outcome| outcome.status() == StatusCode::REQUEST_TIMEOUT,
///     &config,
/// )
/// .await?;
///
/// assert_eq!(report.attempts, 2);
/// # Ok(())
/// # }
/// ```
pub async fn retry_on_predicate<F, Fut, P>(
    mut operation: F,
    predicate: &P,
    config: &RetryConfig,
) -> Result<RetryReport, RetryError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Response, TransportError>>,
    P: RetryPredicate + ?Sized,
{
    let mut session = RetrySession::start(&config.backoff);
    info!(session = %session.id, "Starting request session");

    loop {
        session.attempt += 1;
        debug!(session = %session.id, attempt = session.attempt, "Issuing attempt");

        let outcome = match operation(session.attempt).await {
            Ok(response) => Outcome::Response(response),
            Err(err) => {
                let outcome = err.into_outcome()?;
                warn!(
                    session = %session.id,
                    attempt = session.attempt,
                    "Attempt timed out, treating as {}",
                    outcome.status()
                );
                outcome
            }
        };

        if !predicate.should_retry(&outcome)? {
            return session.finish(outcome, false, config.exhaustion);
        }

        let elapsed = session.elapsed();
        debug!(
            session = %session.id,
            attempt = session.attempt,
            ?elapsed,
            status = outcome.status().as_u16(),
            "Outcome is retryable"
        );

        if config.stop.reached(session.attempt, elapsed) {
            debug!(session = %session.id, stop = ?config.stop, "Stop condition reached");
            return session.finish(outcome, true, config.exhaustion);
        }

        let Some(raw) = session.backoff.next() else {
            debug!(session = %session.id, "Backoff sequence ended");
            return session.finish(outcome, true, config.exhaustion);
        };

        let ctx = WaitContext {
            outcome: &outcome,
            attempt: session.attempt,
            elapsed,
            remaining: config.stop.remaining(elapsed),
        };
        let wait = next_wait(raw, config.jitter.as_deref(), &ctx);

        debug!(
            session = %session.id,
            attempt = session.attempt,
            ?raw,
            ?wait,
            "Retrying after backoff"
        );

        sleep(wait).await;
    }
}
