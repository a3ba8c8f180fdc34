//! Retry predicates
//!
//! A predicate looks at the [`Outcome`] of an attempt and answers "should this
//! be retried?". Plain closures `Fn(&Outcome) -> bool` are predicates, as is
//! [`StatusPredicate`] for the common "retry on these status codes" policy.
//! A predicate that can itself fail is wrapped in [`TryPredicate`]; its error
//! ends the retry session immediately.

use std::collections::BTreeSet;
use std::error::Error as StdError;
use std::fmt;

use thiserror::Error;

use crate::outcome::Outcome;

/// Failure raised by a caller-supplied predicate
#[derive(Debug, Error)]
#[error("retry predicate failed: {source}")]
pub struct PredicateError {
    source: Box<dyn StdError + Send + Sync + 'static>,
}

impl PredicateError {
    pub fn new(source: impl Into<Box<dyn StdError + Send + Sync + 'static>>) -> Self {
        Self {
            source: source.into(),
        }
    }
}

/// Decides whether an outcome should be retried
pub trait RetryPredicate: Send + Sync {
    /// `Ok(true)` means "retry this outcome"
    fn should_retry(&self, outcome: &Outcome) -> Result<bool, PredicateError>;
}

impl<F> RetryPredicate for F
where
    F: Fn(&Outcome) -> bool + Send + Sync,
{
    fn should_retry(&self, outcome: &Outcome) -> Result<bool, PredicateError> {
        Ok(self(outcome))
    }
}

/// Retries when the outcome status is one of a fixed set
///
/// Timed-out attempts report `408`, so including `408` in the set also
/// retries transport timeouts.
///
/// # Examples
///
/// ```
/// use backoff_client::outcome::{Outcome, Response};
/// use backoff_client::predicate::{RetryPredicate, StatusPredicate};
/// use reqwest::StatusCode;
///
/// let predicate = StatusPredicate::new([401, 408]);
/// let unauthorized = Outcome::Response(Response::new(StatusCode::UNAUTHORIZED));
/// let ok = Outcome::Response(Response::new(StatusCode::OK));
///
/// assert!(predicate.should_retry(&unauthorized).unwrap());
/// assert!(!predicate.should_retry(&ok).unwrap());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusPredicate {
    statuses: BTreeSet<u16>,
}

impl StatusPredicate {
    pub fn new(statuses: impl IntoIterator<Item = u16>) -> Self {
        Self {
            statuses: statuses.into_iter().collect(),
        }
    }

    pub fn contains(&self, status: u16) -> bool {
        self.statuses.contains(&status)
    }

    pub fn statuses(&self) -> impl Iterator<Item = u16> + '_ {
        self.statuses.iter().copied()
    }
}

impl RetryPredicate for StatusPredicate {
    fn should_retry(&self, outcome: &Outcome) -> Result<bool, PredicateError> {
        Ok(self.contains(outcome.status().as_u16()))
    }
}

/// Adapts a fallible closure into a [`RetryPredicate`]
pub struct TryPredicate<F>(F);

impl<F> TryPredicate<F> {
    pub fn new(predicate: F) -> Self {
        Self(predicate)
    }
}

impl<F> fmt::Debug for TryPredicate<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TryPredicate").finish_non_exhaustive()
    }
}

impl<F, E> RetryPredicate for TryPredicate<F>
where
    F: Fn(&Outcome) -> Result<bool, E> + Send + Sync,
    E: Into<Box<dyn StdError + Send + Sync + 'static>>,
{
    fn should_retry(&self, outcome: &Outcome) -> Result<bool, PredicateError> {
        (self.0)(outcome).map_err(PredicateError::new)
    }
}
