//! Jitter policies applied to raw backoff waits
//!
//! Randomizing waits keeps concurrent clients that failed together from
//! retrying in lockstep. The default is [`FullJitter`].

use rand::Rng;
use std::time::Duration;

use crate::outcome::Outcome;

/// Information available when choosing the actual wait before a retry
#[derive(Debug, Clone, Copy)]
pub struct WaitContext<'a> {
    /// Outcome of the attempt that is about to be retried
    pub outcome: &'a Outcome,
    /// Attempt ordinal of that outcome (1-based)
    pub attempt: u32,
    /// Time since the session started
    pub elapsed: Duration,
    /// Time left before the session's elapsed-time limit, if it has one
    pub remaining: Option<Duration>,
}

/// Maps a raw wait to the wait actually slept
pub trait Jitter: Send + Sync {
    fn apply(&self, raw: Duration, ctx: &WaitContext<'_>) -> Duration;
}

/// Uniformly random wait in `[0, raw]`
#[derive(Debug, Clone, Copy, Default)]
pub struct FullJitter;

impl Jitter for FullJitter {
    fn apply(&self, raw: Duration, _ctx: &WaitContext<'_>) -> Duration {
        let fraction = rand::thread_rng().gen::<f64>();
        Duration::try_from_secs_f64(raw.as_secs_f64() * fraction)
            .map_or(raw, |wait| wait.min(raw))
    }
}

/// The raw wait plus up to one extra second
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomJitter;

impl Jitter for RandomJitter {
    fn apply(&self, raw: Duration, _ctx: &WaitContext<'_>) -> Duration {
        let extra = rand::thread_rng().gen_range(0..1000);
        raw.saturating_add(Duration::from_millis(extra))
    }
}

/// Leaves the raw wait unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct NoJitter;

impl Jitter for NoJitter {
    fn apply(&self, raw: Duration, _ctx: &WaitContext<'_>) -> Duration {
        raw
    }
}

impl<F> Jitter for F
where
    F: Fn(Duration, &WaitContext<'_>) -> Duration + Send + Sync,
{
    fn apply(&self, raw: Duration, ctx: &WaitContext<'_>) -> Duration {
        self(raw, ctx)
    }
}

/// Computes the wait before the next attempt
///
/// Applies `jitter` when present, then clips the result so the session does
/// not sleep past its elapsed-time limit.
///
/// # Examples
///
/// ```
/// use backoff_client::jitter::{next_wait, NoJitter, WaitContext};
/// use backoff_client::outcome::{Outcome, Response};
/// use reqwest::StatusCode;
/// use std::time::Duration;
///
/// let outcome = Outcome::Response(Response::new(StatusCode::REQUEST_TIMEOUT));
/// let ctx = WaitContext {
///     outcome: &outcome,
///     attempt: 1,
///     elapsed: Duration::from_secs(9),
///     remaining: Some(Duration::from_secs(1)),
/// };
///
/// assert_eq!(next_wait(Duration::from_secs(4), Some(&NoJitter), &ctx), Duration::from_secs(1));
/// ```
pub fn next_wait(raw: Duration, jitter: Option<&dyn Jitter>, ctx: &WaitContext<'_>) -> Duration {
    let wait = match jitter {
        Some(jitter) => jitter.apply(raw, ctx),
        None => raw,
    };

    match ctx.remaining {
        Some(remaining) => wait.min(remaining),
        None => wait,
    }
}
