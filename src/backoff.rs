//! Backoff sequence generators
//!
//! A [`BackoffOption`] is an immutable description of how waits grow between
//! retries. Each retry session calls [`BackoffOption::iter`] to get its own
//! [`Backoff`] iterator, so concurrent sessions built from the same option
//! never share progression state.
//!
//! The values produced here are raw waits; jitter is applied afterwards by the
//! controller.

use std::time::Duration;

/// Configuration for the sequence of raw waits between retries
///
/// # Examples
///
/// ```
/// use backoff_client::backoff::BackoffOption;
/// use std::time::Duration;
///
/// let option = BackoffOption::expo(Duration::from_millis(100))
///     .with_max_interval(Duration::from_millis(350));
///
/// let waits: Vec<_> = option.iter().take(4).collect();
/// assert_eq!(
///     waits,
///     vec![
///         Duration::from_millis(100),
///         Duration::from_millis(200),
///         Duration::from_millis(350),
///         Duration::from_millis(350),
///     ]
/// );
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum BackoffOption {
    /// `base_interval * growth_factor^n`, optionally capped
    Expo {
        base_interval: Duration,
        growth_factor: f64,
        max_interval: Option<Duration>,
    },

    /// The same wait before every retry
    Constant { interval: Duration },

    /// `base_interval` scaled by the Fibonacci numbers 1, 1, 2, 3, 5, ...
    Fibonacci {
        base_interval: Duration,
        max_interval: Option<Duration>,
    },

    /// An explicit list of waits; the session stops retrying once it runs out
    Fixed(Vec<Duration>),
}

impl Default for BackoffOption {
    fn default() -> Self {
        Self::expo(Duration::from_millis(100))
    }
}

impl BackoffOption {
    /// Exponential backoff doubling from `base_interval`, uncapped
    pub fn expo(base_interval: Duration) -> Self {
        BackoffOption::Expo {
            base_interval,
            growth_factor: 2.0,
            max_interval: None,
        }
    }

    pub fn constant(interval: Duration) -> Self {
        BackoffOption::Constant { interval }
    }

    pub fn fibonacci(base_interval: Duration) -> Self {
        BackoffOption::Fibonacci {
            base_interval,
            max_interval: None,
        }
    }

    pub fn fixed(waits: impl IntoIterator<Item = Duration>) -> Self {
        BackoffOption::Fixed(waits.into_iter().collect())
    }

    /// Sets the growth factor of an exponential option; other variants are
    /// returned unchanged
    pub fn with_growth_factor(self, factor: f64) -> Self {
        match self {
            BackoffOption::Expo {
                base_interval,
                max_interval,
                ..
            } => BackoffOption::Expo {
                base_interval,
                growth_factor: factor,
                max_interval,
            },
            other => other,
        }
    }

    /// Caps exponential and Fibonacci waits; other variants are returned
    /// unchanged
    pub fn with_max_interval(self, cap: Duration) -> Self {
        match self {
            BackoffOption::Expo {
                base_interval,
                growth_factor,
                ..
            } => BackoffOption::Expo {
                base_interval,
                growth_factor,
                max_interval: Some(cap),
            },
            BackoffOption::Fibonacci { base_interval, .. } => BackoffOption::Fibonacci {
                base_interval,
                max_interval: Some(cap),
            },
            other => other,
        }
    }

    /// Whether the sequence ever ends
    pub fn is_finite(&self) -> bool {
        matches!(self, BackoffOption::Fixed(_))
    }

    /// Starts a fresh sequence at retry index zero
    pub fn iter(&self) -> Backoff<'_> {
        Backoff {
            option: self,
            index: 0,
            fib: (1.0, 1.0),
        }
    }
}

/// Iterator over raw waits, owned by a single retry session
#[derive(Debug, Clone)]
pub struct Backoff<'a> {
    option: &'a BackoffOption,
    index: u32,
    fib: (f64, f64),
}

impl Backoff<'_> {
    /// Zero-based index of the next retry
    pub fn retry_index(&self) -> u32 {
        self.index
    }
}

impl Iterator for Backoff<'_> {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let wait = match self.option {
            BackoffOption::Expo {
                base_interval,
                growth_factor,
                max_interval,
            } => {
                let raw = scale(*base_interval, growth_factor.powf(f64::from(self.index)));
                cap(raw, *max_interval)
            }
            BackoffOption::Constant { interval } => *interval,
            BackoffOption::Fibonacci {
                base_interval,
                max_interval,
            } => {
                let (current, next) = self.fib;
                self.fib = (next, current + next);
                cap(scale(*base_interval, current), *max_interval)
            }
            BackoffOption::Fixed(waits) => *waits.get(self.index as usize)?,
        };

        self.index = self.index.saturating_add(1);
        Some(wait)
    }
}

// Saturates at Duration::MAX when the product overflows.
fn scale(base: Duration, multiplier: f64) -> Duration {
    let secs = base.as_secs_f64() * multiplier;
    if secs.is_nan() || secs <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

fn cap(wait: Duration, max_interval: Option<Duration>) -> Duration {
    match max_interval {
        Some(max) => wait.min(max),
        None => wait,
    }
}
