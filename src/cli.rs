//! Command-line interface for the backoff client
//!
//! This module provides the clap-based command line used to exercise a retry
//! policy against a live endpoint:
//!
//! - Global retry settings, each overridable through the `HTTP_SERVICE_*`
//!   environment variables
//! - `request`: perform one request with retry and print a JSON summary
//! - `schedule`: print the raw backoff schedule the settings produce
//!
//! Exit codes follow standard conventions: 0 when the final outcome was
//! accepted by the retry predicate, non-zero when retries were exhausted or
//! the request failed.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use reqwest::header::{HeaderName, HeaderValue};
use serde::Serialize;

use crate::config::HttpServiceConfig;
use crate::retry::RetryReport;

/// Main command-line interface structure
///
/// Global options describe the retry policy and apply to all subcommands.
///
/// # Examples
///
/// ```
/// use backoff_client::cli::{Cli, Commands};
/// use clap::Parser;
///
/// let cli = Cli::try_parse_from([
///     "backoff-client", "--attempts", "3", "request", "--url", "http://localhost:8080/",
/// ])
/// .unwrap();
///
/// assert_eq!(cli.service_config().attempts, 3);
/// assert!(matches!(cli.command, Commands::Request { .. }));
/// ```
#[derive(Parser)]
#[command(
    name = "backoff-client",
    about = "HTTP client with predicate-driven retry and exponential backoff",
    version
)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Maximum attempts per request (0 for unlimited)
    #[arg(short = 'a', long, env = "HTTP_SERVICE_ATTEMPTS", default_value = "5")]
    pub attempts: u32,

    /// First backoff wait in seconds; later waits double
    #[arg(short = 'b', long, env = "HTTP_SERVICE_BACKOFF_FACTOR", default_value = "0.1")]
    pub backoff_factor: f64,

    /// Comma-separated status codes that trigger a retry
    #[arg(
        short = 's',
        long,
        env = "HTTP_SERVICE_STATUSES_FOR_RETRY",
        value_delimiter = ',',
        default_value = "401,408"
    )]
    pub statuses_for_retry: Vec<u16>,

    /// Overall time budget for one request in seconds
    #[arg(short = 't', long, env = "HTTP_SERVICE_REQUESTS_TIMEOUT", default_value = "300")]
    pub requests_timeout: u64,

    /// Timeout of each individual attempt in seconds
    #[arg(long, default_value = "5")]
    pub attempt_timeout: u64,

    /// Sleep the exact backoff wait instead of a randomized one
    #[arg(long)]
    pub no_jitter: bool,
}

impl Cli {
    pub fn service_config(&self) -> HttpServiceConfig {
        HttpServiceConfig {
            requests_timeout_secs: self.requests_timeout,
            attempts: self.attempts,
            backoff_factor: self.backoff_factor,
            statuses_for_retry: self.statuses_for_retry.clone(),
            attempt_timeout_secs: self.attempt_timeout,
            jitter: !self.no_jitter,
        }
    }
}

/// Available subcommands
///
/// ```text
/// backoff-client request --url https://example.com/api -H "Accept: application/json"
/// backoff-client --attempts 8 schedule --count 8
/// ```
#[derive(Subcommand)]
pub enum Commands {
    /// Perform one request with retry and print a JSON summary
    Request {
        /// Target URL
        #[arg(short, long)]
        url: String,

        /// HTTP method
        #[arg(short = 'X', long, default_value = "GET")]
        method: String,

        /// Extra header as "Name: value"; may be repeated
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,

        /// Request body sent verbatim on every attempt
        #[arg(short, long)]
        data: Option<String>,
    },
    /// Print the raw backoff waits, before jitter, in seconds
    Schedule {
        /// Number of waits to print
        #[arg(short = 'n', long, default_value = "10")]
        count: usize,
    },
}

/// Parses a `Name: value` header argument
pub fn parse_header(raw: &str) -> Result<(HeaderName, HeaderValue)> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| anyhow!("Header must look like 'Name: value', got '{}'", raw))?;

    let name = HeaderName::from_bytes(name.trim().as_bytes())
        .with_context(|| format!("Invalid header name in '{}'", raw))?;
    let value = HeaderValue::from_str(value.trim())
        .with_context(|| format!("Invalid header value in '{}'", raw))?;

    Ok((name, value))
}

/// JSON summary printed by the `request` subcommand
#[derive(Debug, Clone, Serialize)]
pub struct RequestSummary {
    pub status: u16,
    pub attempts: u32,
    pub elapsed_ms: u64,
    /// The predicate would still retry the final outcome
    pub exhausted: bool,
    pub transport_failure: bool,
    pub body: String,
}

impl RequestSummary {
    pub fn from_report(report: &RetryReport) -> Self {
        Self {
            status: report.outcome.status().as_u16(),
            attempts: report.attempts,
            elapsed_ms: u64::try_from(report.elapsed.as_millis()).unwrap_or(u64::MAX),
            exhausted: report.exhausted,
            transport_failure: report.outcome.is_transport_failure(),
            body: report
                .outcome
                .response()
                .map(|response| response.text())
                .unwrap_or_default(),
        }
    }
}
