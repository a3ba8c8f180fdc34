//! HTTP transport and the caller-facing retrying client
//!
//! This module provides:
//! - [`RequestExecutor`], the narrow seam the retry controller depends on:
//!   issue one request with a timeout, get a response or a transport failure
//! - [`ReqwestExecutor`], the production executor over a pooled `reqwest::Client`
//! - [`PredicateClient`], which replays a [`RequestSpec`] through the retry
//!   controller until its predicate accepts the outcome

use anyhow::{Context, Result};
use futures::future::{BoxFuture, FutureExt};
use reqwest::header::HeaderMap;
use reqwest::{Client, ClientBuilder};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::backoff::BackoffOption;
use crate::jitter::Jitter;
use crate::outcome::{Outcome, RequestBody, RequestSpec, Response, TransportError};
use crate::predicate::{PredicateError, RetryPredicate};
use crate::retry::{
    retry_on_predicate, ExhaustionPolicy, RetryConfig, RetryError, RetryReport, StopCondition,
};

/// Per-attempt timeout used unless a client is configured otherwise
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(5);

/// Issues a single HTTP request
///
/// Implementations report timeouts as [`TransportError::ConnectTimeout`] or
/// [`TransportError::Timeout`] so the controller can retry them.
pub trait RequestExecutor: Send + Sync {
    fn issue<'a>(
        &'a self,
        request: &'a RequestSpec,
        timeout: Duration,
    ) -> BoxFuture<'a, Result<Response, TransportError>>;
}

impl<X: RequestExecutor + ?Sized> RequestExecutor for Arc<X> {
    fn issue<'a>(
        &'a self,
        request: &'a RequestSpec,
        timeout: Duration,
    ) -> BoxFuture<'a, Result<Response, TransportError>> {
        (**self).issue(request, timeout)
    }
}

/// [`RequestExecutor`] backed by a pooled `reqwest::Client`
///
/// Cloning shares the underlying connection pool.
#[derive(Debug, Clone)]
pub struct ReqwestExecutor {
    client: Client,
}

impl ReqwestExecutor {
    /// Creates an executor with pooled keep-alive connections
    ///
    /// Initializes a client with:
    /// - 50 max idle connections per host
    /// - 30 second connection idle timeout
    /// - 60 second TCP keepalive
    pub fn new() -> Result<Self> {
        let client = ClientBuilder::new()
            .user_agent(concat!("backoff-client/", env!("CARGO_PKG_VERSION")))
            .pool_max_idle_per_host(50)
            .pool_idle_timeout(Duration::from_secs(30))
            .tcp_keepalive(Duration::from_secs(60))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client })
    }

    /// Wraps an existing client, sharing its pool
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

impl RequestExecutor for ReqwestExecutor {
    fn issue<'a>(
        &'a self,
        request: &'a RequestSpec,
        timeout: Duration,
    ) -> BoxFuture<'a, Result<Response, TransportError>> {
        async move {
            let mut builder = self
                .client
                .request(request.method.clone(), &request.url)
                .headers(request.headers.clone())
                .timeout(timeout);

            if !request.query.is_empty() {
                builder = builder.query(&request.query);
            }

            builder = match &request.body {
                Some(RequestBody::Bytes(bytes)) => builder.body(bytes.clone()),
                Some(RequestBody::Json(value)) => builder.json(value),
                None => builder,
            };

            let resp = builder.send().await?;
            let status = resp.status();
            let headers = resp.headers().clone();
            let body = resp.bytes().await?;

            debug!(status = status.as_u16(), bytes = body.len(), "Received response");

            Ok(Response::new(status)
                .with_headers(headers)
                .with_body(body.to_vec()))
        }
        .boxed()
    }
}

/// HTTP client that retries requests while a predicate says so
///
/// Every call to [`PredicateClient::request`] is an independent retry session
/// with its own attempt counter, start time and backoff sequence. Sessions
/// share only the immutable [`RetryConfig`] and the executor's connection pool.
///
/// When retries run out the last outcome is returned (unless
/// [`ExhaustionPolicy::Error`] is configured); use
/// [`PredicateClient::is_retry_eligible`] to tell an accepted outcome from an
/// exhausted one.
///
/// # Examples
///
/// ```no_run
/// use backoff_client::http::PredicateClient;
/// use backoff_client::predicate::StatusPredicate;
/// use backoff_client::retry::StopCondition;
///
/// # async fn example() -> anyhow::Result<()> {
/// let client = PredicateClient::with_reqwest(StatusPredicate::new([401, 408]))?
///     .with_stop_condition(StopCondition::attempts(3));
///
/// let outcome = client.get("https://example.com/api/items").await?;
/// if client.is_retry_eligible(&outcome)? {
///     anyhow::bail!("gave up with status {}", outcome.status());
/// }
/// # Ok(())
/// # }
/// ```
pub struct PredicateClient<X = ReqwestExecutor> {
    executor: X,
    predicate: Arc<dyn RetryPredicate>,
    retry_config: RetryConfig,
    attempt_timeout: Duration,
    default_headers: HeaderMap,
}

impl<X: Clone> Clone for PredicateClient<X> {
    fn clone(&self) -> Self {
        Self {
            executor: self.executor.clone(),
            predicate: Arc::clone(&self.predicate),
            retry_config: self.retry_config.clone(),
            attempt_timeout: self.attempt_timeout,
            default_headers: self.default_headers.clone(),
        }
    }
}

impl PredicateClient<ReqwestExecutor> {
    /// Creates a client over a fresh [`ReqwestExecutor`]
    pub fn with_reqwest<P: RetryPredicate + 'static>(predicate: P) -> Result<Self> {
        Ok(Self::new(predicate, ReqwestExecutor::new()?))
    }
}

impl<X: RequestExecutor> PredicateClient<X> {
    pub fn new<P: RetryPredicate + 'static>(predicate: P, executor: X) -> Self {
        Self {
            executor,
            predicate: Arc::new(predicate),
            retry_config: RetryConfig::default(),
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            default_headers: HeaderMap::new(),
        }
    }

    /// Replaces the whole retry configuration
    pub fn with_retry_config(mut self, config: RetryConfig) -> Self {
        self.retry_config = config;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffOption) -> Self {
        self.retry_config.backoff = backoff;
        self
    }

    pub fn with_jitter<J: Jitter + 'static>(mut self, jitter: J) -> Self {
        self.retry_config.jitter = Some(Arc::new(jitter));
        self
    }

    /// Sleeps the raw backoff wait between attempts
    pub fn without_jitter(mut self) -> Self {
        self.retry_config.jitter = None;
        self
    }

    pub fn with_stop_condition(mut self, stop: StopCondition) -> Self {
        self.retry_config.stop = stop;
        self
    }

    pub fn with_exhaustion_policy(mut self, policy: ExhaustionPolicy) -> Self {
        self.retry_config.exhaustion = policy;
        self
    }

    /// Timeout for each individual attempt, independent of the session's
    /// elapsed-time limit
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Headers sent with every request; per-request headers take precedence
    pub fn with_default_headers(mut self, headers: HeaderMap) -> Self {
        self.default_headers = headers;
        self
    }

    pub fn predicate(&self) -> &dyn RetryPredicate {
        self.predicate.as_ref()
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry_config
    }

    pub fn attempt_timeout(&self) -> Duration {
        self.attempt_timeout
    }

    pub fn executor(&self) -> &X {
        &self.executor
    }

    /// Whether `outcome` is one the predicate would still retry
    pub fn is_retry_eligible(&self, outcome: &Outcome) -> Result<bool, PredicateError> {
        self.predicate.should_retry(outcome)
    }

    /// Performs `spec` with retry and returns the final outcome
    pub async fn request(&self, spec: RequestSpec) -> Result<Outcome, RetryError> {
        Ok(self.request_with_report(spec).await?.outcome)
    }

    /// Like [`PredicateClient::request`], also reporting attempts and elapsed time
    pub async fn request_with_report(&self, spec: RequestSpec) -> Result<RetryReport, RetryError> {
        let spec = self.merge_default_headers(spec);
        debug!(method = %spec.method, url = %spec.url, "Sending request with retry");

        let spec = &spec;
        let timeout = self.attempt_timeout;
        retry_on_predicate(
            |_attempt| self.executor.issue(spec, timeout),
            self.predicate.as_ref(),
            &self.retry_config,
        )
        .await
    }

    pub async fn get(&self, url: impl Into<String>) -> Result<Outcome, RetryError> {
        self.request(RequestSpec::get(url)).await
    }

    /// POSTs `body` as JSON with retry
    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        url: impl Into<String>,
        body: &T,
    ) -> Result<Outcome> {
        let spec = RequestSpec::post(url)
            .json(body)
            .context("Failed to serialize request body")?;
        Ok(self.request(spec).await?)
    }

    fn merge_default_headers(&self, mut spec: RequestSpec) -> RequestSpec {
        if self.default_headers.is_empty() {
            return spec;
        }

        let mut headers = self.default_headers.clone();
        headers.extend(spec.headers);
        spec.headers = headers;
        spec
    }
}
