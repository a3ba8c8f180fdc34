use anyhow::Result;
use backoff_client::backoff::BackoffOption;
use backoff_client::http::{PredicateClient, RequestExecutor};
use backoff_client::outcome::{Outcome, RequestSpec, Response, TransportError};
use backoff_client::predicate::{StatusPredicate, TryPredicate};
use backoff_client::retry::{
    retry_on_predicate, ExhaustionPolicy, RetryConfig, RetryError, StopCondition,
};
use futures::future::{join_all, BoxFuture, FutureExt};
use reqwest::StatusCode;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{sleep, Instant};

#[derive(Debug, Clone, Copy)]
enum Step {
    Status(u16),
    Slow(Duration, u16),
    ConnectTimeout,
    Refused,
}

/// Executor replaying a fixed script, then answering `fallback` forever
#[derive(Clone)]
struct ScriptedExecutor {
    script: Arc<Mutex<VecDeque<Step>>>,
    fallback: Step,
    calls: Arc<AtomicU32>,
    started: Arc<Mutex<Vec<Instant>>>,
}

impl ScriptedExecutor {
    fn new(script: impl IntoIterator<Item = Step>, fallback: Step) -> Self {
        Self {
            script: Arc::new(Mutex::new(script.into_iter().collect())),
            fallback,
            calls: Arc::new(AtomicU32::new(0)),
            started: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn always(code: u16) -> Self {
        Self::new([], Step::Status(code))
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn started(&self) -> Vec<Instant> {
        self.started.lock().unwrap().clone()
    }
}

impl RequestExecutor for ScriptedExecutor {
    fn issue<'a>(
        &'a self,
        _request: &'a RequestSpec,
        _timeout: Duration,
    ) -> BoxFuture<'a, Result<Response, TransportError>> {
        async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.started.lock().unwrap().push(Instant::now());
            let step = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(self.fallback);

            match step {
                Step::Status(code) => Ok(Response::new(status(code))),
                Step::Slow(delay, code) => {
                    sleep(delay).await;
                    Ok(Response::new(status(code)))
                }
                Step::ConnectTimeout => Err(TransportError::ConnectTimeout(
                    "connect timed out".to_string(),
                )),
                Step::Refused => Err(TransportError::Connect("connection refused".to_string())),
            }
        }
        .boxed()
    }
}

fn status(code: u16) -> StatusCode {
    StatusCode::from_u16(code).unwrap()
}

fn always_retry(_outcome: &Outcome) -> bool {
    true
}

fn client(
    executor: &ScriptedExecutor,
    statuses: impl IntoIterator<Item = u16>,
) -> PredicateClient<ScriptedExecutor> {
    PredicateClient::new(StatusPredicate::new(statuses), executor.clone())
        .with_backoff(BackoffOption::constant(Duration::from_millis(100)))
        .without_jitter()
}

fn spec() -> RequestSpec {
    RequestSpec::get("http://service.test/items")
}

#[tokio::test(start_paused = true)]
async fn test_accepted_outcome_returns_after_one_attempt() -> Result<()> {
    let executor = ScriptedExecutor::always(200);
    let client = client(&executor, [401, 408]);

    let report = client.request_with_report(spec()).await?;

    assert_eq!(report.outcome.status(), StatusCode::OK);
    assert_eq!(report.attempts, 1);
    assert!(!report.exhausted);
    assert_eq!(executor.calls(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_predicate_false_returns_non_success_status_as_is() -> Result<()> {
    let executor = ScriptedExecutor::always(500);
    let client = client(&executor, [408]);

    let outcome = client.request(spec()).await?;

    assert_eq!(outcome.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(executor.calls(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_retries_request_timeouts_until_success() -> Result<()> {
    let executor = ScriptedExecutor::new(
        [Step::Status(408), Step::Status(408), Step::Status(200)],
        Step::Status(500),
    );
    let client = client(&executor, [408]).with_stop_condition(StopCondition::attempts(5));

    let report = client.request_with_report(spec()).await?;

    assert_eq!(report.outcome.status(), StatusCode::OK);
    assert_eq!(report.attempts, 3);
    assert!(!report.exhausted);
    assert_eq!(executor.calls(), 3);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_exhaustion_returns_last_outcome() -> Result<()> {
    let executor = ScriptedExecutor::always(401);
    let client = client(&executor, [401]).with_stop_condition(StopCondition::attempts(3));

    let report = client.request_with_report(spec()).await?;

    assert_eq!(report.outcome.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(report.attempts, 3);
    assert!(report.exhausted);
    assert_eq!(executor.calls(), 3);
    assert!(client.is_retry_eligible(&report.outcome)?);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_never_exceeds_max_attempts() -> Result<()> {
    for max in 1..=6 {
        let executor = ScriptedExecutor::always(503);
        let client = PredicateClient::new(always_retry, executor.clone())
            .with_backoff(BackoffOption::expo(Duration::from_millis(10)))
            .with_stop_condition(StopCondition::attempts(max));

        let outcome = client.request(spec()).await?;

        assert_eq!(outcome.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(executor.calls(), max, "max_attempts = {}", max);
    }
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_zero_elapsed_budget_allows_single_attempt() -> Result<()> {
    let executor = ScriptedExecutor::always(408);
    let client = client(&executor, [408])
        .with_stop_condition(StopCondition::unlimited().with_max_elapsed(Duration::ZERO));

    let report = client.request_with_report(spec()).await?;

    assert_eq!(report.attempts, 1);
    assert!(report.exhausted);
    assert_eq!(executor.calls(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_no_attempt_starts_after_elapsed_budget() -> Result<()> {
    let budget = Duration::from_millis(2500);
    let executor = ScriptedExecutor::new([], Step::Slow(Duration::from_secs(1), 503));
    let client = PredicateClient::new(always_retry, executor.clone())
        .with_backoff(BackoffOption::constant(Duration::from_millis(200)))
        .without_jitter()
        .with_stop_condition(StopCondition::unlimited().with_max_elapsed(budget));

    let begin = Instant::now();
    let report = client.request_with_report(spec()).await?;

    assert!(report.exhausted);
    assert_eq!(executor.calls(), 3);
    for started in executor.started() {
        assert!(started.duration_since(begin) < budget);
    }
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_wait_is_clipped_to_remaining_budget() -> Result<()> {
    let executor = ScriptedExecutor::always(503);
    let client = PredicateClient::new(always_retry, executor.clone())
        .with_backoff(BackoffOption::constant(Duration::from_secs(10)))
        .without_jitter()
        .with_stop_condition(StopCondition::unlimited().with_max_elapsed(Duration::from_secs(3)));

    let report = client.request_with_report(spec()).await?;

    assert_eq!(executor.calls(), 2);
    assert!(report.elapsed >= Duration::from_secs(3));
    assert!(report.elapsed < Duration::from_secs(10));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_backoff_waits_grow_exponentially() -> Result<()> {
    let executor = ScriptedExecutor::always(503);
    let client = PredicateClient::new(always_retry, executor.clone())
        .with_backoff(BackoffOption::expo(Duration::from_secs(1)))
        .without_jitter()
        .with_stop_condition(StopCondition::attempts(4));

    client.request(spec()).await?;

    let started = executor.started();
    assert_eq!(started.len(), 4);
    let gaps: Vec<Duration> = started.windows(2).map(|w| w[1] - w[0]).collect();
    for (gap, expected) in gaps.iter().zip([1, 2, 4]) {
        let expected = Duration::from_secs(expected);
        assert!(
            *gap >= expected && *gap < expected + Duration::from_millis(10),
            "gap {:?} should be about {:?}",
            gap,
            expected
        );
    }
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_connect_timeout_is_seen_as_request_timeout() -> Result<()> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = seen.clone();
    let executor = ScriptedExecutor::new([Step::ConnectTimeout], Step::Status(200));
    let client = PredicateClient::new(
        move |outcome: &Outcome| {
            seen_clone.lock().unwrap().push(outcome.status());
            outcome.status() == StatusCode::REQUEST_TIMEOUT
        },
        executor.clone(),
    )
    .with_backoff(BackoffOption::constant(Duration::from_millis(50)));

    let outcome = client.request(spec()).await?;

    assert_eq!(outcome.status(), StatusCode::OK);
    assert_eq!(executor.calls(), 2);
    assert_eq!(
        *seen.lock().unwrap(),
        vec![StatusCode::REQUEST_TIMEOUT, StatusCode::OK]
    );
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_timeouts_return_transport_failure() -> Result<()> {
    let executor = ScriptedExecutor::new([], Step::ConnectTimeout);
    let client = client(&executor, [408]).with_stop_condition(StopCondition::attempts(2));

    let outcome = client.request(spec()).await?;

    assert!(outcome.is_transport_failure());
    assert_eq!(outcome.status(), StatusCode::REQUEST_TIMEOUT);
    assert_eq!(executor.calls(), 2);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_other_transport_errors_are_not_retried() -> Result<()> {
    let executor = ScriptedExecutor::new([Step::Refused], Step::Status(200));
    let client = PredicateClient::new(always_retry, executor.clone());

    let result = client.request(spec()).await;

    assert!(matches!(
        result,
        Err(RetryError::Transport(TransportError::Connect(_)))
    ));
    assert_eq!(executor.calls(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_predicate_failure_stops_immediately() -> Result<()> {
    let executor = ScriptedExecutor::always(503);
    let predicate = TryPredicate::new(|outcome: &Outcome| {
        if outcome.status().is_server_error() {
            Err("cannot classify server error")
        } else {
            Ok(false)
        }
    });
    let client = PredicateClient::new(predicate, executor.clone());

    let result = client.request(spec()).await;

    match result {
        Err(RetryError::Predicate(err)) => {
            assert!(err.to_string().contains("cannot classify server error"));
        }
        other => panic!("expected predicate error, got {:?}", other),
    }
    assert_eq!(executor.calls(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_finite_backoff_ends_session() -> Result<()> {
    let executor = ScriptedExecutor::always(503);
    let client = PredicateClient::new(always_retry, executor.clone())
        .with_backoff(BackoffOption::fixed([
            Duration::from_millis(10),
            Duration::from_millis(20),
        ]))
        .with_stop_condition(StopCondition::unlimited());

    let report = client.request_with_report(spec()).await?;

    assert_eq!(report.attempts, 3);
    assert!(report.exhausted);
    assert_eq!(executor.calls(), 3);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_error_policy_raises_on_exhaustion() -> Result<()> {
    let executor = ScriptedExecutor::always(503);
    let client = PredicateClient::new(always_retry, executor.clone())
        .with_stop_condition(StopCondition::attempts(2))
        .with_exhaustion_policy(ExhaustionPolicy::Error);

    let result = client.request(spec()).await;

    match result {
        Err(RetryError::Exhausted {
            attempts, outcome, ..
        }) => {
            assert_eq!(attempts, 2);
            assert_eq!(outcome.status(), StatusCode::SERVICE_UNAVAILABLE);
        }
        other => panic!("expected exhaustion error, got {:?}", other),
    }
    assert_eq!(executor.calls(), 2);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_error_policy_keeps_accepted_outcomes() -> Result<()> {
    let executor = ScriptedExecutor::new([Step::Status(503)], Step::Status(200));
    let client = PredicateClient::new(
        |outcome: &Outcome| outcome.status().is_server_error(),
        executor.clone(),
    )
    .with_exhaustion_policy(ExhaustionPolicy::Error);

    let outcome = client.request(spec()).await?;

    assert_eq!(outcome.status(), StatusCode::OK);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_dropping_session_cancels_pending_retries() -> Result<()> {
    let executor = ScriptedExecutor::always(503);
    let client = PredicateClient::new(always_retry, executor.clone())
        .with_backoff(BackoffOption::constant(Duration::from_secs(10)))
        .without_jitter()
        .with_stop_condition(StopCondition::unlimited());

    let result = tokio::time::timeout(Duration::from_secs(15), client.request(spec())).await;
    assert!(result.is_err());
    assert_eq!(executor.calls(), 2);

    sleep(Duration::from_secs(60)).await;
    assert_eq!(executor.calls(), 2);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_sessions_have_independent_backoff() -> Result<()> {
    let executor = ScriptedExecutor::always(503);
    let client = PredicateClient::new(always_retry, executor.clone())
        .with_backoff(BackoffOption::fixed([
            Duration::from_secs(1),
            Duration::from_secs(1),
        ]))
        .with_stop_condition(StopCondition::unlimited());

    let reports = join_all((0..3).map(|_| client.request_with_report(spec()))).await;

    for report in reports {
        let report = report?;
        assert_eq!(report.attempts, 3);
        assert!(report.exhausted);
    }
    assert_eq!(executor.calls(), 9);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_operation_receives_attempt_ordinals() -> Result<()> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let config = RetryConfig {
        backoff: BackoffOption::constant(Duration::from_millis(5)),
        stop: StopCondition::attempts(4),
        ..RetryConfig::default()
    };

    let report = retry_on_predicate(
        |attempt| {
            let seen = seen.clone();
            async move {
                seen.lock().unwrap().push(attempt);
                Ok(Response::new(StatusCode::TOO_MANY_REQUESTS))
            }
        },
        &|outcome: &Outcome| outcome.status() == StatusCode::TOO_MANY_REQUESTS,
        &config,
    )
    .await?;

    assert_eq!(report.attempts, 4);
    assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3, 4]);
    Ok(())
}
