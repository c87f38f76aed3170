//! Tests for the retry driver.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use payguard::detect::ClassifiedError;
use payguard::error::FailureKind;
use payguard::retry::{
    BackoffConfig, RetryContext, RetryError, RetryEvent, RetryPolicy, RetryPredicate,
};

fn server_error() -> ClassifiedError {
    ClassifiedError::new(FailureKind::Server, true).with_detail("status", 500)
}

fn policy(max_retries: u32, base_delay_ms: u64) -> RetryPolicy {
    RetryPolicy::new(
        BackoffConfig::builder()
            .max_retries(max_retries)
            .base_delay_ms(base_delay_ms)
            .jitter_factor(0.0)
            .build()
            .unwrap(),
    )
}

#[tokio::test(start_paused = true)]
async fn always_failing_operation_makes_max_retries_plus_one_calls() {
    let calls = AtomicU32::new(0);
    let result: Result<(), _> = policy(2, 100)
        .run_with_retry(RetryContext::default(), |_ctx| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(server_error()) }
        })
        .await;

    let error = result.unwrap_err();
    assert!(error.is_exhausted());
    assert_eq!(error.attempts(), 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(error.last().map(ClassifiedError::kind), Some(FailureKind::Server));
}

#[tokio::test(start_paused = true)]
async fn zero_retries_makes_exactly_one_call() {
    let calls = AtomicU32::new(0);
    let result: Result<(), _> = policy(0, 100)
        .run_with_retry(RetryContext::default(), |_ctx| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(server_error()) }
        })
        .await;

    assert_eq!(result.unwrap_err().attempts(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn recovers_and_waits_the_backoff() {
    let started = Instant::now();
    let result = policy(3, 100)
        .run_with_retry(RetryContext::default(), |ctx| async move {
            if ctx.attempt() < 2 {
                Err(server_error())
            } else {
                Ok(ctx.attempt())
            }
        })
        .await;

    assert_eq!(result.unwrap(), 2);
    // 100ms + 200ms
    assert!(started.elapsed() >= Duration::from_millis(300));
}

#[tokio::test(start_paused = true)]
async fn context_carries_previous_error_and_delay() {
    let seen = Mutex::new(Vec::new());
    let _ = policy(2, 100)
        .run_with_retry(RetryContext::default(), |ctx| {
            seen.lock()
                .unwrap()
                .push((ctx.attempt(), ctx.previous_error().map(ClassifiedError::kind), ctx.next_delay()));
            async { Err::<(), _>(server_error()) }
        })
        .await;

    assert_eq!(
        seen.into_inner().unwrap(),
        vec![
            (0, None, None),
            (1, Some(FailureKind::Server), Some(Duration::from_millis(100))),
            (2, Some(FailureKind::Server), Some(Duration::from_millis(200))),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn non_retryable_error_stops_immediately() {
    let calls = AtomicU32::new(0);
    let result: Result<(), _> = policy(5, 100)
        .run_with_retry(RetryContext::default(), |_ctx| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ClassifiedError::new(FailureKind::Validation, false).with_detail("status", 422)) }
        })
        .await;

    assert!(matches!(result, Err(RetryError::NotRetryable { attempts: 1, .. })));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn predicate_cannot_retry_auth_failure_mid_sequence() {
    let always: RetryPredicate = Arc::new(|_: &ClassifiedError, _: u32| true);
    let policy = RetryPolicy::new(
        BackoffConfig::builder()
            .max_retries(5)
            .base_delay_ms(100)
            .jitter_factor(0.0)
            .retry_predicate(always)
            .build()
            .unwrap(),
    );
    let calls = AtomicU32::new(0);

    let result: Result<(), _> = policy
        .run_with_retry(RetryContext::default(), |ctx| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if ctx.attempt() == 0 {
                    Err(server_error())
                } else {
                    Err(ClassifiedError::new(FailureKind::Auth, false).with_detail("status", 401))
                }
            }
        })
        .await;

    let error = result.unwrap_err();
    assert!(matches!(error, RetryError::NotRetryable { attempts: 2, .. }));
    assert_eq!(error.last().unwrap().kind(), FailureKind::Auth);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn eligibility_is_reevaluated_every_attempt() {
    let result: Result<(), _> = policy(5, 100)
        .run_with_retry(RetryContext::default(), |ctx| async move {
            if ctx.attempt() == 0 {
                Err(ClassifiedError::new(FailureKind::Challenge, true).with_detail("status", 503))
            } else {
                Err(ClassifiedError::new(FailureKind::Challenge, false).with_detail("status", 403))
            }
        })
        .await;

    let error = result.unwrap_err();
    assert!(matches!(error, RetryError::NotRetryable { attempts: 2, .. }));
}

#[tokio::test(start_paused = true)]
async fn on_retry_reports_each_retry() {
    let events: Arc<Mutex<Vec<RetryEvent>>> = Arc::default();
    let sink = events.clone();
    let policy = RetryPolicy::new(
        BackoffConfig::builder()
            .max_retries(2)
            .base_delay_ms(50)
            .jitter_factor(0.0)
            .on_retry(Arc::new(move |event: &RetryEvent| sink.lock().unwrap().push(event.clone())))
            .build()
            .unwrap(),
    );

    let _: Result<(), _> = policy
        .run_with_retry(RetryContext::default(), |_ctx| async { Err(server_error()) })
        .await;

    let events = events.lock().unwrap();
    let summary: Vec<(u32, u64)> = events.iter().map(|e| (e.retry_count, e.delay_ms)).collect();
    assert_eq!(summary, vec![(1, 50), (2, 100)]);
    assert!(events.iter().all(|e| e.status == Some(500)));
}

#[tokio::test(start_paused = true)]
async fn retry_after_raises_the_delay_but_stays_capped() {
    let policy = RetryPolicy::new(
        BackoffConfig::builder()
            .base_delay_ms(100)
            .max_delay_ms(5_000)
            .jitter_factor(0.0)
            .build()
            .unwrap(),
    );
    let limited = ClassifiedError::new(FailureKind::RateLimit, true)
        .with_detail("status", 429)
        .with_detail("retryAfterSeconds", 3);
    assert_eq!(policy.compute_delay(1, Some(&limited)), Duration::from_secs(3));

    let long = limited.clone().with_detail("retryAfterSeconds", 600);
    assert_eq!(policy.compute_delay(1, Some(&long)), Duration::from_secs(5));
}

#[tokio::test(start_paused = true)]
async fn cancellation_during_backoff_rejects_promptly() {
    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();

    let task = tokio::spawn(async move {
        policy(3, 10_000)
            .run_with_retry(RetryContext::new(cancel), move |_ctx| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(server_error()) }
            })
            .await
    });

    tokio::time::sleep(Duration::from_millis(500)).await;
    canceller.cancel();
    let error = task.await.unwrap().unwrap_err();

    assert!(error.is_cancelled());
    assert_eq!(error.attempts(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn cancelled_before_start_makes_no_call() {
    let cancel = CancellationToken::new();
    cancel.cancel();
    let calls = AtomicU32::new(0);
    let result: Result<(), _> = policy(3, 100)
        .run_with_retry(RetryContext::new(cancel), |_ctx| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(server_error()) }
        })
        .await;

    assert!(result.unwrap_err().is_cancelled());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}
