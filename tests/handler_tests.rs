//! Tests for the error handler used as a standalone pipeline stage.

mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use common::ScriptedTransport;
use payguard::config::ResilienceOptions;
use payguard::detect::{ClassifiedError, Failure};
use payguard::error::{FailureKind, StructuredError};
use payguard::handler::error_interceptor;
use payguard::interceptor::Pipeline;
use payguard::retry::RetryPredicate;
use payguard::transport::Transport;

async fn run(options: ResilienceOptions, transport: &Arc<ScriptedTransport>) -> payguard::error::Result<u16> {
    let pipeline = Pipeline::new(options.detector.clone()).with_error_interceptor(error_interceptor(&options)?);
    let transport: Arc<dyn Transport> = transport.clone();
    let response = pipeline
        .execute(&transport, common::payment_request(), CancellationToken::new())
        .await?;
    Ok(response.status)
}

#[tokio::test(start_paused = true)]
async fn factory_handler_reports_terminal_errors() {
    let transport = ScriptedTransport::with((0..4).map(|_| Ok(common::status(502))).collect());
    let reported = Arc::new(AtomicU32::new(0));
    let counter = reported.clone();
    let options = common::deterministic_options().with_on_error(Arc::new(move |error: &StructuredError| {
        assert_eq!(error.attempts, 4);
        counter.fetch_add(1, Ordering::SeqCst);
    }));

    let error = run(options, &transport).await.unwrap_err();

    assert_eq!(transport.calls(), 4);
    assert_eq!(reported.load(Ordering::SeqCst), 1);
    assert_eq!(error.kind(), Some(FailureKind::Server));
    assert!(error.structured().unwrap().diagnostics.as_ref().unwrap().exhausted);
}

#[tokio::test(start_paused = true)]
async fn predicate_cannot_force_retries_of_fatal_kinds() {
    let transport = ScriptedTransport::with(vec![Ok(common::status(401))]);
    let always: RetryPredicate = Arc::new(|_: &ClassifiedError, _: u32| true);
    let options = common::deterministic_options().with_retry_predicate(always);

    let error = run(options, &transport).await.unwrap_err();

    assert_eq!(transport.calls(), 1);
    assert_eq!(error.kind(), Some(FailureKind::Auth));
}

#[tokio::test(start_paused = true)]
async fn predicate_extends_retries_to_other_statuses() {
    let transport = ScriptedTransport::with(vec![Ok(common::status(409))]);
    let conflicts: RetryPredicate =
        Arc::new(|error: &ClassifiedError, _: u32| error.status() == Some(409));
    let options = common::deterministic_options().with_retry_predicate(conflicts);

    assert_eq!(run(options, &transport).await.unwrap(), 200);
    assert_eq!(transport.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn custom_detector_feeds_the_handler() {
    let transport = ScriptedTransport::with(vec![Ok(common::status(418))]);
    let options = common::deterministic_options().with_detector(
        "teapot",
        Arc::new(|failure: &Failure| {
            (failure.status() == Some(418)).then(|| {
                ClassifiedError::new(FailureKind::Server, true).with_detail("status", 503)
            })
        }),
    );

    assert_eq!(run(options, &transport).await.unwrap(), 200);
    assert_eq!(transport.calls(), 2);
}
