//! Interceptor pipeline.
//!
//! A transport call passes through three independent, ordered chains:
//! request interceptors transform the outgoing request, response
//! interceptors transform successful responses, and error interceptors get a
//! chance to recover a failure by reissuing the call. The first error
//! interceptor that recovers wins; one that aborts ends the chain. A retry
//! that runs into a failure of another kind hands that failure on to the
//! interceptors after it.

pub mod challenge;
pub mod mutator;
pub mod network;
pub mod rate_limit;

pub use challenge::ChallengeInterceptor;
pub use mutator::{BrowserProfile, RequestMutator};
pub use network::NetworkInterceptor;
pub use rate_limit::RateLimitInterceptor;

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderName, HeaderValue};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::detect::{ClassifiedError, ClassifiedFailure, ErrorDetector, Failure};
use crate::error::{PayguardError, Result};
use crate::handler::{DiagnosticReport, ErrorHook, RecoveryEvent, RecoveryHook};
use crate::retry::{RetryContext, RetryError};
use crate::transport::{HttpRequest, HttpResponse, Transport};

/// SDK User-Agent sent when the caller sets none.
pub const SDK_USER_AGENT: &str = concat!("payguard/", env!("CARGO_PKG_VERSION"));

/// Transforms an outgoing request.
#[async_trait]
pub trait RequestInterceptor: Send + Sync {
    async fn on_request(&self, request: HttpRequest) -> Result<HttpRequest>;
}

/// Transforms a successful response.
#[async_trait]
pub trait ResponseInterceptor: Send + Sync {
    async fn on_response(&self, response: HttpResponse) -> Result<HttpResponse>;
}

/// What an error interceptor did with a failure.
#[derive(Debug)]
pub enum ErrorOutcome {
    /// The failure was recovered; the response flows back as a success.
    Recovered(HttpResponse),
    /// Not handled; the next error interceptor runs.
    Unhandled,
    /// Stop the chain and reject with this error.
    Abort(PayguardError),
    /// A reissue failed with a kind this interceptor does not handle. The
    /// remaining interceptors continue with `failure`, reissuing `request`.
    Handoff {
        failure: ClassifiedFailure,
        request: HttpRequest,
    },
}

/// Gets a chance to recover a failed call.
#[async_trait]
pub trait ErrorInterceptor: Send + Sync {
    fn name(&self) -> &str;

    async fn on_error(&self, error: &ClassifiedFailure, call: &CallContext) -> ErrorOutcome;
}

/// Sends a request through one transport instance and classifies failures.
#[derive(Clone)]
pub struct Reissuer {
    transport: Arc<dyn Transport>,
    detector: Arc<ErrorDetector>,
    reissues: Arc<AtomicU32>,
}

impl Reissuer {
    pub async fn send(
        &self,
        request: &HttpRequest,
    ) -> std::result::Result<HttpResponse, ClassifiedFailure> {
        self.reissues.fetch_add(1, Ordering::SeqCst);
        send_once(&self.transport, &self.detector, request).await
    }
}

/// State of one logical request after its first attempt failed.
///
/// Holds the transport instance that produced the failure so every reissue
/// reuses it.
pub struct CallContext {
    request_id: Uuid,
    request: HttpRequest,
    original: ClassifiedFailure,
    transport: Arc<dyn Transport>,
    detector: Arc<ErrorDetector>,
    cancel: CancellationToken,
    started_at: Instant,
    reissues: Arc<AtomicU32>,
}

impl fmt::Debug for CallContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallContext")
            .field("request_id", &self.request_id)
            .field("method", &self.request.method)
            .field("url", &self.request.url)
            .field("original", &self.original.kind())
            .field("attempts", &self.attempts())
            .finish()
    }
}

impl CallContext {
    pub fn new(
        transport: Arc<dyn Transport>,
        detector: Arc<ErrorDetector>,
        request: HttpRequest,
        original: ClassifiedFailure,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            request,
            original,
            transport,
            detector,
            cancel,
            started_at: Instant::now(),
            reissues: Arc::new(AtomicU32::new(0)),
        }
    }

    pub(crate) fn with_timing(mut self, request_id: Uuid, started_at: Instant) -> Self {
        self.request_id = request_id;
        self.started_at = started_at;
        self
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// The request to reissue: as sent after request interceptors, or as
    /// handed on by an earlier error interceptor.
    pub fn request(&self) -> &HttpRequest {
        &self.request
    }

    /// The failure of the first attempt.
    pub fn original(&self) -> &ClassifiedFailure {
        &self.original
    }

    /// Transport calls made so far, the first one included.
    pub fn attempts(&self) -> u32 {
        1 + self.reissues.load(Ordering::SeqCst)
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// A fresh retry context for this request.
    pub fn retry_context(&self) -> RetryContext {
        RetryContext::new(self.cancel.clone())
    }

    pub fn reissuer(&self) -> Reissuer {
        Reissuer {
            transport: self.transport.clone(),
            detector: self.detector.clone(),
            reissues: self.reissues.clone(),
        }
    }

    /// Map a specialized interceptor's retry outcome onto the chain.
    ///
    /// A failure outside what `owns` accepts is handed on rather than
    /// rejected; `request` is the last request reissued.
    pub fn conclude(
        &self,
        outcome: std::result::Result<HttpResponse, RetryError<ClassifiedFailure>>,
        owns: impl Fn(&ClassifiedError) -> bool,
        request: HttpRequest,
    ) -> ErrorOutcome {
        match outcome {
            Ok(response) => ErrorOutcome::Recovered(response),
            Err(RetryError::NotRetryable { last, .. }) if !owns(&last.classification) => {
                ErrorOutcome::Handoff {
                    failure: last,
                    request,
                }
            }
            Err(error) => ErrorOutcome::Abort(self.reject(error)),
        }
    }

    /// Turn a retry driver failure into the caller-facing error, with a
    /// diagnostic report attached.
    pub fn reject(&self, error: RetryError<ClassifiedFailure>) -> PayguardError {
        let attempts = error.attempts().max(self.attempts());
        let exhausted = error.is_exhausted();
        let Some(last) = error.into_last() else {
            return PayguardError::Cancelled { attempts };
        };
        if self.cancel.is_cancelled() {
            return PayguardError::Cancelled { attempts };
        }

        let report = DiagnosticReport::new(self, &last, attempts, exhausted);
        let mut structured = last.into_structured(Some(&self.request), attempts);
        if exhausted {
            structured = structured.exhausted(attempts);
        }
        structured.with_diagnostics(report).into()
    }
}

/// One transport call; non-2xx responses become classified failures.
pub async fn send_once(
    transport: &Arc<dyn Transport>,
    detector: &ErrorDetector,
    request: &HttpRequest,
) -> std::result::Result<HttpResponse, ClassifiedFailure> {
    let failure = match transport.send(request).await {
        Ok(response) if response.is_success() => return Ok(response),
        Ok(response) => Failure::Response(response),
        Err(error) => Failure::Transport(error),
    };
    Err(detector.classify_failure(failure))
}

/// Ordered request, response and error interceptor chains.
#[derive(Clone, Default)]
pub struct Pipeline {
    detector: Arc<ErrorDetector>,
    request: Vec<Arc<dyn RequestInterceptor>>,
    response: Vec<Arc<dyn ResponseInterceptor>>,
    error: Vec<Arc<dyn ErrorInterceptor>>,
    on_error: Option<ErrorHook>,
    on_recovery: Option<RecoveryHook>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let errors: Vec<&str> = self.error.iter().map(|i| i.name()).collect();
        f.debug_struct("Pipeline")
            .field("detector", &self.detector)
            .field("request", &self.request.len())
            .field("response", &self.response.len())
            .field("error", &errors)
            .field("on_error", &self.on_error.as_ref().map(|_| ".."))
            .field("on_recovery", &self.on_recovery.as_ref().map(|_| ".."))
            .finish()
    }
}

impl Pipeline {
    pub fn new(detector: ErrorDetector) -> Self {
        Self {
            detector: Arc::new(detector),
            ..Self::default()
        }
    }

    pub fn detector(&self) -> &ErrorDetector {
        &self.detector
    }

    pub fn add_request_interceptor(&mut self, interceptor: Arc<dyn RequestInterceptor>) {
        self.request.push(interceptor);
    }

    pub fn add_response_interceptor(&mut self, interceptor: Arc<dyn ResponseInterceptor>) {
        self.response.push(interceptor);
    }

    pub fn add_error_interceptor(&mut self, interceptor: Arc<dyn ErrorInterceptor>) {
        self.error.push(interceptor);
    }

    pub fn with_request_interceptor(mut self, interceptor: Arc<dyn RequestInterceptor>) -> Self {
        self.add_request_interceptor(interceptor);
        self
    }

    pub fn with_response_interceptor(mut self, interceptor: Arc<dyn ResponseInterceptor>) -> Self {
        self.add_response_interceptor(interceptor);
        self
    }

    pub fn with_error_interceptor(mut self, interceptor: Arc<dyn ErrorInterceptor>) -> Self {
        self.add_error_interceptor(interceptor);
        self
    }

    /// Invoke `hook` with every terminal structured error the pipeline returns.
    pub fn with_on_error(mut self, hook: ErrorHook) -> Self {
        self.on_error = Some(hook);
        self
    }

    /// Invoke `hook` whenever an error interceptor recovers a failed request.
    pub fn with_on_recovery(mut self, hook: RecoveryHook) -> Self {
        self.on_recovery = Some(hook);
        self
    }

    pub fn error_interceptor_names(&self) -> Vec<&str> {
        self.error.iter().map(|i| i.name()).collect()
    }

    /// Run a request through the chains using `transport` for every attempt.
    pub async fn execute(
        &self,
        transport: &Arc<dyn Transport>,
        request: HttpRequest,
        cancel: CancellationToken,
    ) -> Result<HttpResponse> {
        let request_id = Uuid::new_v4();
        let started_at = Instant::now();

        let mut request = request;
        for interceptor in &self.request {
            request = interceptor.on_request(request).await?;
        }

        if cancel.is_cancelled() {
            return Err(PayguardError::Cancelled { attempts: 0 });
        }

        tracing::debug!(
            request_id = %request_id,
            method = %request.method,
            url = %request.url,
            "Sending request"
        );

        let outcome = tokio::select! {
            _ = cancel.cancelled() => return Err(PayguardError::Cancelled { attempts: 1 }),
            outcome = send_once(transport, &self.detector, &request) => outcome,
        };

        let failure = match outcome {
            Ok(response) => return self.finish(response).await,
            Err(failure) => failure,
        };

        let mut call = CallContext::new(
            transport.clone(),
            self.detector.clone(),
            request,
            failure.clone(),
            cancel,
        )
        .with_timing(request_id, started_at);
        let mut failure = failure;

        for interceptor in &self.error {
            match interceptor.on_error(&failure, &call).await {
                ErrorOutcome::Recovered(response) => {
                    tracing::debug!(
                        request_id = %request_id,
                        interceptor = interceptor.name(),
                        attempts = call.attempts(),
                        "Recovered failed request"
                    );
                    self.recovered(&call);
                    return self.finish(response).await;
                }
                ErrorOutcome::Unhandled => continue,
                ErrorOutcome::Abort(error) => return Err(self.terminal(error)),
                ErrorOutcome::Handoff {
                    failure: next,
                    request,
                } => {
                    tracing::debug!(
                        request_id = %request_id,
                        interceptor = interceptor.name(),
                        kind = %next.kind(),
                        "Handing failure to the next interceptor"
                    );
                    call.request = request;
                    failure = next;
                }
            }
        }

        let error = call.reject(RetryError::NotRetryable {
            attempts: 1,
            last: failure,
        });
        tracing::error!(request_id = %request_id, error = %error, "Request failed");
        Err(self.terminal(error))
    }

    fn recovered(&self, call: &CallContext) {
        if let Some(hook) = &self.on_recovery {
            hook(&RecoveryEvent {
                request_id: call.request_id(),
                kind: call.original().kind(),
                attempts: call.attempts(),
                elapsed_ms: call.elapsed().as_millis() as u64,
            });
        }
    }

    fn terminal(&self, error: PayguardError) -> PayguardError {
        if let (Some(hook), Some(structured)) = (&self.on_error, error.structured()) {
            hook(structured);
        }
        error
    }

    async fn finish(&self, response: HttpResponse) -> Result<HttpResponse> {
        let mut response = response;
        for interceptor in &self.response {
            response = interceptor.on_response(response).await?;
        }
        Ok(response)
    }
}

/// Adds headers that are missing from the outgoing request.
#[derive(Debug, Clone)]
pub struct DefaultHeaders {
    headers: Vec<(HeaderName, HeaderValue)>,
}

impl Default for DefaultHeaders {
    fn default() -> Self {
        Self::new()
            .header("user-agent", SDK_USER_AGENT)
            .header("accept", "application/json")
    }
}

impl DefaultHeaders {
    pub fn new() -> Self {
        Self {
            headers: Vec::new(),
        }
    }

    /// Add a default header. Invalid names or values are skipped.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.push((name, value));
        }
        self
    }
}

#[async_trait]
impl RequestInterceptor for DefaultHeaders {
    async fn on_request(&self, mut request: HttpRequest) -> Result<HttpRequest> {
        for (name, value) in &self.headers {
            if !request.headers.contains_key(name) {
                request.headers.insert(name.clone(), value.clone());
            }
        }
        Ok(request)
    }
}

/// Sets a timeout budget on requests that carry none.
#[derive(Debug, Clone, Copy)]
pub struct DefaultTimeout(pub Duration);

#[async_trait]
impl RequestInterceptor for DefaultTimeout {
    async fn on_request(&self, mut request: HttpRequest) -> Result<HttpRequest> {
        if request.timeout.is_none() {
            request.timeout = Some(self.0);
        }
        Ok(request)
    }
}
