//! Error handler orchestrator.
//!
//! The catch-all stage of the pipeline: every failure the specialized
//! interceptors leave alone ends up here. Fatal kinds are rejected at once;
//! everything else goes through the retry driver on the same transport.
//! Terminal failures carry a [`DiagnosticReport`].

pub mod report;

pub use report::DiagnosticReport;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

use crate::config::ResilienceOptions;
use crate::detect::{ClassifiedError, ClassifiedFailure};
use crate::error::{FailureKind, PayguardError, Result, StructuredError};
use crate::interceptor::{CallContext, ErrorInterceptor, ErrorOutcome};
use crate::retry::{RetryError, RetryPolicy};
use crate::transport::HttpResponse;

/// Invoked with every terminal structured error.
pub type ErrorHook = Arc<dyn Fn(&StructuredError) + Send + Sync>;

/// Invoked when a failed request eventually succeeds.
pub type RecoveryHook = Arc<dyn Fn(&RecoveryEvent) + Send + Sync>;

/// A failed request that recovered.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecoveryEvent {
    pub request_id: Uuid,
    /// Kind of the first failure.
    pub kind: FailureKind,
    /// Total calls made, including the successful one.
    pub attempts: u32,
    pub elapsed_ms: u64,
}

/// Fatal failures are never retried: auth, validation, and challenges that
/// need a human.
pub fn is_fatal(error: &ClassifiedError) -> bool {
    error.is_fatal()
}

#[derive(Clone)]
pub struct ErrorHandler {
    policy: RetryPolicy,
    on_error: Option<ErrorHook>,
    on_recovery: Option<RecoveryHook>,
}

impl fmt::Debug for ErrorHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorHandler")
            .field("policy", &self.policy)
            .field("on_error", &self.on_error.as_ref().map(|_| ".."))
            .field("on_recovery", &self.on_recovery.as_ref().map(|_| ".."))
            .finish()
    }
}

impl Default for ErrorHandler {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

impl ErrorHandler {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            on_error: None,
            on_recovery: None,
        }
    }

    pub fn from_options(options: &ResilienceOptions) -> Result<Self> {
        let mut config = options.config.backoff()?;
        if let Some(callback) = &options.on_retry {
            config = config.with_on_retry(callback.clone());
        }
        if let Some(predicate) = &options.retry_predicate {
            config = config.with_retry_predicate(predicate.clone());
        }
        Ok(Self {
            policy: RetryPolicy::new(config),
            on_error: options.on_error.clone(),
            on_recovery: options.on_recovery.clone(),
        })
    }

    pub fn with_on_error(mut self, hook: ErrorHook) -> Self {
        self.on_error = Some(hook);
        self
    }

    pub fn with_on_recovery(mut self, hook: RecoveryHook) -> Self {
        self.on_recovery = Some(hook);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Recover `failure` by retrying the call, or produce the terminal error.
    pub async fn handle(&self, failure: ClassifiedFailure, call: &CallContext) -> Result<HttpResponse> {
        if is_fatal(&failure.classification) {
            tracing::debug!(
                request_id = %call.request_id(),
                kind = %failure.kind(),
                "Fatal failure, not retrying"
            );
            return Err(self.terminal(
                RetryError::NotRetryable {
                    attempts: 1,
                    last: failure,
                },
                call,
            ));
        }

        let reissuer = call.reissuer();
        let request = call.request().clone();

        let outcome = self
            .policy
            .resume_with_retry(call.retry_context(), failure, |_ctx| {
                let reissuer = reissuer.clone();
                let request = request.clone();
                async move { reissuer.send(&request).await }
            })
            .await;

        match outcome {
            Ok(response) => {
                let event = RecoveryEvent {
                    request_id: call.request_id(),
                    kind: call.original().kind(),
                    attempts: call.attempts(),
                    elapsed_ms: call.elapsed().as_millis() as u64,
                };
                tracing::debug!(
                    request_id = %event.request_id,
                    kind = %event.kind,
                    attempts = event.attempts,
                    "Request recovered"
                );
                if let Some(hook) = &self.on_recovery {
                    hook(&event);
                }
                Ok(response)
            }
            Err(error) => Err(self.terminal(error, call)),
        }
    }

    fn terminal(&self, error: RetryError<ClassifiedFailure>, call: &CallContext) -> PayguardError {
        let error = call.reject(error);
        if let Some(structured) = error.structured() {
            match &structured.diagnostics {
                Some(report) => tracing::error!(
                    request_id = %report.request_id,
                    kind = %structured.kind,
                    status = ?structured.http_status,
                    attempts = structured.attempts,
                    report = %report.summary(),
                    "Request failed"
                ),
                None => tracing::error!(kind = %structured.kind, "Request failed"),
            }
            if let Some(hook) = &self.on_error {
                hook(structured);
            }
        }
        error
    }
}

#[async_trait]
impl ErrorInterceptor for ErrorHandler {
    fn name(&self) -> &str {
        "error_handler"
    }

    async fn on_error(&self, error: &ClassifiedFailure, call: &CallContext) -> ErrorOutcome {
        match self.handle(error.clone(), call).await {
            Ok(response) => ErrorOutcome::Recovered(response),
            Err(error) => ErrorOutcome::Abort(error),
        }
    }
}

/// Build the catch-all handler as a pipeline error interceptor.
pub fn error_interceptor(options: &ResilienceOptions) -> Result<Arc<dyn ErrorInterceptor>> {
    Ok(Arc::new(ErrorHandler::from_options(options)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_kinds() {
        let auth = ClassifiedError::new(FailureKind::Auth, false);
        let validation = ClassifiedError::new(FailureKind::Validation, false);
        let captcha = ClassifiedError::new(FailureKind::Challenge, false);
        let browser = ClassifiedError::new(FailureKind::Challenge, true);
        let server = ClassifiedError::new(FailureKind::Server, true);
        assert!(is_fatal(&auth));
        assert!(is_fatal(&validation));
        assert!(is_fatal(&captcha));
        assert!(!is_fatal(&browser));
        assert!(!is_fatal(&server));
    }

    #[test]
    fn options_carry_backoff_and_hooks() {
        let options = ResilienceOptions::default().with_on_error(Arc::new(|_: &StructuredError| {}));
        let handler = ErrorHandler::from_options(&options).unwrap();
        assert_eq!(handler.policy().config().max_retries(), 3);
        assert!(handler.on_error.is_some());
        assert!(handler.on_recovery.is_none());
    }
}
