//! Recovery from rate limiting.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::RateLimitSettings;
use crate::detect::{ClassifiedError, ClassifiedFailure};
use crate::error::{FailureKind, Result};
use crate::retry::{BackoffConfig, DelaySchedule, RetryCallback, RetryPolicy, RetryPredicate};

use super::{CallContext, ErrorInterceptor, ErrorOutcome};

/// Waits exactly as long as the server asks, within `[min_wait, max_wait]`.
#[derive(Debug, Clone, Copy)]
pub struct RetryAfterSchedule {
    pub default_wait: Duration,
    pub min_wait: Duration,
    pub max_wait: Duration,
}

impl DelaySchedule for RetryAfterSchedule {
    fn delay(&self, _attempt: u32, error: Option<&ClassifiedError>, _computed: Duration) -> Duration {
        match error.and_then(ClassifiedError::retry_after_seconds) {
            Some(seconds) => Duration::from_secs(seconds).clamp(self.min_wait, self.max_wait),
            None => self.default_wait,
        }
    }
}

/// Retries rate-limited calls after the server-advertised wait.
#[derive(Debug, Clone)]
pub struct RateLimitInterceptor {
    policy: RetryPolicy,
}

impl RateLimitInterceptor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn from_settings(settings: &RateLimitSettings, on_retry: Option<RetryCallback>) -> Result<Self> {
        let schedule = RetryAfterSchedule {
            default_wait: Duration::from_secs(settings.default_wait_secs),
            min_wait: Duration::from_secs(settings.min_wait_secs),
            max_wait: Duration::from_secs(settings.max_wait_secs),
        };
        let only_rate_limits: RetryPredicate =
            Arc::new(|error: &ClassifiedError, _: u32| owns(error) && error.is_retryable());
        let config = BackoffConfig::builder()
            .max_retries(settings.max_retries)
            .base_delay_ms(settings.default_wait_secs.max(1).saturating_mul(1_000))
            .max_delay_ms(settings.max_wait_secs.max(1).saturating_mul(1_000))
            .backoff_factor(1.0)
            .jitter_factor(0.0)
            .retry_predicate(only_rate_limits)
            .maybe_on_retry(on_retry)
            .build()?;
        Ok(Self::new(
            RetryPolicy::new(config).with_schedule(Arc::new(schedule)),
        ))
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

fn owns(error: &ClassifiedError) -> bool {
    error.kind() == FailureKind::RateLimit
}

#[async_trait]
impl ErrorInterceptor for RateLimitInterceptor {
    fn name(&self) -> &str {
        "rate_limit"
    }

    async fn on_error(&self, error: &ClassifiedFailure, call: &CallContext) -> ErrorOutcome {
        if !owns(&error.classification) {
            return ErrorOutcome::Unhandled;
        }

        let reissuer = call.reissuer();
        let request = call.request().clone();
        let outcome = self
            .policy
            .resume_with_retry(call.retry_context(), error.clone(), |_ctx| {
                let reissuer = reissuer.clone();
                let request = request.clone();
                async move { reissuer.send(&request).await }
            })
            .await;

        call.conclude(outcome, owns, request)
    }
}
