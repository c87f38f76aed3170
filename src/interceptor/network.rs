//! Recovery from connection-level failures.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::NetworkSettings;
use crate::detect::{ClassifiedError, ClassifiedFailure};
use crate::error::{FailureKind, Result};
use crate::retry::{BackoffConfig, RetryCallback, RetryPolicy, RetryPredicate};

use super::{CallContext, ErrorInterceptor, ErrorOutcome};

/// Retries network and timeout failures where no response arrived.
///
/// After each timeout the per-attempt timeout budget grows by
/// `timeout_multiplier`; the budget lives in the call, not the interceptor.
#[derive(Debug, Clone)]
pub struct NetworkInterceptor {
    policy: RetryPolicy,
    default_timeout: Duration,
    timeout_multiplier: f64,
}

impl NetworkInterceptor {
    pub fn new(policy: RetryPolicy, default_timeout: Duration, timeout_multiplier: f64) -> Self {
        Self {
            policy,
            default_timeout,
            timeout_multiplier,
        }
    }

    pub fn from_settings(
        settings: &NetworkSettings,
        default_timeout: Duration,
        on_retry: Option<RetryCallback>,
    ) -> Result<Self> {
        let connection_level: RetryPredicate = Arc::new(|error: &ClassifiedError, _: u32| owns(error));
        let config = BackoffConfig::builder()
            .max_retries(settings.max_retries)
            .base_delay_ms(settings.base_delay_ms)
            .max_delay_ms(settings.max_delay_ms)
            .backoff_factor(settings.backoff_factor)
            .jitter_factor(settings.jitter_factor)
            .retry_predicate(connection_level)
            .maybe_on_retry(on_retry)
            .build()?;
        Ok(Self::new(
            RetryPolicy::new(config),
            default_timeout,
            settings.timeout_multiplier,
        ))
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

/// Connection-level failures with no response. Anything else met while
/// retrying is handed on.
fn owns(error: &ClassifiedError) -> bool {
    error.kind().is_transport_level() && !error.has_response()
}

#[async_trait]
impl ErrorInterceptor for NetworkInterceptor {
    fn name(&self) -> &str {
        "network"
    }

    async fn on_error(&self, error: &ClassifiedFailure, call: &CallContext) -> ErrorOutcome {
        if !owns(&error.classification) {
            return ErrorOutcome::Unhandled;
        }

        let reissuer = call.reissuer();
        let base = call.request().clone();
        let multiplier = self.timeout_multiplier;
        let mut budget = base.timeout.unwrap_or(self.default_timeout);

        let outcome = self
            .policy
            .resume_with_retry(call.retry_context(), error.clone(), |ctx| {
                if ctx.previous_error().map(|e| e.kind()) == Some(FailureKind::Timeout) {
                    budget = budget.mul_f64(multiplier);
                }
                let mut request = base.clone();
                request.timeout = Some(budget);
                let reissuer = reissuer.clone();
                async move { reissuer.send(&request).await }
            })
            .await;

        let mut last = base;
        last.timeout = Some(budget);
        call.conclude(outcome, owns, last)
    }
}
