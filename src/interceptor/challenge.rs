//! Recovery from intermediary challenge pages.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::ChallengeSettings;
use crate::detect::{ClassifiedError, ClassifiedFailure};
use crate::error::{FailureKind, Result};
use crate::retry::{BackoffConfig, RetryCallback, RetryError, RetryPolicy, RetryPredicate};

use super::mutator::{BrowserProfile, RequestMutator};
use super::{CallContext, ErrorInterceptor, ErrorOutcome};

/// Retries automatically passable challenges with a mutated request.
///
/// Challenges that need a human (captcha, IP block) abort at once with
/// challenge guidance. A mid-sequence escalation to such a challenge stops
/// the retries the same way; any other failure met while retrying is handed
/// on to the next interceptor.
#[derive(Clone)]
pub struct ChallengeInterceptor {
    policy: RetryPolicy,
    mutator: Option<Arc<dyn RequestMutator>>,
}

impl std::fmt::Debug for ChallengeInterceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChallengeInterceptor")
            .field("policy", &self.policy)
            .field("mutator", &self.mutator.as_ref().map(|_| ".."))
            .finish()
    }
}

impl ChallengeInterceptor {
    pub fn new(policy: RetryPolicy, mutator: Option<Arc<dyn RequestMutator>>) -> Self {
        Self { policy, mutator }
    }

    /// Build from settings. `mutator` overrides the built-in browser profile.
    pub fn from_settings(
        settings: &ChallengeSettings,
        mutator: Option<Arc<dyn RequestMutator>>,
        on_retry: Option<RetryCallback>,
    ) -> Result<Self> {
        let passable: RetryPredicate =
            Arc::new(|error: &ClassifiedError, _: u32| owns(error) && error.is_retryable());
        let config = BackoffConfig::builder()
            .max_retries(settings.max_retries)
            .base_delay_ms(settings.base_delay_ms)
            .max_delay_ms(settings.max_delay_ms)
            .backoff_factor(settings.backoff_factor)
            .jitter_factor(settings.jitter_factor)
            .retry_predicate(passable)
            .maybe_on_retry(on_retry)
            .build()?;

        let mutator = match mutator {
            Some(mutator) => Some(mutator),
            None if settings.rotate_user_agent => Some(
                Arc::new(BrowserProfile::new(settings.user_agents.clone())) as Arc<dyn RequestMutator>,
            ),
            None => None,
        };
        Ok(Self::new(RetryPolicy::new(config), mutator))
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

fn owns(error: &ClassifiedError) -> bool {
    error.kind() == FailureKind::Challenge
}

#[async_trait]
impl ErrorInterceptor for ChallengeInterceptor {
    fn name(&self) -> &str {
        "challenge"
    }

    async fn on_error(&self, error: &ClassifiedFailure, call: &CallContext) -> ErrorOutcome {
        if !owns(&error.classification) {
            return ErrorOutcome::Unhandled;
        }

        if !error.classification.is_retryable() {
            tracing::warn!(
                request_id = %call.request_id(),
                challenge_type = ?error.classification.challenge_type(),
                "Challenge requires user action"
            );
            return ErrorOutcome::Abort(call.reject(RetryError::NotRetryable {
                attempts: 1,
                last: error.clone(),
            }));
        }

        let reissuer = call.reissuer();
        let mutator = self.mutator.clone();
        // Mutations accumulate so a rotated User-Agent is never reused next time.
        let mut current = call.request().clone();

        let outcome = self
            .policy
            .resume_with_retry(call.retry_context(), error.clone(), |ctx| {
                if let Some(mutator) = &mutator {
                    mutator.mutate(&mut current, &ctx);
                }
                let request = current.clone();
                let reissuer = reissuer.clone();
                async move { reissuer.send(&request).await }
            })
            .await;

        call.conclude(outcome, owns, current)
    }
}
