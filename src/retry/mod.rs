//! Retry with exponential backoff and jitter.

pub mod context;

pub use context::RetryContext;

use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bon::bon;
use rand::Rng;
use serde::Serialize;
use thiserror::Error;

use crate::detect::{ClassifiedError, ClassifiedFailure};
use crate::error::{FailureKind, PayguardError, Result};

/// Status codes retried by default.
pub const DEFAULT_RETRYABLE_STATUS_CODES: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// Custom retry predicate: `(error, retries_so_far) -> retry?`.
pub type RetryPredicate = Arc<dyn Fn(&ClassifiedError, u32) -> bool + Send + Sync>;

/// Callback invoked before each retry sleep.
pub type RetryCallback = Arc<dyn Fn(&RetryEvent) + Send + Sync>;

/// Emitted before sleeping ahead of a retry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetryEvent {
    /// 1-based number of the retry about to happen.
    pub retry_count: u32,
    pub max_retries: u32,
    pub delay_ms: u64,
    pub kind: FailureKind,
    pub status: Option<u16>,
}

/// Backoff configuration. Validated on construction.
#[derive(Clone)]
pub struct BackoffConfig {
    max_retries: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
    backoff_factor: f64,
    jitter_factor: f64,
    retryable_status_codes: BTreeSet<u16>,
    retry_predicate: Option<RetryPredicate>,
    on_retry: Option<RetryCallback>,
}

impl fmt::Debug for BackoffConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackoffConfig")
            .field("max_retries", &self.max_retries)
            .field("base_delay_ms", &self.base_delay_ms)
            .field("max_delay_ms", &self.max_delay_ms)
            .field("backoff_factor", &self.backoff_factor)
            .field("jitter_factor", &self.jitter_factor)
            .field("retryable_status_codes", &self.retryable_status_codes)
            .field("retry_predicate", &self.retry_predicate.as_ref().map(|_| ".."))
            .field("on_retry", &self.on_retry.as_ref().map(|_| ".."))
            .finish()
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            backoff_factor: 2.0,
            jitter_factor: 0.1,
            retryable_status_codes: DEFAULT_RETRYABLE_STATUS_CODES.into_iter().collect(),
            retry_predicate: None,
            on_retry: None,
        }
    }
}

#[bon]
impl BackoffConfig {
    /// Build a validated configuration.
    ///
    /// ```
    /// use payguard::retry::BackoffConfig;
    ///
    /// let config = BackoffConfig::builder()
    ///     .max_retries(5)
    ///     .base_delay_ms(250)
    ///     .jitter_factor(0.0)
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(config.max_retries(), 5);
    /// ```
    #[builder]
    pub fn new(
        #[builder(default = 3)] max_retries: u32,
        #[builder(default = 1_000)] base_delay_ms: u64,
        #[builder(default = 30_000)] max_delay_ms: u64,
        #[builder(default = 2.0)] backoff_factor: f64,
        #[builder(default = 0.1)] jitter_factor: f64,
        #[builder(default = DEFAULT_RETRYABLE_STATUS_CODES.into_iter().collect())]
        retryable_status_codes: BTreeSet<u16>,
        retry_predicate: Option<RetryPredicate>,
        on_retry: Option<RetryCallback>,
    ) -> Result<Self> {
        let config = Self {
            max_retries,
            base_delay_ms,
            max_delay_ms,
            backoff_factor,
            jitter_factor,
            retryable_status_codes,
            retry_predicate,
            on_retry,
        };
        config.validate()?;
        Ok(config)
    }
}

impl BackoffConfig {
    pub fn validate(&self) -> Result<()> {
        if self.base_delay_ms == 0 {
            return Err(PayguardError::Configuration(
                "base_delay_ms must be greater than 0".to_string(),
            ));
        }
        if self.max_delay_ms == 0 {
            return Err(PayguardError::Configuration(
                "max_delay_ms must be greater than 0".to_string(),
            ));
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor <= 0.0 {
            return Err(PayguardError::Configuration(format!(
                "backoff_factor must be a positive number, got {}",
                self.backoff_factor
            )));
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(PayguardError::Configuration(format!(
                "jitter_factor must be within [0, 1], got {}",
                self.jitter_factor
            )));
        }
        Ok(())
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn base_delay_ms(&self) -> u64 {
        self.base_delay_ms
    }

    pub fn max_delay_ms(&self) -> u64 {
        self.max_delay_ms
    }

    pub fn backoff_factor(&self) -> f64 {
        self.backoff_factor
    }

    pub fn jitter_factor(&self) -> f64 {
        self.jitter_factor
    }

    pub fn retryable_status_codes(&self) -> &BTreeSet<u16> {
        &self.retryable_status_codes
    }

    /// Replace the pre-retry callback.
    pub fn with_on_retry(mut self, callback: RetryCallback) -> Self {
        self.on_retry = Some(callback);
        self
    }

    /// Replace the custom retry predicate.
    pub fn with_retry_predicate(mut self, predicate: RetryPredicate) -> Self {
        self.retry_predicate = Some(predicate);
        self
    }
}

/// Replaces the computed (pre-jitter) delay for an attempt.
pub trait DelaySchedule: Send + Sync {
    fn delay(&self, attempt: u32, error: Option<&ClassifiedError>, computed: Duration) -> Duration;
}

/// Errors the retry driver can classify.
pub trait Classified {
    fn classification(&self) -> &ClassifiedError;
}

impl Classified for ClassifiedError {
    fn classification(&self) -> &ClassifiedError {
        self
    }
}

impl Classified for ClassifiedFailure {
    fn classification(&self) -> &ClassifiedError {
        &self.classification
    }
}

/// Why the retry driver gave up. The last error is kept unmodified.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    #[error("max retries reached after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },

    #[error("non-retryable failure after {attempts} attempt(s): {last}")]
    NotRetryable { attempts: u32, last: E },

    #[error("cancelled after {attempts} attempt(s)")]
    Cancelled { attempts: u32, last: Option<E> },
}

impl<E> RetryError<E> {
    /// Total operation calls made.
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Exhausted { attempts, .. }
            | Self::NotRetryable { attempts, .. }
            | Self::Cancelled { attempts, .. } => *attempts,
        }
    }

    pub fn last(&self) -> Option<&E> {
        match self {
            Self::Exhausted { last, .. } | Self::NotRetryable { last, .. } => Some(last),
            Self::Cancelled { last, .. } => last.as_ref(),
        }
    }

    pub fn into_last(self) -> Option<E> {
        match self {
            Self::Exhausted { last, .. } | Self::NotRetryable { last, .. } => Some(last),
            Self::Cancelled { last, .. } => last,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// Backoff policy: delay computation, eligibility and the retry driver.
#[derive(Clone)]
pub struct RetryPolicy {
    config: BackoffConfig,
    schedule: Option<Arc<dyn DelaySchedule>>,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("config", &self.config)
            .field("schedule", &self.schedule.as_ref().map(|_| ".."))
            .finish()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(BackoffConfig::default())
    }
}

impl RetryPolicy {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            schedule: None,
        }
    }

    pub fn with_schedule(mut self, schedule: Arc<dyn DelaySchedule>) -> Self {
        self.schedule = Some(schedule);
        self
    }

    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }

    /// Delay before the 1-based `attempt`, including jitter.
    pub fn compute_delay(&self, attempt: u32, error: Option<&ClassifiedError>) -> Duration {
        let unit = if self.config.jitter_factor > 0.0 {
            rand::thread_rng().gen_range(-1.0..=1.0)
        } else {
            0.0
        };
        self.compute_delay_with(attempt, error, unit)
    }

    /// Delay with an explicit jitter sample `unit` in `[-1, 1]`.
    pub fn compute_delay_with(
        &self,
        attempt: u32,
        error: Option<&ClassifiedError>,
        unit: f64,
    ) -> Duration {
        let max = self.config.max_delay_ms as f64;
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let mut delay =
            (self.config.base_delay_ms as f64 * self.config.backoff_factor.powi(exponent)).min(max);

        if let Some(seconds) = error.and_then(ClassifiedError::retry_after_seconds) {
            delay = delay.max(seconds as f64 * 1_000.0);
        }

        if let Some(schedule) = &self.schedule {
            let computed = Duration::from_millis(delay.max(0.0) as u64);
            delay = schedule.delay(attempt, error, computed).as_millis() as f64;
        }

        let jitter = unit.clamp(-1.0, 1.0) * delay * self.config.jitter_factor;
        let delay = (delay + jitter).clamp(0.0, max);
        Duration::from_millis(delay.round() as u64)
    }

    /// Whether the error qualifies for a retry, ignoring the retry budget.
    ///
    /// Fatal failures are never eligible, whatever the custom predicate says.
    pub fn is_eligible(&self, error: &ClassifiedError, retries_so_far: u32) -> bool {
        if error.is_fatal() {
            return false;
        }
        if let Some(predicate) = &self.config.retry_predicate {
            return predicate(error, retries_so_far);
        }
        match error.kind() {
            FailureKind::Challenge | FailureKind::RateLimit => error.is_retryable(),
            kind if kind.is_transport_level() && !error.has_response() => true,
            _ => error
                .status()
                .map(|status| self.config.retryable_status_codes.contains(&status))
                .unwrap_or(false),
        }
    }

    pub fn should_retry(&self, error: &ClassifiedError, retries_so_far: u32) -> bool {
        retries_so_far < self.config.max_retries && self.is_eligible(error, retries_so_far)
    }

    /// Run `operation` until it succeeds, fails permanently, exhausts the
    /// retry budget, or the context is cancelled.
    pub async fn run_with_retry<T, E, F, Fut>(
        &self,
        context: RetryContext,
        operation: F,
    ) -> std::result::Result<T, RetryError<E>>
    where
        E: Classified,
        F: FnMut(RetryContext) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        self.drive(context, None, 0, operation).await
    }

    /// Continue after an initial call that already failed with `first_error`.
    pub async fn resume_with_retry<T, E, F, Fut>(
        &self,
        context: RetryContext,
        first_error: E,
        operation: F,
    ) -> std::result::Result<T, RetryError<E>>
    where
        E: Classified,
        F: FnMut(RetryContext) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        self.drive(context, Some(first_error), 1, operation).await
    }

    async fn drive<T, E, F, Fut>(
        &self,
        mut ctx: RetryContext,
        mut last: Option<E>,
        mut calls: u32,
        mut operation: F,
    ) -> std::result::Result<T, RetryError<E>>
    where
        E: Classified,
        F: FnMut(RetryContext) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        ctx.max_retries = self.config.max_retries;

        loop {
            if let Some(error) = last.take() {
                let classification = error.classification().clone();

                if !self.is_eligible(&classification, ctx.attempt) {
                    return Err(RetryError::NotRetryable {
                        attempts: calls,
                        last: error,
                    });
                }
                if ctx.attempt >= self.config.max_retries {
                    return Err(RetryError::Exhausted {
                        attempts: calls,
                        last: error,
                    });
                }
                if ctx.is_cancelled() {
                    return Err(RetryError::Cancelled {
                        attempts: calls,
                        last: Some(error),
                    });
                }

                let next_attempt = ctx.attempt + 1;
                let delay = self.compute_delay(next_attempt, Some(&classification));

                tracing::warn!(
                    attempt = next_attempt,
                    max_retries = self.config.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    kind = %classification.kind(),
                    status = ?classification.status(),
                    "Retrying after failure"
                );

                if let Some(callback) = &self.config.on_retry {
                    callback(&RetryEvent {
                        retry_count: next_attempt,
                        max_retries: self.config.max_retries,
                        delay_ms: delay.as_millis() as u64,
                        kind: classification.kind(),
                        status: classification.status(),
                    });
                }

                let cancel = ctx.cancellation().clone();
                tokio::select! {
                    _ = cancel.cancelled() => {
                        return Err(RetryError::Cancelled {
                            attempts: calls,
                            last: Some(error),
                        });
                    }
                    _ = tokio::time::sleep(delay) => {}
                }

                if ctx.is_cancelled() {
                    return Err(RetryError::Cancelled {
                        attempts: calls,
                        last: Some(error),
                    });
                }

                ctx.attempt = next_attempt;
                ctx.previous_error = Some(classification);
                ctx.next_delay = Some(delay);
            } else if ctx.is_cancelled() {
                return Err(RetryError::Cancelled {
                    attempts: calls,
                    last: None,
                });
            }

            calls += 1;
            match operation(ctx.clone()).await {
                Ok(value) => {
                    if ctx.is_retry() {
                        tracing::debug!(attempt = ctx.attempt, "Recovered after retry");
                    }
                    return Ok(value);
                }
                Err(error) => last = Some(error),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter(max_retries: u32, base: u64, max: u64) -> RetryPolicy {
        RetryPolicy::new(
            BackoffConfig::builder()
                .max_retries(max_retries)
                .base_delay_ms(base)
                .max_delay_ms(max)
                .jitter_factor(0.0)
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn builder_rejects_invalid_values() {
        assert!(BackoffConfig::builder().base_delay_ms(0).build().is_err());
        assert!(BackoffConfig::builder().max_delay_ms(0).build().is_err());
        assert!(BackoffConfig::builder().backoff_factor(0.0).build().is_err());
        assert!(BackoffConfig::builder().backoff_factor(f64::NAN).build().is_err());
        assert!(BackoffConfig::builder().jitter_factor(1.5).build().is_err());
        assert!(BackoffConfig::builder().jitter_factor(-0.1).build().is_err());
        assert!(BackoffConfig::builder().max_retries(0).build().is_ok());
    }

    #[test]
    fn exponential_growth_is_capped() {
        let policy = no_jitter(10, 100, 1_000);
        let delays: Vec<u64> = (1..=6)
            .map(|attempt| policy.compute_delay(attempt, None).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1_000, 1_000]);
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = RetryPolicy::new(
            BackoffConfig::builder()
                .base_delay_ms(1_000)
                .max_delay_ms(1_100)
                .jitter_factor(0.5)
                .build()
                .unwrap(),
        );
        assert_eq!(policy.compute_delay_with(1, None, -1.0), Duration::from_millis(500));
        assert_eq!(policy.compute_delay_with(1, None, 1.0), Duration::from_millis(1_100));
        for _ in 0..100 {
            let delay = policy.compute_delay(1, None);
            assert!(delay >= Duration::from_millis(500));
            assert!(delay <= Duration::from_millis(1_100));
        }
    }

    #[test]
    fn challenge_eligibility_follows_classification() {
        let policy = no_jitter(3, 100, 1_000);
        let browser = ClassifiedError::new(FailureKind::Challenge, true).with_detail("status", 503);
        let captcha = ClassifiedError::new(FailureKind::Challenge, false).with_detail("status", 503);
        assert!(policy.should_retry(&browser, 0));
        assert!(!policy.should_retry(&captcha, 0));
    }

    #[test]
    fn predicate_overrides_builtin_rules() {
        let predicate: RetryPredicate = Arc::new(|error: &ClassifiedError, _: u32| {
            error.status() == Some(409)
        });
        let policy = RetryPolicy::new(
            BackoffConfig::builder()
                .retry_predicate(predicate)
                .build()
                .unwrap(),
        );
        let conflict = ClassifiedError::new(FailureKind::Client, false).with_detail("status", 409);
        let server = ClassifiedError::new(FailureKind::Server, true).with_detail("status", 500);
        assert!(policy.should_retry(&conflict, 0));
        assert!(!policy.should_retry(&server, 0));
        assert!(!policy.should_retry(&conflict, 3));
    }

    #[test]
    fn predicate_never_makes_fatal_failures_eligible() {
        let always: RetryPredicate = Arc::new(|_: &ClassifiedError, _: u32| true);
        let policy = RetryPolicy::new(
            BackoffConfig::builder()
                .retry_predicate(always)
                .build()
                .unwrap(),
        );
        let auth = ClassifiedError::new(FailureKind::Auth, false).with_detail("status", 401);
        let validation = ClassifiedError::new(FailureKind::Validation, false).with_detail("status", 422);
        let captcha = ClassifiedError::new(FailureKind::Challenge, false).with_detail("status", 403);
        for retries in 0..3 {
            assert!(!policy.is_eligible(&auth, retries));
            assert!(!policy.is_eligible(&validation, retries));
            assert!(!policy.is_eligible(&captcha, retries));
        }
    }
}
