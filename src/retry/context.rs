//! Per-request retry state.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::detect::ClassifiedError;

/// Retry state of one logical request.
///
/// Created fresh for each request and threaded through the retry driver; it
/// is never stored on an interceptor, so unrelated requests never share
/// counters.
#[derive(Debug, Clone)]
pub struct RetryContext {
    pub(super) attempt: u32,
    pub(super) max_retries: u32,
    pub(super) previous_error: Option<ClassifiedError>,
    pub(super) next_delay: Option<Duration>,
    cancel: CancellationToken,
}

impl Default for RetryContext {
    fn default() -> Self {
        Self::new(CancellationToken::new())
    }
}

impl RetryContext {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            attempt: 0,
            max_retries: 0,
            previous_error: None,
            next_delay: None,
            cancel,
        }
    }

    /// 0 for the initial call, `n` for the n-th retry.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn is_retry(&self) -> bool {
        self.attempt > 0
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn previous_error(&self) -> Option<&ClassifiedError> {
        self.previous_error.as_ref()
    }

    /// Delay waited before the current attempt.
    pub fn next_delay(&self) -> Option<Duration> {
        self.next_delay
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
