//! Last-observed rate-limit state.

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::detect::headers;
use crate::transport::HttpResponse;

/// Rate-limit headers from the most recent response that carried any.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitSnapshot {
    pub limit: Option<u64>,
    pub remaining: Option<u64>,
    pub reset_at: Option<DateTime<Utc>>,
    pub observed_at: DateTime<Utc>,
}

impl RateLimitSnapshot {
    /// Read rate-limit headers; `None` when the response has none.
    pub fn from_response(response: &HttpResponse, now: DateTime<Utc>) -> Option<Self> {
        let limit = headers::rate_limit_limit(&response.headers);
        let remaining = headers::rate_limit_remaining(&response.headers);
        let reset_at = headers::rate_limit_reset(&response.headers, now);
        if limit.is_none() && remaining.is_none() && reset_at.is_none() {
            return None;
        }
        Some(Self {
            limit,
            remaining,
            reset_at,
            observed_at: now,
        })
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining == Some(0)
    }
}

/// Shared, last-writer-wins holder of the latest snapshot.
#[derive(Debug, Clone, Default)]
pub struct RateLimitTracker {
    latest: Arc<RwLock<Option<RateLimitSnapshot>>>,
}

impl RateLimitTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&self, response: &HttpResponse) {
        let Some(snapshot) = RateLimitSnapshot::from_response(response, Utc::now()) else {
            return;
        };
        let mut latest = self
            .latest
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *latest = Some(snapshot);
    }

    pub fn snapshot(&self) -> Option<RateLimitSnapshot> {
        self.latest
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn responses_without_headers_keep_previous_snapshot() {
        let tracker = RateLimitTracker::new();
        tracker.observe(
            &HttpResponse::new(200, "{}")
                .with_header("x-ratelimit-limit", "100")
                .with_header("x-ratelimit-remaining", "42"),
        );
        tracker.observe(&HttpResponse::new(200, "{}"));

        let snapshot = tracker.snapshot().unwrap();
        assert_eq!(snapshot.limit, Some(100));
        assert_eq!(snapshot.remaining, Some(42));
        assert!(!snapshot.is_exhausted());
    }

    #[test]
    fn latest_writer_wins() {
        let tracker = RateLimitTracker::new();
        tracker.observe(&HttpResponse::new(200, "{}").with_header("x-ratelimit-remaining", "5"));
        tracker.observe(&HttpResponse::new(429, "{}").with_header("x-ratelimit-remaining", "0"));
        assert!(tracker.snapshot().unwrap().is_exhausted());
    }
}
