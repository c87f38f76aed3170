//! Diagnostic reports for terminal failures.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::detect::{ClassifiedError, ClassifiedFailure};
use crate::error::{RecoverySuggestion, RequestSnapshot, Result};
use crate::interceptor::CallContext;

/// What happened to a request that could not be recovered.
///
/// Carries no credentials: the request snapshot has sensitive headers masked
/// and the query string removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticReport {
    pub request_id: Uuid,
    pub generated_at: DateTime<Utc>,
    /// The failure of the first attempt.
    pub original_error: String,
    /// Classification of the last failure.
    pub classification: ClassifiedError,
    pub attempts: u32,
    pub exhausted: bool,
    pub elapsed_ms: u64,
    pub request: RequestSnapshot,
    pub recommended_action: RecoverySuggestion,
    pub guidance: String,
}

impl DiagnosticReport {
    pub fn new(call: &CallContext, last: &ClassifiedFailure, attempts: u32, exhausted: bool) -> Self {
        let classification = last.classification.clone();
        let recommended_action = match classification.challenge_type() {
            Some(challenge) => challenge.recovery_suggestion(),
            None => classification.kind().recovery_suggestion(),
        };
        Self {
            request_id: call.request_id(),
            generated_at: Utc::now(),
            original_error: call.original().to_string(),
            classification,
            attempts,
            exhausted,
            elapsed_ms: call.elapsed().as_millis() as u64,
            request: RequestSnapshot::from_request(call.request()),
            recommended_action,
            guidance: recommended_action.describe().to_string(),
        }
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// One-line summary for logs.
    pub fn summary(&self) -> String {
        format!(
            "{} {} failed with {} after {} attempt(s) in {}ms: {}",
            self.request.method,
            self.request.path,
            self.classification.kind(),
            self.attempts,
            self.elapsed_ms,
            self.guidance
        )
    }
}
