//! Structured errors carrying remediation metadata.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use super::snapshot::RequestSnapshot;
use super::taxonomy::{ChallengeType, ErrorCode, FailureKind, RecoverySuggestion};
use crate::detect::ClassifiedError;
use crate::handler::DiagnosticReport;

/// Rate-limit metadata extracted from response headers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitInfo {
    pub retry_after_seconds: Option<u64>,
    pub limit: Option<u64>,
    pub remaining: Option<u64>,
    pub reset_at: Option<DateTime<Utc>>,
}

/// Challenge sub-type and its fixed handling flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeInfo {
    pub challenge_type: ChallengeType,
    pub retryable: bool,
    pub requires_user_action: bool,
}

impl From<ChallengeType> for ChallengeInfo {
    fn from(challenge_type: ChallengeType) -> Self {
        let policy = challenge_type.policy();
        Self {
            challenge_type,
            retryable: policy.retryable,
            requires_user_action: policy.requires_user_action,
        }
    }
}

/// Kind-specific fields of a [`StructuredError`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ErrorVariant {
    General,
    RateLimit(RateLimitInfo),
    Challenge(ChallengeInfo),
    Validation {
        field_errors: BTreeMap<String, Vec<String>>,
    },
}

/// Retry guidance for rendering a precise caller-facing message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetryGuidance {
    pub kind: FailureKind,
    pub retryable: bool,
    pub recommended_action: RecoverySuggestion,
    pub attempts: u32,
    pub retry_after_seconds: Option<u64>,
    pub limit: Option<u64>,
    pub remaining: Option<u64>,
    pub reset_at: Option<DateTime<Utc>>,
}

/// Guidance specific to challenge failures.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChallengeGuidance {
    pub challenge_type: ChallengeType,
    pub retryable: bool,
    pub requires_user_action: bool,
    pub recommended_action: RecoverySuggestion,
    pub attempts: u32,
}

/// A terminal request failure with everything a caller needs to explain it.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct StructuredError {
    pub kind: FailureKind,
    pub code: ErrorCode,
    pub message: String,
    pub retryable: bool,
    pub details: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
    pub http_status: Option<u16>,
    pub request: Option<RequestSnapshot>,
    /// Total transport calls made for the logical request.
    pub attempts: u32,
    pub variant: ErrorVariant,
    pub diagnostics: Option<Box<DiagnosticReport>>,
    #[source]
    cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl StructuredError {
    /// Build a structured error from a classification.
    pub fn from_classification(classification: &ClassifiedError) -> Self {
        let kind = classification.kind();
        let http_status = classification.status();
        let variant = variant_for(classification);
        Self {
            kind,
            code: kind.code(),
            message: default_message(classification, http_status),
            retryable: classification.is_retryable(),
            details: classification.details().clone(),
            timestamp: Utc::now(),
            http_status,
            request: None,
            attempts: 1,
            variant,
            diagnostics: None,
            cause: None,
        }
    }

    pub fn with_request(mut self, request: RequestSnapshot) -> Self {
        self.request = Some(request);
        self
    }

    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn with_diagnostics(mut self, report: DiagnosticReport) -> Self {
        self.diagnostics = Some(Box::new(report));
        self
    }

    /// Mark the error as the result of an exhausted retry budget.
    pub fn exhausted(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self.message = format!(
            "Max retries reached after {attempts} attempts: {}",
            self.message
        );
        self.details
            .insert("maxRetriesReached".to_string(), Value::Bool(true));
        self
    }

    /// The wrapped original cause, if any.
    pub fn cause(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        self.cause.as_deref()
    }

    pub fn recovery_suggestion(&self) -> RecoverySuggestion {
        match &self.variant {
            ErrorVariant::Challenge(info) => info.challenge_type.recovery_suggestion(),
            _ => self.kind.recovery_suggestion(),
        }
    }

    pub fn rate_limit(&self) -> Option<&RateLimitInfo> {
        match &self.variant {
            ErrorVariant::RateLimit(info) => Some(info),
            _ => None,
        }
    }

    pub fn challenge(&self) -> Option<&ChallengeInfo> {
        match &self.variant {
            ErrorVariant::Challenge(info) => Some(info),
            _ => None,
        }
    }

    pub fn validation_errors(&self) -> Option<&BTreeMap<String, Vec<String>>> {
        match &self.variant {
            ErrorVariant::Validation { field_errors } => Some(field_errors),
            _ => None,
        }
    }

    pub fn retry_guidance(&self) -> RetryGuidance {
        let rate_limit = self.rate_limit().cloned().unwrap_or_default();
        RetryGuidance {
            kind: self.kind,
            retryable: self.retryable,
            recommended_action: self.recovery_suggestion(),
            attempts: self.attempts,
            retry_after_seconds: rate_limit.retry_after_seconds,
            limit: rate_limit.limit,
            remaining: rate_limit.remaining,
            reset_at: rate_limit.reset_at,
        }
    }

    pub fn challenge_guidance(&self) -> Option<ChallengeGuidance> {
        let info = self.challenge()?;
        Some(ChallengeGuidance {
            challenge_type: info.challenge_type,
            retryable: info.retryable,
            requires_user_action: info.requires_user_action,
            recommended_action: info.challenge_type.recovery_suggestion(),
            attempts: self.attempts,
        })
    }
}

fn variant_for(classification: &ClassifiedError) -> ErrorVariant {
    match classification.kind() {
        FailureKind::RateLimit => ErrorVariant::RateLimit(RateLimitInfo {
            retry_after_seconds: classification.retry_after_seconds(),
            limit: classification.detail_u64("limit"),
            remaining: classification.detail_u64("remaining"),
            reset_at: classification.reset_at(),
        }),
        FailureKind::Challenge => ErrorVariant::Challenge(
            classification
                .challenge_type()
                .unwrap_or(ChallengeType::Unknown)
                .into(),
        ),
        FailureKind::Validation => ErrorVariant::Validation {
            field_errors: classification.validation_errors(),
        },
        _ => ErrorVariant::General,
    }
}

fn default_message(classification: &ClassifiedError, status: Option<u16>) -> String {
    let base = match classification.kind() {
        FailureKind::Network => "Network error while contacting the payment API".to_string(),
        FailureKind::Timeout => "Request to the payment API timed out".to_string(),
        FailureKind::Challenge => match classification.challenge_type() {
            Some(challenge) => format!("Blocked by an intermediary challenge ({challenge})"),
            None => "Blocked by an intermediary challenge".to_string(),
        },
        FailureKind::RateLimit => match classification.retry_after_seconds() {
            Some(seconds) => format!("Rate limit exceeded, retry after {seconds}s"),
            None => "Rate limit exceeded".to_string(),
        },
        FailureKind::Auth => "Authentication with the payment API failed".to_string(),
        FailureKind::Validation => "The payment API rejected the request parameters".to_string(),
        FailureKind::Server => "The payment API returned a server error".to_string(),
        FailureKind::Client => "The payment API rejected the request".to_string(),
        FailureKind::Unknown => "Unexpected failure".to_string(),
    };

    let detail = classification.message();
    match (status, detail) {
        (Some(status), Some(detail)) => format!("{base} (HTTP {status}): {detail}"),
        (Some(status), None) => format!("{base} (HTTP {status})"),
        (None, Some(detail)) => format!("{base}: {detail}"),
        (None, None) => base,
    }
}
