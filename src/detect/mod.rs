//! Failure classification.
//!
//! [`ErrorDetector::classify`] maps every failure to exactly one
//! [`FailureKind`] plus retry metadata. Classification is pure: the same
//! failure (and clock) always yields the same [`ClassifiedError`].

pub mod challenge;
pub mod headers;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ChallengeType, FailureKind, RequestSnapshot, StructuredError};
use crate::transport::{HttpRequest, HttpResponse, TransportError, TransportErrorKind};

/// Error codes that indicate a timed-out or aborted connection.
pub const TIMEOUT_CODES: [&str; 3] = ["ETIMEDOUT", "ECONNABORTED", "ESOCKETTIMEDOUT"];

const RATE_LIMIT_MARKERS: [&str; 3] = ["rate limit", "rate_limit", "too many requests"];

/// A raw failure as observed by the pipeline.
#[derive(Debug, Clone)]
pub enum Failure {
    /// No response was received.
    Transport(TransportError),
    /// A response with a non-2xx status.
    Response(HttpResponse),
    /// A failure with no recognizable shape.
    Other(String),
}

impl Failure {
    pub fn response(&self) -> Option<&HttpResponse> {
        match self {
            Self::Response(response) => Some(response),
            _ => None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        self.response().map(|r| r.status)
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(error) => write!(f, "transport error: {error}"),
            Self::Response(response) => write!(f, "HTTP {}", response.status),
            Self::Other(message) => write!(f, "{message}"),
        }
    }
}

/// Result of classifying one failure. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedError {
    kind: FailureKind,
    retryable: bool,
    details: Map<String, Value>,
}

impl ClassifiedError {
    pub fn new(kind: FailureKind, retryable: bool) -> Self {
        Self {
            kind,
            retryable,
            details: Map::new(),
        }
    }

    /// Attach a detail while building the classification.
    pub fn with_detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }

    pub fn kind(&self) -> FailureKind {
        self.kind
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    /// Never retried: auth, validation, and challenges that need a human.
    pub fn is_fatal(&self) -> bool {
        self.kind.is_fatal() || (self.kind == FailureKind::Challenge && !self.retryable)
    }

    pub fn details(&self) -> &Map<String, Value> {
        &self.details
    }

    pub fn detail(&self, key: &str) -> Option<&Value> {
        self.details.get(key)
    }

    pub fn detail_u64(&self, key: &str) -> Option<u64> {
        self.details.get(key).and_then(Value::as_u64)
    }

    pub fn detail_str(&self, key: &str) -> Option<&str> {
        self.details.get(key).and_then(Value::as_str)
    }

    /// HTTP status, when a response was received.
    pub fn status(&self) -> Option<u16> {
        self.detail_u64("status").and_then(|s| u16::try_from(s).ok())
    }

    pub fn has_response(&self) -> bool {
        self.status().is_some()
    }

    pub fn message(&self) -> Option<&str> {
        self.detail_str("message")
    }

    pub fn code(&self) -> Option<&str> {
        self.detail_str("code")
    }

    pub fn retry_after_seconds(&self) -> Option<u64> {
        self.detail_u64("retryAfterSeconds")
    }

    pub fn reset_at(&self) -> Option<DateTime<Utc>> {
        self.detail_str("resetAt")
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }

    pub fn challenge_type(&self) -> Option<ChallengeType> {
        self.detail_str("challengeType")
            .and_then(|raw| ChallengeType::from_str(raw).ok())
    }

    /// Field-level validation errors, normalized to lists of messages.
    pub fn validation_errors(&self) -> BTreeMap<String, Vec<String>> {
        let Some(Value::Object(fields)) = self.details.get("validationErrors") else {
            return BTreeMap::new();
        };
        fields
            .iter()
            .map(|(field, messages)| {
                let messages = match messages {
                    Value::Array(items) => items
                        .iter()
                        .map(|item| match item {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        })
                        .collect(),
                    Value::String(s) => vec![s.clone()],
                    other => vec![other.to_string()],
                };
                (field.clone(), messages)
            })
            .collect()
    }
}

/// A failure together with its classification.
#[derive(Debug, Clone)]
pub struct ClassifiedFailure {
    pub failure: Failure,
    pub classification: ClassifiedError,
}

impl ClassifiedFailure {
    pub fn kind(&self) -> FailureKind {
        self.classification.kind()
    }

    /// Convert into a structured error for the caller.
    pub fn into_structured(self, request: Option<&HttpRequest>, attempts: u32) -> StructuredError {
        let mut error =
            StructuredError::from_classification(&self.classification).with_attempts(attempts);
        if let Some(request) = request {
            error = error.with_request(RequestSnapshot::from_request(request));
        }
        if let Failure::Transport(cause) = self.failure {
            error = error.with_cause(cause);
        }
        error
    }
}

impl fmt::Display for ClassifiedFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.failure, self.classification.kind())
    }
}

/// A caller-supplied classifier consulted before the built-in rules.
pub trait CustomDetector: Send + Sync {
    fn detect(&self, failure: &Failure) -> Option<ClassifiedError>;
}

impl<F> CustomDetector for F
where
    F: Fn(&Failure) -> Option<ClassifiedError> + Send + Sync,
{
    fn detect(&self, failure: &Failure) -> Option<ClassifiedError> {
        self(failure)
    }
}

/// Classifies raw failures into [`ClassifiedError`]s.
#[derive(Clone, Default)]
pub struct ErrorDetector {
    custom: Vec<(String, Arc<dyn CustomDetector>)>,
}

impl fmt::Debug for ErrorDetector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.custom.iter().map(|(name, _)| name.as_str()).collect();
        f.debug_struct("ErrorDetector")
            .field("custom", &names)
            .finish()
    }
}

impl ErrorDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a named custom detector. A detector with the same name is replaced.
    pub fn with_detector(mut self, name: impl Into<String>, detector: Arc<dyn CustomDetector>) -> Self {
        self.register(name, detector);
        self
    }

    pub fn register(&mut self, name: impl Into<String>, detector: Arc<dyn CustomDetector>) {
        let name = name.into();
        match self.custom.iter_mut().find(|(existing, _)| *existing == name) {
            Some(slot) => slot.1 = detector,
            None => self.custom.push((name, detector)),
        }
    }

    pub fn detector_names(&self) -> Vec<&str> {
        self.custom.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn classify(&self, failure: &Failure) -> ClassifiedError {
        self.classify_at(failure, Utc::now())
    }

    /// Classify against an explicit clock (used for HTTP-date `Retry-After`).
    pub fn classify_at(&self, failure: &Failure, now: DateTime<Utc>) -> ClassifiedError {
        for (name, detector) in &self.custom {
            if let Some(classified) = detector.detect(failure) {
                tracing::debug!(detector = %name, kind = %classified.kind(), "custom detector matched");
                return classified;
            }
        }

        let classified = match failure {
            Failure::Transport(error) => classify_transport(error),
            Failure::Response(response) => classify_response(response, now),
            Failure::Other(message) => ClassifiedError::new(FailureKind::Unknown, false)
                .with_detail("message", message.as_str()),
        };
        tracing::debug!(
            kind = %classified.kind(),
            retryable = classified.is_retryable(),
            status = ?classified.status(),
            "classified failure"
        );
        classified
    }

    /// Classify and pair the classification with the failure.
    pub fn classify_failure(&self, failure: Failure) -> ClassifiedFailure {
        let classification = self.classify(&failure);
        ClassifiedFailure {
            failure,
            classification,
        }
    }
}

fn classify_transport(error: &TransportError) -> ClassifiedError {
    let timed_out = matches!(
        error.kind,
        TransportErrorKind::Timeout | TransportErrorKind::Aborted
    ) || error
        .code
        .as_deref()
        .map(|code| TIMEOUT_CODES.contains(&code))
        .unwrap_or(false);

    let kind = if timed_out {
        FailureKind::Timeout
    } else {
        FailureKind::Network
    };
    let code = error.code.clone().map(Value::String).unwrap_or(Value::Null);
    ClassifiedError::new(kind, true)
        .with_detail("code", code)
        .with_detail("message", error.message.as_str())
}

fn classify_response(response: &HttpResponse, now: DateTime<Utc>) -> ClassifiedError {
    let lower_body = response.body.to_ascii_lowercase();
    let body_json = serde_json::from_str::<Value>(&response.body).ok();

    if let Some(challenge_type) = challenge::detect(response, &lower_body) {
        let policy = challenge_type.policy();
        return base(FailureKind::Challenge, policy.retryable, response, body_json.as_ref())
            .with_detail("challengeType", challenge_type.to_string())
            .with_detail("requiresUserAction", policy.requires_user_action);
    }

    let rate_limited = response.status == 429
        || headers::remaining_exhausted(&response.headers)
        || RATE_LIMIT_MARKERS.iter().any(|m| lower_body.contains(m));
    if rate_limited {
        return classify_rate_limit(response, body_json.as_ref(), now);
    }

    match response.status {
        401 | 403 => base(FailureKind::Auth, false, response, body_json.as_ref()),
        422 => {
            let mut classified = base(FailureKind::Validation, false, response, body_json.as_ref());
            if let Some(errors) = body_json.as_ref().and_then(validation_errors) {
                classified = classified.with_detail("validationErrors", errors);
            }
            classified
        }
        408 => base(FailureKind::Timeout, true, response, body_json.as_ref()),
        400..=499 => base(FailureKind::Client, false, response, body_json.as_ref()),
        500..=599 => base(FailureKind::Server, true, response, body_json.as_ref()),
        _ => base(FailureKind::Unknown, false, response, body_json.as_ref()),
    }
}

fn classify_rate_limit(
    response: &HttpResponse,
    body_json: Option<&Value>,
    now: DateTime<Utc>,
) -> ClassifiedError {
    let mut classified = base(FailureKind::RateLimit, true, response, body_json);
    if let Some(seconds) = headers::retry_after_seconds(&response.headers, &response.body, now) {
        classified = classified.with_detail("retryAfterSeconds", seconds);
    }
    if let Some(limit) = headers::rate_limit_limit(&response.headers) {
        classified = classified.with_detail("limit", limit);
    }
    if let Some(remaining) = headers::rate_limit_remaining(&response.headers) {
        classified = classified.with_detail("remaining", remaining);
    }
    if let Some(reset_at) = headers::rate_limit_reset(&response.headers, now) {
        classified = classified.with_detail("resetAt", reset_at.to_rfc3339());
    }
    classified
}

fn base(
    kind: FailureKind,
    retryable: bool,
    response: &HttpResponse,
    body_json: Option<&Value>,
) -> ClassifiedError {
    let mut classified =
        ClassifiedError::new(kind, retryable).with_detail("status", response.status);
    if let Some(body) = body_json {
        if let Some(message) = api_message(body) {
            classified = classified.with_detail("message", message);
        }
        if let Some(code) = api_code(body) {
            classified = classified.with_detail("code", code);
        }
    }
    classified
}

fn api_message(body: &Value) -> Option<String> {
    let error = body.get("error");
    body.get("message")
        .and_then(Value::as_str)
        .or_else(|| error.and_then(|e| e.get("message")).and_then(Value::as_str))
        .or_else(|| error.and_then(Value::as_str))
        .or_else(|| body.get("error_description").and_then(Value::as_str))
        .map(str::to_string)
}

fn api_code(body: &Value) -> Option<String> {
    let code = body
        .get("code")
        .or_else(|| body.get("error").and_then(|e| e.get("code")))?;
    match code {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn validation_errors(body: &Value) -> Option<Value> {
    body.get("errors")
        .or_else(|| body.get("validation_errors"))
        .or_else(|| body.get("error").and_then(|e| e.get("errors")))
        .filter(|errors| errors.is_object())
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_detector_short_circuits_builtin_rules() {
        let detector = ErrorDetector::new().with_detector(
            "teapot",
            Arc::new(|failure: &Failure| {
                (failure.status() == Some(418))
                    .then(|| ClassifiedError::new(FailureKind::Server, true))
            }),
        );

        let teapot = Failure::Response(HttpResponse::new(418, ""));
        assert_eq!(detector.classify(&teapot).kind(), FailureKind::Server);

        let other = Failure::Response(HttpResponse::new(404, ""));
        assert_eq!(detector.classify(&other).kind(), FailureKind::Client);
    }

    #[test]
    fn registering_same_name_replaces_detector() {
        let mut detector = ErrorDetector::new();
        let never = |_: &Failure| -> Option<ClassifiedError> { None };
        detector.register("a", Arc::new(never));
        detector.register("a", Arc::new(never));
        detector.register("b", Arc::new(never));
        assert_eq!(detector.detector_names(), vec!["a", "b"]);
    }

    #[test]
    fn aborted_code_refines_network_to_timeout() {
        let error = TransportError::new(TransportErrorKind::Other, "socket hang up")
            .with_code("ECONNABORTED");
        let classified = ErrorDetector::new().classify(&Failure::Transport(error));
        assert_eq!(classified.kind(), FailureKind::Timeout);
        assert_eq!(classified.code(), Some("ECONNABORTED"));
    }

    #[test]
    fn opaque_failure_is_unknown_and_final() {
        let classified = ErrorDetector::new().classify(&Failure::Other("boom".to_string()));
        assert_eq!(classified.kind(), FailureKind::Unknown);
        assert!(!classified.is_retryable());
    }

    #[test]
    fn redirect_status_is_unknown() {
        let classified = ErrorDetector::new().classify(&Failure::Response(HttpResponse::new(302, "")));
        assert_eq!(classified.kind(), FailureKind::Unknown);
        assert_eq!(classified.status(), Some(302));
    }
}
