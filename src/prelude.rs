//! Convenience re-exports for common use.

pub use crate::client::{RateLimitSnapshot, ResilientClient};
pub use crate::config::{ResilienceConfig, ResilienceOptions};
pub use crate::detect::{ClassifiedError, ClassifiedFailure, ErrorDetector, Failure};
pub use crate::error::{
    ChallengeType, ErrorCode, FailureKind, PayguardError, RecoverySuggestion, Result,
    StructuredError,
};
pub use crate::handler::{DiagnosticReport, ErrorHandler};
pub use crate::interceptor::{ErrorInterceptor, ErrorOutcome, Pipeline};
pub use crate::retry::{BackoffConfig, RetryContext, RetryPolicy};
pub use crate::transport::{HttpRequest, HttpResponse, Transport, TransportError};
