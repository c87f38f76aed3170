//! Error types for payguard.

pub mod snapshot;
pub mod structured;
pub mod taxonomy;

pub use snapshot::RequestSnapshot;
pub use structured::{
    ChallengeGuidance, ChallengeInfo, ErrorVariant, RateLimitInfo, RetryGuidance,
    StructuredError,
};
pub use taxonomy::{ChallengePolicy, ChallengeType, ErrorCode, FailureKind, RecoverySuggestion};

use thiserror::Error;

/// Primary error type for all payguard operations.
#[derive(Error, Debug)]
pub enum PayguardError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Request(Box<StructuredError>),

    #[error("Request cancelled after {attempts} attempt(s)")]
    Cancelled { attempts: u32 },

    #[error("Interceptor error: {0}")]
    Interceptor(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<StructuredError> for PayguardError {
    fn from(error: StructuredError) -> Self {
        Self::Request(Box::new(error))
    }
}

impl PayguardError {
    /// The failure kind of a request error.
    pub fn kind(&self) -> Option<FailureKind> {
        self.structured().map(|e| e.kind)
    }

    pub fn structured(&self) -> Option<&StructuredError> {
        match self {
            Self::Request(error) => Some(error),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Whether retrying the same request later could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Request(error) => error.retryable,
            _ => false,
        }
    }

    /// Suggest recovery actions.
    pub fn recovery_suggestion(&self) -> RecoverySuggestion {
        match self {
            Self::Request(error) => error.recovery_suggestion(),
            Self::Configuration(_) | Self::ConfigParse(_) => RecoverySuggestion::CheckConfiguration,
            Self::Cancelled { .. } => RecoverySuggestion::RetryWithBackoff,
            _ => RecoverySuggestion::ContactSupport,
        }
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, PayguardError>;
