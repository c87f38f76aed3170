//! Failure taxonomy: kinds, machine-readable codes, challenge sub-types and
//! recovery suggestions.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// The kind of a failed request. Every failure maps to exactly one kind.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FailureKind {
    Network,
    Timeout,
    Challenge,
    RateLimit,
    Auth,
    Validation,
    Server,
    Client,
    Unknown,
}

impl FailureKind {
    /// Machine-readable code used when this kind is surfaced as a structured error.
    pub fn code(self) -> ErrorCode {
        match self {
            Self::Network => ErrorCode::NetworkError,
            Self::Timeout => ErrorCode::Timeout,
            Self::Challenge => ErrorCode::ChallengeDetected,
            Self::RateLimit => ErrorCode::RateLimitExceeded,
            Self::Auth => ErrorCode::AuthenticationFailed,
            Self::Validation => ErrorCode::ValidationFailed,
            Self::Server => ErrorCode::ServerError,
            Self::Client => ErrorCode::InvalidRequest,
            Self::Unknown => ErrorCode::Unknown,
        }
    }

    /// Kinds that are never retried regardless of configuration.
    ///
    /// Challenges are not listed: their retryability depends on the sub-type.
    pub fn is_fatal(self) -> bool {
        matches!(self, Self::Auth | Self::Validation)
    }

    /// Whether the kind describes a failure with no HTTP response.
    pub fn is_transport_level(self) -> bool {
        matches!(self, Self::Network | Self::Timeout)
    }

    /// Default recovery suggestion for this kind.
    pub fn recovery_suggestion(self) -> RecoverySuggestion {
        match self {
            Self::Network => RecoverySuggestion::CheckNetwork,
            Self::Timeout => RecoverySuggestion::IncreaseTimeout,
            Self::Challenge => RecoverySuggestion::RetryWithBackoff,
            Self::RateLimit => RecoverySuggestion::WaitForRateLimitReset,
            Self::Auth => RecoverySuggestion::CheckCredentials,
            Self::Validation => RecoverySuggestion::FixRequestParameters,
            Self::Server => RecoverySuggestion::RetryWithBackoff,
            Self::Client => RecoverySuggestion::FixRequestParameters,
            Self::Unknown => RecoverySuggestion::ContactSupport,
        }
    }
}

/// Machine-readable error code.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    NetworkError,
    Timeout,
    ChallengeDetected,
    RateLimitExceeded,
    AuthenticationFailed,
    ValidationFailed,
    ServerError,
    InvalidRequest,
    Unknown,
}

/// Sub-type of an intermediary challenge page.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ChallengeType {
    Captcha,
    BrowserCheck,
    SecurityChallenge,
    IpBlock,
    Unknown,
}

/// Fixed handling policy of a challenge sub-type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChallengePolicy {
    pub retryable: bool,
    pub requires_user_action: bool,
}

const CHALLENGE_POLICIES: [(ChallengeType, ChallengePolicy); 5] = [
    (
        ChallengeType::Captcha,
        ChallengePolicy {
            retryable: false,
            requires_user_action: true,
        },
    ),
    (
        ChallengeType::BrowserCheck,
        ChallengePolicy {
            retryable: true,
            requires_user_action: false,
        },
    ),
    (
        ChallengeType::SecurityChallenge,
        ChallengePolicy {
            retryable: true,
            requires_user_action: false,
        },
    ),
    (
        ChallengeType::IpBlock,
        ChallengePolicy {
            retryable: false,
            requires_user_action: true,
        },
    ),
    (
        ChallengeType::Unknown,
        ChallengePolicy {
            retryable: true,
            requires_user_action: false,
        },
    ),
];

impl ChallengeType {
    /// Look up the handling policy for this challenge type.
    pub fn policy(self) -> ChallengePolicy {
        CHALLENGE_POLICIES
            .iter()
            .find(|(kind, _)| *kind == self)
            .map(|(_, policy)| *policy)
            .unwrap_or(ChallengePolicy {
                retryable: false,
                requires_user_action: true,
            })
    }

    pub fn is_retryable(self) -> bool {
        self.policy().retryable
    }

    pub fn requires_user_action(self) -> bool {
        self.policy().requires_user_action
    }

    pub fn recovery_suggestion(self) -> RecoverySuggestion {
        match self {
            Self::Captcha => RecoverySuggestion::CompleteChallenge,
            Self::IpBlock => RecoverySuggestion::RequestUnblock,
            Self::BrowserCheck | Self::SecurityChallenge | Self::Unknown => {
                RecoverySuggestion::RetryWithBackoff
            }
        }
    }
}

/// Suggested recovery action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RecoverySuggestion {
    RetryWithBackoff,
    WaitForRateLimitReset,
    CompleteChallenge,
    RequestUnblock,
    CheckCredentials,
    CheckConfiguration,
    FixRequestParameters,
    IncreaseTimeout,
    CheckNetwork,
    ContactSupport,
}

impl RecoverySuggestion {
    /// Human-readable guidance suitable for end-user messages.
    pub fn describe(self) -> &'static str {
        match self {
            Self::RetryWithBackoff => "Retry the request after a short delay",
            Self::WaitForRateLimitReset => "Wait until the rate limit window resets before retrying",
            Self::CompleteChallenge => {
                "Complete the bot-protection challenge in a browser, then retry"
            }
            Self::RequestUnblock => {
                "The client IP is blocked; ask the payment provider to allowlist it"
            }
            Self::CheckCredentials => "Verify the merchant credentials and request signature",
            Self::CheckConfiguration => "Review the resilience configuration values",
            Self::FixRequestParameters => "Correct the request parameters and resend",
            Self::IncreaseTimeout => "Increase the request timeout or retry later",
            Self::CheckNetwork => "Check network connectivity to the payment API",
            Self::ContactSupport => "Contact payment provider support with the request id",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn challenge_lookup_table_matches_policy() {
        assert!(!ChallengeType::Captcha.is_retryable());
        assert!(ChallengeType::Captcha.requires_user_action());
        assert!(!ChallengeType::IpBlock.is_retryable());
        assert!(ChallengeType::IpBlock.requires_user_action());
        assert!(ChallengeType::BrowserCheck.is_retryable());
        assert!(!ChallengeType::BrowserCheck.requires_user_action());
        assert!(ChallengeType::SecurityChallenge.is_retryable());
        assert!(!ChallengeType::SecurityChallenge.requires_user_action());
    }

    #[test]
    fn kinds_render_as_snake_case() {
        assert_eq!(FailureKind::RateLimit.to_string(), "rate_limit");
        assert_eq!(
            FailureKind::from_str("validation").unwrap(),
            FailureKind::Validation
        );
        assert_eq!(ChallengeType::BrowserCheck.to_string(), "browser_check");
        assert_eq!(ErrorCode::RateLimitExceeded.to_string(), "RATE_LIMIT_EXCEEDED");
    }

    #[test]
    fn fatal_kinds_are_auth_and_validation() {
        assert!(FailureKind::Auth.is_fatal());
        assert!(FailureKind::Validation.is_fatal());
        assert!(!FailureKind::Server.is_fatal());
        assert!(!FailureKind::Challenge.is_fatal());
    }
}
