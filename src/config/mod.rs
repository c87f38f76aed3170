//! Configuration (layered: code > env > file > defaults).

use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::detect::{CustomDetector, ErrorDetector};
use crate::error::{PayguardError, Result};
use crate::handler::{ErrorHook, RecoveryHook};
use crate::interceptor::RequestMutator;
use crate::retry::{BackoffConfig, RetryCallback, RetryPredicate, DEFAULT_RETRYABLE_STATUS_CODES};

/// Network interceptor settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSettings {
    pub enabled: bool,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_factor: f64,
    pub jitter_factor: f64,
    /// Growth of the per-attempt timeout budget after each timeout.
    pub timeout_multiplier: f64,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 10_000,
            backoff_factor: 2.0,
            jitter_factor: 0.2,
            timeout_multiplier: 1.5,
        }
    }
}

/// Rate-limit interceptor settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    pub enabled: bool,
    pub max_retries: u32,
    /// Wait used when the server gives no `Retry-After`.
    pub default_wait_secs: u64,
    pub min_wait_secs: u64,
    pub max_wait_secs: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 3,
            default_wait_secs: 60,
            min_wait_secs: 1,
            max_wait_secs: 300,
        }
    }
}

/// Challenge interceptor settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChallengeSettings {
    pub enabled: bool,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_factor: f64,
    pub jitter_factor: f64,
    pub rotate_user_agent: bool,
    /// User-Agent pool; empty means the built-in browser pool.
    pub user_agents: Vec<String>,
}

impl Default for ChallengeSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 2,
            base_delay_ms: 2_000,
            max_delay_ms: 15_000,
            backoff_factor: 2.0,
            jitter_factor: 0.3,
            rotate_user_agent: true,
            user_agents: Vec::new(),
        }
    }
}

/// Serializable resilience configuration.
///
/// The top-level retry fields configure the catch-all error handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_factor: f64,
    pub jitter_factor: f64,
    pub retryable_status_codes: Vec<u16>,
    pub request_timeout_ms: u64,
    pub network: NetworkSettings,
    pub rate_limit: RateLimitSettings,
    pub challenge: ChallengeSettings,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            backoff_factor: 2.0,
            jitter_factor: 0.1,
            retryable_status_codes: DEFAULT_RETRYABLE_STATUS_CODES.to_vec(),
            request_timeout_ms: 30_000,
            network: NetworkSettings::default(),
            rate_limit: RateLimitSettings::default(),
            challenge: ChallengeSettings::default(),
        }
    }
}

impl ResilienceConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// Defaults overlaid with `PAYGUARD_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error
        Self::default().with_env_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides read through `lookup`. Malformed values are errors.
    pub fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(value) = lookup("PAYGUARD_MAX_RETRIES") {
            self.max_retries = parse_env("PAYGUARD_MAX_RETRIES", &value)?;
        }
        if let Some(value) = lookup("PAYGUARD_BASE_DELAY_MS") {
            self.base_delay_ms = parse_env("PAYGUARD_BASE_DELAY_MS", &value)?;
        }
        if let Some(value) = lookup("PAYGUARD_MAX_DELAY_MS") {
            self.max_delay_ms = parse_env("PAYGUARD_MAX_DELAY_MS", &value)?;
        }
        if let Some(value) = lookup("PAYGUARD_BACKOFF_FACTOR") {
            self.backoff_factor = parse_env("PAYGUARD_BACKOFF_FACTOR", &value)?;
        }
        if let Some(value) = lookup("PAYGUARD_JITTER_FACTOR") {
            self.jitter_factor = parse_env("PAYGUARD_JITTER_FACTOR", &value)?;
        }
        if let Some(value) = lookup("PAYGUARD_REQUEST_TIMEOUT_MS") {
            self.request_timeout_ms = parse_env("PAYGUARD_REQUEST_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = lookup("PAYGUARD_RETRYABLE_STATUS_CODES") {
            self.retryable_status_codes = value
                .split(',')
                .map(str::trim)
                .filter(|code| !code.is_empty())
                .map(|code| parse_env("PAYGUARD_RETRYABLE_STATUS_CODES", code))
                .collect::<Result<_>>()?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        self.backoff().map(|_| ())?;
        if self.request_timeout_ms == 0 {
            return Err(PayguardError::Configuration(
                "request_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.rate_limit.min_wait_secs > self.rate_limit.max_wait_secs {
            return Err(PayguardError::Configuration(format!(
                "rate_limit.min_wait_secs ({}) exceeds max_wait_secs ({})",
                self.rate_limit.min_wait_secs, self.rate_limit.max_wait_secs
            )));
        }
        if !self.network.timeout_multiplier.is_finite() || self.network.timeout_multiplier < 1.0 {
            return Err(PayguardError::Configuration(format!(
                "network.timeout_multiplier must be at least 1, got {}",
                self.network.timeout_multiplier
            )));
        }
        Ok(())
    }

    /// Backoff of the catch-all error handler.
    pub fn backoff(&self) -> Result<BackoffConfig> {
        BackoffConfig::builder()
            .max_retries(self.max_retries)
            .base_delay_ms(self.base_delay_ms)
            .max_delay_ms(self.max_delay_ms)
            .backoff_factor(self.backoff_factor)
            .jitter_factor(self.jitter_factor)
            .retryable_status_codes(self.retryable_status_codes.iter().copied().collect::<BTreeSet<u16>>())
            .build()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        PayguardError::Configuration(format!("invalid value for {name}: '{value}'"))
    })
}

/// Configuration plus the hooks and extensions that cannot be serialized.
#[derive(Clone, Default)]
pub struct ResilienceOptions {
    pub config: ResilienceConfig,
    pub detector: ErrorDetector,
    pub on_retry: Option<RetryCallback>,
    pub on_error: Option<ErrorHook>,
    pub on_recovery: Option<RecoveryHook>,
    pub retry_predicate: Option<RetryPredicate>,
    pub mutator: Option<Arc<dyn RequestMutator>>,
}

impl fmt::Debug for ResilienceOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResilienceOptions")
            .field("config", &self.config)
            .field("detector", &self.detector)
            .field("on_retry", &self.on_retry.as_ref().map(|_| ".."))
            .field("on_error", &self.on_error.as_ref().map(|_| ".."))
            .field("on_recovery", &self.on_recovery.as_ref().map(|_| ".."))
            .field("retry_predicate", &self.retry_predicate.as_ref().map(|_| ".."))
            .field("mutator", &self.mutator.as_ref().map(|_| ".."))
            .finish()
    }
}

impl ResilienceOptions {
    pub fn new(config: ResilienceConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn with_detector(mut self, name: impl Into<String>, detector: Arc<dyn CustomDetector>) -> Self {
        self.detector.register(name, detector);
        self
    }

    pub fn with_on_retry(mut self, callback: RetryCallback) -> Self {
        self.on_retry = Some(callback);
        self
    }

    pub fn with_on_error(mut self, hook: ErrorHook) -> Self {
        self.on_error = Some(hook);
        self
    }

    pub fn with_on_recovery(mut self, hook: RecoveryHook) -> Self {
        self.on_recovery = Some(hook);
        self
    }

    /// Replace the catch-all handler's retry predicate.
    pub fn with_retry_predicate(mut self, predicate: RetryPredicate) -> Self {
        self.retry_predicate = Some(predicate);
        self
    }

    /// Replace the request mutation applied before challenge retries.
    pub fn with_mutator(mut self, mutator: Arc<dyn RequestMutator>) -> Self {
        self.mutator = Some(mutator);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = ResilienceConfig::from_toml_str(
            r#"
            max_retries = 5

            [rate_limit]
            max_wait_secs = 120
            "#,
        )
        .unwrap();
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.base_delay_ms, 1_000);
        assert_eq!(config.rate_limit.max_wait_secs, 120);
        assert_eq!(config.rate_limit.default_wait_secs, 60);
        assert_eq!(config.network, NetworkSettings::default());
    }

    #[test]
    fn invalid_toml_values_are_rejected() {
        assert!(ResilienceConfig::from_toml_str("jitter_factor = 2.0").is_err());
        assert!(ResilienceConfig::from_toml_str("max_retries = \"three\"").is_err());
    }

    #[test]
    fn env_overrides_apply() {
        let vars: HashMap<&str, &str> = [
            ("PAYGUARD_MAX_RETRIES", "7"),
            ("PAYGUARD_RETRYABLE_STATUS_CODES", "500, 503"),
        ]
        .into_iter()
        .collect();
        let config = ResilienceConfig::default()
            .with_env_overrides(|name| vars.get(name).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.max_retries, 7);
        assert_eq!(config.retryable_status_codes, vec![500, 503]);
    }

    #[test]
    fn malformed_env_value_names_the_variable() {
        let err = ResilienceConfig::default()
            .with_env_overrides(|name| (name == "PAYGUARD_BACKOFF_FACTOR").then(|| "fast".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("PAYGUARD_BACKOFF_FACTOR"));
    }
}
