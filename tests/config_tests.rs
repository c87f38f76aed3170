//! Tests for configuration loading.

use std::io::Write;
use std::sync::Arc;

use pretty_assertions::assert_eq;
use tempfile::NamedTempFile;

use payguard::client::{standard_pipeline, ResilientClient};
use payguard::config::{ResilienceConfig, ResilienceOptions};
use payguard::error::PayguardError;
use payguard::transport::ReqwestTransport;

#[test]
fn loads_toml_file() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
max_retries = 4
retryable_status_codes = [500, 503]
request_timeout_ms = 10000

[network]
timeout_multiplier = 2.0

[challenge]
max_retries = 1
user_agents = ["agent-a", "agent-b"]
"#
    )
    .unwrap();

    let config = ResilienceConfig::from_toml_file(file.path()).unwrap();

    assert_eq!(config.max_retries, 4);
    assert_eq!(config.retryable_status_codes, vec![500, 503]);
    assert_eq!(config.request_timeout().as_secs(), 10);
    assert_eq!(config.network.timeout_multiplier, 2.0);
    assert_eq!(config.challenge.user_agents, vec!["agent-a", "agent-b"]);
    assert!(config.rate_limit.enabled);

    let backoff = config.backoff().unwrap();
    assert_eq!(backoff.max_retries(), 4);
    assert_eq!(backoff.retryable_status_codes().iter().copied().collect::<Vec<_>>(), vec![500, 503]);
}

#[test]
fn missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let error = ResilienceConfig::from_toml_file(dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(error, PayguardError::Io(_)));
}

#[test]
fn malformed_toml_is_parse_error() {
    let error = ResilienceConfig::from_toml_str("max_retries = [").unwrap_err();
    assert!(matches!(error, PayguardError::ConfigParse(_)));
}

#[test]
fn out_of_range_values_are_configuration_errors() {
    for raw in [
        "base_delay_ms = 0",
        "backoff_factor = -1.0",
        "jitter_factor = 1.5",
        "request_timeout_ms = 0",
        "[rate_limit]\nmin_wait_secs = 10\nmax_wait_secs = 5",
        "[network]\ntimeout_multiplier = 0.5",
    ] {
        let error = ResilienceConfig::from_toml_str(raw).unwrap_err();
        assert!(matches!(error, PayguardError::Configuration(_)), "{raw}");
    }
}

#[test]
fn default_config_round_trips_through_toml() {
    let config = ResilienceConfig::default();
    let raw = toml::to_string(&config).unwrap();
    assert_eq!(ResilienceConfig::from_toml_str(&raw).unwrap(), config);
}

#[test]
fn disabled_sections_are_left_out_of_the_pipeline() {
    let mut config = ResilienceConfig::default();
    config.challenge.enabled = false;
    config.network.enabled = false;

    let pipeline = standard_pipeline(&ResilienceOptions::new(config)).unwrap();
    assert_eq!(pipeline.error_interceptor_names(), vec!["rate_limit", "error_handler"]);

    let pipeline = standard_pipeline(&ResilienceOptions::default()).unwrap();
    assert_eq!(
        pipeline.error_interceptor_names(),
        vec!["challenge", "rate_limit", "network", "error_handler"]
    );
}

#[test]
fn invalid_options_fail_client_construction() {
    let mut config = ResilienceConfig::default();
    config.jitter_factor = 3.0;
    let result = ResilientClient::new(Arc::new(ReqwestTransport::default()), ResilienceOptions::new(config));
    assert!(matches!(result, Err(PayguardError::Configuration(_))));
}
