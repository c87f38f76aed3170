//! Shared test helpers and a scripted transport.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use payguard::config::{ResilienceConfig, ResilienceOptions};
use payguard::transport::{HttpRequest, HttpResponse, Transport, TransportError};

/// A transport that replays queued outcomes and records every request.
///
/// Once the script runs out it keeps answering `200 {}`.
#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
    requests: Mutex<Vec<HttpRequest>>,
    calls: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with(outcomes: Vec<Result<HttpResponse, TransportError>>) -> Arc<Self> {
        let transport = Self::default();
        transport.script.lock().unwrap().extend(outcomes);
        Arc::new(transport)
    }

    pub fn push(&self, outcome: Result<HttpResponse, TransportError>) {
        self.script.lock().unwrap().push_back(outcome);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn user_agents(&self) -> Vec<Option<String>> {
        self.requests()
            .iter()
            .map(|r| r.header_value("user-agent").map(str::to_string))
            .collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(ok_json("{}")))
    }
}

pub fn ok_json(body: &str) -> HttpResponse {
    HttpResponse::new(200, body).with_header("content-type", "application/json")
}

pub fn status(code: u16) -> HttpResponse {
    HttpResponse::new(code, r#"{"error":{"message":"upstream failure"}}"#)
        .with_header("content-type", "application/json")
}

pub fn rate_limited(retry_after: &str) -> HttpResponse {
    HttpResponse::new(429, r#"{"error":{"message":"Too many requests"}}"#)
        .with_header("retry-after", retry_after)
        .with_header("x-ratelimit-limit", "100")
        .with_header("x-ratelimit-remaining", "0")
}

pub fn cloudflare_browser_check() -> HttpResponse {
    HttpResponse::new(
        503,
        "<!DOCTYPE html><html><head><title>Just a moment...</title></head>\
         <body>Checking your browser before accessing api.example.com</body></html>",
    )
    .with_header("server", "cloudflare")
    .with_header("content-type", "text/html")
}

pub fn cloudflare_captcha() -> HttpResponse {
    HttpResponse::new(
        403,
        "<!DOCTYPE html><html><body><div class=\"cf-turnstile\">Please complete the captcha</div></body></html>",
    )
    .with_header("server", "cloudflare")
    .with_header("content-type", "text/html")
}

pub fn validation_failure() -> HttpResponse {
    HttpResponse::new(
        422,
        r#"{"error":{"message":"Invalid payment","code":"invalid_amount"},"errors":{"amount":["must be positive"]}}"#,
    )
}

pub fn payment_request() -> HttpRequest {
    HttpRequest::post("https://api.example.com/v1/payments?idempotency=abc")
        .header("authorization", "Bearer sk_test_secret")
        .header("x-signature", "sig-123")
        .header("user-agent", "merchant-sdk/1.0")
        .body(r#"{"amount":1000,"currency":"usd"}"#)
}

/// Options with every section enabled and jitter removed.
pub fn deterministic_options() -> ResilienceOptions {
    let mut config = ResilienceConfig {
        jitter_factor: 0.0,
        ..ResilienceConfig::default()
    };
    config.network.jitter_factor = 0.0;
    config.challenge.jitter_factor = 0.0;
    ResilienceOptions::new(config)
}
