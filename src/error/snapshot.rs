//! Sanitized request snapshots attached to errors and diagnostics.

use std::collections::BTreeMap;

use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};

use crate::transport::HttpRequest;

/// Replacement for masked header values.
pub const MASK: &str = "***";

const SENSITIVE_MARKERS: [&str; 9] = [
    "authorization",
    "api-key",
    "apikey",
    "api_key",
    "token",
    "secret",
    "signature",
    "cookie",
    "password",
];

/// Method, path and masked headers of a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestSnapshot {
    pub method: String,
    pub path: String,
    pub headers: BTreeMap<String, String>,
}

impl RequestSnapshot {
    pub fn from_request(request: &HttpRequest) -> Self {
        Self {
            method: request.method.to_string(),
            path: request_path(&request.url),
            headers: sanitize_headers(&request.headers),
        }
    }
}

/// Whether a header name carries credentials and must never be logged.
pub fn is_sensitive_header(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    SENSITIVE_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// Copy headers into a sorted map with credential values masked.
pub fn sanitize_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .map(|(name, value)| {
            let name = name.as_str().to_string();
            let value = if is_sensitive_header(&name) {
                MASK.to_string()
            } else {
                value.to_str().unwrap_or("<binary>").to_string()
            };
            (name, value)
        })
        .collect()
}

// Query strings can carry signatures, so only the path is kept.
fn request_path(url: &str) -> String {
    match reqwest::Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url.split('?').next().unwrap_or_default().to_string(),
    }
}
