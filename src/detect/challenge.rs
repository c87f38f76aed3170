//! Recognition of intermediary challenge pages.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::ChallengeType;
use crate::transport::HttpResponse;

/// Longest non-JSON 403 body still treated as a bare intermediary page.
const GENERIC_BODY_MAX_LEN: usize = 64;

const CAPTCHA_MARKERS: [&str; 2] = ["captcha", "cf-turnstile"];

const IP_BLOCK_MARKERS: [&str; 7] = [
    "error 1005",
    "error 1006",
    "error 1007",
    "error 1008",
    "ip address has been banned",
    "ip has been blocked",
    "sorry, you have been blocked",
];

const BROWSER_CHECK_MARKERS: [&str; 4] = [
    "checking your browser",
    "just a moment",
    "cf-browser-verification",
    "browser verification",
];

const SECURITY_MARKERS: [&str; 5] = [
    "attention required",
    "security check",
    "cf_chl_",
    "cf-challenge",
    "checking if the site connection is secure",
];

fn ray_id_pattern() -> &'static Regex {
    static RAY_ID: OnceLock<Regex> = OnceLock::new();
    RAY_ID.get_or_init(|| {
        Regex::new(r"(?i)\bray\s+id\b|\bcf-ray\b").expect("ray id regex must compile")
    })
}

fn contains_any(haystack: &str, markers: &[&str]) -> bool {
    markers.iter().any(|marker| haystack.contains(marker))
}

fn looks_like_json(body: &str) -> bool {
    let trimmed = body.trim_start();
    trimmed.starts_with('{') || trimmed.starts_with('[')
}

fn looks_like_html(lower_body: &str) -> bool {
    let trimmed = lower_body.trim_start();
    trimmed.starts_with("<!doctype") || trimmed.starts_with("<html") || trimmed.contains("<body")
}

/// Detect a challenge page, returning its sub-type.
///
/// `lower_body` is the response body in ASCII lowercase.
pub fn detect(response: &HttpResponse, lower_body: &str) -> Option<ChallengeType> {
    let from_cloudflare = response
        .header("server")
        .map(|server| server.to_ascii_lowercase().contains("cloudflare"))
        .unwrap_or(false);

    let has_marker = contains_any(lower_body, &BROWSER_CHECK_MARKERS)
        || contains_any(lower_body, &SECURITY_MARKERS)
        || contains_any(lower_body, &IP_BLOCK_MARKERS)
        || ray_id_pattern().is_match(lower_body);

    // `server: cloudflare` alone is not enough: API errors proxied through
    // Cloudflare carry it too. Those are JSON, challenge pages are not.
    let json = looks_like_json(&response.body);
    let generic_forbidden = response.status == 403
        && !json
        && (looks_like_html(lower_body) || lower_body.trim().len() < GENERIC_BODY_MAX_LEN);

    if has_marker || (!json && from_cloudflare) || generic_forbidden {
        Some(challenge_type(lower_body))
    } else {
        None
    }
}

/// Sub-type of a body already known to be a challenge page.
pub fn challenge_type(lower_body: &str) -> ChallengeType {
    if contains_any(lower_body, &CAPTCHA_MARKERS) {
        ChallengeType::Captcha
    } else if contains_any(lower_body, &IP_BLOCK_MARKERS) {
        ChallengeType::IpBlock
    } else if contains_any(lower_body, &BROWSER_CHECK_MARKERS) {
        ChallengeType::BrowserCheck
    } else if contains_any(lower_body, &SECURITY_MARKERS) {
        ChallengeType::SecurityChallenge
    } else {
        ChallengeType::Unknown
    }
}
