//! Rate-limit and `Retry-After` header parsing.

use chrono::{DateTime, Duration, TimeZone, Utc};
use reqwest::header::HeaderMap;

/// Wait applied when a `Retry-After` header is present but unparseable.
pub const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

// Reset values above this are epoch seconds, below it seconds from now.
const EPOCH_THRESHOLD: i64 = 1_000_000_000;

fn header<'a>(headers: &'a HeaderMap, names: &[&str]) -> Option<&'a str> {
    names
        .iter()
        .find_map(|name| headers.get(*name))
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
}

/// Seconds to wait before retrying, per `Retry-After` or the JSON body.
///
/// Numeric values are seconds (rounded up); HTTP-dates become seconds from
/// `now`, floored at zero. A present but unparseable header yields
/// [`DEFAULT_RETRY_AFTER_SECS`].
pub fn retry_after_seconds(headers: &HeaderMap, body: &str, now: DateTime<Utc>) -> Option<u64> {
    match header(headers, &["retry-after"]) {
        Some(value) => Some(parse_retry_after(value, now)),
        None => retry_after_from_body(body),
    }
}

pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> u64 {
    if let Ok(seconds) = value.parse::<f64>() {
        if seconds.is_finite() && seconds >= 0.0 {
            return seconds.ceil() as u64;
        }
        return DEFAULT_RETRY_AFTER_SECS;
    }
    match DateTime::parse_from_rfc2822(value) {
        Ok(date) => {
            let delta = date.with_timezone(&Utc) - now;
            delta.num_seconds().max(0) as u64
        }
        Err(_) => DEFAULT_RETRY_AFTER_SECS,
    }
}

fn retry_after_from_body(body: &str) -> Option<u64> {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("retry_after"))
                .or_else(|| v.get("retry_after"))
                .and_then(|r| r.as_f64())
                .filter(|s| s.is_finite() && *s >= 0.0)
                .map(|s| s.ceil() as u64)
        })
}

pub fn rate_limit_limit(headers: &HeaderMap) -> Option<u64> {
    header(headers, &["x-ratelimit-limit", "ratelimit-limit"]).and_then(|v| v.parse().ok())
}

pub fn rate_limit_remaining(headers: &HeaderMap) -> Option<u64> {
    header(headers, &["x-ratelimit-remaining", "ratelimit-remaining"])
        .and_then(|v| v.parse().ok())
}

/// Whether a remaining-quota header reports an exhausted window.
pub fn remaining_exhausted(headers: &HeaderMap) -> bool {
    header(headers, &["x-ratelimit-remaining", "ratelimit-remaining"]) == Some("0")
}

pub fn rate_limit_reset(headers: &HeaderMap, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let raw = header(headers, &["x-ratelimit-reset", "ratelimit-reset"])?;
    let value = raw.parse::<f64>().ok()?.floor() as i64;
    if value > EPOCH_THRESHOLD {
        Utc.timestamp_opt(value, 0).single()
    } else {
        Some(now + Duration::seconds(value.max(0)))
    }
}
