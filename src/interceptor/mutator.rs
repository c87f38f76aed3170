//! Request mutation between challenge retries.

use rand::seq::SliceRandom;

use crate::retry::RetryContext;
use crate::transport::HttpRequest;

/// Adjusts a request before a challenge retry.
///
/// Implementations must leave the body and any signature headers untouched.
pub trait RequestMutator: Send + Sync {
    fn mutate(&self, request: &mut HttpRequest, context: &RetryContext);
}

impl<F> RequestMutator for F
where
    F: Fn(&mut HttpRequest, &RetryContext) + Send + Sync,
{
    fn mutate(&self, request: &mut HttpRequest, context: &RetryContext) {
        self(request, context)
    }
}

const DEFAULT_USER_AGENTS: [&str; 5] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
];

const BROWSER_HEADERS: [(&str, &str); 8] = [
    ("accept", "application/json, text/plain, */*"),
    ("accept-language", "en-US,en;q=0.9"),
    ("accept-encoding", "gzip, deflate, br"),
    ("cache-control", "no-cache"),
    ("pragma", "no-cache"),
    ("sec-fetch-dest", "empty"),
    ("sec-fetch-mode", "cors"),
    ("sec-fetch-site", "same-origin"),
];

/// Makes a request look like it came from a regular browser.
///
/// Each mutation picks a User-Agent from the pool that differs from the one
/// the request currently carries, and sets the usual browser headers.
#[derive(Debug, Clone)]
pub struct BrowserProfile {
    user_agents: Vec<String>,
}

impl Default for BrowserProfile {
    fn default() -> Self {
        Self {
            user_agents: DEFAULT_USER_AGENTS.iter().map(|ua| ua.to_string()).collect(),
        }
    }
}

impl BrowserProfile {
    /// Use a custom User-Agent pool. An empty pool falls back to the default one.
    pub fn new(user_agents: Vec<String>) -> Self {
        if user_agents.is_empty() {
            Self::default()
        } else {
            Self { user_agents }
        }
    }

    pub fn user_agents(&self) -> &[String] {
        &self.user_agents
    }

    /// A pool entry other than `current`, when the pool has one.
    pub fn pick_user_agent(&self, current: Option<&str>) -> Option<&str> {
        let candidates: Vec<&String> = self
            .user_agents
            .iter()
            .filter(|ua| Some(ua.as_str()) != current)
            .collect();
        candidates
            .choose(&mut rand::thread_rng())
            .copied()
            .map(String::as_str)
    }
}

impl RequestMutator for BrowserProfile {
    fn mutate(&self, request: &mut HttpRequest, context: &RetryContext) {
        let current = request.header_value("user-agent").map(str::to_string);
        if let Some(user_agent) = self.pick_user_agent(current.as_deref()) {
            tracing::debug!(attempt = context.attempt(), "Rotating User-Agent");
            request.set_header("user-agent", user_agent);
        }
        for (name, value) in BROWSER_HEADERS {
            request.set_header(name, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotation_never_repeats_the_current_agent() {
        let profile = BrowserProfile::new(vec!["agent-a".into(), "agent-b".into()]);
        let mut request = HttpRequest::get("https://api.example.com/v1/payments")
            .header("user-agent", "agent-a");

        profile.mutate(&mut request, &RetryContext::default());
        assert_eq!(request.header_value("user-agent"), Some("agent-b"));

        profile.mutate(&mut request, &RetryContext::default());
        assert_eq!(request.header_value("user-agent"), Some("agent-a"));
    }

    #[test]
    fn mutation_leaves_body_and_signature_alone() {
        let profile = BrowserProfile::default();
        let mut request = HttpRequest::post("https://api.example.com/v1/payments")
            .header("x-signature", "abc123")
            .body(r#"{"amount":100}"#);

        profile.mutate(&mut request, &RetryContext::default());

        assert_eq!(request.header_value("x-signature"), Some("abc123"));
        assert_eq!(request.body.as_deref(), Some(r#"{"amount":100}"#));
        assert_eq!(request.header_value("sec-fetch-mode"), Some("cors"));
        assert!(request.header_value("user-agent").is_some());
    }

    #[test]
    fn empty_pool_uses_defaults() {
        assert_eq!(
            BrowserProfile::new(Vec::new()).user_agents().len(),
            DEFAULT_USER_AGENTS.len()
        );
    }
}
