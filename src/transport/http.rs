//! reqwest-backed transport.

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;

use super::{HttpRequest, HttpResponse, Transport, TransportError, TransportErrorKind};

static SHARED_CLIENT: OnceLock<reqwest::Client> = OnceLock::new();

/// Get (or create) the shared reqwest client.
pub fn shared_client() -> &'static reqwest::Client {
    SHARED_CLIENT.get_or_init(|| {
        reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(10)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new())
    })
}

/// [`Transport`] over a reqwest client.
///
/// Base URL, TLS and proxy settings live on the wrapped client, so every retry
/// that goes through the same `ReqwestTransport` keeps them.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new(shared_client().clone())
    }
}

impl ReqwestTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut builder = self
            .client
            .request(request.method.clone(), &request.url)
            .headers(request.headers.clone());
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await.map_err(map_reqwest_error)?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.text().await.map_err(map_reqwest_error)?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

/// Map a reqwest error onto a transport error kind and code.
pub fn map_reqwest_error(error: reqwest::Error) -> TransportError {
    let message = error.to_string();
    if error.is_timeout() {
        TransportError::timeout(message)
    } else if error.is_connect() {
        let lower = message.to_ascii_lowercase();
        if lower.contains("dns") || lower.contains("resolve") {
            TransportError::new(TransportErrorKind::Dns, message).with_code("ENOTFOUND")
        } else {
            TransportError::connect(message)
        }
    } else if error.is_builder() {
        TransportError::new(TransportErrorKind::Request, message).with_code("EINVALIDREQUEST")
    } else if error.is_body() || error.is_decode() {
        TransportError::reset(message)
    } else if error.is_request() {
        TransportError::new(TransportErrorKind::Other, message).with_code("EREQUEST")
    } else {
        TransportError::new(TransportErrorKind::Other, message)
    }
}
