//! Resilient client: a transport wrapped in the standard pipeline.

pub mod rate_limit;

pub use rate_limit::{RateLimitSnapshot, RateLimitTracker};

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::{ResilienceConfig, ResilienceOptions};
use crate::error::Result;
use crate::handler::error_interceptor;
use crate::interceptor::{
    ChallengeInterceptor, DefaultHeaders, DefaultTimeout, NetworkInterceptor, Pipeline,
    RateLimitInterceptor,
};
use crate::transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport, TransportError};

/// Records rate-limit headers of every response passing through.
struct ObservedTransport {
    inner: Arc<dyn Transport>,
    tracker: RateLimitTracker,
}

#[async_trait]
impl Transport for ObservedTransport {
    async fn send(&self, request: &HttpRequest) -> std::result::Result<HttpResponse, TransportError> {
        let response = self.inner.send(request).await?;
        self.tracker.observe(&response);
        Ok(response)
    }
}

/// Standard pipeline: default headers and timeout, then the challenge,
/// rate-limit and network interceptors, then the catch-all error handler.
/// Disabled sections are left out.
pub fn standard_pipeline(options: &ResilienceOptions) -> Result<Pipeline> {
    let config = &options.config;
    config.validate()?;

    let mut pipeline = Pipeline::new(options.detector.clone())
        .with_request_interceptor(Arc::new(DefaultHeaders::default()))
        .with_request_interceptor(Arc::new(DefaultTimeout(config.request_timeout())));

    if config.challenge.enabled {
        pipeline.add_error_interceptor(Arc::new(ChallengeInterceptor::from_settings(
            &config.challenge,
            options.mutator.clone(),
            options.on_retry.clone(),
        )?));
    }
    if config.rate_limit.enabled {
        pipeline.add_error_interceptor(Arc::new(RateLimitInterceptor::from_settings(
            &config.rate_limit,
            options.on_retry.clone(),
        )?));
    }
    if config.network.enabled {
        pipeline.add_error_interceptor(Arc::new(NetworkInterceptor::from_settings(
            &config.network,
            config.request_timeout(),
            options.on_retry.clone(),
        )?));
    }
    // Terminal errors and recoveries are reported once, by the pipeline.
    let handler_options = ResilienceOptions {
        on_error: None,
        on_recovery: None,
        ..options.clone()
    };
    pipeline.add_error_interceptor(error_interceptor(&handler_options)?);
    if let Some(hook) = &options.on_error {
        pipeline = pipeline.with_on_error(hook.clone());
    }
    if let Some(hook) = &options.on_recovery {
        pipeline = pipeline.with_on_recovery(hook.clone());
    }
    Ok(pipeline)
}

/// Sends requests through a pipeline over one transport.
#[derive(Clone)]
pub struct ResilientClient {
    transport: Arc<dyn Transport>,
    pipeline: Arc<Pipeline>,
    rate_limits: RateLimitTracker,
}

impl std::fmt::Debug for ResilientClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientClient")
            .field("pipeline", &self.pipeline)
            .field("rate_limits", &self.rate_limits.snapshot())
            .finish()
    }
}

impl ResilientClient {
    /// Wrap `transport` in the standard pipeline.
    pub fn new(transport: Arc<dyn Transport>, options: ResilienceOptions) -> Result<Self> {
        Ok(Self::with_pipeline(transport, standard_pipeline(&options)?))
    }

    /// Wrap `transport` in a custom pipeline.
    pub fn with_pipeline(transport: Arc<dyn Transport>, pipeline: Pipeline) -> Self {
        let rate_limits = RateLimitTracker::new();
        let transport: Arc<dyn Transport> = Arc::new(ObservedTransport {
            inner: transport,
            tracker: rate_limits.clone(),
        });
        Self {
            transport,
            pipeline: Arc::new(pipeline),
            rate_limits,
        }
    }

    /// Standard pipeline over the shared reqwest client.
    pub fn from_config(config: ResilienceConfig) -> Result<Self> {
        Self::new(
            Arc::new(ReqwestTransport::default()),
            ResilienceOptions::new(config),
        )
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.send_with_cancel(request, CancellationToken::new()).await
    }

    /// Send, giving up promptly once `cancel` fires.
    pub async fn send_with_cancel(
        &self,
        request: HttpRequest,
        cancel: CancellationToken,
    ) -> Result<HttpResponse> {
        self.pipeline.execute(&self.transport, request, cancel).await
    }

    /// Rate-limit state from the most recent response that reported it.
    pub fn rate_limit_snapshot(&self) -> Option<RateLimitSnapshot> {
        self.rate_limits.snapshot()
    }
}
