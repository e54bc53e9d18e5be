//! Gateway boundary to the external LLM client.
//!
//! The crate never speaks HTTP itself. Callers plug a concrete client in
//! behind `ChatGateway`; `RetryingGateway` layers retries and usage
//! recording over any such client.

pub mod error;
pub mod types;
pub mod usage;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::sleep;
use tracing::warn;

use usage::{ProviderCallRecord, UsageSink as UsageSinkTrait};

pub use error::{ErrorContext, ProviderError};
pub use types::*;
pub use usage::{CallStatus, NoopUsageSink, TracingUsageSink, UsageSink};

#[async_trait::async_trait]
pub trait ChatGateway: Send + Sync {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError>;
}

#[async_trait::async_trait]
impl<T: ChatGateway + ?Sized> ChatGateway for Arc<T> {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError> {
        (**self).chat(req).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    pub max_retries: u32,
    pub retry_base_delay: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_base_delay: Duration::from_secs(1),
        }
    }
}

impl GatewayConfig {
    /// Read overrides from the process environment.
    ///
    /// `CRITIC_RUBRICS_MAX_RETRIES` and `CRITIC_RUBRICS_RETRY_BASE_MS`;
    /// unparsable values fall back to the defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let max_retries = lookup("CRITIC_RUBRICS_MAX_RETRIES")
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(defaults.max_retries);
        let retry_base_delay = lookup("CRITIC_RUBRICS_RETRY_BASE_MS")
            .and_then(|s| s.trim().parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.retry_base_delay);
        Self {
            max_retries,
            retry_base_delay,
        }
    }
}

/// Retries retryable failures of an inner gateway and records every attempt.
pub struct RetryingGateway<G: ChatGateway, U: UsageSinkTrait> {
    inner: G,
    usage_sink: Arc<U>,
    config: GatewayConfig,
}

#[async_trait::async_trait]
impl<G: ChatGateway, U: UsageSinkTrait> ChatGateway for RetryingGateway<G, U> {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError> {
        RetryingGateway::chat(self, req).await
    }
}

impl<G: ChatGateway, U: UsageSinkTrait> RetryingGateway<G, U> {
    pub fn new(inner: G, usage_sink: Arc<U>) -> Self {
        Self::with_config(inner, usage_sink, GatewayConfig::default())
    }

    pub fn with_config(inner: G, usage_sink: Arc<U>, config: GatewayConfig) -> Self {
        Self {
            inner,
            usage_sink,
            config,
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError> {
        let mut last_error: Option<ProviderError> = None;

        for attempt in 0..=self.config.max_retries {
            let start = Instant::now();
            let result = self.inner.chat(req.clone()).await;
            let elapsed = start.elapsed();
            match result {
                Ok(resp) => {
                    self.record_usage(&req, Ok(&resp), attempt, elapsed).await;
                    return Ok(resp);
                }
                Err(err) => {
                    self.record_usage(&req, Err(&err), attempt, elapsed).await;

                    if !err.is_retryable() || attempt == self.config.max_retries {
                        return Err(err);
                    }

                    let delay = match &err {
                        ProviderError::RateLimited { retry_after, .. } => {
                            (*retry_after).max(backoff_delay(self.config.retry_base_delay, attempt))
                        }
                        _ => backoff_delay(self.config.retry_base_delay, attempt),
                    };
                    warn!(
                        model = %req.model,
                        attempt,
                        code = err.code(),
                        request_id = err.request_id().unwrap_or("-"),
                        delay_ms = delay.as_millis() as u64,
                        "retrying gateway call"
                    );
                    last_error = Some(err);
                    sleep(delay).await;
                }
            }
        }

        Err(last_error.unwrap_or_else(|| ProviderError::provider("gateway", "unknown error", false)))
    }

    async fn record_usage(
        &self,
        req: &ChatRequest,
        outcome: Result<&ChatResponse, &ProviderError>,
        attempt: u32,
        elapsed: Duration,
    ) {
        let (input, output) = match outcome {
            Ok(resp) => (resp.input_tokens, resp.output_tokens),
            Err(_) => (0, 0),
        };

        let record = ProviderCallRecord::new(req.route(), req.model.clone(), req.attribution.caller)
            .tool(req.tool_choice.as_ref().map(|c| c.function.name.clone()))
            .tokens(input, output)
            .user(req.attribution.user_id)
            .job(req.attribution.job_id)
            .attempt(attempt)
            .latency(elapsed.as_millis() as u64);

        let record = match outcome {
            Ok(_) => record,
            Err(err) => record
                .error(err.code())
                .request_id(err.request_id().map(str::to_string)),
        };

        self.usage_sink.record(record).await;
    }
}

fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let multiplier = 2u64.pow(attempt.min(5));
    base * multiplier as u32
}
