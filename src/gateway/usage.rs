//! Usage tracking via the UsageSink trait.
//!
//! The retrying gateway logs every attempt through a UsageSink. This keeps the
//! annotation code independent of where usage ends up:
//! - Pipelines that care about spend plug in their own sink
//! - `TracingUsageSink` emits one structured event per call
//! - Tests use `NoopUsageSink` or a collecting mock

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Status of a provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatus {
    Success,
    Error,
}

impl CallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Success => "success",
            CallStatus::Error => "error",
        }
    }
}

/// Record of a single gateway call attempt.
#[derive(Debug, Clone)]
pub struct ProviderCallRecord {
    /// Provider route, e.g. "openai" for "openai/o3".
    pub route: String,
    /// Model used.
    pub model: String,
    /// Tool the request forced, if any.
    pub tool_name: Option<String>,
    /// Input tokens consumed.
    pub input_tokens: u32,
    /// Output tokens generated.
    pub output_tokens: u32,
    /// User who made the request (if known).
    pub user_id: Option<Uuid>,
    /// Job this request is part of (if any).
    pub job_id: Option<Uuid>,
    /// 0-based attempt number within one retried call.
    pub attempt: u32,
    /// Latency in milliseconds.
    pub latency_ms: u64,
    /// Call status.
    pub status: CallStatus,
    /// Error code if status is Error.
    pub error_code: Option<String>,
    /// Provider request id reported with a failed attempt.
    pub request_id: Option<String>,
    /// Which code path made this call.
    pub caller: &'static str,
    /// When the call was made.
    pub timestamp: DateTime<Utc>,
}

impl ProviderCallRecord {
    /// Create a new record with required fields, defaulting others.
    pub fn new(route: impl Into<String>, model: impl Into<String>, caller: &'static str) -> Self {
        Self {
            route: route.into(),
            model: model.into(),
            tool_name: None,
            input_tokens: 0,
            output_tokens: 0,
            user_id: None,
            job_id: None,
            attempt: 0,
            latency_ms: 0,
            status: CallStatus::Success,
            error_code: None,
            request_id: None,
            caller,
            timestamp: Utc::now(),
        }
    }

    pub fn tool(mut self, name: Option<String>) -> Self {
        self.tool_name = name;
        self
    }

    pub fn tokens(mut self, input: u32, output: u32) -> Self {
        self.input_tokens = input;
        self.output_tokens = output;
        self
    }

    pub fn user(mut self, user_id: Option<Uuid>) -> Self {
        self.user_id = user_id;
        self
    }

    pub fn job(mut self, job_id: Option<Uuid>) -> Self {
        self.job_id = job_id;
        self
    }

    pub fn attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    pub fn latency(mut self, ms: u64) -> Self {
        self.latency_ms = ms;
        self
    }

    pub fn error(mut self, code: impl Into<String>) -> Self {
        self.status = CallStatus::Error;
        self.error_code = Some(code.into());
        self
    }

    pub fn request_id(mut self, id: Option<String>) -> Self {
        self.request_id = id;
        self
    }
}

/// Trait for recording gateway call usage.
///
/// Implement this trait to customize where usage data is stored.
#[async_trait]
pub trait UsageSink: Send + Sync {
    /// Record a call. This should be fire-and-forget:
    /// failures should be logged but not propagated.
    async fn record(&self, record: ProviderCallRecord);
}

/// No-op usage sink that discards all records.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopUsageSink;

#[async_trait]
impl UsageSink for NoopUsageSink {
    async fn record(&self, _record: ProviderCallRecord) {}
}

/// Usage sink that emits one `tracing` event per record.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingUsageSink;

#[async_trait]
impl UsageSink for TracingUsageSink {
    async fn record(&self, record: ProviderCallRecord) {
        tracing::info!(
            route = %record.route,
            model = %record.model,
            tool = record.tool_name.as_deref().unwrap_or("-"),
            tokens = record.input_tokens + record.output_tokens,
            attempt = record.attempt,
            latency_ms = record.latency_ms,
            status = record.status.as_str(),
            error_code = record.error_code.as_deref().unwrap_or("-"),
            request_id = record.request_id.as_deref().unwrap_or("-"),
            caller = record.caller,
            "provider call"
        );
    }
}
