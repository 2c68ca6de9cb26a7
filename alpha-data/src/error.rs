use crate::endpoint::Method;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::time::Duration;
use thiserror::Error;

/// Failure of a single `(method, url)` attempt inside an [`EndpointSet`](crate::endpoint::EndpointSet).
///
/// Recovered locally by the [`FailoverFetcher`](crate::fetch::FailoverFetcher), which moves on
/// to the next attempt.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Deserialize, Serialize, Error)]
pub enum AttemptError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("upstream rejected request with status {0}")]
    Rejected(u16),
}

impl AttemptError {
    /// Determine if the upstream signalled throttling (HTTP 429) or an IP ban (HTTP 418).
    pub fn is_throttle(&self) -> bool {
        matches!(self, AttemptError::Rejected(429 | 418))
    }

    pub fn is_rejection(&self) -> bool {
        matches!(self, AttemptError::Rejected(_))
    }
}

/// Record of a failed attempt, kept so an exhausted [`FetchError`] can explain itself.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Deserialize, Serialize)]
pub struct AttemptFailure {
    pub method: Method,
    pub url: String,
    pub error: AttemptError,
}

/// All errors surfaced by the [`FailoverFetcher`](crate::fetch::FailoverFetcher).
#[derive(Debug, Clone, Eq, PartialEq, Hash, Deserialize, Serialize, Error)]
pub enum FetchError {
    #[error("no endpoints configured for {0}")]
    NoEndpoints(SmolStr),

    #[error("all {} endpoints exhausted for {endpoint_set}", .attempts.len())]
    AllEndpointsExhausted {
        endpoint_set: SmolStr,
        attempts: Vec<AttemptFailure>,
    },
}

impl FetchError {
    /// Failed attempts in the order they were tried.
    pub fn attempts(&self) -> &[AttemptFailure] {
        match self {
            FetchError::NoEndpoints(_) => &[],
            FetchError::AllEndpointsExhausted { attempts, .. } => attempts,
        }
    }

    /// Every attempt reached the upstream and was answered with a non-2xx status.
    pub fn is_rejection(&self) -> bool {
        let attempts = self.attempts();
        !attempts.is_empty() && attempts.iter().all(|attempt| attempt.error.is_rejection())
    }

    pub fn is_throttle(&self) -> bool {
        self.attempts().iter().any(|attempt| attempt.error.is_throttle())
    }
}

/// Payload level normalisation failures. A 2xx response with an unusable body lands here.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Deserialize, Serialize, Error)]
pub enum NormaliseError {
    #[error("payload is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("upstream rejected request: {0}")]
    UpstreamRejection(String),

    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),
}

/// Per-record normalisation failures. The record is dropped and counted, the batch continues.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Error)]
pub enum RecordError {
    #[error("record is not a JSON object")]
    NotObject,

    #[error("no alias present for required field {0}")]
    MissingField(&'static str),

    #[error("field {field} is not numeric: {value}")]
    NotNumeric { field: &'static str, value: String },
}

/// Per-item [`EnrichmentPipeline`](crate::enrich::EnrichmentPipeline) failures.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Error)]
pub enum EnrichError {
    #[error("kline fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("kline payload unusable: {0}")]
    Normalise(#[from] NormaliseError),

    #[error("kline row invalid: {0}")]
    Record(#[from] RecordError),

    #[error("kline response contained no candles")]
    NoCandles,

    #[error("rate limited by upstream after {0} consecutive rejections")]
    RateLimited(usize),
}

/// Failure of a non-primary data source. Reported alongside results, never fatal.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Deserialize, Serialize, Error)]
pub enum SourceError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Normalise(#[from] NormaliseError),
}

/// Fatal outcomes of a [`Monitor`](crate::monitor::Monitor) cycle.
///
/// Only the primary market snapshot can fail a cycle; everything else degrades into the report.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Deserialize, Serialize, Error)]
pub enum PipelineError {
    #[error("market snapshot unavailable: {0}")]
    MarketUnavailable(FetchError),

    #[error("market snapshot unusable: {0}")]
    MarketSnapshotInvalid(NormaliseError),
}

impl From<SourceError> for PipelineError {
    fn from(value: SourceError) -> Self {
        match value {
            SourceError::Fetch(error) => Self::MarketUnavailable(error),
            SourceError::Normalise(error) => Self::MarketSnapshotInvalid(error),
        }
    }
}

/// Invalid [`MonitorConfig`](crate::config::MonitorConfig) input.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },

    #[error("invalid endpoint url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("jitter minimum {min_ms}ms exceeds maximum {max_ms}ms")]
    InvalidJitter { min_ms: u64, max_ms: u64 },
}
