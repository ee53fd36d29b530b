//! Error types shared across the exporter.
//!
//! Source errors never leave the scheduler: they are counted, logged and
//! forwarded to the engine as a failed [`crate::types::CollectionResult`].
//! Only [`StartupError`] (which wraps [`ConfigError`]) is fatal.

use std::time::Duration;

use thiserror::Error;

/// Failure of a single call (or whole poll) against a node or an external
/// reference service.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum SourceError {
    /// TCP connect / DNS / transport failure, or a 5xx from the server.
    #[error("connection error: {0}")]
    Connection(String),
    /// Credentials were rejected (HTTP 401 / 403).
    #[error("authentication rejected: {0}")]
    Auth(String),
    /// The call did not complete within its budget.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    /// The body could not be decoded into the expected record.
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    /// The node answered but is not ready to serve (HTTP 503, RPC warm-up).
    #[error("node busy: {0}")]
    NodeBusy(String),
    /// The external service throttled us (HTTP 429).
    #[error("rate limited: {0}")]
    RateLimited(String),
}

impl SourceError {
    /// Stable label value used for the `kind` label of error counters.
    pub fn kind(&self) -> &'static str {
        match self {
            SourceError::Connection(_) => "connection",
            SourceError::Auth(_) => "auth",
            SourceError::Timeout(_) => "timeout",
            SourceError::MalformedResponse(_) => "malformed_response",
            SourceError::NodeBusy(_) => "node_busy",
            SourceError::RateLimited(_) => "rate_limited",
        }
    }

    pub(crate) fn malformed(context: &str, err: impl std::fmt::Display) -> Self {
        SourceError::MalformedResponse(format!("{context}: {err}"))
    }
}

/// A derived-metric formula was handed inputs it cannot work with.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum ComputationError {
    #[error("{metric}: reference value is zero")]
    ZeroReference { metric: &'static str },
    #[error("{metric}: invalid input {input:?}")]
    InvalidInput { metric: &'static str, input: String },
}

/// Startup configuration problems. All of them abort the process.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("no chain enabled; configure at least one of bitcoin or ethereum")]
    NoChainEnabled,
    #[error("missing required endpoint `{0}`")]
    MissingEndpoint(&'static str),
    #[error("missing credentials for `{0}`")]
    MissingCredentials(&'static str),
    #[error("`{name}`: timeout {timeout:?} must be non-zero and shorter than interval {interval:?}")]
    InvalidSchedule {
        name: &'static str,
        interval: Duration,
        timeout: Duration,
    },
    #[error("stale_after_failures must be at least 1")]
    InvalidStaleThreshold,
}

/// Errors that abort startup.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("failed to bind metrics listener on {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("metrics registry error: {0}")]
    Registry(#[from] prometheus::Error),
    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}
