//! Type definitions for the proxy module

use nutype::nutype;
use std::error::Error as StdError;
use std::time::Duration;
use thiserror::Error;

// ========== Size and Capacity Types ==========

/// Maximum size for inbound request bodies in bytes
#[nutype(
    derive(Clone, Copy, Debug, Display, PartialEq, Deserialize, Serialize, TryFrom, AsRef),
    validate(predicate = |size: &usize| *size > 0),
)]
pub struct RequestSizeLimit(usize);

/// Maximum number of streamed bytes kept in memory for one interaction record
#[nutype(
    derive(Clone, Copy, Debug, Display, PartialEq, Deserialize, Serialize, TryFrom, AsRef),
    validate(predicate = |size: &usize| *size > 0),
)]
pub struct CaptureLimit(usize);

// ========== Time Types ==========

/// Upper bound for one upstream wait (connect, response head, or next chunk)
#[nutype(
    derive(Clone, Copy, Debug, PartialEq, TryFrom, AsRef),
    validate(predicate = |timeout: &Duration| !timeout.is_zero()),
)]
pub struct UpstreamTimeout(Duration);

impl UpstreamTimeout {
    pub fn from_millis(millis: u64) -> Result<Self, UpstreamTimeoutError> {
        Self::try_new(Duration::from_millis(millis))
    }

    pub fn duration(&self) -> Duration {
        *self.as_ref()
    }
}

// ========== URL Types ==========

/// Base URL every proxied path is appended to
#[nutype(
    sanitize(trim),
    derive(Clone, Debug, Display, PartialEq, Deserialize, Serialize, TryFrom, AsRef),
    validate(predicate = |s: &str| {
        (s.starts_with("http://") || s.starts_with("https://")) && s.parse::<http::Uri>().is_ok()
    }),
)]
pub struct UpstreamBaseUrl(String);

impl UpstreamBaseUrl {
    /// Concatenate the base with an inbound path and query, leaving both untouched.
    pub fn join(&self, path_and_query: &str) -> String {
        format!("{}{}", self.as_ref().trim_end_matches('/'), path_and_query)
    }
}

// ========== Configuration ==========

/// Plain values the proxy core consumes at construction time
#[derive(Clone, Debug)]
pub struct ProxyConfig {
    /// Upstream every non-health request is forwarded to
    pub upstream: UpstreamBaseUrl,
    /// Maximum inbound request body size
    pub max_request_size: RequestSizeLimit,
    /// Maximum streamed content retained for the log record
    pub max_stream_capture: CaptureLimit,
    /// TCP/TLS connect timeout
    pub connect_timeout: UpstreamTimeout,
    /// Wait for the response head and for each subsequent body chunk
    pub read_timeout: UpstreamTimeout,
    /// How long idle upstream connections stay pooled
    pub pool_idle_timeout: Duration,
}

pub const DEFAULT_MAX_REQUEST_SIZE: usize = 10 * 1024 * 1024;
pub const DEFAULT_MAX_STREAM_CAPTURE: usize = 8 * 1024 * 1024;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 60_000;
pub const DEFAULT_POOL_IDLE_TIMEOUT_SECS: u64 = 90;

impl ProxyConfig {
    /// Configuration with default limits and timeouts for the given upstream.
    pub fn for_upstream(upstream: UpstreamBaseUrl) -> Self {
        Self {
            upstream,
            max_request_size: RequestSizeLimit::try_new(DEFAULT_MAX_REQUEST_SIZE)
                .expect("10MB is valid"),
            max_stream_capture: CaptureLimit::try_new(DEFAULT_MAX_STREAM_CAPTURE)
                .expect("8MB is valid"),
            connect_timeout: UpstreamTimeout::from_millis(DEFAULT_CONNECT_TIMEOUT_MS)
                .expect("10s is valid"),
            read_timeout: UpstreamTimeout::from_millis(DEFAULT_READ_TIMEOUT_MS)
                .expect("60s is valid"),
            pool_idle_timeout: Duration::from_secs(DEFAULT_POOL_IDLE_TIMEOUT_SECS),
        }
    }
}

// ========== Errors ==========

/// Failures that abort forwarding of a single request
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("Request body exceeds maximum of {max_size} bytes")]
    BodyTooLarge { max_size: RequestSizeLimit },

    #[error("Failed to read request body: {0}")]
    RequestBody(String),

    #[error("Invalid target URL: {0}")]
    InvalidTargetUrl(String),

    #[error("Failed to connect to upstream: {0}")]
    UpstreamConnect(String),

    #[error("Upstream timed out after {0:?}")]
    UpstreamTimeout(Duration),

    #[error("Upstream protocol error: {0}")]
    UpstreamProtocol(String),

    #[error("Client disconnected before the response was delivered")]
    ClientDisconnected,
}

impl ProxyError {
    /// Stable code used in the error envelope and the error snapshot
    pub fn code(&self) -> &'static str {
        match self {
            Self::BodyTooLarge { .. } => "BODY_TOO_LARGE",
            Self::RequestBody(_) => "REQUEST_BODY_ERROR",
            Self::InvalidTargetUrl(_) => "INVALID_TARGET_URL",
            Self::UpstreamConnect(_) => "UPSTREAM_CONNECT_ERROR",
            Self::UpstreamTimeout(_) => "UPSTREAM_TIMEOUT",
            Self::UpstreamProtocol(_) => "UPSTREAM_PROTOCOL_ERROR",
            Self::ClientDisconnected => "CLIENT_DISCONNECTED",
        }
    }
}

/// Result type for proxy operations
pub type ProxyResult<T> = Result<T, ProxyError>;

/// Render an error with its whole source chain, `outer: inner: root`.
pub fn error_chain(error: &(dyn StdError + 'static)) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}
