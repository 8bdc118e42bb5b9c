use crate::error::{Error, Result};
use crate::proxy::types::{
    CaptureLimit, ProxyConfig, RequestSizeLimit, UpstreamBaseUrl, UpstreamTimeout,
    DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_MAX_REQUEST_SIZE, DEFAULT_MAX_STREAM_CAPTURE,
    DEFAULT_POOL_IDLE_TIMEOUT_SECS, DEFAULT_READ_TIMEOUT_MS,
};
use config::{builder::DefaultState, Config, ConfigBuilder, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Prefix for environment overrides, e.g. `TAPLINE__UPSTREAM__BASE_URL`
pub const ENV_PREFIX: &str = "TAPLINE";

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub application: ApplicationSettings,
    pub upstream: UpstreamSettings,
    pub limits: LimitSettings,
    pub log_sink: LogSinkSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApplicationSettings {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct UpstreamSettings {
    pub base_url: String,
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
    pub pool_idle_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LimitSettings {
    pub max_request_body_bytes: usize,
    pub max_stream_capture_bytes: usize,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogSinkKind {
    /// One JSON object per line in a single file
    Jsonl,
    /// One JSON file per interaction
    Directory,
    Disabled,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogSinkSettings {
    pub kind: LogSinkKind,
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSettings {
    pub level: String,
    pub format: String,
}

impl Settings {
    /// Load defaults, then `config/` files, then `TAPLINE__*` environment variables.
    pub fn new() -> Result<Self> {
        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let config = Self::builder()?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{environment}")).required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Builder preloaded with every default, for callers that add their own sources.
    pub fn builder() -> Result<ConfigBuilder<DefaultState>> {
        Ok(Config::builder()
            .set_default("application.host", "127.0.0.1")?
            .set_default("application.port", 8000)?
            .set_default("upstream.base_url", "https://api.openai.com")?
            .set_default("upstream.connect_timeout_ms", DEFAULT_CONNECT_TIMEOUT_MS)?
            .set_default("upstream.read_timeout_ms", DEFAULT_READ_TIMEOUT_MS)?
            .set_default("upstream.pool_idle_timeout_secs", DEFAULT_POOL_IDLE_TIMEOUT_SECS)?
            .set_default("limits.max_request_body_bytes", DEFAULT_MAX_REQUEST_SIZE as u64)?
            .set_default("limits.max_stream_capture_bytes", DEFAULT_MAX_STREAM_CAPTURE as u64)?
            .set_default("log_sink.kind", "jsonl")?
            .set_default("log_sink.path", "proxy_logs.jsonl")?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "json")?)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.application.host, self.application.port)
    }

    /// Validate the raw values into the plain configuration the proxy consumes.
    pub fn proxy_config(&self) -> Result<ProxyConfig> {
        let upstream = UpstreamBaseUrl::try_new(self.upstream.base_url.clone())
            .map_err(|e| Error::invalid_setting("upstream.base_url", e))?;
        let max_request_size = RequestSizeLimit::try_new(self.limits.max_request_body_bytes)
            .map_err(|e| Error::invalid_setting("limits.max_request_body_bytes", e))?;
        let max_stream_capture = CaptureLimit::try_new(self.limits.max_stream_capture_bytes)
            .map_err(|e| Error::invalid_setting("limits.max_stream_capture_bytes", e))?;
        let connect_timeout = UpstreamTimeout::from_millis(self.upstream.connect_timeout_ms)
            .map_err(|e| Error::invalid_setting("upstream.connect_timeout_ms", e))?;
        let read_timeout = UpstreamTimeout::from_millis(self.upstream.read_timeout_ms)
            .map_err(|e| Error::invalid_setting("upstream.read_timeout_ms", e))?;

        Ok(ProxyConfig {
            upstream,
            max_request_size,
            max_stream_capture,
            connect_timeout,
            read_timeout,
            pool_idle_timeout: Duration::from_secs(self.upstream.pool_idle_timeout_secs),
        })
    }
}
