use crate::interaction::sink::LogWriteError;
use thiserror::Error;

/// Tapline application error types
///
/// Per-request failures are `ProxyError`s and never surface here; these are
/// the errors that stop the service from starting or running.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ::config::ConfigError),

    #[error("Invalid setting {field}: {reason}")]
    InvalidSetting { field: &'static str, reason: String },

    #[error("Interaction log error: {0}")]
    LogSink(#[from] LogWriteError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn invalid_setting(field: &'static str, reason: impl std::fmt::Display) -> Self {
        Self::InvalidSetting {
            field,
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
