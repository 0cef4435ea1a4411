use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreflowError {
    /// The privileged register channel cannot be opened at all
    #[error("MSR driver unavailable: {0}")]
    DriverUnavailable(String),

    #[error("MSR operation failed: {0}")]
    MsrError(String),

    #[error("Affinity operation failed: {0}")]
    AffinityError(String),

    /// The chip does not implement a requested counter or register
    #[error("Unsupported event: {0}")]
    UnsupportedEvent(String),

    #[error("Session not initialized: {0}")]
    NotInitialized(String),

    #[error("Unknown monitoring config: {0}")]
    UnknownConfig(String),

    #[error("Unsupported architecture: {0}")]
    UnsupportedArchitecture(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("Nix error: {0}")]
    NixError(#[from] nix::Error),

    #[error("Prometheus error: {0}")]
    PrometheusError(#[from] prometheus::Error),
}

impl From<coreflow_raw::MsrError> for CoreflowError {
    fn from(err: coreflow_raw::MsrError) -> Self {
        if err.is_device_unavailable() {
            CoreflowError::DriverUnavailable(err.to_string())
        } else {
            CoreflowError::MsrError(err.to_string())
        }
    }
}

impl CoreflowError {
    /// Session-fatal errors are surfaced once and never retried
    pub fn is_fatal(&self) -> bool {
        matches!(self, CoreflowError::DriverUnavailable(_))
    }
}

pub type Result<T> = std::result::Result<T, CoreflowError>;
