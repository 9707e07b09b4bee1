//! Error types for webhook startup and serving
//!
//! Per-request failures live in [`crate::webhook::WebhookError`]; everything
//! here is fatal to the process.

use thiserror::Error;

/// Main error type for configuration and server lifecycle
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Invalid or inconsistent configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// The configured label selector expression could not be parsed
    #[error("label selector error: {0}")]
    Selector(String),

    /// TLS certificate or key could not be loaded
    #[error("TLS error: {0}")]
    Tls(String),

    /// The HTTPS server failed to bind or serve
    #[error("server error: {0}")]
    Server(String),

    /// Tracing subscriber could not be installed
    #[error("telemetry error: {0}")]
    Telemetry(String),
}

impl Error {
    /// Create a configuration error with the given message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a selector error with the given message
    pub fn selector(msg: impl Into<String>) -> Self {
        Self::Selector(msg.into())
    }

    /// Create a TLS error with the given message
    pub fn tls(msg: impl Into<String>) -> Self {
        Self::Tls(msg.into())
    }

    /// Create a server error with the given message
    pub fn server(msg: impl Into<String>) -> Self {
        Self::Server(msg.into())
    }
}
