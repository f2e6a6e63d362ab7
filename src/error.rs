//! Error types for the sidecar.

use std::net::SocketAddr;

use thiserror::Error;

/// Sidecar error type.
#[derive(Error, Debug)]
pub enum Error {
    /// Environment configuration could not be resolved
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Engine launch, readiness or shutdown failed
    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] crate::engine::lifecycle::LifecycleError),

    /// HTTP client could not be built
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    /// Inbound listener could not be opened
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Inbound server failed while running
    #[error("Server error: {0}")]
    Server(#[source] std::io::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for sidecar operations.
pub type Result<T> = std::result::Result<T, Error>;
