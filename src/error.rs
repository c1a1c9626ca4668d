//! Error types for the alias daemon.

use thiserror::Error;

/// Configuration could not be loaded. Fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required setting is absent or empty.
    #[error("Required setting '{0}' is not set")]
    Missing(&'static str),

    /// The layered configuration could not be extracted.
    #[error("Failed to load configuration: {0}")]
    Load(#[from] figment::Error),

    /// The token secret file could not be read.
    #[error("Failed to read secret file {path}: {source}")]
    SecretFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The API token cannot be sent as a header value.
    #[error("API token contains characters not allowed in a header")]
    InvalidToken,

    /// The appliance address does not form a usable URL.
    #[error("Invalid appliance address '{0}'")]
    InvalidHost(String),
}

/// Failures talking to the pfSense REST API.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The override or alias addressed by the call does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The record being created already exists.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The API token was rejected.
    #[error("Authentication rejected (HTTP {0})")]
    Auth(u16),

    /// Any other non-success status.
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Connection failure, TLS failure or timeout.
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The response body was not the expected JSON.
    #[error("Unexpected response body: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Failures reading container metadata from the runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The container no longer exists.
    #[error("Container {0} not found")]
    NotFound(String),

    #[error("Docker error: {0}")]
    Docker(#[from] bollard::errors::Error),
}

/// Failure while converging one container's alias.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}
