//! Error types for the client crate.

use thiserror::Error;

/// Why an event could not be logged.
///
/// Logging never panics; every failure is returned to the caller.
#[derive(Debug, Error)]
pub enum LogError {
    /// `log_event` was called before `configure`.
    #[error("Logger is not configured")]
    NotConfigured,

    #[error("Invalid logger configuration: {0}")]
    Config(String),

    /// The request never produced a response (connect, timeout, DNS).
    #[error("Transport error: {0}")]
    Transport(String),

    /// The endpoint answered with a non-2xx status.
    #[error("Endpoint rejected event ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<reqwest::Error> for LogError {
    fn from(err: reqwest::Error) -> Self {
        LogError::Transport(err.to_string())
    }
}

impl From<opsroom_crypto::CryptoError> for LogError {
    fn from(err: opsroom_crypto::CryptoError) -> Self {
        match err {
            opsroom_crypto::CryptoError::EmptySecret => {
                LogError::Config("shared secret must not be empty".to_string())
            }
            other => LogError::Serialization(other.to_string()),
        }
    }
}

/// Viewer setup errors. Connection failures are retried, not returned.
#[derive(Debug, Error)]
pub enum ViewerError {
    #[error("Invalid viewer configuration: {0}")]
    Config(String),
}
