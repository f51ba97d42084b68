//! Error types for the Operations Room.

use thiserror::Error;

/// Result type alias using the Operations Room's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for Operations Room operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Agent session not found
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Event failed structural validation
    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// A collaborator (store, identity service) could not be reached
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// Authentication failed
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() || e.is_timeout() {
            Error::UpstreamUnavailable(e.to_string())
        } else {
            Error::Request(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_not_found() {
        let err = Error::NotFound("test resource".to_string());
        assert_eq!(err.to_string(), "Not found: test resource");
    }

    #[test]
    fn test_error_display_session_not_found() {
        let err = Error::SessionNotFound("S1".to_string());
        assert_eq!(err.to_string(), "Session not found: S1");
    }

    #[test]
    fn test_error_display_invalid_event() {
        let err = Error::InvalidEvent("missing field `agent_id`".to_string());
        assert_eq!(err.to_string(), "Invalid event: missing field `agent_id`");
    }

    #[test]
    fn test_error_display_upstream() {
        let err = Error::UpstreamUnavailable("identity service".to_string());
        assert_eq!(err.to_string(), "Upstream unavailable: identity service");
    }

    #[test]
    fn test_error_display_unauthorized() {
        let err = Error::Unauthorized("token expired".to_string());
        assert_eq!(err.to_string(), "Unauthorized: token expired");
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Serialization(_)));
    }
}
