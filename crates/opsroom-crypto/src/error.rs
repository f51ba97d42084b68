//! Error types for envelope signing.

use thiserror::Error;

/// Signing errors.
///
/// Verification never produces one of these; it answers `false` instead.
#[derive(Error, Debug)]
pub enum CryptoError {
    /// The shared secret is empty.
    #[error("Shared secret must not be empty")]
    EmptySecret,

    /// The event could not be turned into JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for signing operations.
pub type CryptoResult<T> = Result<T, CryptoError>;
