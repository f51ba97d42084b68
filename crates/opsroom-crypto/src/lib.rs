//! # opsroom-crypto
//!
//! HMAC-SHA256 signing and verification of operation event envelopes.
//!
//! ## Example
//!
//! ```rust
//! use opsroom_core::OperationEvent;
//! use opsroom_crypto::{canonical_bytes, sign_envelope, verify};
//!
//! let event = OperationEvent::new(
//!     "agent.session.started",
//!     "agent-1",
//!     "sess-1",
//!     serde_json::Map::new(),
//! );
//! let envelope = sign_envelope(b"shared-secret", event, 1_767_225_600_000).unwrap();
//!
//! let bytes = canonical_bytes(&envelope.event, &envelope.timestamp_ms).unwrap();
//! let signature = envelope.signature.as_deref().unwrap();
//! assert!(verify(b"shared-secret", &bytes, signature));
//! assert!(!verify(b"other-secret", &bytes, signature));
//! ```

pub mod error;
pub mod signing;

pub use error::{CryptoError, CryptoResult};
pub use signing::{
    canonical_bytes, header_value, sign, sign_envelope, verify, EnvelopeSigner, DIGEST_LEN,
    SIGNATURE_PREFIX,
};
