//! HMAC-SHA256 signing of operation event envelopes.
//!
//! The signed byte string is the compact JSON of
//!
//! ```text
//! {"event":{...},"timestamp":1767225600000}
//! ```
//!
//! with the event's own key order preserved. Producers sign the bytes they
//! are about to send; the verifier rebuilds the same bytes from the decoded
//! `event` and `timestamp` values (serde_json keeps object key order) and
//! compares digests in constant time.

use hmac::{Hmac, Mac};
use serde::Serialize;
use serde_json::Value;
use sha2::Sha256;
use zeroize::Zeroizing;

use opsroom_core::{OperationEvent, SignedEnvelope};

use crate::error::{CryptoError, CryptoResult};

type HmacSha256 = Hmac<Sha256>;

/// Prefix used when the signature travels in an HTTP header.
pub const SIGNATURE_PREFIX: &str = "sha256=";

/// Length of a SHA-256 HMAC digest in bytes.
pub const DIGEST_LEN: usize = 32;

#[derive(Serialize)]
struct Canonical<'a, E: ?Sized, T: ?Sized> {
    event: &'a E,
    timestamp: &'a T,
}

/// Build the exact bytes that get signed for an envelope.
///
/// `event` is either the typed [`OperationEvent`] (producer side) or the
/// decoded JSON value of the received event (verifier side). Both serialize
/// to the same bytes as long as key order is untouched.
pub fn canonical_bytes<E, T>(event: &E, timestamp: &T) -> CryptoResult<Vec<u8>>
where
    E: Serialize + ?Sized,
    T: Serialize + ?Sized,
{
    Ok(serde_json::to_vec(&Canonical { event, timestamp })?)
}

/// Sign `bytes` with `secret`, returning the lowercase hex digest.
pub fn sign(secret: &[u8], bytes: &[u8]) -> CryptoResult<String> {
    let mut mac = new_mac(secret).ok_or(CryptoError::EmptySecret)?;
    mac.update(bytes);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Check `signature` against `bytes` in constant time.
///
/// Accepts a bare hex digest or the `sha256=` header form. Malformed hex, a
/// wrong digest length or an empty secret all answer `false`.
pub fn verify(secret: &[u8], bytes: &[u8], signature: &str) -> bool {
    let Some(mut mac) = new_mac(secret) else {
        return false;
    };
    let signature = signature.trim();
    let hex_part = signature
        .strip_prefix(SIGNATURE_PREFIX)
        .unwrap_or(signature);
    let Ok(expected) = hex::decode(hex_part) else {
        return false;
    };
    if expected.len() != DIGEST_LEN {
        return false;
    }
    mac.update(bytes);
    mac.verify_slice(&expected).is_ok()
}

/// Header form of a hex signature.
pub fn header_value(signature: &str) -> String {
    format!("{}{}", SIGNATURE_PREFIX, signature)
}

/// Wrap and sign an event stamped at `timestamp_ms`.
pub fn sign_envelope(
    secret: &[u8],
    event: OperationEvent,
    timestamp_ms: i64,
) -> CryptoResult<SignedEnvelope> {
    let bytes = canonical_bytes(&event, &timestamp_ms)?;
    let signature = sign(secret, &bytes)?;
    Ok(SignedEnvelope {
        event,
        timestamp_ms,
        signature: Some(signature),
    })
}

fn new_mac(secret: &[u8]) -> Option<HmacSha256> {
    if secret.is_empty() {
        return None;
    }
    HmacSha256::new_from_slice(secret).ok()
}

/// Shared-secret holder for a long-lived signer or verifier.
///
/// The secret is wiped from memory on drop and never printed.
#[derive(Clone)]
pub struct EnvelopeSigner {
    secret: Zeroizing<Vec<u8>>,
}

impl EnvelopeSigner {
    pub fn new(secret: impl AsRef<[u8]>) -> CryptoResult<Self> {
        let secret = secret.as_ref();
        if secret.is_empty() {
            return Err(CryptoError::EmptySecret);
        }
        Ok(Self {
            secret: Zeroizing::new(secret.to_vec()),
        })
    }

    pub fn sign(&self, bytes: &[u8]) -> CryptoResult<String> {
        sign(&self.secret, bytes)
    }

    pub fn verify(&self, bytes: &[u8], signature: &str) -> bool {
        verify(&self.secret, bytes, signature)
    }

    pub fn sign_envelope(
        &self,
        event: OperationEvent,
        timestamp_ms: i64,
    ) -> CryptoResult<SignedEnvelope> {
        sign_envelope(&self.secret, event, timestamp_ms)
    }

    /// Verify a received envelope from its decoded `event` and `timestamp`
    /// values. Any serialization problem counts as a mismatch.
    pub fn verify_parts(&self, event: &Value, timestamp: &Value, signature: &str) -> bool {
        match canonical_bytes(event, timestamp) {
            Ok(bytes) => self.verify(&bytes, signature),
            Err(_) => false,
        }
    }
}

impl std::fmt::Debug for EnvelopeSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvelopeSigner")
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_signature_format() {
        let sig = sign(b"my-secret", br#"{"event":{},"timestamp":1}"#).unwrap();
        assert_eq!(sig.len(), 64);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(sig, sig.to_lowercase());
    }

    #[test]
    fn test_sign_rejects_empty_secret() {
        assert!(matches!(sign(b"", b"x"), Err(CryptoError::EmptySecret)));
        assert!(matches!(
            EnvelopeSigner::new(""),
            Err(CryptoError::EmptySecret)
        ));
    }

    #[test]
    fn test_verify_accepts_header_form() {
        let sig = sign(b"s", b"body").unwrap();
        assert!(verify(b"s", b"body", &sig));
        assert!(verify(b"s", b"body", &header_value(&sig)));
        assert!(verify(b"s", b"body", &format!("  {}\n", sig)));
    }

    #[test]
    fn test_verify_malformed_is_false() {
        assert!(!verify(b"s", b"body", ""));
        assert!(!verify(b"s", b"body", "not-hex"));
        assert!(!verify(b"s", b"body", "abcd"));
        assert!(!verify(b"s", b"body", &"0".repeat(66)));
        assert!(!verify(b"s", b"body", "sha256="));
        assert!(!verify(b"s", b"body", "é"));
        let sig = sign(b"s", b"body").unwrap();
        assert!(!verify(b"", b"body", &sig));
    }

    #[test]
    fn test_canonical_bytes_key_order() {
        let event = json!({"id": "evt-x-1", "type": "x", "payload": {"b": 1, "a": 2}});
        let bytes = canonical_bytes(&event, &json!(5)).unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"event":{"id":"evt-x-1","type":"x","payload":{"b":1,"a":2}},"timestamp":5}"#
        );
    }

    #[test]
    fn test_signer_debug_redacts_secret() {
        let signer = EnvelopeSigner::new("super-secret").unwrap();
        let debug = format!("{:?}", signer);
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("REDACTED"));
    }
}
