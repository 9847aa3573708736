//! HMAC-SHA-256 payload signing with timestamp and nonce binding
//!
//! Signatures cover `"{timestamp}.{nonce}.{requestId}." + payload`, so a
//! valid signature cannot be replayed against a different request id or a
//! different body.

use chrono::Utc;
use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// Minimum accepted signing secret length, in bytes.
pub const MIN_SECRET_LEN: usize = 32;

/// Maximum accepted clock skew between signer and verifier.
pub const MAX_CLOCK_SKEW_MS: i64 = 5 * 60 * 1000;

/// Nonce length in raw bytes (hex-encoded on the wire).
pub const NONCE_LEN: usize = 16;

/// HMAC-SHA-256 signer for webhook payloads.
///
/// # Examples
///
/// ```rust
/// use agentguard_core::HmacSigner;
///
/// let signer = HmacSigner::new(b"0123456789abcdef0123456789abcdef").unwrap();
/// let sig = signer.sign(b"payload", "req-1", 1_700_000_000_000, "a1b2c3");
/// assert_eq!(sig.len(), 64);
/// ```
#[derive(Clone)]
pub struct HmacSigner {
    mac: HmacSha256,
}

impl HmacSigner {
    /// Create a signer from a shared secret of at least [`MIN_SECRET_LEN`] bytes.
    pub fn new(secret: &[u8]) -> Result<Self> {
        if secret.len() < MIN_SECRET_LEN {
            return Err(Error::SecretTooShort {
                minimum: MIN_SECRET_LEN,
                actual: secret.len(),
            });
        }
        let mac = HmacSha256::new_from_slice(secret).map_err(|_| Error::InvalidKeyLength {
            expected: MIN_SECRET_LEN,
            actual: secret.len(),
        })?;
        Ok(Self { mac })
    }

    /// Sign a payload bound to a request id, timestamp, and nonce.
    ///
    /// Returns the hex-encoded HMAC-SHA-256 tag.
    pub fn sign(&self, payload: &[u8], request_id: &str, timestamp_ms: i64, nonce: &str) -> String {
        let mut mac = self.mac.clone();
        mac.update(format!("{timestamp_ms}.{nonce}.{request_id}.").as_bytes());
        mac.update(payload);
        hex::encode(mac.finalize().into_bytes())
    }

    /// Verify a signature against the current wall clock.
    pub fn verify(
        &self,
        payload: &[u8],
        signature: &str,
        request_id: &str,
        timestamp_ms: i64,
        nonce: &str,
    ) -> bool {
        self.verify_at(
            payload,
            signature,
            request_id,
            timestamp_ms,
            nonce,
            Utc::now().timestamp_millis(),
        )
    }

    /// Verify a signature against an explicit `now_ms`.
    ///
    /// Rejects timestamps outside the [`MAX_CLOCK_SKEW_MS`] window, then
    /// recomputes the signature and compares in constant time.
    pub fn verify_at(
        &self,
        payload: &[u8],
        signature: &str,
        request_id: &str,
        timestamp_ms: i64,
        nonce: &str,
        now_ms: i64,
    ) -> bool {
        if (now_ms - timestamp_ms).abs() > MAX_CLOCK_SKEW_MS {
            return false;
        }
        let expected = self.sign(payload, request_id, timestamp_ms, nonce);
        constant_time_eq(expected.as_bytes(), signature.as_bytes())
    }
}

impl std::fmt::Debug for HmacSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HmacSigner").finish_non_exhaustive()
    }
}

/// Compare two byte strings in constant time.
///
/// A length mismatch returns early; equal-length comparisons are
/// time-invariant.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    bool::from(a.ct_eq(b))
}

/// Generate a fresh random nonce ([`NONCE_LEN`] bytes, hex-encoded).
pub fn generate_nonce() -> String {
    let mut bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill(&mut bytes[..]);
    hex::encode(bytes)
}
