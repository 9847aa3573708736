//! AES-256-GCM encryption of sensitive payload fields

use aes::Aes256;
use aes_gcm::aead::generic_array::typenum::U16;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::AeadInPlace;
use aes_gcm::{AesGcm, KeyInit};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::paths;

// 16-byte IVs for wire compatibility with existing responders; GCM's
// standard IV size is 12 bytes.
type Aes256Gcm16 = AesGcm<Aes256, U16>;

/// IV length in raw bytes (base64-encoded in the envelope).
pub const IV_LEN: usize = 16;

/// GCM authentication tag length in raw bytes.
pub const TAG_LEN: usize = 16;

/// Encryption key length in raw bytes (hex-encoded in configuration).
pub const KEY_LEN: usize = 32;

/// The wire form of an encrypted field value.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedEnvelope {
    /// Ciphertext, base64.
    pub encrypted: String,
    /// Initialization vector, base64.
    pub iv: String,
    /// GCM authentication tag, base64.
    pub tag: String,
}

/// AES-256-GCM cipher for sensitive webhook fields.
///
/// Values are wrapped as `{"value": <original>}` before encryption so that
/// every JSON shape (scalars included) round-trips bitwise.
pub struct FieldCipher {
    cipher: Aes256Gcm16,
}

impl FieldCipher {
    /// Create a cipher from raw key bytes.
    pub fn new(key: [u8; KEY_LEN]) -> Self {
        let key = GenericArray::from(key);
        Self {
            cipher: Aes256Gcm16::new(&key),
        }
    }

    /// Create a cipher from a hex-encoded 32-byte key.
    pub fn from_hex(hex_key: &str) -> Result<Self> {
        let hex_key = hex_key.strip_prefix("0x").unwrap_or(hex_key);
        let bytes = hex::decode(hex_key).map_err(|e| Error::InvalidHex(e.to_string()))?;
        if bytes.len() != KEY_LEN {
            return Err(Error::InvalidKeyLength {
                expected: KEY_LEN,
                actual: bytes.len(),
            });
        }
        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(&bytes);
        Ok(Self::new(key))
    }

    /// Encrypt a JSON value under a fresh random IV.
    pub fn encrypt(&self, value: &Value) -> Result<EncryptedEnvelope> {
        let mut iv = [0u8; IV_LEN];
        rand::thread_rng().fill(&mut iv[..]);

        let mut buffer = serde_json::to_vec(&serde_json::json!({ "value": value }))?;
        let tag = self
            .cipher
            .encrypt_in_place_detached(GenericArray::from_slice(&iv), b"", &mut buffer)
            .map_err(|_| Error::EncryptionFailed)?;

        Ok(EncryptedEnvelope {
            encrypted: BASE64.encode(&buffer),
            iv: BASE64.encode(iv),
            tag: BASE64.encode(tag.as_slice()),
        })
    }

    /// Decrypt an envelope produced by [`encrypt`](Self::encrypt).
    ///
    /// Any GCM authentication failure surfaces as [`Error::DecryptionFailed`].
    pub fn decrypt(&self, envelope: &EncryptedEnvelope) -> Result<Value> {
        let iv = BASE64
            .decode(&envelope.iv)
            .map_err(|e| Error::InvalidBase64(e.to_string()))?;
        let tag = BASE64
            .decode(&envelope.tag)
            .map_err(|e| Error::InvalidBase64(e.to_string()))?;
        let mut buffer = BASE64
            .decode(&envelope.encrypted)
            .map_err(|e| Error::InvalidBase64(e.to_string()))?;
        if iv.len() != IV_LEN || tag.len() != TAG_LEN {
            return Err(Error::DecryptionFailed);
        }

        self.cipher
            .decrypt_in_place_detached(
                GenericArray::from_slice(&iv),
                b"",
                &mut buffer,
                GenericArray::from_slice(&tag),
            )
            .map_err(|_| Error::DecryptionFailed)?;

        match serde_json::from_slice::<Value>(&buffer)? {
            Value::Object(mut wrapper) => wrapper
                .remove("value")
                .ok_or_else(|| Error::MalformedEnvelope("missing value field".to_string())),
            _ => Err(Error::MalformedEnvelope(
                "plaintext is not an object".to_string(),
            )),
        }
    }

    /// Replace each resolvable dotted-path leaf in `payload` with its
    /// encryption envelope. Paths that do not resolve are skipped.
    pub fn encrypt_paths(&self, payload: &mut Value, sensitive_fields: &[String]) -> Result<()> {
        for path in sensitive_fields {
            if let Some(slot) = paths::lookup_mut(payload, path) {
                let envelope = self.encrypt(slot)?;
                *slot = serde_json::to_value(&envelope)?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for FieldCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldCipher").finish_non_exhaustive()
    }
}
