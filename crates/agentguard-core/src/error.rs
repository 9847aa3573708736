//! Error types for agentguard-core operations

use thiserror::Error;

/// Errors that can occur during envelope operations
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid hex encoding: {0}")]
    InvalidHex(String),

    #[error("Invalid base64 encoding: {0}")]
    InvalidBase64(String),

    #[error("Invalid key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("Signing secret too short: {actual} bytes (minimum {minimum})")]
    SecretTooShort { minimum: usize, actual: usize },

    #[error("Encryption key not configured")]
    MissingEncryptionKey,

    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Decryption failed: ciphertext rejected")]
    DecryptionFailed,

    #[error("Malformed encryption envelope: {0}")]
    MalformedEnvelope(String),

    #[error("JSON serialization error: {0}")]
    JsonError(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::JsonError(e.to_string())
    }
}

/// Result type for agentguard-core operations
pub type Result<T> = std::result::Result<T, Error>;
