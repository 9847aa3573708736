#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

//! # AgentGuard Core - Webhook Security Primitives
//!
//! Pure computation shared by the AgentGuard policy engine:
//! - `HmacSigner`: HMAC-SHA-256 signing with timestamp + nonce binding
//! - `WebhookSecurity`: header generation and inbound response validation
//! - `FieldCipher`: AES-256-GCM encryption of nominated payload fields
//! - `paths`: dotted-path lookup into JSON values
//!
//! Nothing here performs I/O or keeps replay state; the nonce cache lives
//! with the approval coordinator that consumes these primitives.
//!
//! ## Quick Start
//!
//! ```rust
//! use agentguard_core::{HmacSigner, WebhookSecurity};
//!
//! let signer = HmacSigner::new(b"0123456789abcdef0123456789abcdef").unwrap();
//! let security = WebhookSecurity::new(signer);
//!
//! let headers = security.generate_headers(b"{\"hello\":1}", "req-42");
//! assert!(security
//!     .validate_response(b"{\"hello\":1}", &headers, "req-42")
//!     .is_ok());
//! ```

pub mod encryption;
pub mod envelope;
pub mod error;
pub mod paths;
pub mod signing;

pub use encryption::{EncryptedEnvelope, FieldCipher};
pub use envelope::{
    ValidatedHeaders, ValidationError, WebhookSecurity, NONCE_HEADER, REQUEST_ID_HEADER,
    SIGNATURE_HEADER, TIMESTAMP_HEADER, USER_AGENT,
};
pub use error::{Error, Result};
pub use signing::{constant_time_eq, generate_nonce, HmacSigner};
