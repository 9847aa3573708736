//! Webhook security header generation and inbound response validation

use std::collections::HashMap;

use chrono::Utc;
use thiserror::Error;

use crate::signing::{generate_nonce, HmacSigner};

/// Signature header name.
pub const SIGNATURE_HEADER: &str = "x-agentguard-signature";
/// Timestamp header name (milliseconds since the Unix epoch).
pub const TIMESTAMP_HEADER: &str = "x-agentguard-timestamp";
/// Nonce header name.
pub const NONCE_HEADER: &str = "x-agentguard-nonce";
/// Request id header name.
pub const REQUEST_ID_HEADER: &str = "x-agentguard-request-id";

/// User agent advertised on outgoing webhooks.
pub const USER_AGENT: &str = "AgentGuard/1.0";

/// Why an inbound response was rejected.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Missing required security headers")]
    MissingHeaders,

    #[error("Invalid timestamp format")]
    InvalidTimestamp,

    #[error("Request ID mismatch")]
    RequestIdMismatch,

    #[error("Invalid signature")]
    InvalidSignature,
}

/// Security material extracted from a successfully validated response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidatedHeaders {
    pub nonce: String,
    pub timestamp_ms: i64,
}

/// Signs outgoing payloads and validates inbound responses.
#[derive(Clone, Debug)]
pub struct WebhookSecurity {
    signer: HmacSigner,
}

impl WebhookSecurity {
    pub fn new(signer: HmacSigner) -> Self {
        Self { signer }
    }

    pub fn signer(&self) -> &HmacSigner {
        &self.signer
    }

    /// Generate the outgoing header set for a payload: the four
    /// `x-agentguard-*` security headers plus `Content-Type` and
    /// `User-Agent`.
    pub fn generate_headers(&self, payload: &[u8], request_id: &str) -> HashMap<String, String> {
        self.generate_headers_at(payload, request_id, Utc::now().timestamp_millis())
    }

    /// [`generate_headers`](Self::generate_headers) with an explicit timestamp.
    pub fn generate_headers_at(
        &self,
        payload: &[u8],
        request_id: &str,
        timestamp_ms: i64,
    ) -> HashMap<String, String> {
        let nonce = generate_nonce();
        let signature = self.signer.sign(payload, request_id, timestamp_ms, &nonce);

        let mut headers = HashMap::new();
        headers.insert(SIGNATURE_HEADER.to_string(), signature);
        headers.insert(TIMESTAMP_HEADER.to_string(), timestamp_ms.to_string());
        headers.insert(NONCE_HEADER.to_string(), nonce);
        headers.insert(REQUEST_ID_HEADER.to_string(), request_id.to_string());
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        headers.insert("User-Agent".to_string(), USER_AGENT.to_string());
        headers
    }

    /// Validate an inbound response body against its security headers.
    ///
    /// Checks run in a fixed order: header presence, timestamp format,
    /// request-id match, then signature (which enforces the freshness
    /// window). Nonce uniqueness is the caller's concern; the accepted
    /// nonce is returned so it can be recorded.
    pub fn validate_response(
        &self,
        body: &[u8],
        headers: &HashMap<String, String>,
        expected_request_id: &str,
    ) -> Result<ValidatedHeaders, ValidationError> {
        self.validate_response_at(
            body,
            headers,
            expected_request_id,
            Utc::now().timestamp_millis(),
        )
    }

    /// [`validate_response`](Self::validate_response) with an explicit `now_ms`.
    pub fn validate_response_at(
        &self,
        body: &[u8],
        headers: &HashMap<String, String>,
        expected_request_id: &str,
        now_ms: i64,
    ) -> Result<ValidatedHeaders, ValidationError> {
        let signature = header_value(headers, SIGNATURE_HEADER);
        let timestamp = header_value(headers, TIMESTAMP_HEADER);
        let nonce = header_value(headers, NONCE_HEADER);
        let request_id = header_value(headers, REQUEST_ID_HEADER);

        let (Some(signature), Some(timestamp), Some(nonce), Some(request_id)) =
            (signature, timestamp, nonce, request_id)
        else {
            return Err(ValidationError::MissingHeaders);
        };

        let timestamp_ms: i64 = timestamp
            .trim()
            .parse()
            .map_err(|_| ValidationError::InvalidTimestamp)?;

        if request_id != expected_request_id {
            return Err(ValidationError::RequestIdMismatch);
        }

        if !self
            .signer
            .verify_at(body, signature, request_id, timestamp_ms, nonce, now_ms)
        {
            return Err(ValidationError::InvalidSignature);
        }

        Ok(ValidatedHeaders {
            nonce: nonce.to_string(),
            timestamp_ms,
        })
    }
}

/// Case-insensitive header lookup.
fn header_value<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signing::MAX_CLOCK_SKEW_MS;

    const SECRET: &[u8] = b"an-adequately-long-signing-secret!!!";

    fn security() -> WebhookSecurity {
        WebhookSecurity::new(HmacSigner::new(SECRET).unwrap())
    }

    #[test]
    fn test_generate_headers_contains_full_set() {
        let headers = security().generate_headers(b"{}", "req-1");
        assert!(headers.contains_key(SIGNATURE_HEADER));
        assert!(headers.contains_key(TIMESTAMP_HEADER));
        assert!(headers.contains_key(NONCE_HEADER));
        assert_eq!(headers.get(REQUEST_ID_HEADER).map(String::as_str), Some("req-1"));
        assert_eq!(
            headers.get("Content-Type").map(String::as_str),
            Some("application/json")
        );
        assert_eq!(headers.get("User-Agent").map(String::as_str), Some(USER_AGENT));
    }

    #[test]
    fn test_validate_roundtrip() {
        let sec = security();
        let headers = sec.generate_headers(b"{\"ok\":true}", "req-1");
        let validated = sec
            .validate_response(b"{\"ok\":true}", &headers, "req-1")
            .unwrap();
        assert_eq!(validated.nonce, headers[NONCE_HEADER]);
    }

    #[test]
    fn test_validate_is_case_insensitive_on_header_names() {
        let sec = security();
        let headers = sec.generate_headers(b"body", "req-1");
        let upper: HashMap<String, String> = headers
            .into_iter()
            .map(|(k, v)| (k.to_uppercase(), v))
            .collect();
        assert!(sec.validate_response(b"body", &upper, "req-1").is_ok());
    }

    #[test]
    fn test_validate_missing_header() {
        let sec = security();
        let mut headers = sec.generate_headers(b"body", "req-1");
        headers.remove(NONCE_HEADER);
        assert_eq!(
            sec.validate_response(b"body", &headers, "req-1"),
            Err(ValidationError::MissingHeaders)
        );
    }

    #[test]
    fn test_validate_bad_timestamp_format() {
        let sec = security();
        let mut headers = sec.generate_headers(b"body", "req-1");
        headers.insert(TIMESTAMP_HEADER.to_string(), "soon".to_string());
        assert_eq!(
            sec.validate_response(b"body", &headers, "req-1"),
            Err(ValidationError::InvalidTimestamp)
        );
    }

    #[test]
    fn test_validate_request_id_mismatch() {
        let sec = security();
        let headers = sec.generate_headers(b"body", "req-1");
        assert_eq!(
            sec.validate_response(b"body", &headers, "req-2"),
            Err(ValidationError::RequestIdMismatch)
        );
    }

    #[test]
    fn test_validate_tampered_body() {
        let sec = security();
        let headers = sec.generate_headers(b"body", "req-1");
        assert_eq!(
            sec.validate_response(b"BODY", &headers, "req-1"),
            Err(ValidationError::InvalidSignature)
        );
    }

    #[test]
    fn test_validate_stale_headers() {
        let sec = security();
        let now = Utc::now().timestamp_millis();
        let headers = sec.generate_headers_at(b"body", "req-1", now);
        assert_eq!(
            sec.validate_response_at(b"body", &headers, "req-1", now + MAX_CLOCK_SKEW_MS + 1),
            Err(ValidationError::InvalidSignature)
        );
    }

    #[test]
    fn test_headers_transplanted_to_other_request_fail() {
        // Valid headers for (body1, req-1) must not validate (body2, req-2).
        let sec = security();
        let headers = sec.generate_headers(b"body-1", "req-1");

        // Same body, different expected id: caught by the id check.
        assert_eq!(
            sec.validate_response(b"body-1", &headers, "req-2"),
            Err(ValidationError::RequestIdMismatch)
        );

        // Forged id header to match the other request: caught by the signature.
        let mut forged = headers.clone();
        forged.insert(REQUEST_ID_HEADER.to_string(), "req-2".to_string());
        assert_eq!(
            sec.validate_response(b"body-2", &forged, "req-2"),
            Err(ValidationError::InvalidSignature)
        );
    }
}
