//! Outgoing webhook dispatch: payload build, field encryption, signed
//! headers, and bounded retries.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tracing::{info, warn};

use agentguard_core::{FieldCipher, HmacSigner, WebhookSecurity, USER_AGENT};

use crate::error::{Error, Result};
use crate::policy::{WebhookConfig, WebhookSecurityConfig};

use super::ApprovalRequest;

/// Transport failure for a single webhook attempt.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

/// The "send bytes to URL with headers, receive status" primitive.
///
/// The default implementation is [`ReqwestSender`]; tests inject a
/// recording stub.
#[async_trait]
pub trait HttpSender: Send + Sync {
    async fn send(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
        body: &[u8],
        timeout: Duration,
    ) -> std::result::Result<u16, TransportError>;
}

/// Default HTTP transport backed by `reqwest`.
pub struct ReqwestSender {
    client: reqwest::Client,
}

impl ReqwestSender {
    pub fn new() -> Self {
        let client = match reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
        {
            Ok(client) => client,
            Err(e) => {
                warn!(error = %e, "failed to build reqwest client; falling back to default client");
                reqwest::Client::new()
            }
        };
        Self { client }
    }
}

impl Default for ReqwestSender {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpSender for ReqwestSender {
    async fn send(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
        body: &[u8],
        timeout: Duration,
    ) -> std::result::Result<u16, TransportError> {
        let mut request = self.client.post(url).timeout(timeout).body(body.to_vec());
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }
        let response = request
            .send()
            .await
            .map_err(|e| TransportError(format!("request failed: {e}")))?;
        Ok(response.status().as_u16())
    }
}

/// Signing and encryption material derived from a webhook security config.
pub(crate) struct SecurityContext {
    pub(crate) config: WebhookSecurityConfig,
    pub(crate) envelope: WebhookSecurity,
    pub(crate) cipher: Option<FieldCipher>,
}

impl SecurityContext {
    pub(crate) fn from_config(config: &WebhookSecurityConfig) -> Result<Self> {
        let signer = HmacSigner::new(config.signing_secret.as_bytes())?;
        let cipher = config
            .encryption_key
            .as_deref()
            .map(FieldCipher::from_hex)
            .transpose()?;
        Ok(Self {
            config: config.clone(),
            envelope: WebhookSecurity::new(signer),
            cipher,
        })
    }
}

/// Delivers approval requests to the configured webhook endpoint.
pub(crate) struct WebhookDispatcher {
    config: WebhookConfig,
    security: Option<Arc<SecurityContext>>,
    sender: Arc<dyn HttpSender>,
}

impl WebhookDispatcher {
    pub(crate) fn new(
        config: WebhookConfig,
        security: Option<Arc<SecurityContext>>,
        sender: Arc<dyn HttpSender>,
    ) -> Self {
        Self {
            config,
            security,
            sender,
        }
    }

    /// Build, secure, and send the `approval_request` payload, retrying on
    /// failure. Exhaustion surfaces as [`Error::WebhookFailed`].
    pub(crate) async fn dispatch(&self, request: &ApprovalRequest) -> Result<()> {
        let mut payload = serde_json::json!({
            "type": "approval_request",
            "request": request,
            "timestamp": Utc::now().to_rfc3339(),
        });

        if let Some(security) = &self.security {
            if security.config.encrypt_sensitive_data {
                let cipher = security
                    .cipher
                    .as_ref()
                    .ok_or(agentguard_core::Error::MissingEncryptionKey)?;
                cipher.encrypt_paths(&mut payload, &security.config.sensitive_fields)?;
            }
        }

        let body = serde_json::to_vec(&payload)?;
        let headers = self.build_headers(&body, &request.id);
        self.send_with_retries(&body, &headers, &request.id).await
    }

    /// Default headers, then caller extras, then the generated security
    /// set. Extras may override `Content-Type`/`User-Agent` but never the
    /// `x-agentguard-*` headers.
    fn build_headers(&self, body: &[u8], request_id: &str) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        headers.insert("User-Agent".to_string(), USER_AGENT.to_string());

        for (name, value) in &self.config.headers {
            headers.insert(name.clone(), value.clone());
        }

        if let Some(security) = &self.security {
            for (name, value) in security.envelope.generate_headers(body, request_id) {
                if name.starts_with("x-agentguard-") || !headers.contains_key(&name) {
                    headers.insert(name, value);
                }
            }
        }

        headers
    }

    async fn send_with_retries(
        &self,
        body: &[u8],
        headers: &HashMap<String, String>,
        request_id: &str,
    ) -> Result<()> {
        let attempts = self.config.retries.max(1);
        let timeout = Duration::from_millis(self.config.timeout_ms);
        let url = redact_url(&self.config.url);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            if attempt > 1 {
                // 2^(n-1) seconds after the n-th failed attempt.
                let backoff = Duration::from_secs(1u64 << (attempt - 2).min(16));
                tokio::time::sleep(backoff).await;
            }

            info!(request_id, url = %url, attempt, "webhook dispatch");
            match self
                .sender
                .send(&self.config.url, headers, body, timeout)
                .await
            {
                Ok(status) if (200..300).contains(&status) => {
                    info!(request_id, url = %url, status, attempt, "webhook delivered");
                    return Ok(());
                }
                Ok(status) => {
                    last_error = format!("unexpected status {status}");
                    warn!(request_id, url = %url, status, attempt, "webhook attempt failed");
                }
                Err(e) => {
                    last_error = e.to_string();
                    warn!(request_id, url = %url, error = %e, attempt, "webhook attempt failed");
                }
            }
        }

        Err(Error::WebhookFailed {
            attempts,
            message: last_error,
        })
    }
}

/// Strip credentials, query strings, and fragments from a URL before it
/// reaches the logs; what remains is safe to print.
fn redact_url(raw: &str) -> String {
    let Ok(mut url) = url::Url::parse(raw) else {
        // An unparseable URL could hide anything; log none of it.
        return "<unparseable url>".to_string();
    };
    let _ = url.set_username("");
    let _ = url.set_password(None);
    url.set_query(None);
    url.set_fragment(None);
    url.to_string()
}
