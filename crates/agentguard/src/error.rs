//! Error types for agentguard

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::context::ToolCall;

/// One problem found while validating a policy, anchored to the field
/// that caused it (e.g. `rules[2].conditions[0].value`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyFieldError {
    /// Dotted location inside the policy document.
    pub path: String,
    /// What is wrong at that location.
    pub message: String,
}

impl PolicyFieldError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for PolicyFieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Everything wrong with a policy document, gathered in a single
/// validation pass so rule authors can fix the whole file at once.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyValidationError {
    pub errors: Vec<PolicyFieldError>,
}

impl PolicyValidationError {
    pub fn new(errors: Vec<PolicyFieldError>) -> Self {
        Self { errors }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }
}

impl fmt::Display for PolicyValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let noun = if self.errors.len() == 1 {
            "problem"
        } else {
            "problems"
        };
        write!(f, "policy failed validation, {} {noun}", self.errors.len())?;
        for err in &self.errors {
            write!(f, "\n  {err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for PolicyValidationError {}

/// Errors surfaced by the guard pipeline
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum Error {
    #[error("Guard is not initialized; call initialize() first")]
    NotInitialized,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Policy load error: {0}")]
    PolicyLoad(String),

    #[error(transparent)]
    PolicyValidation(#[from] PolicyValidationError),

    #[error("Policy violation: {rule} - {reason}")]
    PolicyViolation {
        /// Name of the matched rule, or `default_action` when the policy
        /// default decided the call.
        rule: String,
        reason: String,
        tool_call: Box<ToolCall>,
    },

    #[error("Approval request {request_id} timed out after {timeout_ms} ms")]
    ApprovalTimeout { request_id: String, timeout_ms: u64 },

    #[error("Approval request {request_id} cancelled: {reason}")]
    ApprovalCancelled { request_id: String, reason: String },

    #[error("Webhook delivery failed after {attempts} attempt(s): {message}")]
    WebhookFailed { attempts: u32, message: String },

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Request ID mismatch between headers and response body")]
    RequestIdMismatch,

    #[error("Duplicate nonce (possible replay)")]
    DuplicateNonce,

    #[error("Unknown request id: {0}")]
    UnknownRequestId(String),

    #[error("Tool error: {0}")]
    Tool(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Core error: {0}")]
    CoreError(#[from] agentguard_core::Error),
}

/// Result type for agentguard operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display() {
        let err = PolicyValidationError::new(vec![
            PolicyFieldError::new("rules[0].name", "must be non-empty"),
            PolicyFieldError::new("webhook.url", "malformed URL"),
        ]);
        assert_eq!(err.len(), 2);
        let text = err.to_string();
        assert!(text.contains("2 problems"));
        assert!(text.contains("rules[0].name: must be non-empty"));
        assert!(text.contains("webhook.url: malformed URL"));

        let single = PolicyValidationError::new(vec![PolicyFieldError::new("version", "empty")]);
        assert!(single.to_string().contains("1 problem"));
    }

    #[test]
    fn test_policy_violation_display() {
        let err = Error::PolicyViolation {
            rule: "block-all".to_string(),
            reason: "Matched rule: block-all".to_string(),
            tool_call: Box::new(ToolCall::new("transfer", serde_json::Map::new())),
        };
        assert!(err.to_string().contains("block-all"));
    }
}
