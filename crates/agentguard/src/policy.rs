//! Policy configuration: rules, conditions, and webhook settings

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use crate::error::{Error, PolicyFieldError, PolicyValidationError, Result};

/// Minimum signing secret length in bytes.
pub const MIN_SIGNING_SECRET_LEN: usize = agentguard_core::signing::MIN_SECRET_LEN;

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_retries() -> u32 {
    3
}

/// Decision applied when a rule matches (or as the policy default).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Allow,
    Block,
    RequireApproval,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Allow => write!(f, "allow"),
            Action::Block => write!(f, "block"),
            Action::RequireApproval => write!(f, "require_approval"),
        }
    }
}

/// Comparison operator applied by a [`Condition`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Operator {
    Equals,
    Contains,
    StartsWith,
    EndsWith,
    Regex,
    In,
    Gt,
    Lt,
    Gte,
    Lte,
}

impl Operator {
    /// Whether this operator coerces both sides to numbers.
    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Gt | Self::Lt | Self::Gte | Self::Lte)
    }
}

/// One field test inside a rule. The `field` is a dotted path into the
/// evaluation context, e.g. `toolCall.parameters.amount`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Condition {
    pub field: String,
    pub operator: Operator,
    pub value: serde_json::Value,
}

/// A named, prioritized set of conditions mapping to an action.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Rule {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Higher-priority rules are evaluated first; absent means 0.
    #[serde(default)]
    pub priority: i64,
    pub action: Action,
    /// All conditions must match (AND).
    pub conditions: Vec<Condition>,
}

/// Webhook security settings: signing, and optional field encryption.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct WebhookSecurityConfig {
    /// HMAC signing secret; at least 32 bytes.
    pub signing_secret: String,
    /// Hex-encoded 32-byte AES-256-GCM key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption_key: Option<String>,
    /// Replace values at `sensitive_fields` paths with encryption envelopes.
    #[serde(default)]
    pub encrypt_sensitive_data: bool,
    /// Dotted paths into the outgoing payload, e.g.
    /// `request.toolCall.parameters.apiKey`.
    #[serde(default)]
    pub sensitive_fields: Vec<String>,
}

/// Where and how approval requests are delivered.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct WebhookConfig {
    pub url: String,
    /// Per-attempt timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Total attempts (at least one is always made).
    #[serde(default = "default_retries")]
    pub retries: u32,
    /// Extra headers; never override the security header set.
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security: Option<WebhookSecurityConfig>,
}

/// Complete policy configuration.
///
/// ```rust
/// use agentguard::Policy;
///
/// let yaml = r#"
/// version: "1.0"
/// name: example
/// defaultAction: allow
/// rules: []
/// "#;
///
/// let policy = Policy::from_yaml(yaml).unwrap();
/// assert_eq!(policy.name, "example");
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Policy {
    pub version: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Applied when no rule matches.
    pub default_action: Action,
    pub rules: Vec<Rule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook: Option<WebhookConfig>,
}

impl Policy {
    /// Load from a YAML file and validate.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse from a YAML string and validate.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let policy: Self = serde_yaml::from_str(yaml)?;
        policy.validate()?;
        Ok(policy)
    }

    /// Export to a YAML string.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(Error::from)
    }

    /// Validate policy semantics.
    ///
    /// Unknown operators and actions are already rejected during
    /// deserialization; this pass collects everything else a rule author
    /// can get wrong, with stable field paths for diagnostics.
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<PolicyFieldError> = Vec::new();

        if self.version.trim().is_empty() {
            errors.push(PolicyFieldError::new("version", "must be non-empty"));
        }
        if self.name.trim().is_empty() {
            errors.push(PolicyFieldError::new("name", "must be non-empty"));
        }

        for (idx, rule) in self.rules.iter().enumerate() {
            if rule.name.trim().is_empty() {
                errors.push(PolicyFieldError::new(
                    format!("rules[{idx}].name"),
                    "must be non-empty",
                ));
            }
            for (cidx, condition) in rule.conditions.iter().enumerate() {
                validate_condition(
                    &mut errors,
                    &format!("rules[{idx}].conditions[{cidx}]"),
                    condition,
                );
            }
        }

        if let Some(webhook) = &self.webhook {
            validate_webhook(&mut errors, "webhook", webhook);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(PolicyValidationError::new(errors).into())
        }
    }
}

fn validate_condition(errors: &mut Vec<PolicyFieldError>, path: &str, condition: &Condition) {
    if condition.field.trim().is_empty() {
        errors.push(PolicyFieldError::new(
            format!("{path}.field"),
            "must be non-empty",
        ));
    }

    match condition.operator {
        Operator::In => {
            if !condition.value.is_array() {
                errors.push(PolicyFieldError::new(
                    format!("{path}.value"),
                    "must be an array for the `in` operator",
                ));
            }
        }
        Operator::Regex => match condition.value.as_str() {
            Some(pattern) => {
                if let Err(e) = Regex::new(pattern) {
                    errors.push(PolicyFieldError::new(
                        format!("{path}.value"),
                        format!("invalid regex: {e}"),
                    ));
                }
            }
            None => errors.push(PolicyFieldError::new(
                format!("{path}.value"),
                "must be a string pattern for the `regex` operator",
            )),
        },
        op if op.is_numeric() => {
            if !is_numeric_like(&condition.value) {
                errors.push(PolicyFieldError::new(
                    format!("{path}.value"),
                    "must be a number (or numeric string) for numeric operators",
                ));
            }
        }
        _ => {}
    }
}

fn is_numeric_like(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Number(_) => true,
        serde_json::Value::String(s) => s.trim().parse::<f64>().is_ok(),
        _ => false,
    }
}

fn validate_webhook(errors: &mut Vec<PolicyFieldError>, path: &str, webhook: &WebhookConfig) {
    match url::Url::parse(&webhook.url) {
        Ok(parsed) => {
            if parsed.scheme() != "http" && parsed.scheme() != "https" {
                errors.push(PolicyFieldError::new(
                    format!("{path}.url"),
                    format!("unsupported scheme: {}", parsed.scheme()),
                ));
            }
        }
        Err(e) => errors.push(PolicyFieldError::new(
            format!("{path}.url"),
            format!("malformed URL: {e}"),
        )),
    }

    if webhook.timeout_ms == 0 {
        errors.push(PolicyFieldError::new(
            format!("{path}.timeoutMs"),
            "must be > 0",
        ));
    }

    if let Some(security) = &webhook.security {
        if security.signing_secret.len() < MIN_SIGNING_SECRET_LEN {
            errors.push(PolicyFieldError::new(
                format!("{path}.security.signingSecret"),
                format!("must be at least {MIN_SIGNING_SECRET_LEN} bytes"),
            ));
        }
        if let Some(key) = &security.encryption_key {
            if let Err(e) = agentguard_core::FieldCipher::from_hex(key) {
                errors.push(PolicyFieldError::new(
                    format!("{path}.security.encryptionKey"),
                    format!("must be 64 hex characters (32 bytes): {e}"),
                ));
            }
        }
        if security.encrypt_sensitive_data && security.encryption_key.is_none() {
            errors.push(PolicyFieldError::new(
                format!("{path}.security.encryptionKey"),
                "required when encryptSensitiveData is true",
            ));
        }
    }
}

/// A fully annotated starter policy, suitable for `agentguard init`.
pub fn generate_sample_policy() -> &'static str {
    include_str!("../../../rulesets/sample.yaml")
}
