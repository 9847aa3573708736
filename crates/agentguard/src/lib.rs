#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

//! # AgentGuard - Policy-Mediated Tool Interception
//!
//! AgentGuard sits between an AI agent and the side-effectful tools it
//! invokes. Every call is evaluated against a declarative policy and either
//! allowed, blocked, or routed to a remote human approver over a signed
//! (and optionally field-encrypted) webhook channel.
//!
//! - [`policy`]: the rule/condition model and YAML loading
//! - [`evaluator`]: priority-ordered condition matching
//! - [`guard`]: the orchestrator wrapping tools
//! - [`hitl`]: pending-approval registry and webhook dispatch
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use agentguard::{AgentGuard, FnTool, Policy, ToolArguments};
//!
//! # async fn demo() -> agentguard::Result<()> {
//! let policy = Policy::from_yaml(r#"
//! version: "1.0"
//! name: demo
//! defaultAction: allow
//! rules:
//!   - name: block-deletes
//!     priority: 10
//!     action: block
//!     conditions:
//!       - field: toolCall.toolName
//!         operator: startsWith
//!         value: delete_
//! "#)?;
//!
//! let guard = AgentGuard::with_policy(policy);
//! guard.initialize().await?;
//!
//! let tool = Arc::new(FnTool::new(|_args| Ok(serde_json::json!("sent"))));
//! let protected = guard.protect("send_email", tool)?;
//! let result = protected.call(ToolArguments::none()).await?;
//! # Ok(())
//! # }
//! ```

pub mod context;
pub mod error;
pub mod evaluator;
pub mod guard;
pub mod hitl;
pub mod policy;

pub use context::{ToolArguments, ToolCall};
pub use error::{Error, PolicyFieldError, PolicyValidationError, Result};
pub use evaluator::{Decision, Evaluator};
pub use guard::{
    AgentGuard, FnTool, GuardConfig, PolicySource, ProtectOptions, ProtectedTool, Tool,
    DEFAULT_APPROVAL_TIMEOUT,
};
pub use hitl::dispatch::{HttpSender, ReqwestSender, TransportError};
pub use hitl::{
    ApprovalDecision, ApprovalRequest, ApprovalResponse, HitlCoordinator, HitlResult, HitlStats,
};
pub use policy::{
    generate_sample_policy, Action, Condition, Operator, Policy, Rule, WebhookConfig,
    WebhookSecurityConfig,
};

/// Re-export core security primitives
pub mod core {
    pub use agentguard_core::*;
}
