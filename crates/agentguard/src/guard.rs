//! Guard orchestrator: wraps tools and enforces policy decisions
//!
//! `AgentGuard` loads one policy, evaluates every wrapped invocation
//! against it, and routes `require_approval` decisions through the HITL
//! coordinator. Wrapped tools never run when the decision is `block`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::context::{ToolArguments, ToolCall};
use crate::error::{Error, Result};
use crate::evaluator::{Decision, Evaluator};
use crate::hitl::dispatch::HttpSender;
use crate::hitl::HitlCoordinator;
use crate::policy::{Action, Policy, WebhookConfig};

/// Default wait for a `require_approval` decision.
pub const DEFAULT_APPROVAL_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// A callable that AgentGuard can protect.
///
/// Tools take a [`ToolArguments`] value and produce a JSON result; the
/// guard passes both through untouched on an `allow` decision. Rust's
/// typing makes the "tool must be callable" contract structural - anything
/// implementing this trait is callable by construction.
#[async_trait]
pub trait Tool: Send + Sync {
    async fn invoke(&self, arguments: ToolArguments) -> Result<Value>;
}

/// Adapter implementing [`Tool`] for plain functions and closures.
pub struct FnTool<F> {
    f: F,
}

impl<F> FnTool<F>
where
    F: Fn(ToolArguments) -> Result<Value> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> Tool for FnTool<F>
where
    F: Fn(ToolArguments) -> Result<Value> + Send + Sync,
{
    async fn invoke(&self, arguments: ToolArguments) -> Result<Value> {
        (self.f)(arguments)
    }
}

/// Where the guard's policy comes from.
#[derive(Clone, Debug)]
pub enum PolicySource {
    /// A YAML file; supports [`AgentGuard::reload_policy`].
    File(PathBuf),
    /// An in-memory policy; reload is rejected.
    Inline(Policy),
}

/// Guard construction options.
#[derive(Clone)]
pub struct GuardConfig {
    pub policy: PolicySource,
    /// Fallback webhook used when the policy does not embed one.
    pub webhook: Option<WebhookConfig>,
    /// How long wrapped calls wait on a `require_approval` decision.
    pub approval_timeout: Duration,
    /// HTTP transport override; defaults to the reqwest-backed sender.
    pub http_sender: Option<Arc<dyn HttpSender>>,
}

impl GuardConfig {
    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        Self {
            policy: PolicySource::File(path.into()),
            webhook: None,
            approval_timeout: DEFAULT_APPROVAL_TIMEOUT,
            http_sender: None,
        }
    }

    pub fn inline(policy: Policy) -> Self {
        Self {
            policy: PolicySource::Inline(policy),
            webhook: None,
            approval_timeout: DEFAULT_APPROVAL_TIMEOUT,
            http_sender: None,
        }
    }

    pub fn with_webhook(mut self, webhook: WebhookConfig) -> Self {
        self.webhook = Some(webhook);
        self
    }

    pub fn with_approval_timeout(mut self, timeout: Duration) -> Self {
        self.approval_timeout = timeout;
        self
    }

    pub fn with_http_sender(mut self, sender: Arc<dyn HttpSender>) -> Self {
        self.http_sender = Some(sender);
        self
    }
}

impl std::fmt::Debug for GuardConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardConfig")
            .field("policy", &self.policy)
            .field("webhook", &self.webhook.is_some())
            .field("approval_timeout", &self.approval_timeout)
            .finish_non_exhaustive()
    }
}

/// Per-invocation identity attached to the [`ToolCall`] context.
#[derive(Clone, Debug, Default)]
pub struct ProtectOptions {
    pub agent_id: Option<String>,
    pub session_id: Option<String>,
    pub metadata: Option<Map<String, Value>>,
}

impl ProtectOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_agent_id(mut self, id: impl Into<String>) -> Self {
        self.agent_id = Some(id.into());
        self
    }

    pub fn with_session_id(mut self, id: impl Into<String>) -> Self {
        self.session_id = Some(id.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

struct GuardState {
    evaluator: Arc<Evaluator>,
    hitl: Arc<HitlCoordinator>,
}

struct GuardInner {
    config: GuardConfig,
    state: RwLock<Option<GuardState>>,
}

/// The policy-mediated call interceptor.
#[derive(Clone)]
pub struct AgentGuard {
    inner: Arc<GuardInner>,
}

impl AgentGuard {
    pub fn new(config: GuardConfig) -> Self {
        Self {
            inner: Arc::new(GuardInner {
                config,
                state: RwLock::new(None),
            }),
        }
    }

    /// Guard a policy file.
    pub fn from_policy_file(path: impl Into<PathBuf>) -> Self {
        Self::new(GuardConfig::from_file(path))
    }

    /// Guard an in-memory policy.
    pub fn with_policy(policy: Policy) -> Self {
        Self::new(GuardConfig::inline(policy))
    }

    /// Load the policy and bind the HITL coordinator to the effective
    /// webhook config (policy webhook wins over the guard-level one).
    /// Idempotent: repeated calls after success are no-ops.
    pub async fn initialize(&self) -> Result<()> {
        let mut state = self.inner.state.write().await;
        if state.is_some() {
            return Ok(());
        }

        let policy = Arc::new(self.load_policy()?);
        let webhook = policy
            .webhook
            .clone()
            .or_else(|| self.inner.config.webhook.clone());
        if webhook.is_none() {
            debug!("no webhook configured; approvals wait for host-delivered responses");
        }

        let hitl = match &self.inner.config.http_sender {
            Some(sender) => Arc::new(HitlCoordinator::with_sender(webhook, Arc::clone(sender))?),
            None => Arc::new(HitlCoordinator::new(webhook)?),
        };
        info!(policy = %policy.name, version = %policy.version, rules = policy.rules.len(),
              "guard initialized");

        *state = Some(GuardState {
            evaluator: Arc::new(Evaluator::new(policy)),
            hitl,
        });
        Ok(())
    }

    /// Re-read and re-validate a file-backed policy, atomically replacing
    /// the evaluator. In-flight evaluations finish against whichever
    /// snapshot they observed. Rejected for inline policies.
    pub async fn reload_policy(&self) -> Result<()> {
        let path = match &self.inner.config.policy {
            PolicySource::File(path) => path.clone(),
            PolicySource::Inline(_) => {
                return Err(Error::InvalidArgument(
                    "policy was provided inline; reload requires a file-backed guard".to_string(),
                ))
            }
        };

        let policy = Policy::from_yaml_file(&path)
            .map_err(|e| Error::PolicyLoad(format!("{}: {e}", path.display())))?;

        let mut state = self.inner.state.write().await;
        let Some(state) = state.as_mut() else {
            return Err(Error::NotInitialized);
        };
        info!(policy = %policy.name, path = %path.display(), "policy reloaded");
        state.evaluator = Arc::new(Evaluator::new(Arc::new(policy)));
        Ok(())
    }

    /// Wrap a tool. Fails with `InvalidArgument` on a blank tool name.
    pub fn protect(&self, tool_name: &str, tool: Arc<dyn Tool>) -> Result<ProtectedTool> {
        self.protect_with(tool_name, tool, ProtectOptions::default())
    }

    /// [`protect`](Self::protect) with agent/session identity and metadata.
    pub fn protect_with(
        &self,
        tool_name: &str,
        tool: Arc<dyn Tool>,
        options: ProtectOptions,
    ) -> Result<ProtectedTool> {
        if tool_name.trim().is_empty() {
            return Err(Error::InvalidArgument(
                "tool name must be non-empty".to_string(),
            ));
        }
        Ok(ProtectedTool {
            inner: Arc::clone(&self.inner),
            tool_name: tool_name.to_string(),
            tool,
            options,
        })
    }

    /// The HITL coordinator, for host applications delivering responses.
    pub async fn hitl(&self) -> Result<Arc<HitlCoordinator>> {
        let state = self.inner.state.read().await;
        state
            .as_ref()
            .map(|s| Arc::clone(&s.hitl))
            .ok_or(Error::NotInitialized)
    }

    /// Stop background work and fail outstanding approval waiters.
    pub async fn shutdown(&self) {
        let state = self.inner.state.read().await;
        if let Some(state) = state.as_ref() {
            state.hitl.destroy();
        }
    }

    fn load_policy(&self) -> Result<Policy> {
        match &self.inner.config.policy {
            PolicySource::File(path) => Policy::from_yaml_file(path)
                .map_err(|e| Error::PolicyLoad(format!("{}: {e}", path.display()))),
            PolicySource::Inline(policy) => {
                policy.validate()?;
                Ok(policy.clone())
            }
        }
    }
}

impl std::fmt::Debug for AgentGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentGuard")
            .field("policy", &self.inner.config.policy)
            .finish_non_exhaustive()
    }
}

/// A guard-wrapped tool.
///
/// `is_guarded()` always reports `true`, and `underlying()` exposes the
/// original callable. Both are read-only; the fields cannot be mutated
/// after construction.
pub struct ProtectedTool {
    inner: Arc<GuardInner>,
    tool_name: String,
    tool: Arc<dyn Tool>,
    options: ProtectOptions,
}

impl ProtectedTool {
    /// Marker identifying guard-wrapped tools.
    pub fn is_guarded(&self) -> bool {
        true
    }

    pub fn tool_name(&self) -> &str {
        &self.tool_name
    }

    /// The original, unwrapped tool.
    pub fn underlying(&self) -> &Arc<dyn Tool> {
        &self.tool
    }

    /// Run the full pipeline: build the call context, evaluate, and
    /// dispatch on the decision.
    pub async fn call(&self, arguments: ToolArguments) -> Result<Value> {
        let (evaluator, hitl) = {
            let state = self.inner.state.read().await;
            let state = state.as_ref().ok_or(Error::NotInitialized)?;
            (Arc::clone(&state.evaluator), Arc::clone(&state.hitl))
        };

        let mut tool_call = ToolCall::new(&self.tool_name, arguments.to_parameters());
        tool_call.agent_id = self.options.agent_id.clone();
        tool_call.session_id = self.options.session_id.clone();
        tool_call.metadata = self.options.metadata.clone();

        let decision = evaluator.decide(&tool_call);
        match decision.action {
            Action::Allow => {
                debug!(tool = %self.tool_name, reason = %decision.reason, "call allowed");
                self.tool.invoke(arguments).await
            }
            Action::Block => {
                info!(tool = %self.tool_name, reason = %decision.reason, "call blocked");
                Err(policy_violation(decision, tool_call))
            }
            Action::RequireApproval => {
                info!(tool = %self.tool_name, reason = %decision.reason, "call requires approval");
                let request_id = hitl.create_approval_request(&tool_call).await?;
                let result = hitl
                    .wait_for_approval(&request_id, self.inner.config.approval_timeout)
                    .await?;

                if result.approved {
                    info!(tool = %self.tool_name, request_id = %request_id,
                          approved_by = result.approved_by.as_deref().unwrap_or("unknown"),
                          "approval granted");
                    self.tool.invoke(arguments).await
                } else {
                    info!(tool = %self.tool_name, request_id = %request_id, "approval denied");
                    Err(Error::PolicyViolation {
                        rule: decision
                            .matched_rule
                            .map(|r| r.name)
                            .unwrap_or_else(|| "default_action".to_string()),
                        reason: result
                            .reason
                            .unwrap_or_else(|| "Approval denied".to_string()),
                        tool_call: Box::new(tool_call),
                    })
                }
            }
        }
    }
}

impl std::fmt::Debug for ProtectedTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtectedTool")
            .field("tool_name", &self.tool_name)
            .field("is_guarded", &true)
            .finish_non_exhaustive()
    }
}

fn policy_violation(decision: Decision, tool_call: ToolCall) -> Error {
    Error::PolicyViolation {
        rule: decision
            .matched_rule
            .map(|r| r.name)
            .unwrap_or_else(|| "default_action".to_string()),
        reason: decision.reason,
        tool_call: Box::new(tool_call),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn allow_all_policy() -> Policy {
        Policy {
            version: "1.0".to_string(),
            name: "allow-all".to_string(),
            description: None,
            default_action: Action::Allow,
            rules: vec![],
            webhook: None,
        }
    }

    struct CountingTool {
        calls: AtomicUsize,
    }

    impl CountingTool {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Tool for CountingTool {
        async fn invoke(&self, _arguments: ToolArguments) -> Result<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!("done"))
        }
    }

    #[tokio::test]
    async fn test_call_before_initialize_fails() {
        let guard = AgentGuard::with_policy(allow_all_policy());
        let tool = CountingTool::new();
        let protected = guard.protect("echo", tool.clone()).unwrap();

        let err = protected.call(ToolArguments::none()).await.unwrap_err();
        assert!(matches!(err, Error::NotInitialized));
        assert_eq!(tool.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let guard = AgentGuard::with_policy(allow_all_policy());
        guard.initialize().await.unwrap();
        guard.initialize().await.unwrap();
    }

    #[tokio::test]
    async fn test_blank_tool_name_rejected() {
        let guard = AgentGuard::with_policy(allow_all_policy());
        let err = guard.protect("   ", CountingTool::new()).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_protected_tool_marker() {
        let guard = AgentGuard::with_policy(allow_all_policy());
        let tool = CountingTool::new();
        let protected = guard.protect("echo", tool.clone()).unwrap();
        assert!(protected.is_guarded());
        assert_eq!(protected.tool_name(), "echo");
        assert!(Arc::ptr_eq(
            &(tool as Arc<dyn Tool>),
            protected.underlying()
        ));
    }

    #[tokio::test]
    async fn test_allow_invokes_tool_and_returns_value() {
        let guard = AgentGuard::with_policy(allow_all_policy());
        guard.initialize().await.unwrap();

        let tool = CountingTool::new();
        let protected = guard.protect("echo", tool.clone()).unwrap();
        let value = protected
            .call(ToolArguments::from_values(vec![json!({"x": 1})]))
            .await
            .unwrap();
        assert_eq!(value, json!("done"));
        assert_eq!(tool.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_allow_preserves_arguments() {
        struct EchoTool;

        #[async_trait]
        impl Tool for EchoTool {
            async fn invoke(&self, arguments: ToolArguments) -> Result<Value> {
                Ok(Value::Object(arguments.to_parameters()))
            }
        }

        let guard = AgentGuard::with_policy(allow_all_policy());
        guard.initialize().await.unwrap();
        let protected = guard.protect("echo", Arc::new(EchoTool)).unwrap();

        let value = protected
            .call(ToolArguments::from_values(vec![json!("a"), json!(2)]))
            .await
            .unwrap();
        assert_eq!(value, json!({"arg0": "a", "arg1": 2}));
    }

    #[tokio::test]
    async fn test_tool_error_propagates_unchanged() {
        let guard = AgentGuard::with_policy(allow_all_policy());
        guard.initialize().await.unwrap();

        let failing = Arc::new(FnTool::new(|_| Err(Error::Tool("boom".to_string()))));
        let protected = guard.protect("broken", failing).unwrap();
        let err = protected.call(ToolArguments::none()).await.unwrap_err();
        assert!(matches!(err, Error::Tool(m) if m == "boom"));
    }

    #[tokio::test]
    async fn test_block_skips_tool() {
        let mut policy = allow_all_policy();
        policy.default_action = Action::Block;

        let guard = AgentGuard::with_policy(policy);
        guard.initialize().await.unwrap();

        let tool = CountingTool::new();
        let protected = guard.protect("rm", tool.clone()).unwrap();
        let err = protected.call(ToolArguments::none()).await.unwrap_err();

        let Error::PolicyViolation { rule, tool_call, .. } = err else {
            panic!("expected policy violation");
        };
        assert_eq!(rule, "default_action");
        assert_eq!(tool_call.tool_name, "rm");
        assert_eq!(tool.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_protect_options_flow_into_context() {
        let mut policy = allow_all_policy();
        policy.default_action = Action::Block;
        policy.rules = vec![crate::policy::Rule {
            name: "trusted-agent".to_string(),
            description: None,
            priority: 1,
            action: Action::Allow,
            conditions: vec![crate::policy::Condition {
                field: "toolCall.agentId".to_string(),
                operator: crate::policy::Operator::Equals,
                value: json!("agent-7"),
            }],
        }];

        let guard = AgentGuard::with_policy(policy);
        guard.initialize().await.unwrap();

        let tool = CountingTool::new();
        let trusted = guard
            .protect_with(
                "echo",
                tool.clone(),
                ProtectOptions::new().with_agent_id("agent-7"),
            )
            .unwrap();
        let untrusted = guard.protect("echo", tool.clone()).unwrap();

        trusted.call(ToolArguments::none()).await.unwrap();
        assert!(untrusted.call(ToolArguments::none()).await.is_err());
        assert_eq!(tool.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reload_rejected_for_inline_policy() {
        let guard = AgentGuard::with_policy(allow_all_policy());
        guard.initialize().await.unwrap();
        let err = guard.reload_policy().await.unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_file_guard_load_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.yaml");
        std::fs::write(
            &path,
            "version: \"1.0\"\nname: v1\ndefaultAction: block\nrules: []\n",
        )
        .unwrap();

        let guard = AgentGuard::from_policy_file(&path);
        guard.initialize().await.unwrap();

        let tool = CountingTool::new();
        let protected = guard.protect("echo", tool.clone()).unwrap();
        assert!(protected.call(ToolArguments::none()).await.is_err());

        std::fs::write(
            &path,
            "version: \"1.0\"\nname: v2\ndefaultAction: allow\nrules: []\n",
        )
        .unwrap();
        guard.reload_policy().await.unwrap();

        protected.call(ToolArguments::none()).await.unwrap();
        assert_eq!(tool.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_policy_file_is_load_error() {
        let guard = AgentGuard::from_policy_file("/nonexistent/policy.yaml");
        let err = guard.initialize().await.unwrap_err();
        assert!(matches!(err, Error::PolicyLoad(_)));
    }

    #[tokio::test]
    async fn test_reload_with_invalid_file_keeps_old_policy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.yaml");
        std::fs::write(
            &path,
            "version: \"1.0\"\nname: good\ndefaultAction: allow\nrules: []\n",
        )
        .unwrap();

        let guard = AgentGuard::from_policy_file(&path);
        guard.initialize().await.unwrap();

        std::fs::write(&path, "defaultAction: nonsense\n").unwrap();
        assert!(matches!(
            guard.reload_policy().await,
            Err(Error::PolicyLoad(_))
        ));

        // Old snapshot still decides calls.
        let tool = CountingTool::new();
        let protected = guard.protect("echo", tool.clone()).unwrap();
        protected.call(ToolArguments::none()).await.unwrap();
    }
}
