//! Human-in-the-loop approval coordination
//!
//! Owns the registry of pending approval requests, the webhook dispatcher,
//! and the nonce replay cache. Responses may arrive before a waiter
//! attaches; they are parked on the registry entry and observed
//! immediately when the waiter shows up.

pub mod dispatch;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use agentguard_core::ValidationError;

use crate::context::ToolCall;
use crate::error::{Error, Result};
use crate::policy::WebhookConfig;

use self::dispatch::{HttpSender, ReqwestSender, SecurityContext, WebhookDispatcher};

/// How long an approval request stays actionable.
const APPROVAL_TTL_MINUTES: i64 = 30;

/// Nonce cache retention window.
const NONCE_TTL_SECS: i64 = 10 * 60;

/// Background sweep cadence (nonce cache + expired requests).
const SWEEP_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// A pending human decision, published via webhook.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRequest {
    /// Process-unique id (UUID v4).
    pub id: String,
    pub tool_call: ToolCall,
    #[serde(rename = "timestamp")]
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Decision carried by an inbound approval response.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalDecision {
    Approve,
    Deny,
}

/// An inbound response from the remote approver.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalResponse {
    pub request_id: String,
    pub decision: ApprovalDecision,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_by: Option<String>,
}

/// The resolved outcome a waiter observes.
#[derive(Clone, Debug, PartialEq)]
pub struct HitlResult {
    pub approved: bool,
    pub reason: Option<String>,
    pub approved_by: Option<String>,
    pub response_time_ms: i64,
}

/// Registry snapshot counters.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HitlStats {
    pub pending: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oldest_age_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_age_ms: Option<i64>,
}

enum WaiterSignal {
    Resolved(HitlResult),
    Expired,
    Cancelled(String),
    Shutdown,
}

enum WaiterState {
    /// No waiter attached yet; an early response may be parked here.
    Idle { early: Option<HitlResult> },
    /// A waiter is blocked on the channel.
    Waiting { tx: oneshot::Sender<WaiterSignal> },
}

struct PendingEntry {
    request: ApprovalRequest,
    state: WaiterState,
}

/// Registry + nonce cache, shared with the background sweeper.
struct Shared {
    registry: Mutex<HashMap<String, PendingEntry>>,
    nonces: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl Shared {
    fn registry(&self) -> MutexGuard<'_, HashMap<String, PendingEntry>> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn nonces(&self) -> MutexGuard<'_, HashMap<String, DateTime<Utc>>> {
        self.nonces.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn sweep(&self) {
        let now = Utc::now();

        let before;
        let after;
        {
            let mut nonces = self.nonces();
            before = nonces.len();
            nonces.retain(|_, seen_at| (now - *seen_at).num_seconds() <= NONCE_TTL_SECS);
            after = nonces.len();
        }
        if before != after {
            debug!(removed = before - after, "nonce cache swept");
        }

        let expired = self.remove_expired(now);
        if expired > 0 {
            debug!(removed = expired, "expired approval requests cleaned up");
        }
    }

    fn remove_expired(&self, now: DateTime<Utc>) -> usize {
        let drained: Vec<PendingEntry> = {
            let mut registry = self.registry();
            let ids: Vec<String> = registry
                .iter()
                .filter(|(_, entry)| now > entry.request.expires_at)
                .map(|(id, _)| id.clone())
                .collect();
            ids.iter().filter_map(|id| registry.remove(id)).collect()
        };

        let count = drained.len();
        for entry in drained {
            if let WaiterState::Waiting { tx } = entry.state {
                let _ = tx.send(WaiterSignal::Expired);
            }
        }
        count
    }
}

/// Coordinates approval requests between guards and the remote approver.
///
/// Must be created inside a Tokio runtime: it owns a background task that
/// sweeps the nonce cache and expired registry entries.
pub struct HitlCoordinator {
    shared: Arc<Shared>,
    dispatcher: Option<WebhookDispatcher>,
    security: Option<Arc<SecurityContext>>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
    shutdown: AtomicBool,
}

impl HitlCoordinator {
    /// Create a coordinator with the default HTTP transport.
    pub fn new(webhook: Option<WebhookConfig>) -> Result<Self> {
        Self::with_sender(webhook, Arc::new(ReqwestSender::new()))
    }

    /// Create a coordinator with an injected HTTP transport.
    pub fn with_sender(
        webhook: Option<WebhookConfig>,
        sender: Arc<dyn HttpSender>,
    ) -> Result<Self> {
        let security = webhook
            .as_ref()
            .and_then(|w| w.security.as_ref())
            .map(SecurityContext::from_config)
            .transpose()?
            .map(Arc::new);

        let dispatcher =
            webhook.map(|config| WebhookDispatcher::new(config, security.clone(), sender));

        let shared = Arc::new(Shared {
            registry: Mutex::new(HashMap::new()),
            nonces: Mutex::new(HashMap::new()),
        });

        let sweeper = spawn_sweeper(Arc::downgrade(&shared));

        Ok(Self {
            shared,
            dispatcher,
            security,
            sweeper: Mutex::new(Some(sweeper)),
            shutdown: AtomicBool::new(false),
        })
    }

    /// Register a pending approval and publish it via webhook (if one is
    /// configured). The registry entry is inserted *before* dispatch so a
    /// response racing ahead of the waiter still finds its slot.
    pub async fn create_approval_request(&self, tool_call: &ToolCall) -> Result<String> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(Error::ApprovalCancelled {
                request_id: String::new(),
                reason: "coordinator is shut down".to_string(),
            });
        }

        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let request = ApprovalRequest {
            id: id.clone(),
            tool_call: tool_call.clone(),
            created_at: now,
            expires_at: now + chrono::Duration::minutes(APPROVAL_TTL_MINUTES),
        };

        self.shared.registry().insert(
            id.clone(),
            PendingEntry {
                request: request.clone(),
                state: WaiterState::Idle { early: None },
            },
        );

        if let Some(dispatcher) = &self.dispatcher {
            if let Err(e) = dispatcher.dispatch(&request).await {
                self.shared.registry().remove(&id);
                warn!(request_id = %id, error = %e, "webhook dispatch failed; approval request dropped");
                return Err(e);
            }
        }

        info!(request_id = %id, tool = %tool_call.tool_name, "approval request created");
        Ok(id)
    }

    /// Block until the request resolves, times out, or is cancelled.
    ///
    /// An early response stored before the waiter attached is observed
    /// immediately. The registry mutex is never held while waiting.
    pub async fn wait_for_approval(
        &self,
        request_id: &str,
        timeout: Duration,
    ) -> Result<HitlResult> {
        let mut rx = {
            let mut registry = self.shared.registry();
            let entry = registry
                .get_mut(request_id)
                .ok_or_else(|| Error::UnknownRequestId(request_id.to_string()))?;

            if let WaiterState::Idle { early } = &mut entry.state {
                if let Some(result) = early.take() {
                    registry.remove(request_id);
                    debug!(request_id, "early response consumed by waiter");
                    return Ok(result);
                }
            }

            let (tx, rx) = oneshot::channel();
            entry.state = WaiterState::Waiting { tx };
            rx
        };

        match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(signal)) => self.signal_to_result(request_id, timeout, signal),
            Ok(Err(_)) => Err(Error::ApprovalCancelled {
                request_id: request_id.to_string(),
                reason: "approval channel closed".to_string(),
            }),
            Err(_elapsed) => {
                // A response may have resolved the entry in the same tick.
                if let Ok(signal) = rx.try_recv() {
                    return self.signal_to_result(request_id, timeout, signal);
                }
                self.shared.registry().remove(request_id);
                Err(Error::ApprovalTimeout {
                    request_id: request_id.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    fn signal_to_result(
        &self,
        request_id: &str,
        timeout: Duration,
        signal: WaiterSignal,
    ) -> Result<HitlResult> {
        match signal {
            WaiterSignal::Resolved(result) => Ok(result),
            WaiterSignal::Expired => Err(Error::ApprovalTimeout {
                request_id: request_id.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }),
            WaiterSignal::Cancelled(reason) => Err(Error::ApprovalCancelled {
                request_id: request_id.to_string(),
                reason,
            }),
            WaiterSignal::Shutdown => Err(Error::ApprovalCancelled {
                request_id: request_id.to_string(),
                reason: "coordinator shutting down".to_string(),
            }),
        }
    }

    /// Demultiplex an inbound response onto its pending entry.
    ///
    /// When security is configured the response must carry a valid header
    /// set; signature and id checks run before the nonce is consumed, so a
    /// forged replay never burns a fresh nonce.
    pub fn handle_approval_response(
        &self,
        response: &ApprovalResponse,
        headers: &HashMap<String, String>,
    ) -> Result<()> {
        let created_at = {
            let registry = self.shared.registry();
            let entry = registry
                .get(&response.request_id)
                .ok_or_else(|| Error::UnknownRequestId(response.request_id.clone()))?;
            entry.request.created_at
        };

        if let Some(security) = &self.security {
            let body = serde_json::to_vec(response)?;
            let validated = security
                .envelope
                .validate_response(&body, headers, &response.request_id)
                .map_err(|e| match e {
                    ValidationError::MissingHeaders => {
                        Error::InvalidSignature("missing required security headers".to_string())
                    }
                    ValidationError::InvalidTimestamp => {
                        Error::InvalidSignature("invalid timestamp format".to_string())
                    }
                    ValidationError::RequestIdMismatch => Error::RequestIdMismatch,
                    ValidationError::InvalidSignature => {
                        Error::InvalidSignature("signature verification failed".to_string())
                    }
                })?;

            let mut nonces = self.shared.nonces();
            if nonces.contains_key(&validated.nonce) {
                warn!(request_id = %response.request_id, "duplicate nonce; possible replay");
                return Err(Error::DuplicateNonce);
            }
            nonces.insert(validated.nonce, Utc::now());
        }

        let result = HitlResult {
            approved: response.decision == ApprovalDecision::Approve,
            reason: response.reason.clone(),
            approved_by: response.approved_by.clone(),
            response_time_ms: (Utc::now() - created_at).num_milliseconds(),
        };

        let mut registry = self.shared.registry();
        let waiting = {
            let entry = registry
                .get_mut(&response.request_id)
                .ok_or_else(|| Error::UnknownRequestId(response.request_id.clone()))?;
            matches!(entry.state, WaiterState::Waiting { .. })
        };

        if waiting {
            if let Some(entry) = registry.remove(&response.request_id) {
                if let WaiterState::Waiting { tx } = entry.state {
                    // The waiter may have timed out in the same tick.
                    let _ = tx.send(WaiterSignal::Resolved(result));
                }
            }
        } else if let Some(entry) = registry.get_mut(&response.request_id) {
            if let WaiterState::Idle { early } = &mut entry.state {
                if early.is_some() {
                    warn!(request_id = %response.request_id,
                          "duplicate approval response; overwriting buffered result");
                }
                *early = Some(result);
            }
        }

        debug!(request_id = %response.request_id, decision = ?response.decision,
               "approval response handled");
        Ok(())
    }

    /// Cancel a pending request; a blocked waiter fails with
    /// `ApprovalCancelled`. A second call reports the id as unknown.
    pub fn cancel_approval(&self, request_id: &str, reason: &str) -> Result<()> {
        let entry = self
            .shared
            .registry()
            .remove(request_id)
            .ok_or_else(|| Error::UnknownRequestId(request_id.to_string()))?;

        if let WaiterState::Waiting { tx } = entry.state {
            let _ = tx.send(WaiterSignal::Cancelled(reason.to_string()));
        }
        info!(request_id, reason, "approval request cancelled");
        Ok(())
    }

    /// Remove entries past their expiry; blocked waiters fail with
    /// `ApprovalTimeout`. Returns how many entries were removed.
    pub fn cleanup_expired_requests(&self) -> usize {
        self.shared.remove_expired(Utc::now())
    }

    /// Snapshot of the pending requests.
    pub fn get_pending_approvals(&self) -> Vec<ApprovalRequest> {
        self.shared
            .registry()
            .values()
            .map(|entry| entry.request.clone())
            .collect()
    }

    /// Registry counters: pending count, age of the oldest entry, and the
    /// average entry age.
    pub fn get_stats(&self) -> HitlStats {
        let now = Utc::now();
        let registry = self.shared.registry();
        let ages: Vec<i64> = registry
            .values()
            .map(|entry| (now - entry.request.created_at).num_milliseconds())
            .collect();

        HitlStats {
            pending: ages.len(),
            oldest_age_ms: ages.iter().max().copied(),
            average_age_ms: if ages.is_empty() {
                None
            } else {
                Some(ages.iter().sum::<i64>() / ages.len() as i64)
            },
        }
    }

    /// Stop the sweeper and fail every outstanding waiter. Idempotent.
    pub fn destroy(&self) {
        self.shutdown.store(true, Ordering::Release);

        if let Some(handle) = self
            .sweeper
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            handle.abort();
        }

        let drained: Vec<PendingEntry> = self.shared.registry().drain().map(|(_, e)| e).collect();
        if !drained.is_empty() {
            info!(count = drained.len(), "failing outstanding approvals on shutdown");
        }
        for entry in drained {
            if let WaiterState::Waiting { tx } = entry.state {
                let _ = tx.send(WaiterSignal::Shutdown);
            }
        }
    }
}

impl Drop for HitlCoordinator {
    fn drop(&mut self) {
        if let Some(handle) = self
            .sweeper
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for HitlCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HitlCoordinator")
            .field("pending", &self.shared.registry().len())
            .field("webhook", &self.dispatcher.is_some())
            .finish_non_exhaustive()
    }
}

fn spawn_sweeper(shared: Weak<Shared>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        interval.tick().await; // completes immediately
        loop {
            interval.tick().await;
            let Some(shared) = shared.upgrade() else {
                break;
            };
            shared.sweep();
        }
    })
}
