//! The pause/resume protocol: the agent suspends mid-turn on a destructive
//! action, serializes its full state, and later resumes on approve/reject
//! without re-running prior steps.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::AgentError;
use crate::tools::ToolRegistry;
use crate::types::{AgentState, Message, RunStatus, ToolContext, ToolResult};

/// Default lifetime of a suspended approval before it is treated as
/// expired if resumed late.
pub const DEFAULT_APPROVAL_TTL_MINUTES: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

/// The record embedded in [`AgentState::pending_approval`] while a run is
/// paused. This is the minimal suspension payload the loop itself needs;
/// [`ApprovalRequest`] is the richer externally-addressable record an
/// approval service would track by id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingApproval {
    pub tool_call_id: String,
    pub tool_name: String,
    pub tool_args: HashMap<String, Value>,
    pub requested_at: DateTime<Utc>,
}

/// An externally-addressable approval record: id, run/workspace scoping,
/// and decision bookkeeping, in addition to the minimal suspension
/// payload carried inline on the run state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: String,
    pub run_id: String,
    pub workspace_id: String,
    pub tool_name: String,
    pub tool_args: HashMap<String, Value>,
    pub status: ApprovalStatus,
    pub requested_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
    pub decided_by: Option<String>,
}

impl ApprovalRequest {
    pub fn new(run_id: &str, workspace_id: &str, pending: &PendingApproval) -> Self {
        let requested_at = pending.requested_at;
        Self {
            id: Uuid::new_v4().to_string(),
            run_id: run_id.to_string(),
            workspace_id: workspace_id.to_string(),
            tool_name: pending.tool_name.clone(),
            tool_args: pending.tool_args.clone(),
            status: ApprovalStatus::Pending,
            requested_at,
            expires_at: requested_at + Duration::minutes(DEFAULT_APPROVAL_TTL_MINUTES),
            decided_at: None,
            decided_by: None,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Idempotent on the second call for the same request: once a decision
    /// has been made, deciding again is a no-op that returns the earlier
    /// decision.
    pub fn decide(&mut self, approved: bool, decided_by: Option<String>) {
        if self.status != ApprovalStatus::Pending {
            return;
        }
        self.status = if approved { ApprovalStatus::Approved } else { ApprovalStatus::Rejected };
        self.decided_at = Some(Utc::now());
        self.decided_by = decided_by;
    }
}

/// Resumes a paused [`AgentState`] with an external approve/reject
/// decision. Exactly-once: the caller is responsible for not re-entering
/// this function twice for the same `pending_approval` (the loop clears it
/// before returning, so a second call would fail the precondition check
/// below with "not paused").
///
/// - Rejected: appends a rejection tool message, clears `pending_approval`,
///   sets `status = Running`.
/// - Approved: executes the stored tool call, appends history + a tool
///   message with the result, clears `pending_approval`, sets
///   `status = Running`.
///
/// Calling this when `status != Paused` is a precondition error. An
/// already-expired approval, when resumed, is treated as a rejection with
/// an explanatory message — checked defensively here since nothing in an
/// in-memory loop advances wall-clock time on its own.
pub async fn resume(
    state: &mut AgentState,
    tools: &ToolRegistry,
    ctx: &ToolContext,
    approved: bool,
) -> Result<(), AgentError> {
    if state.status != RunStatus::Paused {
        return Err(AgentError::Precondition(
            "resume called on a run that is not paused".to_string(),
        ));
    }

    let pending = state
        .pending_approval
        .take()
        .ok_or_else(|| AgentError::Precondition("paused run has no pending_approval".to_string()))?;

    let expires_at = pending.requested_at + Duration::minutes(DEFAULT_APPROVAL_TTL_MINUTES);
    let expired = Utc::now() > expires_at;

    if !approved || expired {
        let reason = if expired {
            "Approval request expired before a decision was recorded.".to_string()
        } else {
            format!(
                "Action \"{}\" was rejected by the user. Please suggest an alternative approach.",
                pending.tool_name
            )
        };
        state.messages.push(Message::tool_result(pending.tool_call_id.clone(), reason));
        state.status = RunStatus::Running;
        state.touch();
        return Ok(());
    }

    let result: ToolResult = tools.execute(&pending.tool_name, pending.tool_args.clone(), ctx).await;

    state.tool_call_history.push(crate::types::ToolCallHistoryEntry {
        iteration: state.iterations,
        tool_name: pending.tool_name.clone(),
        args: pending.tool_args.clone(),
        result: result.clone(),
        timestamp: Utc::now(),
    });
    state.last_tool_call = Some(pending.tool_name.clone());
    state
        .messages
        .push(Message::tool_result(pending.tool_call_id.clone(), result.transcript_content()));
    state.status = RunStatus::Running;
    state.touch();
    Ok(())
}

/// In-memory tracker for externally-addressable [`ApprovalRequest`]s,
/// mirroring the bookkeeping an approval service would do around the
/// loop. Not required by the core loop (which only needs
/// `AgentState::pending_approval`), but needed to back
/// `approve(request_id)` / `reject(request_id, reason?)` endpoints.
#[derive(Default, Clone)]
pub struct ApprovalStore {
    inner: Arc<tokio::sync::Mutex<HashMap<String, ApprovalRequest>>>,
}

impl ApprovalStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(&self, run_id: &str, workspace_id: &str, pending: &PendingApproval) -> ApprovalRequest {
        let request = ApprovalRequest::new(run_id, workspace_id, pending);
        self.inner.lock().await.insert(request.id.clone(), request.clone());
        request
    }

    /// Idempotent: a second `approve`/`reject` for an already-decided
    /// request returns the existing decision without mutating it.
    pub async fn approve(&self, request_id: &str) -> Option<ApprovalRequest> {
        self.decide(request_id, true).await
    }

    pub async fn reject(&self, request_id: &str, _reason: Option<String>) -> Option<ApprovalRequest> {
        self.decide(request_id, false).await
    }

    async fn decide(&self, request_id: &str, approved: bool) -> Option<ApprovalRequest> {
        let mut guard = self.inner.lock().await;
        let request = guard.get_mut(request_id)?;
        request.decide(approved, None);
        Some(request.clone())
    }

    pub async fn get(&self, request_id: &str) -> Option<ApprovalRequest> {
        self.inner.lock().await.get(request_id).cloned()
    }
}
