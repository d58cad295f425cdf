//! The scheduler that drives one [`AgentState`] forward: budget gating,
//! one provider call per iteration, guardrail and approval gating on each
//! resulting tool call, and graceful termination on either exhaustion.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;

use crate::approval::PendingApproval;
use crate::error::AgentError;
use crate::events::{AgentEvent, EventBus};
use crate::guardrails::{AuditLog, GuardrailSet, RateLimitBucket, Severity};
use crate::llm::{CallOptions, Provider};
use crate::pr_engine;
use crate::timeout::{TimeoutController, MIN_ITERATION_TIME_MS};
use crate::tools::ToolRegistry;
use crate::types::{AgentConfig, AgentState, Message, RunStatus, ToolCall, ToolCallHistoryEntry, ToolContext};

const LLM_CALL_HEADROOM_MS: u64 = 5_000;
const LLM_CALL_CAP_MS: u64 = 60_000;

/// Default hourly request and estimated-cost caps, generous enough not to
/// interfere with a normal investigation but present so a run-away loop
/// (e.g. a misbehaving provider retry policy) cannot spend unbounded
/// money or quota.
const DEFAULT_MAX_REQUESTS_PER_HOUR: u64 = 120;
const DEFAULT_MAX_COST_CENTS_PER_HOUR: u64 = 5_000;

/// Rough cost estimate used only to trip the rate/cost guardrail, not for
/// billing: one cent per thousand tokens.
const ESTIMATED_CENTS_PER_1K_TOKENS: u64 = 1;

pub struct AgentLoop {
    provider: Arc<dyn Provider>,
    tools: ToolRegistry,
    timeout: TimeoutController,
    events: EventBus,
    guardrails: GuardrailSet,
    rate_limit: RateLimitBucket,
    audit: AuditLog,
    config: AgentConfig,
}

impl AgentLoop {
    pub fn new(provider: Arc<dyn Provider>, tools: ToolRegistry, config: AgentConfig) -> Self {
        let timeout = TimeoutController::new(config.timeout_ms);
        Self {
            provider,
            tools,
            timeout,
            events: EventBus::default(),
            guardrails: GuardrailSet::new(),
            rate_limit: RateLimitBucket::new(DEFAULT_MAX_REQUESTS_PER_HOUR, DEFAULT_MAX_COST_CENTS_PER_HOUR),
            audit: AuditLog::new(),
            config,
        }
    }

    pub fn events(&self) -> EventBus {
        self.events.clone()
    }

    pub fn audit_log(&self) -> &AuditLog {
        &self.audit
    }

    /// Drives `state` forward until it reaches a terminal status or pauses
    /// for approval. Every failure mode — hard timeout, exhausted
    /// iterations, an unrecoverable provider error — is absorbed into
    /// `state` rather than returned, so a caller can always checkpoint
    /// `state` after this call regardless of which path it took.
    pub async fn run(&self, state: &mut AgentState) -> Result<(), AgentError> {
        self.timeout.start();
        loop {
            if state.status.is_terminal() || state.status == RunStatus::Paused {
                return Ok(());
            }

            if !self.timeout.has_time_for(MIN_ITERATION_TIME_MS) {
                self.complete(state, "Investigation stopped: insufficient time remaining to safely complete another iteration.");
                return Ok(());
            }

            if state.iterations >= self.config.max_iterations {
                self.complete(state, "Investigation reached maximum iterations.");
                return Ok(());
            }

            if self.rate_limit.is_exceeded() {
                self.complete(state, "Investigation stopped: hourly request/cost limit reached.");
                return Ok(());
            }

            if let Err(err) = self.run_iteration(state).await {
                self.fail(state, &err);
                return Ok(());
            }
        }
    }

    fn complete(&self, state: &mut AgentState, result: &str) {
        state.status = RunStatus::Completed;
        state.result = Some(result.to_string());
        state.touch();
        self.events.publish(AgentEvent::Completed { run_id: state.run_id.clone(), result: state.result.clone() });
    }

    fn fail(&self, state: &mut AgentState, err: &AgentError) {
        state.status = RunStatus::Failed;
        state.error = Some(err.to_string());
        state.touch();
        if matches!(err, AgentError::Timeout(_)) {
            self.events.publish(AgentEvent::TimedOut { run_id: state.run_id.clone(), elapsed_ms: self.timeout.elapsed_ms() });
        } else {
            self.events.publish(AgentEvent::Failed { run_id: state.run_id.clone(), error: err.to_string() });
        }
        self.audit.record(&state.run_id, &state.workspace_id, "run_failed", serde_json::json!({"error": err.to_string()}));
    }

    async fn run_iteration(&self, state: &mut AgentState) -> Result<(), AgentError> {
        self.timeout.checkpoint("iteration start")?;
        state.iterations += 1;
        state.touch();
        self.events.publish(AgentEvent::IterationStart { run_id: state.run_id.clone(), iteration: state.iterations });

        let per_call_ms = self.timeout.remaining_ms().saturating_sub(LLM_CALL_HEADROOM_MS).min(LLM_CALL_CAP_MS).max(1);
        let tool_defs = self.tools.get_definitions();
        let response = self
            .timeout
            .with_timeout(self.provider.complete_with_tools(&state.messages, &tool_defs, CallOptions::default()), per_call_ms, "llm call")
            .await??;

        let estimated_cost_cents = response
            .usage
            .map(|usage| usage.total_tokens.saturating_mul(ESTIMATED_CENTS_PER_1K_TOKENS) / 1000)
            .unwrap_or(0);
        self.rate_limit.record(estimated_cost_cents);

        if let Some(usage) = response.usage {
            state.total_usage.add(usage);
        }

        self.events.publish(AgentEvent::LlmResponse {
            run_id: state.run_id.clone(),
            iteration: state.iterations,
            content_preview: preview(response.content.as_deref().unwrap_or("")),
        });

        if response.tool_calls.is_empty() {
            let content = response.content.unwrap_or_default();
            state.messages.push(Message::assistant(content.clone()));
            let result = if content.trim().is_empty() { "Investigation complete.".to_string() } else { content };
            self.complete(state, &result);
            return Ok(());
        }

        let content = response.content.unwrap_or_default();
        state.messages.push(Message::assistant_with_tool_calls(content, response.tool_calls.clone()));

        let dropped = self.same_turn_pr_calls_to_drop(&response.tool_calls);
        let ctx = ToolContext::new(state.run_id.clone(), state.workspace_id.clone());

        for call in &response.tool_calls {
            if dropped.contains(&call.id) {
                state.messages.push(Message::tool_result(
                    call.id.clone(),
                    format!(
                        "Skipped: this repository was also read earlier in the same turn, and that read's \
                         result is not yet available to this decision. Review the read result in a following \
                         turn before re-issuing \"{}\".",
                        call.name
                    ),
                ));
                continue;
            }

            self.timeout.checkpoint("before tool dispatch")?;
            self.events.publish(AgentEvent::ToolCallRequested { run_id: state.run_id.clone(), tool_name: call.name.clone(), tool_call_id: call.id.clone() });

            let args = call.parsed_args();
            let violations = self.guardrails.scan_args(&args);
            if let Some(blocked) = violations.iter().find(|v| v.severity == Severity::Blocked) {
                let message = format!("blocked by guardrail '{}': matched \"{}\"", blocked.rule, blocked.matched_text);
                self.audit.record(&state.run_id, &state.workspace_id, "guardrail_blocked", serde_json::json!({"tool": call.name, "rule": blocked.rule}));
                state.messages.push(Message::tool_result(call.id.clone(), format!("Error: {message}")));
                self.events.publish(AgentEvent::ToolCallCompleted { run_id: state.run_id.clone(), tool_name: call.name.clone(), tool_call_id: call.id.clone(), success: false });
                continue;
            }

            if self.tools.requires_approval(&call.name) {
                state.pending_approval = Some(PendingApproval {
                    tool_call_id: call.id.clone(),
                    tool_name: call.name.clone(),
                    tool_args: args,
                    requested_at: Utc::now(),
                });
                state.status = RunStatus::Paused;
                state.touch();
                self.events.publish(AgentEvent::ApprovalRequired { run_id: state.run_id.clone(), tool_name: call.name.clone(), tool_call_id: call.id.clone() });
                self.audit.record(&state.run_id, &state.workspace_id, "approval_required", serde_json::json!({"tool": call.name}));
                return Ok(());
            }

            let result = self.tools.execute(&call.name, args.clone(), &ctx).await;
            state.tool_call_history.push(ToolCallHistoryEntry {
                iteration: state.iterations,
                tool_name: call.name.clone(),
                args,
                result: result.clone(),
                timestamp: Utc::now(),
            });
            state.last_tool_call = Some(call.name.clone());
            state.messages.push(Message::tool_result(call.id.clone(), result.transcript_content()));
            self.events.publish(AgentEvent::ToolCallCompleted { run_id: state.run_id.clone(), tool_name: call.name.clone(), tool_call_id: call.id.clone(), success: result.success });
            self.audit.record(&state.run_id, &state.workspace_id, "tool_executed", serde_json::json!({"tool": call.name, "success": result.success}));
        }

        Ok(())
    }

    /// Within one batch of tool calls, a pull-request call is dropped if
    /// another call in the same batch reads the same repository: that
    /// read's result will not reach the transcript until the next
    /// iteration, so acting on it now would be acting blind.
    fn same_turn_pr_calls_to_drop(&self, calls: &[ToolCall]) -> HashSet<String> {
        let mut dropped = HashSet::new();
        for write_call in calls {
            if !pr_engine::looks_like_pr_tool(&write_call.name) {
                continue;
            }
            let write_args = write_call.parsed_args();
            let reads_same_repo = calls.iter().any(|other| {
                other.id != write_call.id
                    && pr_engine::looks_like_read_tool(&other.name)
                    && pr_engine::targets_same_repo(&write_args, &other.parsed_args())
            });
            if reads_same_repo {
                dropped.insert(write_call.id.clone());
            }
        }
        dropped
    }
}

fn preview(text: &str) -> String {
    const MAX_PREVIEW_CHARS: usize = 200;
    let truncated: String = text.chars().take(MAX_PREVIEW_CHARS).collect();
    if text.chars().count() > MAX_PREVIEW_CHARS {
        format!("{truncated}...")
    } else {
        truncated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock::{MockProvider, ScriptedTurn};
    use crate::tools::{RiskTier, ToolBuilder};
    use crate::types::ToolResult;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn config(max_iterations: usize) -> AgentConfig {
        AgentConfig { max_iterations, system_prompt: "investigate".to_string(), timeout_ms: 60_000 }
    }

    #[tokio::test]
    async fn completes_when_provider_returns_no_tool_calls() {
        let provider = Arc::new(MockProvider::new(vec![ScriptedTurn::Text("Root cause found.".to_string())]));
        let engine = AgentLoop::new(provider, ToolRegistry::new(), config(10));
        let mut state = AgentState::new("run-1", "ws-1", "investigate");
        engine.run(&mut state).await.unwrap();
        assert_eq!(state.status, RunStatus::Completed);
        assert_eq!(state.result.as_deref(), Some("Root cause found."));
    }

    #[tokio::test]
    async fn executes_read_only_tool_then_completes() {
        let provider = Arc::new(MockProvider::new(vec![
            ScriptedTurn::ToolCalls(vec![ToolCall::new("call-1", "get_logs", "{}")]),
            ScriptedTurn::Text("Found it.".to_string()),
        ]));
        let mut tools = ToolRegistry::new();
        tools
            .register(ToolBuilder::new("get_logs", "reads logs").risk_tier(RiskTier::ReadOnly).build(|_, _| async { ToolResult::ok("log lines") }))
            .unwrap();
        let engine = AgentLoop::new(provider, tools, config(10));
        let mut state = AgentState::new("run-1", "ws-1", "investigate");
        engine.run(&mut state).await.unwrap();
        assert_eq!(state.status, RunStatus::Completed);
        assert_eq!(state.tool_call_history.len(), 1);
        assert_eq!(state.tool_call_history[0].tool_name, "get_logs");
    }

    #[tokio::test]
    async fn suspends_on_destructive_tool_call() {
        let provider = Arc::new(MockProvider::new(vec![ScriptedTurn::ToolCalls(vec![ToolCall::new("call-1", "restart_service", "{}")])]));
        let mut tools = ToolRegistry::new();
        tools
            .register(
                ToolBuilder::new("restart_service", "restarts a service")
                    .risk_tier(RiskTier::Destructive)
                    .build(|_, _| async { ToolResult::ok("restarted") }),
            )
            .unwrap();
        let engine = AgentLoop::new(provider, tools, config(10));
        let mut state = AgentState::new("run-1", "ws-1", "investigate");
        engine.run(&mut state).await.unwrap();
        assert_eq!(state.status, RunStatus::Paused);
        assert!(state.pending_approval.is_some());
        assert!(state.tool_call_history.is_empty());
    }

    #[tokio::test]
    async fn blocked_guardrail_tool_call_never_executes() {
        let called = Arc::new(AtomicBool::new(false));
        let called_clone = called.clone();
        let provider = Arc::new(MockProvider::new(vec![
            ScriptedTurn::ToolCalls(vec![ToolCall::new("call-1", "run_sql", r#"{"query": "DROP TABLE incidents;"}"#)]),
            ScriptedTurn::Text("done".to_string()),
        ]));
        let mut tools = ToolRegistry::new();
        tools
            .register(ToolBuilder::new("run_sql", "runs sql").risk_tier(RiskTier::SafeWrite).build(move |_, _| {
                let called = called_clone.clone();
                async move {
                    called.store(true, Ordering::SeqCst);
                    ToolResult::ok("ran")
                }
            }))
            .unwrap();
        let engine = AgentLoop::new(provider, tools, config(10));
        let mut state = AgentState::new("run-1", "ws-1", "investigate");
        engine.run(&mut state).await.unwrap();
        assert!(!called.load(Ordering::SeqCst));
        assert!(state.tool_call_history.is_empty());
        assert_eq!(state.status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn drops_pr_call_that_targets_same_repo_as_unread_sibling_read() {
        let provider = Arc::new(MockProvider::new(vec![
            ScriptedTurn::ToolCalls(vec![
                ToolCall::new("call-1", "github_get_file", r#"{"repo": "acme/incidents", "path": "a.py"}"#),
                ToolCall::new("call-2", "github_create_pr", r#"{"repo": "acme/incidents", "files": []}"#),
            ]),
            ScriptedTurn::Text("done".to_string()),
        ]));
        let mut tools = ToolRegistry::new();
        tools
            .register(ToolBuilder::new("github_get_file", "reads a file").risk_tier(RiskTier::ReadOnly).build(|_, _| async { ToolResult::ok("file contents") }))
            .unwrap();
        tools
            .register(ToolBuilder::new("github_create_pr", "opens a pr").risk_tier(RiskTier::SafeWrite).build(|_, _| async { ToolResult::ok("pr opened") }))
            .unwrap();
        let engine = AgentLoop::new(provider, tools, config(10));
        let mut state = AgentState::new("run-1", "ws-1", "investigate");
        engine.run(&mut state).await.unwrap();
        assert_eq!(state.tool_call_history.len(), 1);
        assert_eq!(state.tool_call_history[0].tool_name, "github_get_file");
        let skipped_message = state.messages.iter().find(|m| m.tool_call_id.as_deref() == Some("call-2")).unwrap();
        assert!(skipped_message.content.contains("Skipped"));
    }

    #[tokio::test]
    async fn stops_gracefully_at_max_iterations() {
        let provider = Arc::new(MockProvider::new(vec![
            ScriptedTurn::ToolCalls(vec![ToolCall::new("call-1", "get_logs", "{}")]),
            ScriptedTurn::ToolCalls(vec![ToolCall::new("call-2", "get_logs", "{}")]),
        ]));
        let mut tools = ToolRegistry::new();
        tools
            .register(ToolBuilder::new("get_logs", "reads logs").risk_tier(RiskTier::ReadOnly).build(|_, _| async { ToolResult::ok("lines") }))
            .unwrap();
        let engine = AgentLoop::new(provider, tools, config(1));
        let mut state = AgentState::new("run-1", "ws-1", "investigate");
        engine.run(&mut state).await.unwrap();
        assert_eq!(state.status, RunStatus::Completed);
        assert_eq!(state.result.as_deref(), Some("Investigation reached maximum iterations."));
        assert_eq!(state.iterations, 1);
    }

    #[tokio::test]
    async fn stops_gracefully_once_the_hourly_request_cap_is_reached() {
        let mut script: Vec<ScriptedTurn> = (0..DEFAULT_MAX_REQUESTS_PER_HOUR + 5)
            .map(|i| ScriptedTurn::ToolCalls(vec![ToolCall::new(format!("call-{i}"), "get_logs", "{}")]))
            .collect();
        script.push(ScriptedTurn::Text("done".to_string()));
        let provider = Arc::new(MockProvider::new(script));
        let mut tools = ToolRegistry::new();
        tools
            .register(ToolBuilder::new("get_logs", "reads logs").risk_tier(RiskTier::ReadOnly).build(|_, _| async { ToolResult::ok("lines") }))
            .unwrap();
        let engine = AgentLoop::new(provider, tools, config(1_000));
        let mut state = AgentState::new("run-1", "ws-1", "investigate");
        engine.run(&mut state).await.unwrap();
        assert_eq!(state.status, RunStatus::Completed);
        assert_eq!(state.result.as_deref(), Some("Investigation stopped: hourly request/cost limit reached."));
        assert_eq!(state.iterations, DEFAULT_MAX_REQUESTS_PER_HOUR as usize + 1);
    }

    #[tokio::test]
    async fn stops_gracefully_when_insufficient_time_remains() {
        let provider = Arc::new(MockProvider::new(vec![ScriptedTurn::Error("should never be called".to_string())]));
        let engine = AgentLoop::new(provider, ToolRegistry::new(), AgentConfig { max_iterations: 10, system_prompt: String::new(), timeout_ms: 10 });
        let mut state = AgentState::new("run-1", "ws-1", "");
        engine.run(&mut state).await.unwrap();
        assert_eq!(state.status, RunStatus::Completed);
        assert!(state.result.as_deref().unwrap().contains("insufficient time"));
    }
}
