//! Boundary-condition integration tests for the agent loop.
//!
//! All tests use `MockProvider` — no network calls are made.

use incident_agent::engine::AgentLoop;
use incident_agent::llm::mock::{MockProvider, ScriptedTurn};
use incident_agent::pr_engine;
use incident_agent::tools::{RiskTier, ToolBuilder, ToolRegistry};
use incident_agent::types::{AgentConfig, AgentState, RunStatus, ToolCall, ToolResult};
use std::collections::HashMap;
use std::sync::Arc;

fn config(max_iterations: usize, timeout_ms: u64) -> AgentConfig {
    AgentConfig { max_iterations, system_prompt: "investigate the incident".to_string(), timeout_ms }
}

#[tokio::test]
async fn max_iterations_of_one_still_executes_the_one_allowed_iteration() {
    let provider = Arc::new(MockProvider::new(vec![ScriptedTurn::ToolCalls(vec![ToolCall::new("c1", "get_logs", "{}")])]));
    let mut tools = ToolRegistry::new();
    tools.register(ToolBuilder::new("get_logs", "reads logs").risk_tier(RiskTier::ReadOnly).build(|_, _| async { ToolResult::ok("lines") })).unwrap();
    let engine = AgentLoop::new(provider, tools, config(1, 60_000));
    let mut state = AgentState::new("run-boundary-1", "ws-1", "investigate");
    engine.run(&mut state).await.unwrap();
    assert_eq!(state.tool_call_history.len(), 1);
    assert_eq!(state.status, RunStatus::Completed);
    assert_eq!(state.result.as_deref(), Some("Investigation reached maximum iterations."));
}

#[tokio::test]
async fn timeout_below_minimum_iteration_budget_ends_before_any_llm_call() {
    let provider = Arc::new(MockProvider::new(vec![ScriptedTurn::Error("provider should not be reached".to_string())]));
    let engine = AgentLoop::new(provider, ToolRegistry::new(), config(10, 1));
    let mut state = AgentState::new("run-boundary-2", "ws-1", "");
    engine.run(&mut state).await.unwrap();
    assert_eq!(state.status, RunStatus::Completed);
    assert_eq!(state.iterations, 0);
    assert!(state.result.unwrap().contains("insufficient time"));
}

#[test]
fn pr_engine_rejects_an_empty_files_array() {
    let mut args = HashMap::new();
    args.insert("files".to_string(), serde_json::json!([]));
    let result = pr_engine::normalize_files(&args);
    assert!(result.is_err());
}

#[tokio::test]
async fn already_paused_run_is_left_untouched_by_a_second_run_call() {
    let provider = Arc::new(MockProvider::new(vec![ScriptedTurn::Error("should not be called again".to_string())]));
    let mut tools = ToolRegistry::new();
    tools
        .register(ToolBuilder::new("delete_queue", "drops a queue").risk_tier(RiskTier::Destructive).build(|_, _| async { ToolResult::ok("deleted") }))
        .unwrap();
    let engine = AgentLoop::new(provider, tools, config(10, 60_000));
    let mut state = AgentState::new("run-boundary-3", "ws-1", "");
    state.status = RunStatus::Paused;
    state.pending_approval = Some(incident_agent::approval::PendingApproval {
        tool_call_id: "c1".to_string(),
        tool_name: "delete_queue".to_string(),
        tool_args: HashMap::new(),
        requested_at: chrono::Utc::now(),
    });
    engine.run(&mut state).await.unwrap();
    assert_eq!(state.status, RunStatus::Paused);
    assert!(state.pending_approval.is_some());
}
