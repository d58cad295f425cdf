//! Ordering and the cross-call pull-request guard for a single turn that
//! requests more than one tool at once.

use incident_agent::engine::AgentLoop;
use incident_agent::llm::mock::{MockProvider, ScriptedTurn};
use incident_agent::tools::{RiskTier, ToolBuilder, ToolRegistry};
use incident_agent::types::{AgentConfig, AgentState, ToolCall, ToolResult};
use std::sync::Arc;

fn config() -> AgentConfig {
    AgentConfig { max_iterations: 10, system_prompt: "investigate".to_string(), timeout_ms: 60_000 }
}

fn telemetry_tools() -> ToolRegistry {
    let mut tools = ToolRegistry::new();
    tools
        .register(ToolBuilder::new("get_logs", "reads logs").risk_tier(RiskTier::ReadOnly).build(|_, _| async { ToolResult::ok("logs") }))
        .unwrap();
    tools
        .register(ToolBuilder::new("get_metrics", "reads metrics").risk_tier(RiskTier::ReadOnly).build(|_, _| async { ToolResult::ok("metrics") }))
        .unwrap();
    tools
        .register(ToolBuilder::new("get_traces", "reads traces").risk_tier(RiskTier::ReadOnly).build(|_, _| async { ToolResult::ok("traces") }))
        .unwrap();
    tools
}

#[tokio::test]
async fn three_tool_calls_in_one_turn_execute_and_record_in_request_order() {
    let provider = Arc::new(MockProvider::new(vec![
        ScriptedTurn::ToolCalls(vec![
            ToolCall::new("c1", "get_metrics", "{}"),
            ToolCall::new("c2", "get_logs", "{}"),
            ToolCall::new("c3", "get_traces", "{}"),
        ]),
        ScriptedTurn::Text("Correlated across all three signals.".to_string()),
    ]));
    let engine = AgentLoop::new(provider, telemetry_tools(), config());
    let mut state = AgentState::new("run-parallel-1", "ws-1", "investigate");
    engine.run(&mut state).await.unwrap();

    let names: Vec<&str> = state.tool_call_history.iter().map(|e| e.tool_name.as_str()).collect();
    assert_eq!(names, vec!["get_metrics", "get_logs", "get_traces"]);
    // Every history entry is attributed to the same iteration: they all
    // came from one turn.
    assert!(state.tool_call_history.iter().all(|e| e.iteration == 1));
}

#[tokio::test]
async fn pr_call_in_the_same_turn_as_a_read_of_the_same_repo_is_skipped_but_siblings_still_run() {
    let provider = Arc::new(MockProvider::new(vec![
        ScriptedTurn::ToolCalls(vec![
            ToolCall::new("c1", "get_logs", "{}"),
            ToolCall::new("c2", "github_get_file", r#"{"repo": "acme/checkout", "path": "retry.py"}"#),
            ToolCall::new("c3", "github_create_pr", r#"{"repo": "acme/checkout", "files": [{"path": "retry.py", "content": "fixed"}]}"#),
        ]),
        ScriptedTurn::Text("Filed after reviewing the file.".to_string()),
    ]));
    let mut tools = telemetry_tools();
    tools
        .register(ToolBuilder::new("github_get_file", "reads a repo file").risk_tier(RiskTier::ReadOnly).build(|_, _| async { ToolResult::ok("def retry(): ...") }))
        .unwrap();
    tools
        .register(ToolBuilder::new("github_create_pr", "opens a pr").risk_tier(RiskTier::SafeWrite).build(|_, _| async { ToolResult::ok("pr #7 opened") }))
        .unwrap();
    let engine = AgentLoop::new(provider, tools, config());
    let mut state = AgentState::new("run-parallel-2", "ws-1", "investigate");
    engine.run(&mut state).await.unwrap();

    let executed: Vec<&str> = state.tool_call_history.iter().map(|e| e.tool_name.as_str()).collect();
    assert_eq!(executed, vec!["get_logs", "github_get_file"]);

    let skipped = state.messages.iter().find(|m| m.tool_call_id.as_deref() == Some("c3")).unwrap();
    assert!(skipped.content.contains("Skipped"));
}

#[tokio::test]
async fn pr_calls_targeting_different_repos_than_any_sibling_read_both_still_run() {
    let provider = Arc::new(MockProvider::new(vec![
        ScriptedTurn::ToolCalls(vec![
            ToolCall::new("c1", "github_get_file", r#"{"repo": "acme/checkout", "path": "a.py"}"#),
            ToolCall::new("c2", "github_create_pr", r#"{"repo": "acme/billing", "files": [{"path": "b.py", "content": "fix"}]}"#),
        ]),
        ScriptedTurn::Text("Opened against the unrelated repo.".to_string()),
    ]));
    let mut tools = ToolRegistry::new();
    tools
        .register(ToolBuilder::new("github_get_file", "reads a repo file").risk_tier(RiskTier::ReadOnly).build(|_, _| async { ToolResult::ok("contents") }))
        .unwrap();
    tools
        .register(ToolBuilder::new("github_create_pr", "opens a pr").risk_tier(RiskTier::SafeWrite).build(|_, _| async { ToolResult::ok("pr opened") }))
        .unwrap();
    let engine = AgentLoop::new(provider, tools, config());
    let mut state = AgentState::new("run-parallel-3", "ws-1", "investigate");
    engine.run(&mut state).await.unwrap();

    let executed: Vec<&str> = state.tool_call_history.iter().map(|e| e.tool_name.as_str()).collect();
    assert_eq!(executed, vec!["github_get_file", "github_create_pr"]);
}
