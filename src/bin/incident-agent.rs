//! Minimal driver: reads the environment configuration, wires up a
//! provider, tool registry and integration router, and drives one run to
//! completion or an approval pause.
//!
//! ```bash
//! LLM_PROVIDER=anthropic ANTHROPIC_API_KEY=sk-... \
//!     INCIDENT_DESCRIPTION="checkout-api p99 latency spiked at 14:02 UTC" \
//!     cargo run --bin incident-agent
//! ```

use incident_agent::{
    config,
    engine::AgentLoop,
    integrations::RouterHandle,
    pr_engine,
    tools::{RiskTier, ToolBuilder, ToolRegistry},
    types::{ToolResult, AgentState},
};
use serde_json::Value;
use std::collections::HashMap;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let agent_config = config::agent_config_from_env()?;
    let integrations_config = config::load_integrations_config()?;

    let provider = incident_agent::llm::provider_from_env()?;

    let mut tools = ToolRegistry::new();
    let router_handle = RouterHandle::new();
    let router = router_handle.get_or_init(integrations_config.clone()).await?;
    router.register_tools(&integrations_config, &mut tools).await?;
    register_pull_request_tool(&mut tools)?;

    let engine = AgentLoop::new(provider, tools, agent_config.clone());

    let run_id = uuid::Uuid::new_v4().to_string();
    let workspace_id = std::env::var("WORKSPACE_ID").unwrap_or_else(|_| "default".to_string());
    let mut state = AgentState::new(&run_id, &workspace_id, &agent_config.system_prompt);

    let incident_description = std::env::var("INCIDENT_DESCRIPTION")
        .unwrap_or_else(|_| "Investigate the most recent incident and propose a fix.".to_string());
    state.messages.push(incident_agent::types::Message::user(incident_description));

    tracing::info!(run_id = %run_id, "starting incident investigation run");
    engine.run(&mut state).await?;

    match state.status {
        incident_agent::types::RunStatus::Paused => {
            tracing::info!(run_id = %run_id, "run paused awaiting approval");
        }
        incident_agent::types::RunStatus::Completed => {
            tracing::info!(run_id = %run_id, "run completed");
        }
        incident_agent::types::RunStatus::Failed => {
            tracing::warn!(run_id = %run_id, error = ?state.error, "run failed");
        }
        incident_agent::types::RunStatus::Running => {}
    }

    println!("{}", serde_json::to_string_pretty(&state)?);
    Ok(())
}

/// Backs an `open_pull_request` tool with the commit/PR protocol in
/// [`pr_engine`]. Destructive-tier: opening a PR touches a real remote
/// branch, so the loop suspends for approval before this executor runs.
fn register_pull_request_tool(tools: &mut ToolRegistry) -> Result<(), incident_agent::error::AgentError> {
    tools.register(
        ToolBuilder::new(
            "open_pull_request",
            "Commits one or more file edits to a new or existing branch and opens (or updates) a draft pull request.",
        )
        .risk_tier(RiskTier::Destructive)
        .parameters(serde_json::json!({
            "type": "object",
            "properties": {
                "repo": {"type": "string", "description": "owner/name of the repository"},
                "title": {"type": "string", "description": "pull request title"},
                "body": {"type": "string", "description": "pull request description"},
                "base": {"type": "string", "description": "base branch, e.g. main"},
                "head": {"type": "string", "description": "branch to create or reset for this change"},
                "files": {
                    "type": "array",
                    "description": "file edits as [{\"path\": ..., \"content\": ...}]",
                    "items": {
                        "type": "object",
                        "properties": {"path": {"type": "string"}, "content": {"type": "string"}},
                        "required": ["path", "content"],
                    },
                },
            },
            "required": ["repo", "title", "base", "head", "files"],
        }))
        .build(|args, _ctx| async move { execute_open_pull_request(args).await }),
    )
}

async fn execute_open_pull_request(args: HashMap<String, Value>) -> ToolResult {
    let repo = match args.get("repo").and_then(Value::as_str) {
        Some(repo) => repo.to_string(),
        None => return ToolResult::err("missing required argument 'repo'"),
    };
    let title = match args.get("title").and_then(Value::as_str) {
        Some(title) => title.to_string(),
        None => return ToolResult::err("missing required argument 'title'"),
    };
    let body = args.get("body").and_then(Value::as_str).unwrap_or_default().to_string();
    let base = args.get("base").and_then(Value::as_str).unwrap_or("main").to_string();
    let head = match args.get("head").and_then(Value::as_str) {
        Some(head) => head.to_string(),
        None => return ToolResult::err("missing required argument 'head'"),
    };
    let files = match pr_engine::normalize_files(&args) {
        Ok(files) => files,
        Err(e) => return ToolResult::err(e),
    };

    let Some(token) = config::github_token() else {
        return ToolResult::err("GITHUB_TOKEN is not configured");
    };

    let client = pr_engine::TreeServiceClient::new(token);
    let request = pr_engine::PrRequest { repo, title, body, base, head, files };

    match pr_engine::compose_pull_request(&client, &request).await {
        Ok(outcome) => ToolResult::ok_with_metadata(
            format!(
                "{} pull request #{}",
                if outcome.created { "opened" } else { "updated" },
                outcome.pr_number
            ),
            serde_json::json!({"pr_number": outcome.pr_number, "created": outcome.created}),
        ),
        Err(e) => ToolResult::err(e.to_string()),
    }
}
