//! The wire-level data model shared by every component: messages, tool
//! calls, tool results, and the full serializable run state.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::approval::PendingApproval;

/// Role of a single [`Message`] in the conversation transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One entry in the conversation transcript.
///
/// Invariant: every `Role::Tool` message carries a `tool_call_id` that
/// appears in some earlier `Role::Assistant` message's `tool_calls`, and
/// tool messages appear in the same relative order as their originating
/// calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    /// May be empty when only `tool_calls` is present (assistant turn
    /// that requested tools rather than answering).
    #[serde(default)]
    pub content: String,
    /// Only ever populated on assistant messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Only ever populated on tool messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into(), tool_calls: None, tool_call_id: None }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into(), tool_calls: None, tool_call_id: None }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into(), tool_calls: None, tool_call_id: None }
    }

    pub fn assistant_with_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls: Some(tool_calls),
            tool_call_id: None,
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}

/// An opaque, run-unique identifier for a tool invocation requested by the
/// provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Raw JSON-object arguments as returned by the provider, serialized
    /// to a string. Parsed lazily by [`ToolCall::parsed_args`].
    pub arguments: String,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self { id: id.into(), name: name.into(), arguments: arguments.into() }
    }

    /// Parses [`Self::arguments`] as a JSON object. Malformed JSON degrades
    /// to `{"raw": <string>}` rather than aborting — providers occasionally
    /// emit non-JSON or partially-escaped argument strings and the loop
    /// must keep going regardless.
    pub fn parsed_args(&self) -> HashMap<String, Value> {
        match serde_json::from_str::<Value>(&self.arguments) {
            Ok(Value::Object(map)) => map.into_iter().collect(),
            _ => {
                let mut fallback = HashMap::new();
                fallback.insert("raw".to_string(), Value::String(self.arguments.clone()));
                fallback
            }
        }
    }
}

/// Declares a tool's name, description and JSON-schema parameter shape to
/// the provider so it can be advertised to the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema object: `{"type": "object", "properties": {...}, "required": [...]}`.
    pub parameters: Value,
}

/// The outcome of executing a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    /// Human-readable text fed back to the LLM on success.
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl ToolResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self { success: true, output: output.into(), error: None, metadata: None }
    }

    pub fn ok_with_metadata(output: impl Into<String>, metadata: Value) -> Self {
        Self { success: true, output: output.into(), error: None, metadata: Some(metadata) }
    }

    pub fn err(error: impl Into<String>) -> Self {
        let error = error.into();
        Self { success: false, output: String::new(), error: Some(error), metadata: None }
    }

    /// The text that gets appended to the transcript as a tool message.
    pub fn transcript_content(&self) -> String {
        if self.success {
            self.output.clone()
        } else {
            format!("Error: {}", self.error.clone().unwrap_or_else(|| "unknown error".to_string()))
        }
    }
}

/// Per-run opaque carrier passed through unchanged to every tool executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolContext {
    pub run_id: String,
    pub workspace_id: String,
    /// Credentials-by-reference: a name the tool resolves against its own
    /// secret store. Never the credential value itself.
    #[serde(default)]
    pub credential_refs: HashMap<String, String>,
}

impl ToolContext {
    pub fn new(run_id: impl Into<String>, workspace_id: impl Into<String>) -> Self {
        Self { run_id: run_id.into(), workspace_id: workspace_id.into(), credential_refs: HashMap::new() }
    }
}

/// One append-only record of an executed tool call, kept forever in
/// [`AgentState::tool_call_history`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallHistoryEntry {
    pub iteration: usize,
    pub tool_name: String,
    pub args: HashMap<String, Value>,
    pub result: ToolResult,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// The four terminal/non-terminal states a run can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Paused,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }
}

/// Accumulated LLM token usage for a run.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    pub fn new(input: u64, output: u64) -> Self {
        Self { input_tokens: input, output_tokens: output, total_tokens: input + output }
    }

    pub fn add(&mut self, other: TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// Configuration for one agent run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub max_iterations: usize,
    pub system_prompt: String,
    pub timeout_ms: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self { max_iterations: 15, system_prompt: String::new(), timeout_ms: 300_000 }
    }
}

/// The full serializable run state — the single source of truth an agent
/// run round-trips through JSON for checkpointing and approval suspension.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentState {
    pub run_id: String,
    pub workspace_id: String,
    pub status: RunStatus,
    pub messages: Vec<Message>,
    pub iterations: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_approval: Option<PendingApproval>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub tool_call_history: Vec<ToolCallHistoryEntry>,
    pub total_usage: TokenUsage,
    /// The tool name whose result most recently entered the transcript.
    /// Consulted by the cross-call pull-request filter to suppress a
    /// same-turn PR creation against a repo that was just read but not
    /// acted on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_tool_call: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl AgentState {
    pub fn new(run_id: impl Into<String>, workspace_id: impl Into<String>, system_prompt: &str) -> Self {
        let now = chrono::Utc::now();
        let mut messages = Vec::new();
        if !system_prompt.is_empty() {
            messages.push(Message::system(system_prompt));
        }
        Self {
            run_id: run_id.into(),
            workspace_id: workspace_id.into(),
            status: RunStatus::Running,
            messages,
            iterations: 0,
            pending_approval: None,
            result: None,
            error: None,
            tool_call_history: Vec::new(),
            total_usage: TokenUsage::default(),
            last_tool_call: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = chrono::Utc::now();
    }

    /// Invariant check used by tests: `status == Paused` iff
    /// `pending_approval` is present.
    pub fn invariant_paused_matches_pending(&self) -> bool {
        (self.status == RunStatus::Paused) == self.pending_approval.is_some()
    }
}
