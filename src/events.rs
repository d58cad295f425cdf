//! Fire-and-forget lifecycle notifications for observers (a UI, a log
//! shipper). Delivery is best-effort: a slow or absent subscriber never
//! blocks the agent loop. Durable history lives on `AgentState` itself,
//! not here.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

/// One point-in-time notice about a run's progress. Carries just enough
/// to render a live trace; full detail belongs in the persisted state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    IterationStart { run_id: String, iteration: usize },
    LlmResponse { run_id: String, iteration: usize, content_preview: String },
    ToolCallRequested { run_id: String, tool_name: String, tool_call_id: String },
    ToolCallCompleted { run_id: String, tool_name: String, tool_call_id: String, success: bool },
    ApprovalRequired { run_id: String, tool_name: String, tool_call_id: String },
    Resumed { run_id: String, approved: bool },
    Completed { run_id: String, result: Option<String> },
    Failed { run_id: String, error: String },
    TimedOut { run_id: String, elapsed_ms: u64 },
}

impl AgentEvent {
    pub fn run_id(&self) -> &str {
        match self {
            AgentEvent::IterationStart { run_id, .. }
            | AgentEvent::LlmResponse { run_id, .. }
            | AgentEvent::ToolCallRequested { run_id, .. }
            | AgentEvent::ToolCallCompleted { run_id, .. }
            | AgentEvent::ApprovalRequired { run_id, .. }
            | AgentEvent::Resumed { run_id, .. }
            | AgentEvent::Completed { run_id, .. }
            | AgentEvent::Failed { run_id, .. }
            | AgentEvent::TimedOut { run_id, .. } => run_id,
        }
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Broadcast channel wrapper. Cloning shares the same underlying queue;
/// every clone's `subscribe()` gets an independent receiver.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<AgentEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.sender.subscribe()
    }

    /// Never fails the caller: an event with no subscribers, or one that
    /// overflows a lagging subscriber's buffer, is simply dropped.
    pub fn publish(&self, event: AgentEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
