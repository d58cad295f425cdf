//! A deterministic provider for tests: replays a fixed script of
//! responses in order, one per call, regardless of which `complete*`
//! method is invoked. Lets loop/approval/retry tests assert exact
//! transcripts without a network dependency.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::error::AgentError;
use crate::types::{Message, ToolCall, ToolDefinition, TokenUsage};

use super::{CallOptions, FinishReason, Provider, ToolResponse};

#[derive(Clone)]
pub enum ScriptedTurn {
    Text(String),
    ToolCalls(Vec<ToolCall>),
    Error(String),
    /// Same as `Text`, but carries token usage so budget-accumulation
    /// tests can assert on `AgentState::total_usage` without a real
    /// provider round trip.
    TextWithUsage(String, TokenUsage),
}

pub struct MockProvider {
    script: Vec<ScriptedTurn>,
    cursor: AtomicUsize,
    calls_made: Mutex<Vec<Vec<Message>>>,
}

impl MockProvider {
    pub fn new(script: Vec<ScriptedTurn>) -> Self {
        Self { script, cursor: AtomicUsize::new(0), calls_made: Mutex::new(Vec::new()) }
    }

    pub fn call_count(&self) -> usize {
        self.calls_made.lock().unwrap().len()
    }

    fn next_turn(&self) -> Result<ScriptedTurn, AgentError> {
        let index = self.cursor.fetch_add(1, Ordering::SeqCst);
        self.script
            .get(index)
            .cloned()
            .ok_or_else(|| AgentError::ProviderProtocol("mock provider script exhausted".to_string()))
    }
}

#[async_trait]
impl Provider for MockProvider {
    async fn complete(&self, messages: &[Message], _opts: CallOptions) -> Result<String, AgentError> {
        self.calls_made.lock().unwrap().push(messages.to_vec());
        match self.next_turn()? {
            ScriptedTurn::Text(text) => Ok(text),
            ScriptedTurn::TextWithUsage(text, _) => Ok(text),
            ScriptedTurn::ToolCalls(_) => Err(AgentError::ProviderProtocol(
                "scripted turn was tool_calls but complete() was called".to_string(),
            )),
            ScriptedTurn::Error(message) => Err(AgentError::ProviderTransient(message)),
        }
    }

    async fn complete_with_tools(
        &self,
        messages: &[Message],
        _tools: &[ToolDefinition],
        _opts: CallOptions,
    ) -> Result<ToolResponse, AgentError> {
        self.calls_made.lock().unwrap().push(messages.to_vec());
        match self.next_turn()? {
            ScriptedTurn::Text(text) => {
                Ok(ToolResponse { content: Some(text), tool_calls: vec![], finish_reason: Some(FinishReason::Stop), usage: None })
            }
            ScriptedTurn::TextWithUsage(text, usage) => {
                Ok(ToolResponse { content: Some(text), tool_calls: vec![], finish_reason: Some(FinishReason::Stop), usage: Some(usage) })
            }
            ScriptedTurn::ToolCalls(calls) => Ok(ToolResponse {
                content: None,
                tool_calls: calls,
                finish_reason: Some(FinishReason::ToolCalls),
                usage: None,
            }),
            ScriptedTurn::Error(message) => Err(AgentError::ProviderTransient(message)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replays_scripted_turns_in_order() {
        let provider = MockProvider::new(vec![
            ScriptedTurn::ToolCalls(vec![ToolCall::new("c1", "get_logs", "{}")]),
            ScriptedTurn::Text("done".to_string()),
        ]);
        let first = provider.complete_with_tools(&[], &[], CallOptions::default()).await.unwrap();
        assert_eq!(first.tool_calls.len(), 1);
        let second = provider.complete_with_tools(&[], &[], CallOptions::default()).await.unwrap();
        assert_eq!(second.content.as_deref(), Some("done"));
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn exhausted_script_is_a_protocol_error() {
        let provider = MockProvider::new(vec![ScriptedTurn::Text("only one".to_string())]);
        provider.complete_with_tools(&[], &[], CallOptions::default()).await.unwrap();
        let result = provider.complete_with_tools(&[], &[], CallOptions::default()).await;
        assert!(matches!(result, Err(AgentError::ProviderProtocol(_))));
    }
}
