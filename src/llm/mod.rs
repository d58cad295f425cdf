//! Vendor-neutral LLM provider contract: two operations (`complete`,
//! `complete_with_tools`), a `ToolResponse` shape every dialect normalizes
//! into, and a selector that resolves `LLM_PROVIDER` to a concrete
//! implementation.

pub mod anthropic;
pub mod bedrock;
pub mod dialect;
pub mod mock;
pub mod ollama;
pub mod retry;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AgentError;
use crate::types::{Message, ToolCall, ToolDefinition};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    ToolCalls,
    Length,
}

/// The normalized result of one provider turn, after dialect translation
/// and text-JSON tool-call recovery.
#[derive(Debug, Clone, Default)]
pub struct ToolResponse {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: Option<FinishReason>,
    pub usage: Option<crate::types::TokenUsage>,
}

#[derive(Debug, Clone, Copy)]
pub struct CallOptions {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self { temperature: 0.2, max_tokens: 4096 }
    }
}

/// Implemented once per vendor dialect. All retry/backoff lives in
/// [`retry::RetryingProvider`], wrapped around whichever of these a
/// deployment selects — providers themselves only need to know how to
/// make one HTTP call and translate its response.
#[async_trait]
pub trait Provider: Send + Sync {
    async fn complete(&self, messages: &[Message], opts: CallOptions) -> Result<String, AgentError>;

    async fn complete_with_tools(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        opts: CallOptions,
    ) -> Result<ToolResponse, AgentError>;
}

/// Resolves `LLM_PROVIDER` (`ollama` | `anthropic` | `bedrock`, default
/// `ollama`) plus its vendor-specific environment variables into a
/// concrete, retry-wrapped [`Provider`].
pub fn provider_from_env() -> Result<std::sync::Arc<dyn Provider>, AgentError> {
    let which = std::env::var("LLM_PROVIDER").unwrap_or_else(|_| "ollama".to_string());
    let inner: std::sync::Arc<dyn Provider> = match which.as_str() {
        "ollama" => std::sync::Arc::new(ollama::OllamaProvider::from_env()?),
        "anthropic" => std::sync::Arc::new(anthropic::AnthropicProvider::from_env()?),
        "bedrock" => std::sync::Arc::new(bedrock::BedrockProvider::from_env()?),
        other => {
            return Err(AgentError::Precondition(format!("unknown LLM_PROVIDER: {other}")));
        }
    };
    Ok(std::sync::Arc::new(retry::RetryingProvider::new(inner, retry::RetryPolicy::default())))
}
