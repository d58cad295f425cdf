//! Anthropic Messages API dialect: system prompt in its own slot, tool
//! definitions as `input_schema`, tool_use/tool_result content blocks.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::AgentError;
use crate::types::{Message, TokenUsage, ToolCall, ToolDefinition};

use super::dialect::{recover_tool_calls_from_text, split_leading_system, to_anthropic_content_messages};
use super::{CallOptions, FinishReason, Provider, ToolResponse};

const API_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl AnthropicProvider {
    pub fn from_env() -> Result<Self, AgentError> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .map_err(|_| AgentError::Precondition("ANTHROPIC_API_KEY is not set".to_string()))?;
        let model = std::env::var("ANTHROPIC_MODEL").unwrap_or_else(|_| "claude-3-5-sonnet-latest".to_string());
        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            base_url: "https://api.anthropic.com/v1/messages".to_string(),
        })
    }

    fn to_tool_defs(tools: &[ToolDefinition]) -> Vec<Value> {
        tools
            .iter()
            .map(|t| serde_json::json!({"name": t.name, "description": t.description, "input_schema": t.parameters}))
            .collect()
    }

    async fn call(&self, messages: &[Message], tools: &[ToolDefinition], opts: CallOptions) -> Result<ToolResponse, AgentError> {
        let (system, rest) = split_leading_system(messages);
        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": opts.max_tokens,
            "temperature": opts.temperature,
            "system": system,
            "tools": Self::to_tool_defs(tools),
            "messages": to_anthropic_content_messages(&rest),
        });

        let response = self
            .client
            .post(&self.base_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| AgentError::ProviderTransient(format!("anthropic request failed: {e}")))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| AgentError::ProviderProtocol(format!("failed to read anthropic body: {e}")))?;

        if status.as_u16() == 429 {
            return Err(AgentError::ProviderTransient(format!("429 rate limited: {text}")));
        }
        if status.is_server_error() {
            return Err(AgentError::ProviderTransient(format!("anthropic {status}: {text}")));
        }
        if !status.is_success() {
            return Err(AgentError::ProviderProtocol(format!("anthropic {status}: {text}")));
        }

        let parsed: Value = serde_json::from_str(&text)
            .map_err(|e| AgentError::ProviderProtocol(format!("malformed anthropic response: {e}")))?;

        let blocks = parsed
            .get("content")
            .and_then(Value::as_array)
            .ok_or_else(|| AgentError::ProviderProtocol("anthropic response missing content".to_string()))?;

        let mut content_parts = Vec::new();
        let mut tool_calls = Vec::new();
        for block in blocks {
            match block.get("type").and_then(Value::as_str) {
                Some("text") => {
                    if let Some(text) = block.get("text").and_then(Value::as_str) {
                        content_parts.push(text.to_string());
                    }
                }
                Some("tool_use") => {
                    let id = block.get("id").and_then(Value::as_str).unwrap_or_default().to_string();
                    let name = block.get("name").and_then(Value::as_str).unwrap_or_default().to_string();
                    let input = block.get("input").cloned().unwrap_or(Value::Object(Default::default()));
                    tool_calls.push(ToolCall::new(id, name, serde_json::to_string(&input).unwrap_or_default()));
                }
                _ => {}
            }
        }

        if tool_calls.is_empty() {
            let joined = content_parts.join("");
            let recovered = recover_tool_calls_from_text(&joined);
            if !recovered.is_empty() {
                tool_calls = recovered;
                content_parts.clear();
            }
        }

        let finish_reason = match parsed.get("stop_reason").and_then(Value::as_str) {
            Some("tool_use") => Some(FinishReason::ToolCalls),
            Some("max_tokens") => Some(FinishReason::Length),
            _ => Some(FinishReason::Stop),
        };

        let usage = parsed.get("usage").map(|u| {
            TokenUsage::new(
                u.get("input_tokens").and_then(Value::as_u64).unwrap_or(0),
                u.get("output_tokens").and_then(Value::as_u64).unwrap_or(0),
            )
        });

        Ok(ToolResponse {
            content: if content_parts.is_empty() { None } else { Some(content_parts.join("")) },
            tool_calls,
            finish_reason,
            usage,
        })
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    async fn complete(&self, messages: &[Message], opts: CallOptions) -> Result<String, AgentError> {
        let response = self.call(messages, &[], opts).await?;
        Ok(response.content.unwrap_or_default())
    }

    async fn complete_with_tools(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        opts: CallOptions,
    ) -> Result<ToolResponse, AgentError> {
        self.call(messages, tools, opts).await
    }
}
