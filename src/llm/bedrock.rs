//! AWS Bedrock, via its `InvokeModel` REST surface against the Anthropic
//! model family on Bedrock (the `anthropic_version: bedrock-2023-05-31`
//! body shape). Limitation: request signing is not implemented — this
//! provider expects a pre-signed endpoint or a local SigV4 proxy in front
//! of it (e.g. run through `aws-vault exec -- <proxy>`); wiring in
//! `aws-sigv4` directly is a reasonable follow-up but out of scope here.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::AgentError;
use crate::types::{Message, TokenUsage, ToolDefinition};

use super::dialect::{recover_tool_calls_from_text, split_leading_system, to_anthropic_content_messages};
use super::{CallOptions, FinishReason, Provider, ToolResponse};

pub struct BedrockProvider {
    client: reqwest::Client,
    region: String,
    model: String,
}

impl BedrockProvider {
    pub fn from_env() -> Result<Self, AgentError> {
        let region = std::env::var("BEDROCK_REGION")
            .map_err(|_| AgentError::Precondition("BEDROCK_REGION is not set".to_string()))?;
        let model = std::env::var("BEDROCK_MODEL")
            .unwrap_or_else(|_| "anthropic.claude-3-5-sonnet-20241022-v2:0".to_string());
        Ok(Self { client: reqwest::Client::new(), region, model })
    }

    fn endpoint(&self) -> String {
        format!(
            "https://bedrock-runtime.{}.amazonaws.com/model/{}/invoke",
            self.region, self.model
        )
    }

    async fn call(&self, messages: &[Message], tools: &[ToolDefinition], opts: CallOptions) -> Result<ToolResponse, AgentError> {
        let (system, rest) = split_leading_system(messages);
        let body = serde_json::json!({
            "anthropic_version": "bedrock-2023-05-31",
            "max_tokens": opts.max_tokens,
            "temperature": opts.temperature,
            "system": system,
            "tools": tools.iter().map(|t| serde_json::json!({
                "name": t.name, "description": t.description, "input_schema": t.parameters,
            })).collect::<Vec<_>>(),
            "messages": to_anthropic_content_messages(&rest),
        });

        let response = self
            .client
            .post(self.endpoint())
            .json(&body)
            .send()
            .await
            .map_err(|e| AgentError::ProviderTransient(format!("bedrock request failed: {e}")))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| AgentError::ProviderProtocol(format!("failed to read bedrock body: {e}")))?;

        if status.as_u16() == 429 || status.as_u16() == 503 {
            return Err(AgentError::ProviderTransient(format!("bedrock {status}: {text}")));
        }
        if status.is_server_error() {
            return Err(AgentError::ProviderTransient(format!("bedrock {status}: {text}")));
        }
        if !status.is_success() {
            return Err(AgentError::ProviderProtocol(format!("bedrock {status}: {text}")));
        }

        let parsed: Value = serde_json::from_str(&text)
            .map_err(|e| AgentError::ProviderProtocol(format!("malformed bedrock response: {e}")))?;

        let blocks = parsed
            .get("content")
            .and_then(Value::as_array)
            .ok_or_else(|| AgentError::ProviderProtocol("bedrock response missing content".to_string()))?;

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
                    tool_calls.push(crate::types::ToolCall::new(id, name, serde_json::to_string(&input).unwrap_or_default()));
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
impl Provider for BedrockProvider {
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
