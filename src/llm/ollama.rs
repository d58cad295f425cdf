//! Ollama runs an OpenAI-compatible chat-completions endpoint locally, so
//! this reuses `async-openai`'s client pointed at `OLLAMA_BASE_URL`
//! instead of hand-rolling a third wire format.

use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestMessage, ChatCompletionTool, ChatCompletionToolType,
        CreateChatCompletionRequestArgs, FunctionObject,
    },
    Client,
};
use async_trait::async_trait;
use serde_json::Value;

use crate::error::AgentError;
use crate::types::{Message, Role, TokenUsage, ToolCall, ToolDefinition};

use super::dialect::recover_tool_calls_from_text;
use super::{CallOptions, FinishReason, Provider, ToolResponse};

pub struct OllamaProvider {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OllamaProvider {
    pub fn from_env() -> Result<Self, AgentError> {
        let base_url =
            std::env::var("OLLAMA_BASE_URL").unwrap_or_else(|_| "http://localhost:11434/v1".to_string());
        let model = std::env::var("OLLAMA_MODEL").unwrap_or_else(|_| "llama3.1".to_string());
        // Ollama's OpenAI-compatible endpoint ignores the key but async-openai requires one present.
        let config = OpenAIConfig::new().with_api_base(base_url).with_api_key("ollama");
        Ok(Self { client: Client::with_config(config), model })
    }

    fn to_openai_messages(messages: &[Message]) -> Result<Vec<ChatCompletionRequestMessage>, AgentError> {
        let json_messages: Vec<Value> = messages
            .iter()
            .map(|m| match m.role {
                Role::System => serde_json::json!({"role": "system", "content": m.content}),
                Role::User => serde_json::json!({"role": "user", "content": m.content}),
                Role::Assistant => {
                    let mut object = serde_json::json!({"role": "assistant", "content": m.content});
                    if let Some(tool_calls) = &m.tool_calls {
                        object["tool_calls"] = serde_json::json!(tool_calls
                            .iter()
                            .map(|tc| serde_json::json!({
                                "id": tc.id,
                                "type": "function",
                                "function": {"name": tc.name, "arguments": tc.arguments},
                            }))
                            .collect::<Vec<_>>());
                    }
                    object
                }
                Role::Tool => serde_json::json!({
                    "role": "tool",
                    "content": m.content,
                    "tool_call_id": m.tool_call_id,
                }),
            })
            .collect();
        serde_json::from_value(Value::Array(json_messages))
            .map_err(|e| AgentError::ProviderProtocol(format!("failed to translate messages: {e}")))
    }

    fn to_openai_tools(tools: &[ToolDefinition]) -> Vec<ChatCompletionTool> {
        tools
            .iter()
            .map(|t| ChatCompletionTool {
                r#type: ChatCompletionToolType::Function,
                function: FunctionObject {
                    name: t.name.clone(),
                    description: Some(t.description.clone()),
                    parameters: Some(t.parameters.clone()),
                },
            })
            .collect()
    }

    async fn call(&self, messages: &[Message], tools: &[ToolDefinition], opts: CallOptions) -> Result<ToolResponse, AgentError> {
        let oai_messages = Self::to_openai_messages(messages)?;
        let oai_tools = Self::to_openai_tools(tools);

        let mut builder = CreateChatCompletionRequestArgs::default();
        builder.model(&self.model).messages(oai_messages).temperature(opts.temperature).max_tokens(opts.max_tokens);
        if !oai_tools.is_empty() {
            builder.tools(oai_tools);
        }
        let request = builder
            .build()
            .map_err(|e| AgentError::Precondition(format!("invalid ollama request: {e}")))?;

        let response = self.client.chat().create(request).await.map_err(|e| classify_openai_error(&e))?;

        let usage = response
            .usage
            .map(|u| TokenUsage::new(u.prompt_tokens as u64, u.completion_tokens as u64));

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AgentError::ProviderProtocol("empty choices in ollama response".to_string()))?;

        let mut tool_calls = Vec::new();
        if let Some(calls) = choice.message.tool_calls {
            for tc in calls {
                tool_calls.push(ToolCall::new(tc.id, tc.function.name, tc.function.arguments));
            }
        }

        let content = choice.message.content;
        if tool_calls.is_empty() {
            if let Some(text) = &content {
                let recovered = recover_tool_calls_from_text(text);
                if !recovered.is_empty() {
                    return Ok(ToolResponse {
                        content: None,
                        tool_calls: recovered,
                        finish_reason: Some(FinishReason::ToolCalls),
                        usage,
                    });
                }
            }
        }

        let finish_reason = if !tool_calls.is_empty() {
            Some(FinishReason::ToolCalls)
        } else {
            match choice.finish_reason {
                Some(async_openai::types::FinishReason::Length) => Some(FinishReason::Length),
                _ => Some(FinishReason::Stop),
            }
        };

        Ok(ToolResponse { content, tool_calls, finish_reason, usage })
    }
}

fn classify_openai_error(err: &async_openai::error::OpenAIError) -> AgentError {
    let message = err.to_string();
    let lower = message.to_lowercase();
    if lower.contains("429") || lower.contains("rate limit") {
        AgentError::ProviderTransient(message)
    } else if lower.contains("timed out") || lower.contains("connection") {
        AgentError::ProviderTransient(message)
    } else {
        AgentError::ProviderProtocol(message)
    }
}

#[async_trait]
impl Provider for OllamaProvider {
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
