//! Shared, vendor-independent translation helpers: merging a leading
//! system message into a vendor's system slot, and recovering tool calls
//! a model emitted as plain-text JSON instead of a structured block.

use serde_json::Value;
use uuid::Uuid;

use crate::types::{Message, Role, ToolCall};

/// Splits a leading system message off the transcript, returning
/// `(system_text, remaining_messages)`. Vendors that take a dedicated
/// system slot (Anthropic, Bedrock) use this; ones that accept a system
/// role inline (Ollama's OpenAI-compatible endpoint) do not need it.
pub fn split_leading_system(messages: &[Message]) -> (Option<String>, Vec<Message>) {
    match messages.first() {
        Some(m) if m.role == Role::System => {
            (Some(m.content.clone()), messages[1..].to_vec())
        }
        _ => (None, messages.to_vec()),
    }
}

/// Scans `text` for `{"name": ..., "parameters"|"arguments": ...}`
/// fragments using balanced-brace matching that treats string-escaped
/// braces as inert, and returns synthetic tool calls with generated ids.
/// Returns an empty vec when no well-formed fragment is found — callers
/// then fall back to treating the text as ordinary assistant content.
pub fn recover_tool_calls_from_text(text: &str) -> Vec<ToolCall> {
    let mut calls = Vec::new();
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'{' {
            if let Some(end) = find_matching_brace(bytes, i) {
                let fragment = &text[i..=end];
                if let Some(call) = parse_tool_call_fragment(fragment) {
                    calls.push(call);
                    i = end + 1;
                    continue;
                }
            }
        }
        i += 1;
    }
    calls
}

/// Returns the index of the `}` matching the `{` at `start`, scanning
/// byte-wise but treating any byte inside a double-quoted string
/// (respecting `\` escapes) as inert so braces embedded in string values
/// do not unbalance the count.
fn find_matching_brace(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, &byte) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(offset);
                }
            }
            _ => {}
        }
    }
    None
}

/// Translates a transcript into the `tool_use`/`tool_result` content-block
/// message shape shared by Anthropic's Messages API and Bedrock's
/// Anthropic-on-Bedrock `InvokeModel` body. Consecutive `Role::Tool`
/// messages are folded into one `user` turn carrying multiple
/// `tool_result` blocks, since both vendors reject a `tool_use` turn
/// whose results aren't all grouped into the single following user
/// message.
pub fn to_anthropic_content_messages(messages: &[Message]) -> Vec<Value> {
    let mut result: Vec<Value> = Vec::new();
    for m in messages {
        match m.role {
            Role::System => unreachable!("system message must be split off before dialect translation"),
            Role::User => result.push(serde_json::json!({"role": "user", "content": m.content})),
            Role::Assistant => {
                if let Some(tool_calls) = &m.tool_calls {
                    let blocks: Vec<Value> = tool_calls
                        .iter()
                        .map(|tc| {
                            serde_json::json!({
                                "type": "tool_use",
                                "id": tc.id,
                                "name": tc.name,
                                "input": serde_json::from_str::<Value>(&tc.arguments)
                                    .unwrap_or(Value::Object(Default::default())),
                            })
                        })
                        .collect();
                    result.push(serde_json::json!({"role": "assistant", "content": blocks}));
                } else {
                    result.push(serde_json::json!({"role": "assistant", "content": m.content}));
                }
            }
            Role::Tool => {
                let block = serde_json::json!({
                    "type": "tool_result",
                    "tool_use_id": m.tool_call_id,
                    "content": m.content,
                });
                let last_is_tool_group =
                    result.last().map(|v| v["role"] == "user" && v["content"].is_array()).unwrap_or(false);
                if last_is_tool_group {
                    result.last_mut().unwrap()["content"].as_array_mut().unwrap().push(block);
                } else {
                    result.push(serde_json::json!({"role": "user", "content": [block]}));
                }
            }
        }
    }
    result
}

fn parse_tool_call_fragment(fragment: &str) -> Option<ToolCall> {
    let value: Value = serde_json::from_str(fragment).ok()?;
    let object = value.as_object()?;
    let name = object.get("name")?.as_str()?.to_string();
    let args = object.get("parameters").or_else(|| object.get("arguments"))?;
    if !args.is_object() {
        return None;
    }
    let arguments = serde_json::to_string(args).ok()?;
    Some(ToolCall::new(format!("call_{}", Uuid::new_v4()), name, arguments))
}
