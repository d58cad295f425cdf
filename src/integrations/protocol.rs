//! A line-delimited JSON-RPC-style client speaking to an external process
//! over stdio: `list_tools` on connect, `call_tool` per invocation.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;

use crate::error::AgentError;

#[derive(Debug, Serialize)]
struct JsonRpcRequest {
    jsonrpc: &'static str,
    id: u64,
    method: String,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteToolSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_schema", rename = "inputSchema")]
    pub input_schema: Value,
}

fn default_schema() -> Value {
    serde_json::json!({"type": "object", "properties": {}, "required": []})
}

/// One connection to a spawned protocol-server process. Requests are
/// strictly request/response over a single stdio pipe, so calls are
/// serialized behind a mutex rather than pipelined.
pub struct ProtocolServerClient {
    child: Mutex<Child>,
    writer: Mutex<BufWriter<ChildStdin>>,
    reader: Mutex<BufReader<ChildStdout>>,
    next_id: AtomicU64,
}

impl ProtocolServerClient {
    pub fn spawn(command: &str, args: &[String], env: &std::collections::HashMap<String, String>) -> Result<Self, AgentError> {
        let mut builder = Command::new(command);
        builder.args(args).envs(env).stdin(Stdio::piped()).stdout(Stdio::piped()).stderr(Stdio::inherit());
        let mut child = builder
            .spawn()
            .map_err(|e| AgentError::Integration(format!("failed to spawn '{command}': {e}")))?;
        let stdin = child.stdin.take().ok_or_else(|| AgentError::Integration("no stdin on child process".to_string()))?;
        let stdout = child.stdout.take().ok_or_else(|| AgentError::Integration("no stdout on child process".to_string()))?;
        Ok(Self {
            child: Mutex::new(child),
            writer: Mutex::new(BufWriter::new(stdin)),
            reader: Mutex::new(BufReader::new(stdout)),
            next_id: AtomicU64::new(1),
        })
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, AgentError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = JsonRpcRequest { jsonrpc: "2.0", id, method: method.to_string(), params };
        let line = serde_json::to_string(&request).map_err(|e| AgentError::Serialization(e))?;

        let mut writer = self.writer.lock().await;
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(AgentError::Io)?;
        writer.write_all(b"\n").await.map_err(AgentError::Io)?;
        writer.flush().await.map_err(AgentError::Io)?;
        drop(writer);

        let mut reader = self.reader.lock().await;
        let mut response_line = String::new();
        let bytes_read = reader.read_line(&mut response_line).await.map_err(AgentError::Io)?;
        if bytes_read == 0 {
            return Err(AgentError::Integration("protocol server closed its stdout".to_string()));
        }
        let response: JsonRpcResponse = serde_json::from_str(&response_line)
            .map_err(|e| AgentError::Integration(format!("malformed response from protocol server: {e}")))?;
        if let Some(error) = response.error {
            return Err(AgentError::Integration(error.message));
        }
        response.result.ok_or_else(|| AgentError::Integration("protocol server response had no result".to_string()))
    }

    pub async fn list_tools(&self) -> Result<Vec<RemoteToolSpec>, AgentError> {
        let result = self.call("list_tools", serde_json::json!({})).await?;
        let tools = result
            .get("tools")
            .ok_or_else(|| AgentError::Integration("list_tools response missing 'tools'".to_string()))?;
        serde_json::from_value(tools.clone())
            .map_err(|e| AgentError::Integration(format!("malformed tool list: {e}")))
    }

    pub async fn call_tool(&self, name: &str, args: Value) -> Result<Value, AgentError> {
        self.call("call_tool", serde_json::json!({"name": name, "arguments": args})).await
    }

    pub async fn shutdown(&self) {
        let _ = self.child.lock().await.kill().await;
    }
}

/// Risk-tier inference by substring on the tool's name and description,
/// used when a protocol server does not advertise its own risk metadata.
pub fn infer_risk_tier(name: &str, description: &str) -> crate::tools::RiskTier {
    let haystack = format!("{name} {description}").to_lowercase();
    const DESTRUCTIVE: [&str; 4] = ["delete", "remove", "drop", "destroy"];
    const SAFE_WRITE: [&str; 7] = ["create", "update", "write", "add", "edit", "modify", "set"];
    if DESTRUCTIVE.iter().any(|w| haystack.contains(w)) {
        crate::tools::RiskTier::Destructive
    } else if SAFE_WRITE.iter().any(|w| haystack.contains(w)) || haystack.contains("post") || haystack.contains("put") {
        crate::tools::RiskTier::SafeWrite
    } else {
        crate::tools::RiskTier::ReadOnly
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infers_destructive_from_delete_verb() {
        assert_eq!(infer_risk_tier("delete_branch", ""), crate::tools::RiskTier::Destructive);
    }

    #[test]
    fn infers_safe_write_from_create_verb() {
        assert_eq!(infer_risk_tier("create_issue", ""), crate::tools::RiskTier::SafeWrite);
    }

    #[test]
    fn defaults_to_read_only() {
        assert_eq!(infer_risk_tier("list_repos", "enumerate repositories"), crate::tools::RiskTier::ReadOnly);
    }

    #[test]
    fn infers_from_description_when_name_is_generic() {
        assert_eq!(infer_risk_tier("run", "destroy the staging environment"), crate::tools::RiskTier::Destructive);
    }
}
