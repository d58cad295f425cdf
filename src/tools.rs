//! Uniform invocation surface for heterogeneous tools, classified by
//! side-effect risk into auto-executable vs. approval-gated, with
//! panic-safe dispatch so a single misbehaving tool can never crash a run.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{ToolContext, ToolDefinition, ToolResult};

/// Classifies a tool's side-effect risk. Read-only and safe-write tools
/// auto-execute; destructive tools suspend the loop for approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTier {
    ReadOnly,
    SafeWrite,
    Destructive,
}

/// A tool's executor. Boxed so native tools (closures) and adapter-backed
/// tools (protocol-server, OpenAPI, REST — see [`crate::integrations`])
/// share one dynamic-dispatch surface.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, args: HashMap<String, Value>, ctx: &ToolContext) -> ToolResult;
}

/// Wraps a plain closure as a [`ToolExecutor`] — the native tool shape.
pub struct FnExecutor<F>(pub F);

#[async_trait]
impl<F, Fut> ToolExecutor for FnExecutor<F>
where
    F: Fn(HashMap<String, Value>, ToolContext) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = ToolResult> + Send,
{
    async fn execute(&self, args: HashMap<String, Value>, ctx: &ToolContext) -> ToolResult {
        (self.0)(args, ctx.clone()).await
    }
}

/// A registered tool: name, description, risk tier, schema, and executor.
pub struct Tool {
    pub name: String,
    pub description: String,
    pub risk_tier: RiskTier,
    pub parameters: Value,
    pub executor: Arc<dyn ToolExecutor>,
}

impl Tool {
    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.parameters.clone(),
        }
    }
}

/// Name → [`Tool`] map with risk-tier queries and panic-safe dispatch.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Tool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: HashMap::new() }
    }

    /// Fails on duplicate name with a precondition error, surfaced
    /// immediately to the caller rather than silently overwriting.
    pub fn register(&mut self, tool: Tool) -> Result<(), crate::error::AgentError> {
        if self.tools.contains_key(&tool.name) {
            return Err(crate::error::AgentError::Precondition(format!(
                "tool '{}' already registered",
                tool.name
            )));
        }
        self.tools.insert(tool.name.clone(), tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Tool> {
        self.tools.get(name)
    }

    pub fn get_all(&self) -> impl Iterator<Item = &Tool> {
        self.tools.values()
    }

    pub fn get_definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(Tool::definition).collect()
    }

    pub fn risk_tier(&self, name: &str) -> Option<RiskTier> {
        self.tools.get(name).map(|t| t.risk_tier)
    }

    pub fn requires_approval(&self, name: &str) -> bool {
        // An unregistered name has no known risk tier, so it is treated
        // as approval-required rather than assumed safe.
        match self.risk_tier(name) {
            Some(RiskTier::Destructive) => true,
            Some(_) => false,
            None => true,
        }
    }

    pub fn can_auto_execute(&self, name: &str) -> bool {
        matches!(self.risk_tier(name), Some(RiskTier::ReadOnly) | Some(RiskTier::SafeWrite))
    }

    /// Returns `{success=false, error="Unknown tool"}` for a missing name;
    /// catches any panic raised by the tool and surfaces it as a failure
    /// rather than propagating — the registry must never crash the loop.
    pub async fn execute(&self, name: &str, args: HashMap<String, Value>, ctx: &ToolContext) -> ToolResult {
        use futures::FutureExt;

        let Some(tool) = self.tools.get(name) else {
            return ToolResult::err("Unknown tool");
        };

        let executor = Arc::clone(&tool.executor);
        let ctx = ctx.clone();
        let fut = async move { executor.execute(args, &ctx).await };

        match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(result) => result,
            Err(payload) => ToolResult::err(format!("tool panicked: {}", panic_message(payload))),
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Convenience constructor for assembling a [`Tool`] from its parts with
/// a fluent, defaultable builder.
pub struct ToolBuilder {
    name: String,
    description: String,
    risk_tier: RiskTier,
    parameters: Value,
}

impl ToolBuilder {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            risk_tier: RiskTier::ReadOnly,
            parameters: serde_json::json!({"type": "object", "properties": {}, "required": []}),
        }
    }

    pub fn risk_tier(mut self, tier: RiskTier) -> Self {
        self.risk_tier = tier;
        self
    }

    pub fn parameters(mut self, schema: Value) -> Self {
        self.parameters = schema;
        self
    }

    pub fn build<F, Fut>(self, executor: F) -> Tool
    where
        F: Fn(HashMap<String, Value>, ToolContext) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ToolResult> + Send + 'static,
    {
        Tool {
            name: self.name,
            description: self.description,
            risk_tier: self.risk_tier,
            parameters: self.parameters,
            executor: Arc::new(FnExecutor(executor)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ToolContext {
        ToolContext::new("run-1", "ws-1")
    }

    #[tokio::test]
    async fn unknown_tool_is_a_failure_not_a_panic() {
        let registry = ToolRegistry::new();
        let result = registry.execute("nope", HashMap::new(), &ctx()).await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Unknown tool"));
    }

    #[tokio::test]
    async fn duplicate_registration_fails() {
        let mut registry = ToolRegistry::new();
        let tool = ToolBuilder::new("a", "desc").build(|_, _| async { ToolResult::ok("x") });
        registry.register(tool).unwrap();
        let dup = ToolBuilder::new("a", "desc").build(|_, _| async { ToolResult::ok("x") });
        assert!(registry.register(dup).is_err());
    }

    #[tokio::test]
    async fn panicking_tool_is_captured() {
        let mut registry = ToolRegistry::new();
        let tool = ToolBuilder::new("boom", "desc").build(|_, _| async { panic!("kaboom") });
        registry.register(tool).unwrap();
        let result = registry.execute("boom", HashMap::new(), &ctx()).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("kaboom"));
    }

    #[test]
    fn unknown_risk_tier_requires_approval() {
        let registry = ToolRegistry::new();
        assert!(registry.requires_approval("unregistered"));
        assert!(!registry.can_auto_execute("unregistered"));
    }

    #[tokio::test]
    async fn destructive_requires_approval_readonly_does_not() {
        let mut registry = ToolRegistry::new();
        registry
            .register(
                ToolBuilder::new("rm", "danger")
                    .risk_tier(RiskTier::Destructive)
                    .build(|_, _| async { ToolResult::ok("done") }),
            )
            .unwrap();
        registry
            .register(
                ToolBuilder::new("ls", "safe")
                    .risk_tier(RiskTier::ReadOnly)
                    .build(|_, _| async { ToolResult::ok("done") }),
            )
            .unwrap();
        assert!(registry.requires_approval("rm"));
        assert!(!registry.can_auto_execute("rm"));
        assert!(!registry.requires_approval("ls"));
        assert!(registry.can_auto_execute("ls"));
    }
}
