//! Loads the declarative integration set and synthesizes tools from each
//! one under the same registry contract as native tools.

pub mod auth;
pub mod openapi;
pub mod protocol;
pub mod rest;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::{AuthConfig, IntegrationRecord, IntegrationsFile};
use crate::error::AgentError;
use crate::tools::{RiskTier, Tool, ToolExecutor, ToolRegistry};
use crate::types::{ToolContext, ToolResult};

/// `_system` is not a real integration name; it names the router's own
/// meta-tools so they show up in the same namespace LLM-visible discovery
/// already scans.
pub const SYSTEM_INTEGRATION_NAME: &str = "_system";

struct LoadedIntegration {
    name: String,
    kind: &'static str,
}

/// Builds tools from a parsed [`IntegrationsFile`] and owns the live
/// connections (spawned processes, HTTP clients) they need. Construction
/// is the one place that can fail; after that, tool execution failures
/// are ordinary [`ToolResult`] errors.
pub struct IntegrationRouter {
    protocol_clients: HashMap<String, Arc<protocol::ProtocolServerClient>>,
    loaded: Vec<LoadedIntegration>,
}

impl IntegrationRouter {
    async fn build(config: IntegrationsFile) -> Result<Self, AgentError> {
        let mut protocol_clients = HashMap::new();
        let mut loaded = Vec::new();

        for (name, record) in &config.integrations {
            match record {
                IntegrationRecord::ProtocolServer { command, args, env } => {
                    let resolved_env: HashMap<String, String> =
                        env.iter().map(|(k, v)| (k.clone(), crate::config::substitute_env_vars(v))).collect();
                    let client = protocol::ProtocolServerClient::spawn(command, args, &resolved_env)?;
                    protocol_clients.insert(name.clone(), Arc::new(client));
                    loaded.push(LoadedIntegration { name: name.clone(), kind: "protocol_server" });
                }
                IntegrationRecord::Openapi { .. } => {
                    loaded.push(LoadedIntegration { name: name.clone(), kind: "openapi" });
                }
                IntegrationRecord::Rest { .. } => {
                    loaded.push(LoadedIntegration { name: name.clone(), kind: "rest" });
                }
            }
        }

        Ok(Self { protocol_clients, loaded })
    }

    /// Registers one tool per protocol-server-advertised operation, one
    /// per OpenAPI operation, one per declared REST endpoint plus a
    /// generic `request` operation, and the `_system` meta-tools.
    pub async fn register_tools(&self, config: &IntegrationsFile, registry: &mut ToolRegistry) -> Result<(), AgentError> {
        let mut operations_by_integration: HashMap<String, Vec<(String, String)>> = HashMap::new();

        for (name, record) in &config.integrations {
            match record {
                IntegrationRecord::ProtocolServer { .. } => {
                    let client = self.protocol_clients.get(name).cloned().ok_or_else(|| {
                        AgentError::Integration(format!("no live connection for protocol-server integration '{name}'"))
                    })?;
                    let specs = client.list_tools().await?;
                    let mut ops = Vec::with_capacity(specs.len());
                    for spec in specs {
                        let tool_name = format!("{name}__{}", spec.name);
                        let risk_tier = protocol::infer_risk_tier(&spec.name, &spec.description);
                        let client = client.clone();
                        let remote_name = spec.name.clone();
                        ops.push((spec.name.clone(), spec.description.clone()));
                        registry.register(Tool {
                            name: tool_name,
                            description: spec.description,
                            risk_tier,
                            parameters: spec.input_schema,
                            executor: Arc::new(ProtocolToolExecutor { client, remote_name }),
                        })?;
                    }
                    operations_by_integration.insert(name.clone(), ops);
                }
                IntegrationRecord::Openapi { spec_url, base_url, auth } => {
                    let spec = openapi::fetch_spec(spec_url).await?;
                    let operations = openapi::enumerate_operations(&spec);
                    let resolved_base = base_url.clone().unwrap_or_else(|| {
                        spec.get("servers")
                            .and_then(Value::as_array)
                            .and_then(|s| s.first())
                            .and_then(|s| s.get("url"))
                            .and_then(Value::as_str)
                            .unwrap_or("")
                            .to_string()
                    });
                    let mut ops = Vec::with_capacity(operations.len());
                    for operation in operations {
                        let tool_name = format!("{name}__{}", operation.operation_id);
                        let risk_tier = openapi::risk_tier_for_method(&operation.method);
                        let base = resolved_base.clone();
                        let op = operation.clone();
                        let auth = auth.clone();
                        ops.push((operation.operation_id.clone(), operation.description.clone()));
                        registry.register(Tool {
                            name: tool_name,
                            description: operation.description.clone(),
                            risk_tier,
                            parameters: operation.input_schema.clone(),
                            executor: Arc::new(OpenapiToolExecutor { base_url: base, operation: op, auth }),
                        })?;
                    }
                    operations_by_integration.insert(name.clone(), ops);
                }
                IntegrationRecord::Rest { base_url, endpoints, auth } => {
                    let client: rest::SharedRestClient = Arc::new(rest::RestClient::new(base_url.clone(), auth.clone()));
                    let endpoints = rest::endpoints_from_config(endpoints);
                    let mut ops = Vec::with_capacity(endpoints.len() + 1);
                    for (endpoint_name, endpoint) in endpoints {
                        let tool_name = format!("{name}__{endpoint_name}");
                        let risk_tier = rest::risk_tier_for_method(&endpoint.method);
                        ops.push((endpoint_name.clone(), endpoint.description.clone()));
                        registry.register(Tool {
                            name: tool_name,
                            description: endpoint.description.clone(),
                            risk_tier,
                            parameters: rest::endpoint_schema(),
                            executor: Arc::new(RestToolExecutor {
                                client: client.clone(),
                                method: endpoint.method.clone(),
                                path: endpoint.path.clone(),
                            }),
                        })?;
                    }
                    ops.push(("request".to_string(), "Generic REST request for ad-hoc discovery".to_string()));
                    registry.register(Tool {
                        name: format!("{name}__request"),
                        description: "Generic REST request for ad-hoc discovery".to_string(),
                        risk_tier: RiskTier::Destructive,
                        parameters: rest::generic_request_schema(),
                        executor: Arc::new(RestGenericExecutor { client }),
                    })?;
                    operations_by_integration.insert(name.clone(), ops);
                }
            }
        }

        self.register_system_tools(registry, operations_by_integration)?;
        Ok(())
    }

    fn register_system_tools(
        &self,
        registry: &mut ToolRegistry,
        operations_by_integration: HashMap<String, Vec<(String, String)>>,
    ) -> Result<(), AgentError> {
        let names: Vec<String> = self.loaded.iter().map(|l| l.name.clone()).collect();
        let kinds: HashMap<String, String> = self.loaded.iter().map(|l| (l.name.clone(), l.kind.to_string())).collect();

        registry.register(Tool {
            name: format!("{SYSTEM_INTEGRATION_NAME}__list_integrations"),
            description: "Lists configured integrations and their kind".to_string(),
            risk_tier: RiskTier::ReadOnly,
            parameters: serde_json::json!({"type": "object", "properties": {}, "required": []}),
            executor: Arc::new(ListIntegrationsExecutor { names: names.clone(), kinds: kinds.clone() }),
        })?;

        registry.register(Tool {
            name: format!("{SYSTEM_INTEGRATION_NAME}__test_connection"),
            description: "Checks whether a named integration is reachable".to_string(),
            risk_tier: RiskTier::ReadOnly,
            parameters: serde_json::json!({
                "type": "object",
                "properties": {"integration": {"type": "string"}},
                "required": ["integration"],
            }),
            executor: Arc::new(TestConnectionExecutor { names }),
        })?;

        registry.register(Tool {
            name: format!("{SYSTEM_INTEGRATION_NAME}__list_operations"),
            description: "Lists the operations (tool names and descriptions) available on a named integration".to_string(),
            risk_tier: RiskTier::ReadOnly,
            parameters: serde_json::json!({
                "type": "object",
                "properties": {"integration": {"type": "string"}},
                "required": ["integration"],
            }),
            executor: Arc::new(ListOperationsExecutor { operations_by_integration }),
        })?;

        Ok(())
    }
}

struct ListIntegrationsExecutor {
    names: Vec<String>,
    kinds: HashMap<String, String>,
}

#[async_trait]
impl ToolExecutor for ListIntegrationsExecutor {
    async fn execute(&self, _args: HashMap<String, Value>, _ctx: &ToolContext) -> ToolResult {
        let listing: Vec<Value> = self
            .names
            .iter()
            .map(|name| serde_json::json!({"name": name, "kind": self.kinds.get(name)}))
            .collect();
        ToolResult::ok_with_metadata(format!("{} integration(s) configured", self.names.len()), Value::Array(listing))
    }
}

struct TestConnectionExecutor {
    names: Vec<String>,
}

#[async_trait]
impl ToolExecutor for TestConnectionExecutor {
    async fn execute(&self, args: HashMap<String, Value>, _ctx: &ToolContext) -> ToolResult {
        let Some(integration) = args.get("integration").and_then(Value::as_str) else {
            return ToolResult::err("missing required argument 'integration'");
        };
        if self.names.iter().any(|n| n == integration) {
            ToolResult::ok(format!("integration '{integration}' is configured"))
        } else {
            ToolResult::err(format!("unknown integration '{integration}'"))
        }
    }
}

struct ListOperationsExecutor {
    operations_by_integration: HashMap<String, Vec<(String, String)>>,
}

#[async_trait]
impl ToolExecutor for ListOperationsExecutor {
    async fn execute(&self, args: HashMap<String, Value>, _ctx: &ToolContext) -> ToolResult {
        let Some(integration) = args.get("integration").and_then(Value::as_str) else {
            return ToolResult::err("missing required argument 'integration'");
        };
        let Some(ops) = self.operations_by_integration.get(integration) else {
            return ToolResult::err(format!("unknown integration '{integration}'"));
        };
        let listing: Vec<Value> =
            ops.iter().map(|(name, description)| serde_json::json!({"name": name, "description": description})).collect();
        ToolResult::ok_with_metadata(format!("{} operation(s) on '{integration}'", ops.len()), Value::Array(listing))
    }
}

struct ProtocolToolExecutor {
    client: Arc<protocol::ProtocolServerClient>,
    remote_name: String,
}

#[async_trait]
impl ToolExecutor for ProtocolToolExecutor {
    async fn execute(&self, args: HashMap<String, Value>, _ctx: &ToolContext) -> ToolResult {
        match self.client.call_tool(&self.remote_name, Value::Object(args.into_iter().collect())).await {
            Ok(value) => ToolResult::ok_with_metadata(value.to_string(), value),
            Err(err) => ToolResult::err(err.to_string()),
        }
    }
}

struct OpenapiToolExecutor {
    base_url: String,
    operation: openapi::OpenapiOperation,
    auth: Option<AuthConfig>,
}

#[async_trait]
impl ToolExecutor for OpenapiToolExecutor {
    async fn execute(&self, args: HashMap<String, Value>, _ctx: &ToolContext) -> ToolResult {
        match openapi::invoke_operation(&self.base_url, &self.operation, &args, self.auth.as_ref()).await {
            Ok(value) => ToolResult::ok_with_metadata(value.to_string(), value),
            Err(err) => ToolResult::err(err.to_string()),
        }
    }
}

struct RestToolExecutor {
    client: rest::SharedRestClient,
    method: String,
    path: String,
}

#[async_trait]
impl ToolExecutor for RestToolExecutor {
    async fn execute(&self, args: HashMap<String, Value>, _ctx: &ToolContext) -> ToolResult {
        let query: Vec<(String, String)> = args
            .get("query")
            .and_then(Value::as_object)
            .map(|m| m.iter().map(|(k, v)| (k.clone(), v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))).collect())
            .unwrap_or_default();
        let body = args.get("body").cloned();
        match self.client.invoke(&self.method, &self.path, &query, body).await {
            Ok(value) => ToolResult::ok_with_metadata(value.to_string(), value),
            Err(err) => ToolResult::err(err.to_string()),
        }
    }
}

struct RestGenericExecutor {
    client: rest::SharedRestClient,
}

#[async_trait]
impl ToolExecutor for RestGenericExecutor {
    async fn execute(&self, args: HashMap<String, Value>, _ctx: &ToolContext) -> ToolResult {
        let Some(method) = args.get("method").and_then(Value::as_str) else {
            return ToolResult::err("missing required argument 'method'");
        };
        let Some(path) = args.get("path").and_then(Value::as_str) else {
            return ToolResult::err("missing required argument 'path'");
        };
        let query: Vec<(String, String)> = args
            .get("query")
            .and_then(Value::as_object)
            .map(|m| m.iter().map(|(k, v)| (k.clone(), v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))).collect())
            .unwrap_or_default();
        let body = args.get("body").cloned();
        match self.client.invoke(method, path, &query, body).await {
            Ok(value) => ToolResult::ok_with_metadata(value.to_string(), value),
            Err(err) => ToolResult::err(err.to_string()),
        }
    }
}

/// Idempotent, guarded lazy initialization: concurrent first-callers
/// share the same in-flight build rather than spawning duplicate
/// protocol-server processes.
#[derive(Default)]
pub struct RouterHandle {
    router: tokio::sync::OnceCell<Arc<IntegrationRouter>>,
}

impl RouterHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_init(&self, config: IntegrationsFile) -> Result<Arc<IntegrationRouter>, AgentError> {
        self.router
            .get_or_try_init(|| async { IntegrationRouter::build(config).await.map(Arc::new) })
            .await
            .cloned()
    }
}
