//! Fetches an OpenAPI document, enumerates its operations, and maps each
//! one to a tool with an input schema inferred from its parameters and
//! request body.

use serde_json::Value;

use crate::config::AuthConfig;
use crate::error::AgentError;
use crate::tools::RiskTier;

#[derive(Debug, Clone)]
pub struct OpenapiOperation {
    pub operation_id: String,
    pub method: String,
    pub path: String,
    pub description: String,
    pub input_schema: Value,
}

pub async fn fetch_spec(spec_url: &str) -> Result<Value, AgentError> {
    let client = reqwest::Client::new();
    let response = client
        .get(spec_url)
        .send()
        .await
        .map_err(|e| AgentError::Integration(format!("failed to fetch openapi spec {spec_url}: {e}")))?;
    let text = response
        .text()
        .await
        .map_err(|e| AgentError::Integration(format!("failed to read openapi spec body: {e}")))?;
    serde_json::from_str(&text)
        .or_else(|_| serde_yaml::from_str(&text).map_err(|e| AgentError::Integration(format!("unparseable openapi spec: {e}"))))
}

const HTTP_METHODS: [&str; 5] = ["get", "post", "put", "patch", "delete"];

/// Walks `paths.<path>.<method>` and builds one [`OpenapiOperation`] per
/// declared method, synthesizing an `operation_id` from the method+path
/// when the spec omits one.
pub fn enumerate_operations(spec: &Value) -> Vec<OpenapiOperation> {
    let mut operations = Vec::new();
    let Some(paths) = spec.get("paths").and_then(Value::as_object) else {
        return operations;
    };
    for (path, path_item) in paths {
        let Some(path_item) = path_item.as_object() else { continue };
        for method in HTTP_METHODS {
            let Some(operation) = path_item.get(method) else { continue };
            let operation_id = operation
                .get("operationId")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| {
                    let slug = path.replace(['/', '{', '}'], "_").trim_matches('_').to_string();
                    format!("{method}_{slug}")
                });
            let description = operation
                .get("summary")
                .or_else(|| operation.get("description"))
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();
            let input_schema = build_input_schema(operation);
            operations.push(OpenapiOperation {
                operation_id,
                method: method.to_string(),
                path: path.clone(),
                description,
                input_schema,
            });
        }
    }
    operations
}

fn build_input_schema(operation: &Value) -> Value {
    let mut properties = serde_json::Map::new();
    let mut required = Vec::new();

    if let Some(parameters) = operation.get("parameters").and_then(Value::as_array) {
        for parameter in parameters {
            let Some(name) = parameter.get("name").and_then(Value::as_str) else { continue };
            let schema = parameter.get("schema").cloned().unwrap_or(serde_json::json!({"type": "string"}));
            properties.insert(name.to_string(), schema);
            if parameter.get("required").and_then(Value::as_bool).unwrap_or(false) {
                required.push(Value::String(name.to_string()));
            }
        }
    }

    if let Some(body_schema) = operation
        .get("requestBody")
        .and_then(|b| b.get("content"))
        .and_then(|c| c.get("application/json"))
        .and_then(|j| j.get("schema"))
    {
        properties.insert("body".to_string(), body_schema.clone());
    }

    serde_json::json!({"type": "object", "properties": properties, "required": required})
}

pub fn risk_tier_for_method(method: &str) -> RiskTier {
    super::rest::risk_tier_for_method(method)
}

pub async fn invoke_operation(
    base_url: &str,
    operation: &OpenapiOperation,
    args: &std::collections::HashMap<String, Value>,
    auth: Option<&AuthConfig>,
) -> Result<Value, AgentError> {
    let client = reqwest::Client::new();
    let mut path = operation.path.clone();
    let mut query = Vec::new();
    for (key, value) in args {
        let placeholder = format!("{{{key}}}");
        if path.contains(&placeholder) {
            let rendered = value.as_str().map(str::to_string).unwrap_or_else(|| value.to_string());
            path = path.replace(&placeholder, &rendered);
        } else if key != "body" {
            query.push((key.clone(), value.as_str().map(str::to_string).unwrap_or_else(|| value.to_string())));
        }
    }

    let url = format!("{}{}", base_url.trim_end_matches('/'), path);
    let verb = reqwest::Method::from_bytes(operation.method.to_uppercase().as_bytes())
        .map_err(|_| AgentError::Precondition(format!("invalid HTTP method: {}", operation.method)))?;
    let mut builder = client.request(verb, &url);
    builder = super::auth::apply(builder, auth, &mut query);
    if !query.is_empty() {
        builder = builder.query(&query);
    }
    if let Some(body) = args.get("body") {
        builder = builder.json(body);
    }

    let response = builder
        .send()
        .await
        .map_err(|e| AgentError::Integration(format!("request to {url} failed: {e}")))?;
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    let body = serde_json::from_str(&text).unwrap_or(Value::String(text));
    if !status.is_success() {
        return Err(AgentError::Integration(format!("{} {url} returned {status}: {body}", operation.method)));
    }
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_spec() -> Value {
        serde_json::json!({
            "paths": {
                "/incidents/{id}": {
                    "get": {
                        "operationId": "get_incident",
                        "parameters": [{"name": "id", "in": "path", "required": true, "schema": {"type": "string"}}],
                    },
                    "delete": {
                        "summary": "Close an incident",
                    },
                },
            },
        })
    }

    #[test]
    fn enumerates_one_operation_per_declared_method() {
        let operations = enumerate_operations(&sample_spec());
        assert_eq!(operations.len(), 2);
        assert!(operations.iter().any(|op| op.operation_id == "get_incident"));
        assert!(operations.iter().any(|op| op.method == "delete"));
    }

    #[test]
    fn path_parameter_becomes_required_schema_property() {
        let operations = enumerate_operations(&sample_spec());
        let get_op = operations.iter().find(|op| op.method == "get").unwrap();
        assert_eq!(get_op.input_schema["required"], serde_json::json!(["id"]));
    }

    #[test]
    fn missing_operation_id_is_synthesized() {
        let operations = enumerate_operations(&sample_spec());
        let delete_op = operations.iter().find(|op| op.method == "delete").unwrap();
        assert_eq!(delete_op.operation_id, "delete_incidents__id");
    }

    #[test]
    fn delete_method_infers_destructive_risk() {
        assert_eq!(risk_tier_for_method("DELETE"), RiskTier::Destructive);
    }
}
