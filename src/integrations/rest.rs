//! A plain REST integration: a `base_url` plus a list of named
//! endpoints, and a generic `request(method, path, query, body)`
//! operation for ad-hoc discovery.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::config::{AuthConfig, RestEndpoint};
use crate::error::AgentError;
use crate::tools::RiskTier;

pub struct RestClient {
    client: reqwest::Client,
    base_url: String,
    auth: Option<AuthConfig>,
}

impl RestClient {
    pub fn new(base_url: String, auth: Option<AuthConfig>) -> Self {
        Self { client: reqwest::Client::new(), base_url, auth }
    }

    pub async fn invoke(&self, method: &str, path: &str, query: &[(String, String)], body: Option<Value>) -> Result<Value, AgentError> {
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), path);
        let verb = reqwest::Method::from_bytes(method.to_uppercase().as_bytes())
            .map_err(|_| AgentError::Precondition(format!("invalid HTTP method: {method}")))?;

        let mut query_params = query.to_vec();
        let mut builder = self.client.request(verb, &url);
        builder = super::auth::apply(builder, self.auth.as_ref(), &mut query_params);
        if !query_params.is_empty() {
            builder = builder.query(&query_params);
        }
        if let Some(body) = body {
            builder = builder.json(&body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| AgentError::Integration(format!("request to {url} failed: {e}")))?;
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        let body = serde_json::from_str(&text).unwrap_or(Value::String(text));

        if !status.is_success() {
            return Err(AgentError::Integration(format!("{method} {url} returned {status}: {body}")));
        }
        Ok(body)
    }
}

/// Risk tier for a REST operation is inferred purely from its HTTP verb.
pub fn risk_tier_for_method(method: &str) -> RiskTier {
    match method.to_uppercase().as_str() {
        "DELETE" => RiskTier::Destructive,
        "POST" | "PUT" | "PATCH" => RiskTier::SafeWrite,
        _ => RiskTier::ReadOnly,
    }
}

/// Builds the argument schema for one named endpoint's tool: `query` and
/// `body` as free-form objects, the path/method fixed by the config.
pub fn endpoint_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "query": {"type": "object"},
            "body": {"type": "object"},
        },
        "required": [],
    })
}

/// Builds the generic discovery tool's schema.
pub fn generic_request_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "method": {"type": "string"},
            "path": {"type": "string"},
            "query": {"type": "object"},
            "body": {"type": "object"},
        },
        "required": ["method", "path"],
    })
}

pub fn endpoints_from_config(endpoints: &HashMap<String, RestEndpoint>) -> Vec<(String, RestEndpoint)> {
    endpoints.iter().map(|(name, endpoint)| (name.clone(), endpoint.clone())).collect()
}

pub type SharedRestClient = Arc<RestClient>;
