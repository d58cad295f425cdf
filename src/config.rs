//! Resolves the environment inputs and the integration config file into
//! typed values, surfacing bad input as `AgentError` rather than panics.

use serde::Deserialize;
use std::collections::HashMap;

use crate::error::AgentError;

/// Resolves `max_iterations` / `system_prompt` / `timeout_ms` into an
/// [`crate::types::AgentConfig`], falling back to its defaults.
pub fn agent_config_from_env() -> Result<crate::types::AgentConfig, AgentError> {
    let mut config = crate::types::AgentConfig::default();
    if let Ok(raw) = std::env::var("AGENT_MAX_ITERATIONS") {
        config.max_iterations = raw
            .parse()
            .map_err(|_| AgentError::Precondition(format!("AGENT_MAX_ITERATIONS is not a positive integer: {raw}")))?;
        if config.max_iterations < 1 {
            return Err(AgentError::Precondition("AGENT_MAX_ITERATIONS must be >= 1".to_string()));
        }
    }
    if let Ok(prompt) = std::env::var("AGENT_SYSTEM_PROMPT") {
        config.system_prompt = prompt;
    }
    if let Ok(raw) = std::env::var("AGENT_TIMEOUT_MS") {
        config.timeout_ms = raw
            .parse()
            .map_err(|_| AgentError::Precondition(format!("AGENT_TIMEOUT_MS is not an integer: {raw}")))?;
    }
    Ok(config)
}

pub fn github_token() -> Option<String> {
    std::env::var("GITHUB_TOKEN").ok()
}

pub fn database_url(name: Option<&str>) -> Option<String> {
    match name {
        Some(name) => std::env::var(format!("DB_{}_URL", name.to_uppercase())).ok(),
        None => std::env::var("DATABASE_URL").ok(),
    }
}

/// `${VAR}` and `${VAR:-default}` substitution against the process
/// environment. Unresolvable `${VAR}` (no default, not set) is left
/// untouched rather than erroring — callers can validate afterward.
pub fn substitute_env_vars(input: &str) -> String {
    let mut output = String::with_capacity(input.len());
    let bytes = input.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' && i + 1 < bytes.len() && bytes[i + 1] == b'{' {
            if let Some(close) = input[i..].find('}') {
                let inner = &input[i + 2..i + close];
                let (var_name, default) = match inner.split_once(":-") {
                    Some((name, default)) => (name, Some(default)),
                    None => (inner, None),
                };
                match std::env::var(var_name) {
                    Ok(value) => output.push_str(&value),
                    Err(_) => match default {
                        Some(default) => output.push_str(default),
                        None => output.push_str(&input[i..i + close + 1]),
                    },
                }
                i += close + 1;
                continue;
            }
        }
        output.push(bytes[i] as char);
        i += 1;
    }
    output
}

#[derive(Debug, Clone, Deserialize)]
pub struct IntegrationsFile {
    pub version: u32,
    pub integrations: HashMap<String, IntegrationRecord>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IntegrationRecord {
    ProtocolServer {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
    },
    Openapi {
        spec_url: String,
        #[serde(default)]
        base_url: Option<String>,
        #[serde(default)]
        auth: Option<AuthConfig>,
    },
    Rest {
        base_url: String,
        #[serde(default)]
        endpoints: HashMap<String, RestEndpoint>,
        #[serde(default)]
        auth: Option<AuthConfig>,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct RestEndpoint {
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuthConfig {
    Bearer { token: String },
    Basic { username: String, password: String },
    Header { name: String, value: String },
    ApiKey { name: String, value: String, placement: ApiKeyPlacement },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiKeyPlacement {
    Header,
    Query,
}

/// Loads and parses `INTEGRATIONS_CONFIG_PATH`. A missing file is not an
/// error: it resolves to an empty integration set. A present-but-invalid
/// file (bad YAML, unknown variant tag) is a precondition error.
pub fn load_integrations_config() -> Result<IntegrationsFile, AgentError> {
    let Some(path) = std::env::var("INTEGRATIONS_CONFIG_PATH").ok() else {
        return Ok(IntegrationsFile { version: 1, integrations: HashMap::new() });
    };
    if !std::path::Path::new(&path).exists() {
        return Ok(IntegrationsFile { version: 1, integrations: HashMap::new() });
    }
    let raw = std::fs::read_to_string(&path).map_err(|e| AgentError::Integration(format!("failed to read {path}: {e}")))?;
    let resolved = substitute_env_vars(&raw);
    serde_yaml::from_str(&resolved)
        .map_err(|e| AgentError::Precondition(format!("invalid integrations config at {path}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_plain_var() {
        std::env::set_var("TEST_SUBST_VAR", "hello");
        assert_eq!(substitute_env_vars("value: ${TEST_SUBST_VAR}"), "value: hello");
        std::env::remove_var("TEST_SUBST_VAR");
    }

    #[test]
    fn falls_back_to_default_when_unset() {
        std::env::remove_var("TEST_SUBST_MISSING");
        assert_eq!(substitute_env_vars("value: ${TEST_SUBST_MISSING:-fallback}"), "value: fallback");
    }

    #[test]
    fn leaves_unresolvable_var_untouched() {
        std::env::remove_var("TEST_SUBST_MISSING_NO_DEFAULT");
        assert_eq!(
            substitute_env_vars("value: ${TEST_SUBST_MISSING_NO_DEFAULT}"),
            "value: ${TEST_SUBST_MISSING_NO_DEFAULT}"
        );
    }

    #[test]
    fn parses_protocol_server_integration() {
        let yaml = r#"
version: 1
integrations:
  github_mcp:
    type: protocol_server
    command: github-mcp-server
    args: ["--stdio"]
"#;
        let parsed: IntegrationsFile = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(parsed.version, 1);
        assert!(matches!(parsed.integrations["github_mcp"], IntegrationRecord::ProtocolServer { .. }));
    }

    #[test]
    fn unknown_variant_fails_validation() {
        let yaml = r#"
version: 1
integrations:
  bad:
    type: not_a_real_variant
"#;
        let parsed: Result<IntegrationsFile, _> = serde_yaml::from_str(yaml);
        assert!(parsed.is_err());
    }

    #[test]
    fn missing_config_path_is_empty_set_not_an_error() {
        std::env::remove_var("INTEGRATIONS_CONFIG_PATH");
        let config = load_integrations_config().unwrap();
        assert!(config.integrations.is_empty());
    }
}
