//! Applies a configured [`AuthConfig`] to an outbound request builder.
//! Credentials only ever touch the request itself — never an event
//! payload, never a log line.

use base64::Engine;
use reqwest::RequestBuilder;

use crate::config::{ApiKeyPlacement, AuthConfig};

pub fn apply(builder: RequestBuilder, auth: Option<&AuthConfig>, query: &mut Vec<(String, String)>) -> RequestBuilder {
    match auth {
        None => builder,
        Some(AuthConfig::Bearer { token }) => builder.header("Authorization", format!("Bearer {token}")),
        Some(AuthConfig::Basic { username, password }) => {
            let encoded = base64::engine::general_purpose::STANDARD.encode(format!("{username}:{password}"));
            builder.header("Authorization", format!("Basic {encoded}"))
        }
        Some(AuthConfig::Header { name, value }) => builder.header(name, value),
        Some(AuthConfig::ApiKey { name, value, placement }) => match placement {
            ApiKeyPlacement::Header => builder.header(name, value),
            ApiKeyPlacement::Query => {
                query.push((name.clone(), value.clone()));
                builder
            }
        },
    }
}
