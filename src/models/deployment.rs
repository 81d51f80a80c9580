use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

const DEFAULT_REALM: &str = "insights";

/// A registered Insights deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentIdentity {
    pub label: String,
    pub server: String,
    pub alias: String,
    #[serde(default)]
    pub realm: Option<String>,
    #[serde(default)]
    pub insecure: bool,
}

impl DeploymentIdentity {
    pub fn new(label: &str, server: &str, alias: &str) -> Self {
        Self {
            label: label.to_string(),
            server: server.to_string(),
            alias: alias.to_string(),
            realm: None,
            insecure: false,
        }
    }

    pub fn with_realm(mut self, realm: &str) -> Self {
        self.realm = if realm.is_empty() {
            None
        } else {
            Some(realm.to_string())
        };
        self
    }

    pub fn with_insecure(mut self, insecure: bool) -> Self {
        self.insecure = insecure;
        self
    }

    /// Realm used for token requests; empty realms fall back to `insights`.
    pub fn realm(&self) -> &str {
        self.realm
            .as_deref()
            .filter(|r| !r.is_empty())
            .unwrap_or(DEFAULT_REALM)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthToken {
    pub access_token: String,
}

/// Response of `kxicontroller/config`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InsightsConfig {
    #[serde(default)]
    pub version: String,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

/// Response of `api/config`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiConfig {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub encryption_database: bool,
    #[serde(default)]
    pub encryption_in_transit: bool,
    #[serde(default)]
    pub query_environments_enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Authenticating,
    Connected,
    Failed,
}
