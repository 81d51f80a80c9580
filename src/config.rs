use anyhow::{Context, Result};
use std::env;
use std::time::Duration;

use crate::models::deployment::DeploymentIdentity;

#[derive(Debug, Clone)]
pub struct Config {
    pub label: String,
    pub server: String,
    pub alias: String,
    pub realm: String,
    pub insecure: bool,
    pub access_token: Option<String>,
    pub results_view: bool,
    pub http_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let server = env::var("INSIGHTS_SERVER").context("INSIGHTS_SERVER must be set")?;
        let alias = env::var("INSIGHTS_ALIAS").unwrap_or_else(|_| server.clone());

        let http_timeout_secs = match env::var("INSIGHTS_HTTP_TIMEOUT_SECS") {
            Ok(value) => value
                .parse::<u64>()
                .with_context(|| format!("Invalid INSIGHTS_HTTP_TIMEOUT_SECS: {}", value))?,
            Err(_) => 30,
        };

        Ok(Config {
            label: env::var("INSIGHTS_LABEL").unwrap_or_else(|_| alias.clone()),
            server,
            alias,
            realm: env::var("INSIGHTS_REALM").unwrap_or_else(|_| "insights".to_string()),
            insecure: flag("INSIGHTS_INSECURE"),
            access_token: env::var("INSIGHTS_ACCESS_TOKEN").ok().filter(|t| !t.is_empty()),
            results_view: flag("INSIGHTS_RESULTS_VIEW"),
            http_timeout: Duration::from_secs(http_timeout_secs),
        })
    }

    pub fn identity(&self) -> DeploymentIdentity {
        DeploymentIdentity::new(&self.label, &self.server, &self.alias)
            .with_realm(&self.realm)
            .with_insecure(self.insecure)
    }
}

fn flag(name: &str) -> bool {
    env::var(name)
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}
