use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Deserialize;
use tracing::debug;

use crate::models::deployment::AuthToken;

/// Source of access tokens for a deployment. Tokens are never cached by
/// the session; it asks again for every request.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn get_token(
        &self,
        server: &str,
        alias: &str,
        realm: &str,
        insecure: bool,
    ) -> Option<AuthToken>;
}

/// Hands out a fixed token, e.g. one exported by an earlier login.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenProvider {
    token: Option<String>,
}

impl StaticTokenProvider {
    pub fn new(token: Option<String>) -> Self {
        Self { token }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn get_token(
        &self,
        _server: &str,
        _alias: &str,
        _realm: &str,
        _insecure: bool,
    ) -> Option<AuthToken> {
        self.token.as_ref().map(|access_token| AuthToken {
            access_token: access_token.clone(),
        })
    }
}

#[derive(Deserialize)]
struct JwtUser {
    preferred_username: Option<String>,
}

/// Reads `preferred_username` from the JWT payload. The signature is not
/// checked; the server does that.
pub fn preferred_username(access_token: &str) -> Option<String> {
    let payload = access_token.split('.').nth(1)?;
    let decoded = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| debug!("Failed to decode JWT payload: {}", e))
        .ok()?;
    let user: JwtUser = serde_json::from_slice(&decoded)
        .map_err(|e| debug!("Failed to parse JWT payload: {}", e))
        .ok()?;

    user.preferred_username.filter(|name| !name.is_empty())
}
