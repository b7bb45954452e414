//! OAuth2 client-credentials provider.
//!
//! Posts a `client_credentials` grant to the configured `token_url` with
//! `client_id`/`client_secret` and optional `scope`, and converts the token
//! endpoint's response into an [`AuthToken`] with an absolute expiry.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde::Deserialize;
use tracing::debug;

use fluxgate_types::{AuthConfig, AuthToken, AuthType, GatewayError, GatewayResult};

use crate::auth::CredentialProvider;

/// Clock-skew allowance subtracted from `expires_in`.
const EXPIRY_SKEW_SECS: i64 = 30;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_token_type")]
    token_type: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

fn default_expires_in() -> i64 {
    3600
}

/// Client-credentials flow against a token URL.
#[derive(Debug)]
pub struct OAuth2Provider {
    http: reqwest::Client,
}

impl Default for OAuth2Provider {
    fn default() -> Self {
        Self::new()
    }
}

impl OAuth2Provider {
    /// Create the provider with its own HTTP client.
    #[must_use]
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl CredentialProvider for OAuth2Provider {
    fn auth_type(&self) -> AuthType {
        AuthType::Oauth2
    }

    async fn authenticate(&self, config: &AuthConfig) -> GatewayResult<AuthToken> {
        let token_url = config
            .get("token_url")
            .ok_or_else(|| GatewayError::auth("oauth2 auth requires `token_url`"))?;
        let client_id = config
            .get("client_id")
            .ok_or_else(|| GatewayError::auth("oauth2 auth requires `client_id`"))?;
        let client_secret = config
            .get("client_secret")
            .ok_or_else(|| GatewayError::auth("oauth2 auth requires `client_secret`"))?;

        let mut form = vec![
            ("grant_type", "client_credentials"),
            ("client_id", client_id),
            ("client_secret", client_secret),
        ];
        if let Some(scope) = config.get("scope").or_else(|| config.get("scopes")) {
            form.push(("scope", scope));
        }

        let response = self
            .http
            .post(token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| GatewayError::auth(format!("token endpoint unreachable: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::auth(format!(
                "token endpoint returned {status}: {body}"
            )));
        }

        let grant: TokenResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::auth(format!("malformed token response: {e}")))?;

        debug!(expires_in = grant.expires_in, "oauth2 token acquired");
        let ttl = (grant.expires_in - EXPIRY_SKEW_SECS).max(1);
        Ok(AuthToken {
            access_token: grant.access_token,
            token_type: grant.token_type,
            expires_at: Utc::now() + Duration::seconds(ttl),
            refresh_token: grant.refresh_token,
            scope: grant.scope,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_settings_fail_without_network() {
        let provider = OAuth2Provider::new();
        let err = provider.authenticate(&AuthConfig::none()).await.unwrap_err();
        assert!(matches!(err, GatewayError::Auth { .. }));
    }

    #[test]
    fn token_response_defaults() {
        let grant: TokenResponse =
            serde_json::from_str(r#"{"access_token":"abc"}"#).unwrap();
        assert_eq!(grant.token_type, "Bearer");
        assert_eq!(grant.expires_in, 3600);
    }
}
