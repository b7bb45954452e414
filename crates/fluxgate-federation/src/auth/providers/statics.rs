//! Providers backed by static configuration values.
//!
//! These never hit the network; their tokens carry a far-future expiry so
//! the cache treats them as permanently fresh until the config changes and
//! the entry is invalidated.

use async_trait::async_trait;
use base64::Engine as _;
use chrono::{Duration, Utc};

use fluxgate_types::{AuthConfig, AuthToken, AuthType, GatewayError, GatewayResult};

use crate::auth::CredentialProvider;

fn static_token(value: String, token_type: &str) -> AuthToken {
    AuthToken {
        access_token: value,
        token_type: token_type.to_string(),
        expires_at: Utc::now() + Duration::days(3650),
        refresh_token: None,
        scope: None,
    }
}

/// Static API key from `api_key` (or `key`).
#[derive(Debug, Default)]
pub struct ApiKeyProvider;

#[async_trait]
impl CredentialProvider for ApiKeyProvider {
    fn auth_type(&self) -> AuthType {
        AuthType::ApiKey
    }

    async fn authenticate(&self, config: &AuthConfig) -> GatewayResult<AuthToken> {
        let key = config
            .get("api_key")
            .or_else(|| config.get("key"))
            .ok_or_else(|| GatewayError::auth("api_key auth requires `api_key`"))?;
        Ok(static_token(key.to_string(), "ApiKey"))
    }
}

/// HTTP basic credentials from `username`/`password`.
#[derive(Debug, Default)]
pub struct BasicProvider;

#[async_trait]
impl CredentialProvider for BasicProvider {
    fn auth_type(&self) -> AuthType {
        AuthType::Basic
    }

    async fn authenticate(&self, config: &AuthConfig) -> GatewayResult<AuthToken> {
        let username = config
            .get("username")
            .ok_or_else(|| GatewayError::auth("basic auth requires `username`"))?;
        let password = config.get("password").unwrap_or_default();
        let encoded =
            base64::engine::general_purpose::STANDARD.encode(format!("{username}:{password}"));
        Ok(static_token(encoded, "Basic"))
    }
}

/// Static bearer token from `token`.
#[derive(Debug, Default)]
pub struct BearerProvider;

#[async_trait]
impl CredentialProvider for BearerProvider {
    fn auth_type(&self) -> AuthType {
        AuthType::Bearer
    }

    async fn authenticate(&self, config: &AuthConfig) -> GatewayResult<AuthToken> {
        let token = config
            .get("token")
            .ok_or_else(|| GatewayError::auth("bearer auth requires `token`"))?;
        Ok(static_token(token.to_string(), "Bearer"))
    }
}
