//! Locally signed JWT provider.
//!
//! Signs an HS256 token from the server's auth config: `secret` (required),
//! `issuer`, `subject`, `audience`, and `ttl_secs` (default 300).

use async_trait::async_trait;
use chrono::{Duration, Utc};
use jsonwebtoken::{EncodingKey, Header, encode};
use serde::Serialize;

use fluxgate_types::{AuthConfig, AuthToken, AuthType, GatewayError, GatewayResult};

use crate::auth::CredentialProvider;

const DEFAULT_TTL_SECS: i64 = 300;

#[derive(Debug, Serialize)]
struct Claims<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    iss: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sub: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    aud: Option<&'a str>,
    iat: i64,
    exp: i64,
}

/// HS256 JWT signer.
#[derive(Debug, Default)]
pub struct JwtProvider;

impl JwtProvider {
    /// Create the provider.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CredentialProvider for JwtProvider {
    fn auth_type(&self) -> AuthType {
        AuthType::Jwt
    }

    async fn authenticate(&self, config: &AuthConfig) -> GatewayResult<AuthToken> {
        let secret = config
            .get("secret")
            .ok_or_else(|| GatewayError::auth("jwt auth requires `secret`"))?;
        let ttl = config
            .get("ttl_secs")
            .and_then(|v| v.parse::<i64>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(DEFAULT_TTL_SECS);

        let now = Utc::now();
        let expires_at = now + Duration::seconds(ttl);
        let claims = Claims {
            iss: config.get("issuer"),
            sub: config.get("subject"),
            aud: config.get("audience"),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };

        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .map_err(|e| GatewayError::auth(format!("jwt signing failed: {e}")))?;

        Ok(AuthToken {
            access_token: token,
            token_type: "Bearer".to_string(),
            expires_at,
            refresh_token: None,
            scope: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(ttl: Option<&str>) -> AuthConfig {
        let mut map: std::collections::HashMap<String, String> = [
            ("secret".to_string(), "hunter2".to_string()),
            ("issuer".to_string(), "fluxgate".to_string()),
            ("subject".to_string(), "s1".to_string()),
        ]
        .into();
        if let Some(ttl) = ttl {
            map.insert("ttl_secs".to_string(), ttl.to_string());
        }
        AuthConfig {
            auth_type: AuthType::Jwt,
            config: map,
        }
    }

    #[tokio::test]
    async fn signs_a_three_part_token() {
        let token = JwtProvider::new().authenticate(&config(None)).await.unwrap();
        assert_eq!(token.access_token.split('.').count(), 3);
        assert_eq!(token.token_type, "Bearer");
        assert!(token.expires_at > Utc::now());
    }

    #[tokio::test]
    async fn ttl_is_configurable() {
        let token = JwtProvider::new()
            .authenticate(&config(Some("60")))
            .await
            .unwrap();
        let remaining = token.expires_at - Utc::now();
        assert!(remaining <= Duration::seconds(61));
        assert!(remaining >= Duration::seconds(55));
    }

    #[tokio::test]
    async fn missing_secret_is_an_auth_error() {
        let err = JwtProvider::new()
            .authenticate(&AuthConfig {
                auth_type: AuthType::Jwt,
                config: std::collections::HashMap::new(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Auth { .. }));
    }
}
