//! Authentication manager.
//!
//! Credential providers are keyed by auth type; acquired tokens cache per
//! server id until expiry. The cache lock is never held across provider
//! I/O: lookup releases it, the provider runs, and insertion re-acquires.
//! Expired entries evict opportunistically on lookup plus via a periodic
//! sweep.

pub mod providers;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use fluxgate_types::{AuthConfig, AuthToken, AuthType, GatewayError, GatewayResult};

/// A pluggable credential provider.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// The auth type this provider serves.
    fn auth_type(&self) -> AuthType;

    /// Acquire a fresh token for the given configuration.
    async fn authenticate(&self, config: &AuthConfig) -> GatewayResult<AuthToken>;

    /// Refresh a token. Defaults to re-authentication.
    async fn refresh(&self, _token: &AuthToken, config: &AuthConfig) -> GatewayResult<AuthToken> {
        self.authenticate(config).await
    }

    /// Whether a token is still usable.
    fn validate(&self, token: &AuthToken) -> bool {
        !token.expired_at(Utc::now())
    }
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: AuthToken,
    #[allow(dead_code)]
    cached_at: DateTime<Utc>,
}

/// Token cache counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Entries in the cache.
    pub total: usize,
    /// Entries already past expiry (pending eviction).
    pub expired: usize,
    /// Usable entries.
    pub active: usize,
}

/// Provider table plus the per-server token cache.
pub struct AuthManager {
    providers: RwLock<HashMap<AuthType, Arc<dyn CredentialProvider>>>,
    cache: Arc<RwLock<HashMap<String, CachedToken>>>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for AuthManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthManager")
            .field("providers", &self.providers.read().len())
            .field("cached_tokens", &self.cache.read().len())
            .finish()
    }
}

impl Default for AuthManager {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthManager {
    /// Manager with the bundled providers registered.
    #[must_use]
    pub fn new() -> Self {
        let manager = Self {
            providers: RwLock::new(HashMap::new()),
            cache: Arc::new(RwLock::new(HashMap::new())),
            sweeper: Mutex::new(None),
        };
        manager.register_provider(Arc::new(providers::ApiKeyProvider));
        manager.register_provider(Arc::new(providers::BasicProvider));
        manager.register_provider(Arc::new(providers::BearerProvider));
        manager.register_provider(Arc::new(providers::JwtProvider::new()));
        manager.register_provider(Arc::new(providers::OAuth2Provider::new()));
        manager
    }

    /// Register (or replace) a provider.
    pub fn register_provider(&self, provider: Arc<dyn CredentialProvider>) {
        self.providers
            .write()
            .insert(provider.auth_type(), provider);
    }

    /// Start the periodic expired-token sweep.
    pub fn start_sweeper(&self, interval: Duration) {
        let cache = Arc::clone(&self.cache);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let evicted = evict(&cache);
                if evicted > 0 {
                    debug!(evicted, "auth token sweep");
                }
            }
        });
        if let Some(previous) = self.sweeper.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Stop the sweep task.
    pub fn stop_sweeper(&self) {
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
        }
    }

    /// Get a token for a server, from cache when fresh, otherwise from the
    /// provider for the config's auth type.
    pub async fn get_token(
        &self,
        server_id: &str,
        config: &AuthConfig,
    ) -> GatewayResult<AuthToken> {
        if config.auth_type == AuthType::None {
            return Err(GatewayError::auth("auth type none carries no token"));
        }

        let now = Utc::now();
        {
            let mut cache = self.cache.write();
            match cache.get(server_id) {
                Some(entry) if !entry.token.expired_at(now) => {
                    return Ok(entry.token.clone());
                }
                Some(_) => {
                    // Opportunistic eviction of the stale entry.
                    cache.remove(server_id);
                }
                None => {}
            }
        }

        let provider = self.provider(config.auth_type)?;
        // Provider I/O happens with no cache lock held.
        let token = provider.authenticate(config).await?;

        self.cache.write().insert(
            server_id.to_string(),
            CachedToken {
                token: token.clone(),
                cached_at: Utc::now(),
            },
        );
        debug!(server = server_id, auth = ?config.auth_type, "token cached");
        Ok(token)
    }

    /// Attach the configured credential to an outgoing HTTP request.
    ///
    /// No-op for `none`; `api_key` sets the configured header (default
    /// `X-API-Key`); `basic` sets basic auth; `bearer`/`jwt`/`oauth2` fetch
    /// a token (cached) and set `Authorization: Bearer`.
    pub async fn add_authentication(
        &self,
        builder: reqwest::RequestBuilder,
        server_id: &str,
        config: Option<&AuthConfig>,
    ) -> GatewayResult<reqwest::RequestBuilder> {
        let Some(config) = config else {
            return Ok(builder);
        };
        match config.auth_type {
            AuthType::None => Ok(builder),
            AuthType::ApiKey => {
                let header = config.get("header").unwrap_or("X-API-Key");
                let key = config
                    .get("api_key")
                    .or_else(|| config.get("key"))
                    .ok_or_else(|| GatewayError::auth("api_key auth requires `api_key`"))?;
                Ok(builder.header(header, key))
            }
            AuthType::Basic => {
                let username = config
                    .get("username")
                    .ok_or_else(|| GatewayError::auth("basic auth requires `username`"))?;
                Ok(builder.basic_auth(username, config.get("password")))
            }
            AuthType::Bearer | AuthType::Jwt | AuthType::Oauth2 => {
                let token = self.get_token(server_id, config).await?;
                Ok(builder.bearer_auth(token.access_token))
            }
        }
    }

    /// Drop a server's cached token (auth config changed, server removed).
    pub fn invalidate(&self, server_id: &str) {
        self.cache.write().remove(server_id);
    }

    /// Evict every expired entry; returns how many were removed.
    pub fn evict_expired(&self) -> usize {
        evict(&self.cache)
    }

    /// Cache counters.
    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        let now = Utc::now();
        let cache = self.cache.read();
        let expired = cache
            .values()
            .filter(|entry| entry.token.expired_at(now))
            .count();
        CacheStats {
            total: cache.len(),
            expired,
            active: cache.len() - expired,
        }
    }

    fn provider(&self, auth_type: AuthType) -> GatewayResult<Arc<dyn CredentialProvider>> {
        self.providers.read().get(&auth_type).cloned().ok_or_else(|| {
            warn!(?auth_type, "no credential provider registered");
            GatewayError::auth(format!("no provider for auth type {auth_type:?}"))
        })
    }
}

fn evict(cache: &RwLock<HashMap<String, CachedToken>>) -> usize {
    let now = Utc::now();
    let mut cache = cache.write();
    let before = cache.len();
    cache.retain(|_, entry| !entry.token.expired_at(now));
    before - cache.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    struct CountingProvider {
        calls: std::sync::atomic::AtomicU32,
        ttl: chrono::Duration,
    }

    #[async_trait]
    impl CredentialProvider for CountingProvider {
        fn auth_type(&self) -> AuthType {
            AuthType::Bearer
        }

        async fn authenticate(&self, _config: &AuthConfig) -> GatewayResult<AuthToken> {
            let n = self
                .calls
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(AuthToken {
                access_token: format!("token-{n}"),
                token_type: "Bearer".into(),
                expires_at: Utc::now() + self.ttl,
                refresh_token: None,
                scope: None,
            })
        }
    }

    fn bearer_config() -> AuthConfig {
        AuthConfig {
            auth_type: AuthType::Bearer,
            config: [("token".to_string(), "static".to_string())].into(),
        }
    }

    #[tokio::test]
    async fn token_is_cached_until_expiry() {
        let manager = AuthManager::new();
        manager.register_provider(Arc::new(CountingProvider {
            calls: std::sync::atomic::AtomicU32::new(0),
            ttl: chrono::Duration::hours(1),
        }));

        let first = manager.get_token("s1", &bearer_config()).await.unwrap();
        let second = manager.get_token("s1", &bearer_config()).await.unwrap();
        assert_eq!(first.access_token, "token-0");
        assert_eq!(second.access_token, "token-0", "second call hits the cache");
    }

    #[tokio::test]
    async fn expired_token_is_reacquired() {
        let manager = AuthManager::new();
        manager.register_provider(Arc::new(CountingProvider {
            calls: std::sync::atomic::AtomicU32::new(0),
            ttl: chrono::Duration::seconds(-1),
        }));

        let first = manager.get_token("s1", &bearer_config()).await.unwrap();
        let second = manager.get_token("s1", &bearer_config()).await.unwrap();
        assert_eq!(first.access_token, "token-0");
        assert_eq!(second.access_token, "token-1", "expired entry must refetch");
    }

    #[tokio::test]
    async fn cache_is_keyed_by_server_id() {
        let manager = AuthManager::new();
        manager.register_provider(Arc::new(CountingProvider {
            calls: std::sync::atomic::AtomicU32::new(0),
            ttl: chrono::Duration::hours(1),
        }));

        let a = manager.get_token("s1", &bearer_config()).await.unwrap();
        let b = manager.get_token("s2", &bearer_config()).await.unwrap();
        assert_ne!(a.access_token, b.access_token);
    }

    #[tokio::test]
    async fn eviction_and_stats() {
        let manager = AuthManager::new();
        manager.register_provider(Arc::new(CountingProvider {
            calls: std::sync::atomic::AtomicU32::new(0),
            ttl: chrono::Duration::seconds(-1),
        }));
        // Insert a stale token directly through the provider path.
        let _ = manager.get_token("s1", &bearer_config()).await.unwrap();

        let stats = manager.cache_stats();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.expired, 1);
        assert_eq!(stats.active, 0);

        assert_eq!(manager.evict_expired(), 1);
        assert_eq!(manager.cache_stats().total, 0);
    }

    #[tokio::test]
    async fn none_auth_is_a_no_op_on_requests() {
        let manager = AuthManager::new();
        let builder = reqwest::Client::new().get("http://127.0.0.1:9/");
        let config = AuthConfig::none();
        let out = manager
            .add_authentication(builder, "s1", Some(&config))
            .await
            .unwrap();
        let request = out.build().unwrap();
        assert!(request.headers().is_empty());
    }

    #[tokio::test]
    async fn api_key_sets_default_header() {
        let manager = AuthManager::new();
        let config = AuthConfig {
            auth_type: AuthType::ApiKey,
            config: [("api_key".to_string(), "secret".to_string())].into(),
        };
        let builder = reqwest::Client::new().get("http://127.0.0.1:9/");
        let request = manager
            .add_authentication(builder, "s1", Some(&config))
            .await
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(request.headers().get("X-API-Key").unwrap(), "secret");
    }

    #[tokio::test]
    async fn add_authentication_is_idempotent_for_cached_tokens() {
        let manager = AuthManager::new();
        manager.register_provider(Arc::new(CountingProvider {
            calls: std::sync::atomic::AtomicU32::new(0),
            ttl: chrono::Duration::hours(1),
        }));
        let config = bearer_config();

        let mut seen = Vec::new();
        for _ in 0..2 {
            let builder = reqwest::Client::new().get("http://127.0.0.1:9/");
            let request = manager
                .add_authentication(builder, "s1", Some(&config))
                .await
                .unwrap()
                .build()
                .unwrap();
            seen.push(
                request
                    .headers()
                    .get(reqwest::header::AUTHORIZATION)
                    .unwrap()
                    .clone(),
            );
        }
        assert_eq!(seen[0], seen[1]);
    }
}
