//! Thread-safe federation registry.
//!
//! The registry exclusively owns [`McpServer`] records. A single
//! reader-writer lock guards the map; writers hold it only across in-memory
//! mutation, never across network I/O, and readers get deep copies. Each
//! record is stored alongside the service wrapper instantiated for its
//! protocol.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use metrics::gauge;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info};

use fluxgate_types::{GatewayError, GatewayResult, McpServer, ServerStatus};

use crate::service::{McpService, ServiceFactory};

struct ServerEntry {
    server: McpServer,
    service: Arc<dyn McpService>,
}

/// Registry of federated MCP servers.
pub struct FederationRegistry {
    inner: RwLock<HashMap<String, ServerEntry>>,
    services: ServiceFactory,
}

impl std::fmt::Debug for FederationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FederationRegistry")
            .field("servers", &self.inner.read().len())
            .finish()
    }
}

/// Aggregate counts for the federation metrics endpoint.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FederationMetrics {
    /// Registered servers.
    pub total_servers: usize,
    /// Servers currently `healthy`.
    pub healthy: usize,
    /// Servers currently `unhealthy`.
    pub unhealthy: usize,
    /// Servers not yet probed.
    pub unknown: usize,
    /// Servers in maintenance.
    pub maintenance: usize,
    /// Deprecated servers.
    pub deprecated: usize,
}

impl FederationRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new(services: ServiceFactory) -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
            services,
        }
    }

    /// Register a server, instantiating its service wrapper.
    ///
    /// Fails with a validation error for an empty id and a conflict for a
    /// duplicate one. Registration stamps `created_at`/`updated_at`.
    pub fn register(&self, mut server: McpServer) -> GatewayResult<McpServer> {
        if server.id.is_empty() {
            return Err(GatewayError::validation("server id must not be empty"));
        }
        if server.endpoint.is_empty() {
            return Err(GatewayError::validation("server endpoint must not be empty"));
        }

        // Service wrappers connect lazily, so construction is cheap and can
        // happen before the write lock.
        let service = self.services.create(&server)?;

        let now = Utc::now();
        server.created_at = now;
        server.updated_at = now;

        let mut inner = self.inner.write();
        if inner.contains_key(&server.id) {
            return Err(GatewayError::conflict("server", &server.id));
        }
        let copy = server.clone();
        inner.insert(server.id.clone(), ServerEntry { server, service });
        drop(inner);

        self.publish_gauges();
        info!(server = %copy.id, protocol = %copy.protocol, "server registered");
        Ok(copy)
    }

    /// Remove a server and stop its service wrapper.
    pub async fn unregister(&self, id: &str) -> GatewayResult<McpServer> {
        let entry = self
            .inner
            .write()
            .remove(id)
            .ok_or_else(|| GatewayError::not_found("server", id))?;
        // Service teardown (child process kill, channel close) happens
        // outside the lock.
        entry.service.stop().await;
        self.publish_gauges();
        info!(server = %id, "server unregistered");
        Ok(entry.server)
    }

    /// Deep copy of one server record.
    pub fn get(&self, id: &str) -> GatewayResult<McpServer> {
        self.inner
            .read()
            .get(id)
            .map(|entry| entry.server.clone())
            .ok_or_else(|| GatewayError::not_found("server", id))
    }

    /// The service wrapper for one server.
    pub fn service(&self, id: &str) -> GatewayResult<Arc<dyn McpService>> {
        self.inner
            .read()
            .get(id)
            .map(|entry| Arc::clone(&entry.service))
            .ok_or_else(|| GatewayError::not_found("server", id))
    }

    /// Deep-copied list of all servers, ordered by id.
    #[must_use]
    pub fn list(&self) -> Vec<McpServer> {
        let mut servers: Vec<McpServer> = self
            .inner
            .read()
            .values()
            .map(|entry| entry.server.clone())
            .collect();
        servers.sort_by(|a, b| a.id.cmp(&b.id));
        servers
    }

    /// Deep-copied list of servers in a category, ordered by id.
    #[must_use]
    pub fn list_by_category(&self, category: &str) -> Vec<McpServer> {
        let mut servers: Vec<McpServer> = self
            .inner
            .read()
            .values()
            .filter(|entry| entry.server.category == category)
            .map(|entry| entry.server.clone())
            .collect();
        servers.sort_by(|a, b| a.id.cmp(&b.id));
        servers
    }

    /// Snapshot of broadcast-eligible servers, ordered by id.
    #[must_use]
    pub fn healthy_servers(&self) -> Vec<McpServer> {
        let mut servers: Vec<McpServer> = self
            .inner
            .read()
            .values()
            .filter(|entry| entry.server.broadcast_eligible())
            .map(|entry| entry.server.clone())
            .collect();
        servers.sort_by(|a, b| a.id.cmp(&b.id));
        servers
    }

    /// Mutate a server's health status; advances `updated_at`.
    pub fn update_status(&self, id: &str, status: ServerStatus) -> GatewayResult<()> {
        {
            let mut inner = self.inner.write();
            let entry = inner
                .get_mut(id)
                .ok_or_else(|| GatewayError::not_found("server", id))?;
            entry.server.status = status;
            entry.server.updated_at = Utc::now();
        }
        self.publish_gauges();
        debug!(server = %id, ?status, "server status updated");
        Ok(())
    }

    /// Apply a discovery update to an existing record.
    ///
    /// Mutable fields (endpoint, name, metadata, ...) take the discovered
    /// values; `created_at` and the health-monitor-owned `status` are
    /// preserved, and `updated_at` advances. A changed endpoint or protocol
    /// rebuilds the service wrapper.
    pub async fn apply_update(&self, update: McpServer) -> GatewayResult<()> {
        let (needs_rebuild, old_service) = {
            let inner = self.inner.read();
            let entry = inner
                .get(&update.id)
                .ok_or_else(|| GatewayError::not_found("server", &update.id))?;
            let rebuild = entry.server.endpoint != update.endpoint
                || entry.server.protocol != update.protocol;
            (rebuild, rebuild.then(|| Arc::clone(&entry.service)))
        };

        // Construct the replacement wrapper outside the lock.
        let replacement = if needs_rebuild {
            Some(self.services.create(&update)?)
        } else {
            None
        };

        {
            let mut inner = self.inner.write();
            let entry = inner
                .get_mut(&update.id)
                .ok_or_else(|| GatewayError::not_found("server", &update.id))?;
            let created_at = entry.server.created_at;
            let status = entry.server.status;
            entry.server = update;
            entry.server.created_at = created_at;
            entry.server.status = status;
            entry.server.updated_at = Utc::now();
            if let Some(service) = replacement {
                entry.service = service;
            }
        }

        if let Some(old) = old_service {
            old.stop().await;
        }
        Ok(())
    }

    /// Number of registered servers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Aggregate status counts.
    #[must_use]
    pub fn metrics(&self) -> FederationMetrics {
        let inner = self.inner.read();
        let mut metrics = FederationMetrics {
            total_servers: inner.len(),
            healthy: 0,
            unhealthy: 0,
            unknown: 0,
            maintenance: 0,
            deprecated: 0,
        };
        for entry in inner.values() {
            match entry.server.status {
                ServerStatus::Healthy => metrics.healthy += 1,
                ServerStatus::Unhealthy => metrics.unhealthy += 1,
                ServerStatus::Unknown => metrics.unknown += 1,
                ServerStatus::Maintenance => metrics.maintenance += 1,
                ServerStatus::Deprecated => metrics.deprecated += 1,
            }
        }
        metrics
    }

    /// Stop every service wrapper (process shutdown).
    pub async fn shutdown(&self) {
        let services: Vec<Arc<dyn McpService>> = self
            .inner
            .read()
            .values()
            .map(|entry| Arc::clone(&entry.service))
            .collect();
        for service in services {
            service.stop().await;
        }
    }

    fn publish_gauges(&self) {
        let metrics = self.metrics();
        gauge!("federation_active_servers").set(metrics.healthy as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthManager;
    use crate::bridge::ProtocolBridge;
    use fluxgate_types::Protocol;
    use pretty_assertions::assert_eq;

    fn registry() -> FederationRegistry {
        FederationRegistry::new(ServiceFactory::new(
            Arc::new(AuthManager::new()),
            Arc::new(ProtocolBridge::new()),
        ))
    }

    fn server(id: &str) -> McpServer {
        McpServer::new(id, "http://127.0.0.1:9/mcp", Protocol::Http)
    }

    #[test]
    fn register_and_get_returns_deep_copy() {
        let registry = registry();
        registry.register(server("s1")).unwrap();

        let mut copy = registry.get("s1").unwrap();
        copy.name = "mutated".into();
        assert_eq!(registry.get("s1").unwrap().name, "");
    }

    #[test]
    fn register_rejects_duplicates_and_empty_ids() {
        let registry = registry();
        registry.register(server("s1")).unwrap();
        assert!(matches!(
            registry.register(server("s1")).unwrap_err(),
            GatewayError::Conflict { .. }
        ));
        assert!(matches!(
            registry.register(server("")).unwrap_err(),
            GatewayError::Validation { .. }
        ));
    }

    #[tokio::test]
    async fn unregister_restores_prior_state() {
        let registry = registry();
        assert!(registry.is_empty());
        registry.register(server("s1")).unwrap();
        registry.unregister("s1").await.unwrap();
        assert!(registry.is_empty());
        assert!(registry.get("s1").is_err());

        assert!(matches!(
            registry.unregister("ghost").await.unwrap_err(),
            GatewayError::NotFound { .. }
        ));
    }

    #[test]
    fn list_is_ordered_and_filtered_by_category() {
        let registry = registry();
        let mut a = server("b-server");
        a.category = "tools".into();
        let mut b = server("a-server");
        b.category = "tools".into();
        let c = server("c-server");
        registry.register(a).unwrap();
        registry.register(b).unwrap();
        registry.register(c).unwrap();

        let ids: Vec<String> = registry.list().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["a-server", "b-server", "c-server"]);

        let tools: Vec<String> = registry
            .list_by_category("tools")
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(tools, vec!["a-server", "b-server"]);
    }

    #[test]
    fn update_status_advances_updated_at() {
        let registry = registry();
        registry.register(server("s1")).unwrap();
        let before = registry.get("s1").unwrap().updated_at;

        registry.update_status("s1", ServerStatus::Healthy).unwrap();
        let after = registry.get("s1").unwrap();
        assert_eq!(after.status, ServerStatus::Healthy);
        assert!(after.updated_at >= before);
    }

    #[test]
    fn healthy_snapshot_excludes_maintenance() {
        let registry = registry();
        registry.register(server("s1")).unwrap();
        registry.register(server("s2")).unwrap();
        registry.register(server("s3")).unwrap();
        registry.update_status("s1", ServerStatus::Healthy).unwrap();
        registry.update_status("s2", ServerStatus::Maintenance).unwrap();

        let healthy: Vec<String> = registry
            .healthy_servers()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(healthy, vec!["s1"]);
    }

    #[tokio::test]
    async fn apply_update_preserves_created_at_and_status() {
        let registry = registry();
        registry.register(server("s1")).unwrap();
        registry.update_status("s1", ServerStatus::Healthy).unwrap();
        let original = registry.get("s1").unwrap();

        let mut update = server("s1");
        update.name = "renamed".into();
        update.endpoint = "http://127.0.0.1:9/v2".into();
        registry.apply_update(update).await.unwrap();

        let after = registry.get("s1").unwrap();
        assert_eq!(after.name, "renamed");
        assert_eq!(after.endpoint, "http://127.0.0.1:9/v2");
        assert_eq!(after.created_at, original.created_at);
        assert_eq!(after.status, ServerStatus::Healthy);
        assert!(after.updated_at >= original.updated_at);
    }

    #[test]
    fn metrics_counts_by_status() {
        let registry = registry();
        registry.register(server("s1")).unwrap();
        registry.register(server("s2")).unwrap();
        registry.update_status("s2", ServerStatus::Unhealthy).unwrap();

        let metrics = registry.metrics();
        assert_eq!(metrics.total_servers, 2);
        assert_eq!(metrics.unknown, 1);
        assert_eq!(metrics.unhealthy, 1);
    }
}
