//! Multi-source service discovery.
//!
//! The engine keeps a mapping of configured sources. On each cycle it
//! snapshots the enabled sources under the lock, releases it, then performs
//! the per-source I/O; source mutation and discovery iteration therefore
//! never race, and the lock is never held across the network. Discovered
//! servers merge by priority (higher wins id conflicts), diff against the
//! previous snapshot, and the `added`/`removed`/`updated` events go to
//! watchers on their own tasks so a slow watcher cannot stall the loop.

mod registry_source;
mod static_source;
mod stubs;

pub use registry_source::RegistrySource;
pub use static_source::StaticSource;
pub use stubs::{ConsulSource, DnsSource, EtcdSource, KubernetesSource};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use fluxgate_types::{
    DiscoverySourceSpec, DiscoverySourceType, GatewayError, GatewayResult, McpServer,
};

/// Default discovery interval.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

/// A source of federated server definitions.
#[async_trait]
pub trait DiscoverySource: Send + Sync {
    /// Source id.
    fn id(&self) -> &str;

    /// Source kind.
    fn source_type(&self) -> DiscoverySourceType;

    /// Fetch the current server set.
    async fn discover(&self) -> GatewayResult<Vec<McpServer>>;
}

/// Diff event emitted to watchers.
#[derive(Debug, Clone)]
pub enum DiscoveryEvent {
    /// A server appeared.
    Added(McpServer),
    /// A server disappeared; carries its id.
    Removed(String),
    /// A known server's definition changed.
    Updated(McpServer),
}

/// Watcher callback.
pub type Watcher = Arc<dyn Fn(DiscoveryEvent) + Send + Sync>;

struct SourceHandle {
    spec: DiscoverySourceSpec,
    source: Arc<dyn DiscoverySource>,
}

/// The discovery engine.
pub struct DiscoveryEngine {
    sources: RwLock<HashMap<String, SourceHandle>>,
    watchers: RwLock<Vec<Watcher>>,
    previous: tokio::sync::Mutex<HashMap<String, McpServer>>,
    interval: Duration,
    cancel: CancellationToken,
    loop_task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for DiscoveryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveryEngine")
            .field("sources", &self.sources.read().len())
            .field("watchers", &self.watchers.read().len())
            .field("interval", &self.interval)
            .finish()
    }
}

impl DiscoveryEngine {
    /// Engine with the given cycle interval.
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            sources: RwLock::new(HashMap::new()),
            watchers: RwLock::new(Vec::new()),
            previous: tokio::sync::Mutex::new(HashMap::new()),
            interval,
            cancel: CancellationToken::new(),
            loop_task: Mutex::new(None),
        }
    }

    /// Add a source from its declarative spec.
    pub fn add_source(&self, spec: DiscoverySourceSpec) -> GatewayResult<()> {
        if spec.id.is_empty() {
            return Err(GatewayError::validation("source id must not be empty"));
        }
        let source = build_source(&spec)?;
        let mut sources = self.sources.write();
        if sources.contains_key(&spec.id) {
            return Err(GatewayError::conflict("source", &spec.id));
        }
        info!(source = %spec.id, kind = spec.source_type.as_str(), "discovery source added");
        sources.insert(spec.id.clone(), SourceHandle { spec, source });
        Ok(())
    }

    /// Remove a source.
    pub fn remove_source(&self, id: &str) -> GatewayResult<DiscoverySourceSpec> {
        self.sources
            .write()
            .remove(id)
            .map(|handle| handle.spec)
            .ok_or_else(|| GatewayError::not_found("source", id))
    }

    /// Configured sources, ordered by id.
    #[must_use]
    pub fn list_sources(&self) -> Vec<DiscoverySourceSpec> {
        let mut specs: Vec<DiscoverySourceSpec> = self
            .sources
            .read()
            .values()
            .map(|handle| handle.spec.clone())
            .collect();
        specs.sort_by(|a, b| a.id.cmp(&b.id));
        specs
    }

    /// Register a watcher for diff events.
    pub fn watch(&self, watcher: Watcher) {
        self.watchers.write().push(watcher);
    }

    /// Start the periodic loop.
    pub fn start(self: Arc<Self>) {
        let engine = Arc::clone(&self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(engine.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    () = engine.cancel.cancelled() => break,
                    _ = ticker.tick() => engine.run_once().await,
                }
            }
            debug!("discovery loop stopped");
        });
        if let Some(previous) = self.loop_task.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Stop the loop.
    pub fn stop(&self) {
        self.cancel.cancel();
        if let Some(handle) = self.loop_task.lock().take() {
            handle.abort();
        }
    }

    /// One discovery cycle: snapshot sources, fetch, merge, diff, emit.
    pub async fn run_once(&self) {
        // Snapshot enabled sources under the lock, then release it before
        // any I/O.
        let mut snapshot: Vec<(i32, Arc<dyn DiscoverySource>)> = {
            self.sources
                .read()
                .values()
                .filter(|handle| handle.spec.enabled)
                .map(|handle| (handle.spec.priority, Arc::clone(&handle.source)))
                .collect()
        };
        snapshot.sort_by_key(|(priority, _)| std::cmp::Reverse(*priority));

        let mut merged: HashMap<String, McpServer> = HashMap::new();
        for (_, source) in snapshot {
            match source.discover().await {
                Ok(servers) => {
                    let now = Utc::now().to_rfc3339();
                    for mut server in servers {
                        if server.id.is_empty() {
                            warn!(source = source.id(), "discovered server without id, skipped");
                            continue;
                        }
                        server
                            .metadata
                            .insert("discovery_source".to_string(), source.id().to_string());
                        server.metadata.insert(
                            "discovery_type".to_string(),
                            source.source_type().as_str().to_string(),
                        );
                        server
                            .metadata
                            .insert("updated_at".to_string(), now.clone());
                        // Higher-priority sources were visited first; their
                        // entry wins id conflicts.
                        merged.entry(server.id.clone()).or_insert(server);
                    }
                }
                Err(err) => {
                    warn!(source = source.id(), %err, "discovery source failed");
                }
            }
        }

        let events = {
            let mut previous = self.previous.lock().await;
            let events = diff(&previous, &merged);
            *previous = merged;
            events
        };

        if events.is_empty() {
            return;
        }
        debug!(events = events.len(), "discovery diff");
        let watchers: Vec<Watcher> = self.watchers.read().clone();
        for event in events {
            for watcher in &watchers {
                let watcher = Arc::clone(watcher);
                let event = event.clone();
                // Dedicated task per delivery: a slow watcher cannot stall
                // the loop.
                tokio::spawn(async move {
                    watcher(event);
                });
            }
        }
    }
}

/// Compare two snapshots, ignoring the volatile `updated_at` stamp.
fn diff(
    previous: &HashMap<String, McpServer>,
    current: &HashMap<String, McpServer>,
) -> Vec<DiscoveryEvent> {
    let mut events = Vec::new();
    for (id, server) in current {
        match previous.get(id) {
            None => events.push(DiscoveryEvent::Added(server.clone())),
            Some(old) if changed(old, server) => {
                events.push(DiscoveryEvent::Updated(server.clone()));
            }
            Some(_) => {}
        }
    }
    for id in previous.keys() {
        if !current.contains_key(id) {
            events.push(DiscoveryEvent::Removed(id.clone()));
        }
    }
    events
}

fn changed(old: &McpServer, new: &McpServer) -> bool {
    let normalize = |server: &McpServer| {
        let mut copy = server.clone();
        copy.metadata.remove("updated_at");
        copy.created_at = chrono::DateTime::UNIX_EPOCH;
        copy.updated_at = chrono::DateTime::UNIX_EPOCH;
        copy
    };
    normalize(old) != normalize(new)
}

/// Instantiate the source implementation for a spec.
fn build_source(spec: &DiscoverySourceSpec) -> GatewayResult<Arc<dyn DiscoverySource>> {
    Ok(match spec.source_type {
        DiscoverySourceType::Static => Arc::new(StaticSource::from_spec(spec)?),
        DiscoverySourceType::Registry => Arc::new(RegistrySource::from_spec(spec)?),
        DiscoverySourceType::Kubernetes => Arc::new(KubernetesSource::new(spec.id.clone())),
        DiscoverySourceType::Consul => Arc::new(ConsulSource::new(spec.id.clone())),
        DiscoverySourceType::Etcd => Arc::new(EtcdSource::new(spec.id.clone())),
        DiscoverySourceType::Dns => Arc::new(DnsSource::new(spec.id.clone())),
    })
}
