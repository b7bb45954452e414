//! Gateway assembly: constructs and wires every subsystem, and owns the
//! shutdown sequence.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use metrics_exporter_prometheus::PrometheusHandle;
use tokio::sync::mpsc;
use tracing::{info, warn};

use fluxgate_federation::{
    AuthManager, DiscoveryEngine, DiscoveryEvent, FederationRegistry, HealthMonitor,
    ProtocolBridge, ServiceFactory,
};
use fluxgate_forward::ForwardingEngine;
use fluxgate_pipeline::EventPipeline;
use fluxgate_types::{Event, GatewayResult};
use fluxgate_wire::{EventCodec, JsonCodec};

use crate::config::GatewayConfig;
use crate::telemetry;

/// Shared state behind every handler.
pub struct AppState {
    /// Loaded configuration.
    pub config: GatewayConfig,
    /// The event pipeline.
    pub pipeline: Arc<EventPipeline>,
    /// Validating JSON event codec.
    pub codec: EventCodec<JsonCodec>,
    /// The forwarding engine.
    pub forwarding: Arc<ForwardingEngine>,
    /// The federation registry.
    pub registry: Arc<FederationRegistry>,
    /// The discovery engine.
    pub discovery: Arc<DiscoveryEngine>,
    /// The health monitor.
    pub health: Arc<HealthMonitor>,
    /// The authentication manager.
    pub auth: Arc<AuthManager>,
    /// The protocol bridge.
    pub bridge: Arc<ProtocolBridge>,
    /// Prometheus render handle.
    pub prometheus: PrometheusHandle,
    /// Readiness flag; flipped off first thing during shutdown.
    pub ready: AtomicBool,
    /// Process start, for uptime reporting.
    pub started_at: Instant,
}

impl AppState {
    /// Build and start every subsystem from configuration.
    pub fn build(config: GatewayConfig) -> anyhow::Result<Arc<Self>> {
        let prometheus = telemetry::init_metrics();

        let pipeline = Arc::new(EventPipeline::new(config.pipeline.to_pipeline_config()));

        let auth = Arc::new(AuthManager::new());
        auth.start_sweeper(Duration::from_secs(
            config.federation.token_sweep_interval_secs.max(1),
        ));
        let bridge = Arc::new(ProtocolBridge::new());
        let registry = Arc::new(FederationRegistry::new(ServiceFactory::new(
            Arc::clone(&auth),
            Arc::clone(&bridge),
        )));

        let forwarding = Arc::new(ForwardingEngine::new(
            config.forwarding.to_forwarding_config(),
        ));
        for target in &config.forwarding.targets {
            forwarding
                .add_target(target.clone())
                .map_err(|e| anyhow::anyhow!("target {}: {e}", target.id))?;
        }
        if config.forwarding.enabled {
            let consumer = pipeline
                .take_consumer()
                .expect("consumer taken once at startup");
            Arc::clone(&forwarding).start(consumer);
        }

        let discovery = Arc::new(DiscoveryEngine::new(Duration::from_secs(
            config.federation.discovery_interval_secs.max(1),
        )));
        for source in &config.federation.sources {
            discovery
                .add_source(source.clone())
                .map_err(|e| anyhow::anyhow!("source {}: {e}", source.id))?;
        }
        Self::wire_discovery(&discovery, &registry);

        let health = Arc::new(HealthMonitor::new(Arc::clone(&registry)));
        if config.federation.enabled {
            Arc::clone(&discovery).start();
            Arc::clone(&health).start();
        }

        info!(
            forwarding = config.forwarding.enabled,
            federation = config.federation.enabled,
            targets = config.forwarding.targets.len(),
            sources = config.federation.sources.len(),
            "gateway assembled"
        );

        Ok(Arc::new(Self {
            config,
            pipeline,
            codec: EventCodec::json(),
            forwarding,
            registry,
            discovery,
            health,
            auth,
            bridge,
            prometheus,
            ready: AtomicBool::new(true),
            started_at: Instant::now(),
        }))
    }

    /// Feed discovery diffs into the registry through a dedicated applier
    /// task, so registry mutation (including async service teardown) never
    /// runs on the discovery loop.
    fn wire_discovery(discovery: &Arc<DiscoveryEngine>, registry: &Arc<FederationRegistry>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<DiscoveryEvent>();
        discovery.watch(Arc::new(move |event| {
            let _ = tx.send(event);
        }));

        let registry = Arc::clone(registry);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let outcome = match event {
                    DiscoveryEvent::Added(server) => {
                        let id = server.id.clone();
                        match registry.register(server.clone()) {
                            // A server can already exist when discovery and
                            // admin registration race; treat as update.
                            Err(fluxgate_types::GatewayError::Conflict { .. }) => {
                                registry.apply_update(server).await.map(|()| id)
                            }
                            other => other.map(|s| s.id),
                        }
                    }
                    DiscoveryEvent::Updated(server) => {
                        let id = server.id.clone();
                        registry.apply_update(server).await.map(|()| id)
                    }
                    DiscoveryEvent::Removed(id) => {
                        registry.unregister(&id).await.map(|s| s.id)
                    }
                };
                match outcome {
                    Ok(id) => info!(server = %id, "discovery change applied"),
                    Err(err) => warn!(%err, "discovery change failed"),
                }
            }
        });
    }

    /// Validate, stamp, and publish one event.
    pub async fn ingest(&self, mut event: Event) -> GatewayResult<String> {
        event.stamp(chrono::Utc::now().timestamp());
        let event_id = event.event_id.clone();
        self.pipeline.publish(Arc::new(event)).await?;
        Ok(event_id)
    }

    /// Whether the gateway is serving.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Ordered shutdown: stop intake, drain the pipeline (30 s cap), flush
    /// forwarding, stop the federation loops, release servers.
    pub async fn shutdown(&self) {
        self.ready.store(false, Ordering::Release);
        info!("gateway shutting down");

        self.pipeline.close_and_drain(Duration::from_secs(30)).await;
        self.forwarding.shutdown().await;
        self.discovery.stop();
        self.health.stop();
        self.auth.stop_sweeper();
        self.registry.shutdown().await;

        info!("gateway stopped");
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("ready", &self.is_ready())
            .finish_non_exhaustive()
    }
}

/// Convenience alias used by handlers.
pub type SharedState = Arc<AppState>;
