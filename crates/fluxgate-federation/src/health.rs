//! Periodic health monitor.
//!
//! A dispatcher task ticks once a second and probes every registered server
//! whose health check is enabled and due. Probes for different servers run
//! concurrently; an in-flight marker bounds each server to one outstanding
//! probe. Consecutive results drive the server's status in the registry:
//! `healthy` after `healthy_threshold` successes, `unhealthy` after
//! `unhealthy_threshold` failures.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use fluxgate_types::{GatewayResult, McpServer, Protocol, ServerStatus};

use crate::registry::FederationRegistry;

#[derive(Debug, Default)]
struct ProbeState {
    successes: u32,
    failures: u32,
    last_probe: Option<Instant>,
    in_flight: bool,
}

/// The health monitor.
pub struct HealthMonitor {
    registry: Arc<FederationRegistry>,
    http: reqwest::Client,
    state: Mutex<HashMap<String, ProbeState>>,
    tick: Duration,
    cancel: CancellationToken,
    loop_task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("tracked", &self.state.lock().len())
            .field("tick", &self.tick)
            .finish()
    }
}

impl HealthMonitor {
    /// Monitor over the given registry with a one-second dispatcher tick.
    #[must_use]
    pub fn new(registry: Arc<FederationRegistry>) -> Self {
        Self::with_tick(registry, Duration::from_secs(1))
    }

    /// Monitor with an explicit dispatcher tick (tests).
    #[must_use]
    pub fn with_tick(registry: Arc<FederationRegistry>, tick: Duration) -> Self {
        Self {
            registry,
            http: reqwest::Client::new(),
            state: Mutex::new(HashMap::new()),
            tick,
            cancel: CancellationToken::new(),
            loop_task: Mutex::new(None),
        }
    }

    /// Start the dispatcher loop.
    pub fn start(self: Arc<Self>) {
        let monitor = Arc::clone(&self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(monitor.tick);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    () = monitor.cancel.cancelled() => break,
                    _ = ticker.tick() => monitor.run_probe_cycle(false).await,
                }
            }
            debug!("health monitor stopped");
        });
        if let Some(previous) = self.loop_task.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Stop the dispatcher loop.
    pub fn stop(&self) {
        self.cancel.cancel();
        if let Some(handle) = self.loop_task.lock().take() {
            handle.abort();
        }
    }

    /// Probe every enabled, due server and apply threshold transitions.
    ///
    /// With `force` set, due-ness is ignored (tests drive cycles directly).
    /// Probes for different servers run concurrently; the call returns when
    /// all probes of this cycle have finished.
    pub async fn run_probe_cycle(&self, force: bool) {
        let servers = self.registry.list();

        // Forget state for servers that left the registry.
        {
            let ids: std::collections::HashSet<&str> =
                servers.iter().map(|s| s.id.as_str()).collect();
            self.state.lock().retain(|id, _| ids.contains(id.as_str()));
        }

        let mut due_servers = Vec::new();
        for server in servers {
            if !server.health_check.enabled {
                continue;
            }
            let mut state = self.state.lock();
            let entry = state.entry(server.id.clone()).or_default();
            if entry.in_flight {
                continue;
            }
            let due = force
                || entry
                    .last_probe
                    .is_none_or(|at| at.elapsed() >= server.health_check.interval());
            if !due {
                continue;
            }
            entry.in_flight = true;
            entry.last_probe = Some(Instant::now());
            drop(state);
            due_servers.push(server);
        }

        let probes = due_servers.iter().map(|server| async move {
            let healthy = self.probe(server).await.unwrap_or(false);
            self.finish_probe(server, healthy);
        });
        futures::future::join_all(probes).await;
    }

    /// One probe: HTTP servers get a GET on `endpoint + path`; other
    /// protocols delegate to the service wrapper.
    async fn probe(&self, server: &McpServer) -> GatewayResult<bool> {
        let timeout = server.health_check.timeout();
        match server.protocol {
            Protocol::Http => {
                let url = format!(
                    "{}{}",
                    server.endpoint.trim_end_matches('/'),
                    server.health_check.path
                );
                match self.http.get(&url).timeout(timeout).send().await {
                    Ok(response) => Ok(response.status().is_success()),
                    Err(err) => {
                        debug!(server = %server.id, %err, "http probe failed");
                        Ok(false)
                    }
                }
            }
            _ => {
                let service = self.registry.service(&server.id)?;
                match tokio::time::timeout(timeout, service.health_check()).await {
                    Ok(result) => result,
                    Err(_) => Ok(false),
                }
            }
        }
    }

    fn finish_probe(&self, server: &McpServer, healthy: bool) {
        let transition = {
            let mut state = self.state.lock();
            let entry = state.entry(server.id.clone()).or_default();
            entry.in_flight = false;
            if healthy {
                entry.successes += 1;
                entry.failures = 0;
                (entry.successes >= server.health_check.healthy_threshold)
                    .then_some(ServerStatus::Healthy)
            } else {
                entry.failures += 1;
                entry.successes = 0;
                (entry.failures >= server.health_check.unhealthy_threshold)
                    .then_some(ServerStatus::Unhealthy)
            }
        };

        let Some(status) = transition else { return };
        // Only touch the registry when the status actually moves, so
        // updated_at reflects real transitions.
        match self.registry.get(&server.id) {
            Ok(current) if current.status != status => {
                if let Err(err) = self.registry.update_status(&server.id, status) {
                    warn!(server = %server.id, %err, "status update failed");
                }
            }
            Ok(_) => {}
            Err(_) => {} // unregistered mid-probe
        }
    }
}
