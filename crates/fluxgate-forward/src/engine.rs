//! The forwarding engine: worker pool, per-target dispatchers, and target
//! administration.
//!
//! A fixed pool of workers drains the pipeline's consumer channel. For each
//! event, each target's rules evaluate; the first match enqueues the
//! (possibly transformed) event onto that target's own bounded queue. A
//! per-target dispatcher task owns the sink client and applies, in order:
//! circuit admission, per-rule rate limiting, batching, and delivery with
//! retry. A slow target fills only its own queue; matched events that do
//! not fit are dropped and counted, never blocking other targets.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use fluxgate_rules::RuleEngine;
use fluxgate_types::{Event, ForwardingRule, ForwardingTarget, GatewayError, GatewayResult, TargetKind};

use crate::circuit::{Admission, CircuitBreaker, CircuitConfig};
use crate::clients::{ClientRegistry, SinkClient};
use crate::rate_limit::RuleRateLimiter;
use crate::retry::RetryPolicy;
use crate::stats::{ForwardingStats, TargetCounters, TargetStats};

/// Engine sizing.
#[derive(Debug, Clone)]
pub struct ForwardingConfig {
    /// Worker tasks draining the pipeline.
    pub workers: usize,
    /// Per-target queue capacity.
    pub queue_capacity: usize,
    /// Circuit thresholds shared by all targets.
    pub circuit: CircuitConfig,
}

impl Default for ForwardingConfig {
    fn default() -> Self {
        Self {
            workers: 5,
            queue_capacity: 1000,
            circuit: CircuitConfig::default(),
        }
    }
}

struct DispatchItem {
    event: Arc<Event>,
    rule: ForwardingRule,
}

struct TargetHandle {
    target: ForwardingTarget,
    tx: mpsc::Sender<DispatchItem>,
    counters: Arc<TargetCounters>,
    circuit: Arc<CircuitBreaker>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// The forwarding engine.
pub struct ForwardingEngine {
    targets: RwLock<HashMap<String, Arc<TargetHandle>>>,
    clients: ClientRegistry,
    rules: Arc<RuleEngine>,
    config: ForwardingConfig,
    cancel: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for ForwardingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForwardingEngine")
            .field("targets", &self.targets.read().len())
            .field("config", &self.config)
            .finish()
    }
}

impl ForwardingEngine {
    /// Create an engine with the default client registry.
    #[must_use]
    pub fn new(config: ForwardingConfig) -> Self {
        Self::with_clients(config, ClientRegistry::default())
    }

    /// Create an engine with a custom client registry (extra sink kinds).
    #[must_use]
    pub fn with_clients(config: ForwardingConfig, clients: ClientRegistry) -> Self {
        Self {
            targets: RwLock::new(HashMap::new()),
            clients,
            rules: Arc::new(RuleEngine::new()),
            config,
            cancel: CancellationToken::new(),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Start the worker pool over the pipeline's consumer channel.
    pub fn start(self: Arc<Self>, consumer_rx: mpsc::Receiver<Arc<Event>>) {
        let shared_rx = Arc::new(tokio::sync::Mutex::new(consumer_rx));
        let mut spawned = Vec::new();
        for worker_id in 0..self.config.workers.max(1) {
            let engine = Arc::clone(&self);
            let rx = Arc::clone(&shared_rx);
            spawned.push(tokio::spawn(async move {
                engine.worker_loop(worker_id, rx).await;
            }));
        }
        self.workers.lock().extend(spawned);
        info!(workers = self.config.workers, "forwarding engine started");
    }

    async fn worker_loop(
        &self,
        worker_id: usize,
        shared_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Arc<Event>>>>,
    ) {
        loop {
            let event = {
                let mut rx = shared_rx.lock().await;
                tokio::select! {
                    () = self.cancel.cancelled() => break,
                    event = rx.recv() => match event {
                        Some(event) => event,
                        None => break,
                    },
                }
            };
            self.route(&event);
        }
        debug!(worker_id, "forwarding worker stopped");
    }

    /// Evaluate every target's rules for one event and enqueue matches.
    fn route(&self, event: &Arc<Event>) {
        let handles: Vec<Arc<TargetHandle>> = self.targets.read().values().cloned().collect();
        for handle in handles {
            let Some(matched) = self.rules.first_match(event, &handle.target.rules) else {
                continue;
            };
            handle.counters.add(&handle.counters.received, 1);
            let item = DispatchItem {
                event: matched.event,
                rule: matched.rule,
            };
            if handle.tx.try_send(item).is_err() {
                handle.counters.add(&handle.counters.dropped, 1);
                counter!(
                    "dropped_total",
                    "target" => handle.target.id.clone(),
                    "reason" => "queue_full"
                )
                .increment(1);
            }
        }
    }

    /// Register a target and start its dispatcher.
    pub fn add_target(&self, target: ForwardingTarget) -> GatewayResult<()> {
        validate_target(&target)?;

        // Build the client outside the lock; sink construction may parse
        // URLs and build connection pools.
        let client = self.clients.create(&target)?;

        let mut targets = self.targets.write();
        if targets.contains_key(&target.id) {
            return Err(GatewayError::conflict("target", &target.id));
        }
        let handle = self.spawn_target(target, client);
        targets.insert(handle.target.id.clone(), handle);
        Ok(())
    }

    /// Replace a target's definition, restarting its dispatcher. Counters
    /// carry over.
    pub async fn update_target(&self, id: &str, target: ForwardingTarget) -> GatewayResult<()> {
        if target.id != id {
            return Err(GatewayError::validation("target id is immutable"));
        }
        validate_target(&target)?;
        let client = self.clients.create(&target)?;

        let previous = {
            let targets = self.targets.read();
            Arc::clone(
                targets
                    .get(id)
                    .ok_or_else(|| GatewayError::not_found("target", id))?,
            )
        };
        stop_target(&previous).await;

        let mut targets = self.targets.write();
        let handle = self.spawn_target_with_counters(
            target,
            client,
            Arc::clone(&previous.counters),
        );
        targets.insert(id.to_string(), handle);
        Ok(())
    }

    /// Stop and remove a target, flushing its pending batch.
    pub async fn remove_target(&self, id: &str) -> GatewayResult<()> {
        let handle = self
            .targets
            .write()
            .remove(id)
            .ok_or_else(|| GatewayError::not_found("target", id))?;
        stop_target(&handle).await;
        info!(target = id, "forwarding target removed");
        Ok(())
    }

    /// Look up one target definition.
    pub fn get_target(&self, id: &str) -> GatewayResult<ForwardingTarget> {
        self.targets
            .read()
            .get(id)
            .map(|handle| handle.target.clone())
            .ok_or_else(|| GatewayError::not_found("target", id))
    }

    /// All target definitions, ordered by id.
    #[must_use]
    pub fn list_targets(&self) -> Vec<ForwardingTarget> {
        let mut targets: Vec<ForwardingTarget> = self
            .targets
            .read()
            .values()
            .map(|handle| handle.target.clone())
            .collect();
        targets.sort_by(|a, b| a.id.cmp(&b.id));
        targets
    }

    /// Delivery accounting, ordered by target id.
    #[must_use]
    pub fn stats(&self) -> ForwardingStats {
        let mut targets: Vec<TargetStats> = self
            .targets
            .read()
            .values()
            .map(|handle| {
                TargetStats::snapshot(&handle.target.id, handle.circuit.state(), &handle.counters)
            })
            .collect();
        targets.sort_by(|a, b| a.target_id.cmp(&b.target_id));
        ForwardingStats { targets }
    }

    /// Stop workers and dispatchers, flushing pending batches.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let workers: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        for worker in workers {
            let _ = worker.await;
        }
        let handles: Vec<Arc<TargetHandle>> = self.targets.read().values().cloned().collect();
        for handle in handles {
            stop_target(&handle).await;
        }
        info!("forwarding engine stopped");
    }

    fn spawn_target(&self, target: ForwardingTarget, client: Arc<dyn SinkClient>) -> Arc<TargetHandle> {
        self.spawn_target_with_counters(target, client, Arc::new(TargetCounters::default()))
    }

    fn spawn_target_with_counters(
        &self,
        target: ForwardingTarget,
        client: Arc<dyn SinkClient>,
        counters: Arc<TargetCounters>,
    ) -> Arc<TargetHandle> {
        let (tx, rx) = mpsc::channel(self.config.queue_capacity.max(1));
        let circuit = Arc::new(CircuitBreaker::new(self.config.circuit.clone()));
        let cancel = self.cancel.child_token();

        let dispatcher = Dispatcher {
            target: target.clone(),
            client,
            counters: Arc::clone(&counters),
            circuit: Arc::clone(&circuit),
            limiter: RuleRateLimiter::new(),
            retry: RetryPolicy::from_target(&target.config),
        };
        let task = tokio::spawn(dispatcher.run(rx, cancel.clone()));

        info!(target = %target.id, kind = %target.kind, "forwarding target started");
        Arc::new(TargetHandle {
            target,
            tx,
            counters,
            circuit,
            cancel,
            task: Mutex::new(Some(task)),
        })
    }
}

async fn stop_target(handle: &TargetHandle) {
    handle.cancel.cancel();
    let task = handle.task.lock().take();
    if let Some(task) = task {
        let _ = task.await;
    }
}

fn validate_target(target: &ForwardingTarget) -> GatewayResult<()> {
    if target.id.is_empty() {
        return Err(GatewayError::validation("target id must not be empty"));
    }
    if target.endpoint.is_empty() {
        return Err(GatewayError::validation("target endpoint must not be empty"));
    }
    if matches!(
        target.kind,
        TargetKind::Webhook | TargetKind::Kafka | TargetKind::ArgoEvents
    ) {
        url::Url::parse(&target.endpoint)
            .map_err(|e| GatewayError::validation(format!("target endpoint: {e}")))?;
    }
    for rule in &target.rules {
        if rule.id.is_empty() {
            return Err(GatewayError::validation("rule id must not be empty"));
        }
    }
    Ok(())
}

/// Per-target delivery loop.
struct Dispatcher {
    target: ForwardingTarget,
    client: Arc<dyn SinkClient>,
    counters: Arc<TargetCounters>,
    circuit: Arc<CircuitBreaker>,
    limiter: RuleRateLimiter,
    retry: RetryPolicy,
}

impl Dispatcher {
    async fn run(self, mut rx: mpsc::Receiver<DispatchItem>, cancel: CancellationToken) {
        let batching = self.target.config.batching();
        let mut batch: Vec<Arc<Event>> = Vec::new();
        let mut deadline: Option<Instant> = None;

        loop {
            let item = if let Some(at) = deadline {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep_until(at.into()) => {
                        self.flush(&mut batch).await;
                        deadline = None;
                        continue;
                    }
                    item = rx.recv() => match item {
                        Some(item) => item,
                        None => break,
                    },
                }
            } else {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    item = rx.recv() => match item {
                        Some(item) => item,
                        None => break,
                    },
                }
            };

            match self.admit(&item).await {
                Admitted::Dropped | Admitted::Probed => continue,
                Admitted::Proceed => {}
            }

            if batching {
                batch.push(item.event);
                if batch.len() >= self.target.config.batch_size {
                    self.flush(&mut batch).await;
                    deadline = None;
                } else if deadline.is_none() {
                    deadline = Some(Instant::now() + self.target.config.batch_timeout());
                }
            } else {
                self.deliver_with_retry(std::slice::from_ref(&item.event)).await;
            }
        }

        // Shutdown path: drain what is queued and flush. Queued singles
        // deliver without retry so shutdown stays bounded.
        while let Ok(item) = rx.try_recv() {
            if batching {
                batch.push(item.event);
            } else if self.deliver_once(std::slice::from_ref(&item.event)).await {
                self.record_success(1, Instant::now());
            } else {
                self.record_failure(1);
            }
        }
        self.flush(&mut batch).await;
        debug!(target = %self.target.id, "dispatcher stopped");
    }

    /// Circuit admission plus rate limiting for one item.
    async fn admit(&self, item: &DispatchItem) -> Admitted {
        match self.circuit.admission() {
            Admission::FastDrop => {
                self.drop_item(1, "circuit_open");
                return Admitted::Dropped;
            }
            Admission::Probe => {
                // One shot, no retries: the sink probe first when the
                // client has one, then the event itself decides.
                let started = Instant::now();
                let outcome = match self.client.probe().await {
                    Ok(()) => self.deliver_once(std::slice::from_ref(&item.event)).await,
                    Err(_) => false,
                };
                if outcome {
                    self.circuit.on_success();
                    self.record_success(1, started);
                } else {
                    self.circuit.on_failure();
                    self.record_failure(1);
                }
                return Admitted::Probed;
            }
            Admission::Allow => {}
        }

        if let Some(spec) = item.rule.rate_limit
            && self
                .limiter
                .acquire(&item.rule.id, spec, self.target.config.timeout())
                .await
                .is_err()
        {
            self.drop_item(1, "rate_limited");
            return Admitted::Dropped;
        }
        Admitted::Proceed
    }

    async fn flush(&self, batch: &mut Vec<Arc<Event>>) {
        if batch.is_empty() {
            return;
        }
        let events = std::mem::take(batch);
        self.deliver_with_retry(&events).await;
    }

    /// Deliver with the target's retry policy; a flush failure retries the
    /// whole batch.
    async fn deliver_with_retry(&self, events: &[Arc<Event>]) {
        let started = Instant::now();
        let mut attempt = 0;
        loop {
            match self.try_deliver(events).await {
                Ok(()) => {
                    self.circuit.on_success();
                    self.record_success(events.len() as u64, started);
                    return;
                }
                Err(err) if self.retry.should_retry(&err, attempt) => {
                    attempt += 1;
                    self.counters.add(&self.counters.retried, 1);
                    counter!("retried_total", "target" => self.target.id.clone()).increment(1);
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        target = %self.target.id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        %err,
                        "delivery failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    self.circuit.on_failure();
                    self.record_failure(events.len() as u64);
                    warn!(target = %self.target.id, %err, "delivery failed permanently");
                    return;
                }
            }
        }
    }

    async fn try_deliver(&self, events: &[Arc<Event>]) -> GatewayResult<()> {
        if let [event] = events {
            self.client.deliver(event).await
        } else {
            let owned: Vec<Event> = events.iter().map(|e| (**e).clone()).collect();
            self.client.deliver_batch(&owned).await
        }
    }

    async fn deliver_once(&self, events: &[Arc<Event>]) -> bool {
        self.try_deliver(events).await.is_ok()
    }

    fn record_success(&self, n: u64, started: Instant) {
        self.counters.add(&self.counters.forwarded, n);
        counter!("forwarded_total", "target" => self.target.id.clone()).increment(n);
        histogram!("forwarding_duration_seconds", "target" => self.target.id.clone())
            .record(started.elapsed().as_secs_f64());
    }

    fn record_failure(&self, n: u64) {
        self.counters.add(&self.counters.failed, n);
        counter!("failed_total", "target" => self.target.id.clone()).increment(n);
    }

    fn drop_item(&self, n: u64, reason: &'static str) {
        self.counters.add(&self.counters.dropped, n);
        counter!("dropped_total", "target" => self.target.id.clone(), "reason" => reason)
            .increment(n);
    }
}

enum Admitted {
    Proceed,
    Dropped,
    Probed,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(id: &str) -> ForwardingTarget {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "name": "sink",
            "type": "webhook",
            "endpoint": "http://127.0.0.1:19999/hook",
            "rules": [{"id": "r1", "conditions": []}]
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn add_list_remove_targets() {
        let engine = ForwardingEngine::new(ForwardingConfig::default());
        engine.add_target(target("t1")).unwrap();
        engine.add_target(target("t2")).unwrap();

        let ids: Vec<String> = engine.list_targets().into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec!["t1", "t2"]);

        engine.remove_target("t1").await.unwrap();
        assert!(engine.get_target("t1").is_err());
        assert!(engine.get_target("t2").is_ok());
    }

    #[tokio::test]
    async fn duplicate_target_conflicts() {
        let engine = ForwardingEngine::new(ForwardingConfig::default());
        engine.add_target(target("t1")).unwrap();
        let err = engine.add_target(target("t1")).unwrap_err();
        assert!(matches!(err, GatewayError::Conflict { .. }));
    }

    #[tokio::test]
    async fn invalid_endpoint_is_rejected() {
        let engine = ForwardingEngine::new(ForwardingConfig::default());
        let mut bad = target("t1");
        bad.endpoint = "no scheme".into();
        assert!(engine.add_target(bad).is_err());
    }

    #[tokio::test]
    async fn update_requires_matching_id() {
        let engine = ForwardingEngine::new(ForwardingConfig::default());
        engine.add_target(target("t1")).unwrap();
        let err = engine.update_target("t1", target("t2")).await.unwrap_err();
        assert!(matches!(err, GatewayError::Validation { .. }));
    }

    #[tokio::test]
    async fn remove_missing_target_is_not_found() {
        let engine = ForwardingEngine::new(ForwardingConfig::default());
        let err = engine.remove_target("ghost").await.unwrap_err();
        assert!(matches!(err, GatewayError::NotFound { .. }));
    }
}
