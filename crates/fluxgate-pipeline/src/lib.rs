//! # Fluxgate Event Pipeline
//!
//! A bounded multi-producer channel distributing ingested events to three
//! consumer classes:
//!
//! 1. the forwarding engine - a single logical consumer with its own bounded
//!    queue, applying backpressure upstream when saturated
//! 2. stream subscribers - per-connection bounded queues fed non-blocking; a
//!    slow subscriber loses events (counted) without stalling anyone else
//! 3. metrics counters - atomic increments on the fan-out hot path
//!
//! Producers publish with a short bounded wait; a full channel surfaces a
//! backpressure error rather than blocking the transport.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use metrics::{counter, gauge};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use fluxgate_types::{Event, GatewayError, GatewayResult};

/// Pipeline sizing and publish semantics.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Main channel capacity.
    pub capacity: usize,
    /// Per-subscriber queue capacity.
    pub subscriber_capacity: usize,
    /// Bounded wait before a publish reports backpressure.
    pub publish_wait: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            subscriber_capacity: 100,
            publish_wait: Duration::from_millis(50),
        }
    }
}

/// Aggregate pipeline counters, snapshotted for `/api/v1/stats`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PipelineStats {
    /// Events accepted into the pipeline.
    pub published: u64,
    /// Publishes rejected with backpressure.
    pub rejected: u64,
    /// Events dropped across all subscriber queues.
    pub subscriber_dropped: u64,
    /// Currently attached stream subscribers.
    pub active_subscribers: usize,
    /// Per-subscriber detail.
    pub subscribers: Vec<SubscriberStats>,
}

/// Counters for one attached subscriber.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SubscriberStats {
    /// Subscriber name (connection label).
    pub name: String,
    /// Events delivered to this subscriber's queue.
    pub delivered: u64,
    /// Events dropped because this subscriber's queue was full.
    pub dropped: u64,
}

#[derive(Debug)]
struct Counters {
    published: AtomicU64,
    rejected: AtomicU64,
    subscriber_dropped: AtomicU64,
}

#[derive(Debug)]
struct SubscriberSlot {
    name: String,
    tx: mpsc::Sender<Arc<Event>>,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

type SubscriberMap = Arc<RwLock<HashMap<u64, Arc<SubscriberSlot>>>>;

/// The bounded fan-out pipeline.
#[derive(Debug)]
pub struct EventPipeline {
    tx: Mutex<Option<mpsc::Sender<Arc<Event>>>>,
    subscribers: SubscriberMap,
    counters: Arc<Counters>,
    consumer_rx: Mutex<Option<mpsc::Receiver<Arc<Event>>>>,
    consumer_attached: Arc<AtomicBool>,
    next_subscriber_id: AtomicU64,
    subscriber_capacity: usize,
    publish_wait: Duration,
    fanout: Mutex<Option<JoinHandle<()>>>,
}

impl EventPipeline {
    /// Create the pipeline and start its fan-out task.
    #[must_use]
    pub fn new(config: PipelineConfig) -> Self {
        let (tx, rx) = mpsc::channel::<Arc<Event>>(config.capacity.max(1));
        let (consumer_tx, consumer_rx) = mpsc::channel::<Arc<Event>>(config.capacity.max(1));

        let subscribers: SubscriberMap = Arc::new(RwLock::new(HashMap::new()));
        let counters = Arc::new(Counters {
            published: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            subscriber_dropped: AtomicU64::new(0),
        });
        let consumer_attached = Arc::new(AtomicBool::new(false));

        let fanout = tokio::spawn(fanout_loop(
            rx,
            consumer_tx,
            Arc::clone(&consumer_attached),
            Arc::clone(&subscribers),
            Arc::clone(&counters),
        ));

        Self {
            tx: Mutex::new(Some(tx)),
            subscribers,
            counters,
            consumer_rx: Mutex::new(Some(consumer_rx)),
            consumer_attached,
            next_subscriber_id: AtomicU64::new(1),
            subscriber_capacity: config.subscriber_capacity.max(1),
            publish_wait: config.publish_wait,
            fanout: Mutex::new(Some(fanout)),
        }
    }

    /// Publish one event.
    ///
    /// Tries a non-blocking send first, then waits at most the configured
    /// publish wait. A still-full channel yields
    /// [`GatewayError::Backpressure`].
    pub async fn publish(&self, event: Arc<Event>) -> GatewayResult<()> {
        let Some(tx) = self.tx.lock().clone() else {
            return Err(GatewayError::internal("pipeline stopped"));
        };

        let event = match tx.try_send(event) {
            Ok(()) => {
                self.note_published();
                return Ok(());
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                return Err(GatewayError::internal("pipeline stopped"));
            }
            Err(mpsc::error::TrySendError::Full(event)) => event,
        };

        match tokio::time::timeout(self.publish_wait, tx.send(event)).await {
            Ok(Ok(())) => {
                self.note_published();
                Ok(())
            }
            Ok(Err(_)) => Err(GatewayError::internal("pipeline stopped")),
            Err(_) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                Err(GatewayError::Backpressure {
                    retry_after_ms: self.publish_wait.as_millis() as u64,
                })
            }
        }
    }

    fn note_published(&self) {
        self.counters.published.fetch_add(1, Ordering::Relaxed);
        counter!("events_total").increment(1);
    }

    /// Take the forwarding engine's receiver. Yields `None` after the first
    /// call; the engine is the single logical consumer.
    pub fn take_consumer(&self) -> Option<mpsc::Receiver<Arc<Event>>> {
        let rx = self.consumer_rx.lock().take();
        if rx.is_some() {
            self.consumer_attached.store(true, Ordering::Release);
        }
        rx
    }

    /// Attach a stream subscriber with its own bounded queue.
    ///
    /// The returned [`Subscription`] deregisters on drop, covering every
    /// connection termination path.
    pub fn subscribe(&self, name: impl Into<String>) -> Subscription {
        let id = self.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.subscriber_capacity);
        let slot = Arc::new(SubscriberSlot {
            name: name.into(),
            tx,
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        });

        let active = {
            let mut subscribers = self.subscribers.write();
            subscribers.insert(id, slot);
            subscribers.len()
        };
        gauge!("active_streams").set(active as f64);
        debug!(subscriber_id = id, active, "stream subscriber attached");

        Subscription {
            id,
            rx,
            subscribers: Arc::clone(&self.subscribers),
        }
    }

    /// Snapshot pipeline counters.
    #[must_use]
    pub fn stats(&self) -> PipelineStats {
        let subscribers = self.subscribers.read();
        PipelineStats {
            published: self.counters.published.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
            subscriber_dropped: self.counters.subscriber_dropped.load(Ordering::Relaxed),
            active_subscribers: subscribers.len(),
            subscribers: subscribers
                .values()
                .map(|slot| SubscriberStats {
                    name: slot.name.clone(),
                    delivered: slot.delivered.load(Ordering::Relaxed),
                    dropped: slot.dropped.load(Ordering::Relaxed),
                })
                .collect(),
        }
    }

    /// Stop accepting publishes and wait for the fan-out task to drain, up
    /// to `timeout`.
    pub async fn close_and_drain(&self, timeout: Duration) {
        drop(self.tx.lock().take());
        let handle = self.fanout.lock().take();
        if let Some(handle) = handle
            && tokio::time::timeout(timeout, handle).await.is_err()
        {
            tracing::warn!("pipeline drain timed out");
        }
    }
}

async fn fanout_loop(
    mut rx: mpsc::Receiver<Arc<Event>>,
    consumer_tx: mpsc::Sender<Arc<Event>>,
    consumer_attached: Arc<AtomicBool>,
    subscribers: SubscriberMap,
    counters: Arc<Counters>,
) {
    while let Some(event) = rx.recv().await {
        // Subscribers first, non-blocking: a full queue drops for that
        // subscriber only.
        let slots: Vec<Arc<SubscriberSlot>> = subscribers.read().values().cloned().collect();
        for slot in slots {
            match slot.tx.try_send(Arc::clone(&event)) {
                Ok(()) => {
                    slot.delivered.fetch_add(1, Ordering::Relaxed);
                }
                Err(_) => {
                    slot.dropped.fetch_add(1, Ordering::Relaxed);
                    counters.subscriber_dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        // The forwarding consumer is the one consumer allowed to apply
        // backpressure: when its queue is full this await fills the main
        // channel and publishers start seeing backpressure errors.
        if consumer_attached.load(Ordering::Acquire) && consumer_tx.send(event).await.is_err() {
            break;
        }
    }
    debug!("pipeline fan-out stopped");
}

/// A stream subscriber's end of the fan-out.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    rx: mpsc::Receiver<Arc<Event>>,
    subscribers: SubscriberMap,
}

impl Subscription {
    /// Receive the next event, or `None` once the pipeline stops.
    pub async fn recv(&mut self) -> Option<Arc<Event>> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let active = {
            let mut subscribers = self.subscribers.write();
            subscribers.remove(&self.id);
            subscribers.len()
        };
        gauge!("active_streams").set(active as f64);
        debug!(subscriber_id = self.id, active, "stream subscriber detached");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn event(id: &str) -> Arc<Event> {
        Arc::new(Event::new(id, "test.event", "tests", "{}"))
    }

    fn small_pipeline(capacity: usize, subscriber_capacity: usize) -> EventPipeline {
        EventPipeline::new(PipelineConfig {
            capacity,
            subscriber_capacity,
            publish_wait: Duration::from_millis(10),
        })
    }

    #[tokio::test]
    async fn publish_reaches_subscriber_in_order() {
        let pipeline = small_pipeline(10, 10);
        let mut sub = pipeline.subscribe("conn-1");

        pipeline.publish(event("e1")).await.unwrap();
        pipeline.publish(event("e2")).await.unwrap();

        assert_eq!(sub.recv().await.unwrap().event_id, "e1");
        assert_eq!(sub.recv().await.unwrap().event_id, "e2");
    }

    #[tokio::test]
    async fn slow_subscriber_drops_without_stalling_others() {
        let pipeline = small_pipeline(10, 1);
        let mut fast = pipeline.subscribe("fast");
        let _slow = pipeline.subscribe("slow");

        // The slow subscriber never drains; its 1-slot queue overflows.
        for i in 0..5 {
            pipeline.publish(event(&format!("e{i}"))).await.unwrap();
            // The fast subscriber keeps consuming.
            assert!(fast.recv().await.is_some());
        }

        // Give the fan-out task a beat to finish counting.
        tokio::time::sleep(Duration::from_millis(20)).await;
        let stats = pipeline.stats();
        assert_eq!(stats.published, 5);
        assert_eq!(stats.subscriber_dropped, 4);
        let slow = stats
            .subscribers
            .iter()
            .find(|s| s.name == "slow")
            .unwrap();
        assert_eq!(slow.delivered, 1);
        assert_eq!(slow.dropped, 4);
    }

    #[tokio::test]
    async fn full_pipeline_reports_backpressure() {
        let pipeline = small_pipeline(1, 1);
        // Attach the consumer but never drain it, so the fan-out blocks and
        // the main channel fills.
        let _consumer = pipeline.take_consumer().unwrap();

        let mut saw_backpressure = false;
        for i in 0..16 {
            match pipeline.publish(event(&format!("e{i}"))).await {
                Ok(()) => {}
                Err(GatewayError::Backpressure { retry_after_ms }) => {
                    assert!(retry_after_ms > 0);
                    saw_backpressure = true;
                    break;
                }
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert!(saw_backpressure);
        assert!(pipeline.stats().rejected >= 1);
    }

    #[tokio::test]
    async fn consumer_receives_published_events() {
        let pipeline = small_pipeline(10, 10);
        let mut consumer = pipeline.take_consumer().unwrap();
        assert!(pipeline.take_consumer().is_none());

        pipeline.publish(event("e1")).await.unwrap();
        assert_eq!(consumer.recv().await.unwrap().event_id, "e1");
    }

    #[tokio::test]
    async fn dropped_subscription_detaches() {
        let pipeline = small_pipeline(10, 10);
        {
            let _sub = pipeline.subscribe("ephemeral");
            assert_eq!(pipeline.stats().active_subscribers, 1);
        }
        assert_eq!(pipeline.stats().active_subscribers, 0);
    }

    #[tokio::test]
    async fn close_and_drain_stops_publishes() {
        let pipeline = small_pipeline(10, 10);
        pipeline.publish(event("e1")).await.unwrap();
        pipeline.close_and_drain(Duration::from_secs(1)).await;
        assert!(pipeline.publish(event("e2")).await.is_err());
    }
}
