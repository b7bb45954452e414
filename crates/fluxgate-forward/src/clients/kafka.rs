//! Kafka sink via a REST producer endpoint.
//!
//! The target endpoint is a Kafka REST proxy topic URL
//! (`http://proxy:8082/topics/<topic>`); records post in the proxy's JSON
//! envelope, keyed by event id. Batching is native: a flushed batch is one
//! request.

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use fluxgate_types::{Event, ForwardingTarget, GatewayError, GatewayResult};

use super::{SinkClient, classify_response, classify_send_error, http_client_for};

const KAFKA_JSON: &str = "application/vnd.kafka.json.v2+json";

#[derive(Debug, Serialize)]
struct RecordSet<'a> {
    records: Vec<Record<'a>>,
}

#[derive(Debug, Serialize)]
struct Record<'a> {
    key: &'a str,
    value: &'a Event,
}

/// Batching REST producer for Kafka-style sinks.
#[derive(Debug, Clone)]
pub struct KafkaRestClient {
    http: reqwest::Client,
    topic_url: String,
    health_check_url: Option<String>,
}

impl KafkaRestClient {
    /// Build the client from a target definition.
    pub fn new(target: &ForwardingTarget) -> GatewayResult<Self> {
        url::Url::parse(&target.endpoint)
            .map_err(|e| GatewayError::validation(format!("invalid kafka topic url: {e}")))?;
        Ok(Self {
            http: http_client_for(
                &target.config.headers,
                target.config.auth.as_ref(),
                target.config.timeout(),
            )?,
            topic_url: target.endpoint.clone(),
            health_check_url: target.config.health_check_url.clone(),
        })
    }

    async fn produce(&self, events: &[Event]) -> GatewayResult<()> {
        let body = RecordSet {
            records: events
                .iter()
                .map(|event| Record {
                    key: &event.event_id,
                    value: event,
                })
                .collect(),
        };
        let response = self
            .http
            .post(&self.topic_url)
            .header(reqwest::header::CONTENT_TYPE, KAFKA_JSON)
            .json(&body)
            .send()
            .await
            .map_err(classify_send_error)?;
        debug!(count = events.len(), status = %response.status(), "kafka produce");
        classify_response(response).await
    }
}

#[async_trait]
impl SinkClient for KafkaRestClient {
    async fn deliver(&self, event: &Event) -> GatewayResult<()> {
        self.produce(std::slice::from_ref(event)).await
    }

    async fn deliver_batch(&self, events: &[Event]) -> GatewayResult<()> {
        self.produce(events).await
    }

    async fn probe(&self) -> GatewayResult<()> {
        let Some(url) = &self.health_check_url else {
            return Ok(());
        };
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(classify_send_error)?;
        classify_response(response).await
    }
}
