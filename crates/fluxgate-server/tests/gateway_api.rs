//! End-to-end API tests over a fully wired gateway on ephemeral listeners.

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use pretty_assertions::assert_eq;
use tokio_tungstenite::tungstenite::Message;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use fluxgate_server::config::GatewayConfig;
use fluxgate_server::routes::{api_router, health_router};
use fluxgate_server::state::{AppState, SharedState};
use fluxgate_types::{Event, ServerStatus};

struct TestGateway {
    state: SharedState,
    api_base: String,
    health_base: String,
    api_addr: SocketAddr,
}

async fn start_gateway(config: GatewayConfig) -> TestGateway {
    let state = AppState::build(config).expect("gateway builds");

    let api_listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let api_addr = api_listener.local_addr().unwrap();
    let health_listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let health_addr = health_listener.local_addr().unwrap();

    let api = api_router(state.clone());
    let health = health_router(state.clone());
    tokio::spawn(async move {
        let _ = axum::serve(api_listener, api).await;
    });
    tokio::spawn(async move {
        let _ = axum::serve(health_listener, health).await;
    });

    TestGateway {
        state,
        api_base: format!("http://{api_addr}"),
        health_base: format!("http://{health_addr}"),
        api_addr,
    }
}

fn quiet_config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    // Keep background loops out of short-lived tests.
    config.federation.enabled = false;
    config
}

async fn wait_for<F: Fn() -> bool>(what: &str, check: F) {
    let started = std::time::Instant::now();
    while started.elapsed() < Duration::from_secs(5) {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test]
async fn single_event_is_accepted_and_forwarded() {
    let sink = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&sink)
        .await;

    let mut config = quiet_config();
    config.forwarding.targets = vec![serde_json::from_value(serde_json::json!({
        "id": "t1",
        "name": "hooks",
        "type": "webhook",
        "endpoint": format!("{}/hook", sink.uri()),
        "rules": [{
            "id": "r1",
            "conditions": [
                {"field": "event_type", "operator": "eq", "value": "user.created"}
            ]
        }]
    }))
    .unwrap()];
    let gateway = start_gateway(config).await;

    let response = reqwest::Client::new()
        .post(format!("{}/api/v1/events", gateway.api_base))
        .json(&serde_json::json!({
            "event_id": "e1",
            "event_type": "user.created",
            "source": "auth",
            "data": "{\"email\":\"a@b\"}"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body, serde_json::json!({"event_id": "e1", "status": "accepted"}));

    let state = gateway.state.clone();
    wait_for("forwarded copy", move || {
        state
            .forwarding
            .stats()
            .targets
            .first()
            .is_some_and(|t| t.forwarded == 1)
    })
    .await;
}

#[tokio::test]
async fn invalid_and_oversized_events_are_rejected() {
    let gateway = start_gateway(quiet_config()).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/api/v1/events", gateway.api_base))
        .json(&serde_json::json!({
            "event_id": "e1", "event_type": "", "source": "s", "data": "{}"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    let big = "x".repeat(fluxgate_types::MAX_EVENT_SIZE + 1);
    let response = client
        .post(format!("{}/api/v1/events", gateway.api_base))
        .json(&serde_json::json!({
            "event_id": "e1", "event_type": "a.b", "source": "s", "data": big
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 413);
}

#[tokio::test]
async fn batch_reports_per_element_outcomes() {
    let gateway = start_gateway(quiet_config()).await;

    let response = reqwest::Client::new()
        .post(format!("{}/api/v1/events/batch", gateway.api_base))
        .json(&serde_json::json!([
            {"event_id": "e1", "event_type": "a.b", "source": "s", "data": "{}"},
            {"event_id": "", "event_type": "", "source": "s", "data": "{}"}
        ]))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["processed"], 2);
    assert_eq!(body["results"][0]["status"], "accepted");
    assert_eq!(body["results"][0]["event_id"], "e1");
    assert_eq!(body["results"][1]["status"], "rejected");
    assert_eq!(body["results"][1]["reason"], "event_id_required");
}

#[tokio::test]
async fn batch_with_invalid_event_type_reports_reason() {
    let gateway = start_gateway(quiet_config()).await;

    let response = reqwest::Client::new()
        .post(format!("{}/api/v1/events/batch", gateway.api_base))
        .json(&serde_json::json!([
            {"event_id": "e1", "event_type": "a.b", "source": "s", "data": "{}"},
            {"event_id": "e2", "event_type": "", "source": "s", "data": "{}"}
        ]))
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["results"][1]["event_id"], "e2");
    assert_eq!(body["results"][1]["reason"], "event_type_required");
}

#[tokio::test]
async fn oversized_batch_count_is_rejected() {
    let gateway = start_gateway(quiet_config()).await;
    let events: Vec<serde_json::Value> = (0..1001)
        .map(|i| {
            serde_json::json!({
                "event_id": format!("e{i}"), "event_type": "a.b", "source": "s", "data": "{}"
            })
        })
        .collect();

    let response = reqwest::Client::new()
        .post(format!("{}/api/v1/events/batch", gateway.api_base))
        .json(&events)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn stats_and_metrics_endpoints_respond() {
    let gateway = start_gateway(quiet_config()).await;
    let client = reqwest::Client::new();

    client
        .post(format!("{}/api/v1/events", gateway.api_base))
        .json(&serde_json::json!({
            "event_id": "e1", "event_type": "a.b", "source": "s", "data": "{}"
        }))
        .send()
        .await
        .unwrap();

    let stats: serde_json::Value = client
        .get(format!("{}/api/v1/stats", gateway.api_base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["pipeline"]["published"], 1);

    let metrics = client
        .get(format!("{}/api/v1/metrics", gateway.api_base))
        .send()
        .await
        .unwrap();
    assert_eq!(metrics.status(), 200);
    let content_type = metrics
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(content_type.starts_with("text/plain"));
    let body = metrics.text().await.unwrap();
    assert!(body.contains("events_total"), "metrics body: {body}");
}

#[tokio::test]
async fn stream_subscriber_receives_published_events() {
    let gateway = start_gateway(quiet_config()).await;
    let url = format!("ws://{}/api/v1/events/stream", gateway.api_addr);
    let (mut socket, _) = tokio_tungstenite::connect_async(&url).await.unwrap();

    // Events sent on the stream share the HTTP validation path and fan out
    // to all subscribers, including this connection.
    let event = Event::new("ws-1", "stream.test", "ws", "{}");
    socket
        .send(Message::Text(serde_json::to_string(&event).unwrap().into()))
        .await
        .unwrap();

    let received = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match socket.next().await {
                Some(Ok(Message::Text(text))) => {
                    let got: Event = serde_json::from_str(&text).unwrap();
                    break got;
                }
                Some(Ok(_)) => continue,
                other => panic!("stream ended unexpectedly: {other:?}"),
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(received.event_id, "ws-1");
    assert_eq!(received.event_type, "stream.test");
    assert!(received.timestamp.is_some(), "ingestion stamps the timestamp");

    socket.close(None).await.unwrap();
    let state = gateway.state.clone();
    wait_for("subscriber detach", move || {
        state.pipeline.stats().active_subscribers == 0
    })
    .await;
}

#[tokio::test]
async fn forwarding_target_admin_crud() {
    let gateway = start_gateway(quiet_config()).await;
    let client = reqwest::Client::new();
    let base = format!("{}/api/v1/forwarding/targets", gateway.api_base);

    let target = serde_json::json!({
        "id": "t1", "name": "hooks", "type": "webhook",
        "endpoint": "http://127.0.0.1:19999/hook", "rules": []
    });
    let response = client.post(&base).json(&target).send().await.unwrap();
    assert_eq!(response.status(), 201);

    // Duplicate id conflicts.
    let response = client.post(&base).json(&target).send().await.unwrap();
    assert_eq!(response.status(), 409);

    let listed: Vec<serde_json::Value> =
        client.get(&base).send().await.unwrap().json().await.unwrap();
    assert_eq!(listed.len(), 1);

    let mut updated = target.clone();
    updated["name"] = serde_json::json!("renamed");
    let response = client
        .put(format!("{base}/t1"))
        .json(&updated)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let response = client.delete(format!("{base}/t1")).send().await.unwrap();
    assert_eq!(response.status(), 204);
    let response = client.delete(format!("{base}/t1")).send().await.unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn federation_server_admin_and_invoke() {
    let remote = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "req-1", "result": {"tools": []}
        })))
        .mount(&remote)
        .await;

    let gateway = start_gateway(quiet_config()).await;
    let client = reqwest::Client::new();
    let base = format!("{}/api/v1/federation/servers", gateway.api_base);

    let server = serde_json::json!({
        "id": "s1", "name": "tool server", "category": "tools",
        "endpoint": remote.uri(), "protocol": "http"
    });
    let response = client.post(&base).json(&server).send().await.unwrap();
    assert_eq!(response.status(), 201);
    let response = client.post(&base).json(&server).send().await.unwrap();
    assert_eq!(response.status(), 409);

    let got: serde_json::Value = client
        .get(format!("{base}/s1"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(got["status"], "unknown");

    let by_category: Vec<serde_json::Value> = client
        .get(format!(
            "{}/api/v1/federation/categories/tools/servers",
            gateway.api_base
        ))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(by_category.len(), 1);

    let invoked: serde_json::Value = client
        .post(format!("{base}/s1/invoke"))
        .json(&serde_json::json!({"id": "req-1", "method": "list-tools"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(invoked["id"], "req-1");

    let response = client.delete(format!("{base}/s1")).send().await.unwrap();
    assert_eq!(response.status(), 204);
    let response = client.get(format!("{base}/s1")).send().await.unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn broadcast_reaches_healthy_servers_only_in_id_order() {
    let healthy_remote = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "ping-1", "result": "pong"
        })))
        .mount(&healthy_remote)
        .await;

    let gateway = start_gateway(quiet_config()).await;
    let client = reqwest::Client::new();
    let base = format!("{}/api/v1/federation/servers", gateway.api_base);

    for (id, endpoint) in [
        ("s1", healthy_remote.uri()),
        ("s2", "http://127.0.0.1:9".to_string()),
    ] {
        let server = serde_json::json!({
            "id": id, "endpoint": endpoint, "protocol": "http"
        });
        client.post(&base).json(&server).send().await.unwrap();
    }
    gateway
        .state
        .registry
        .update_status("s1", ServerStatus::Healthy)
        .unwrap();
    gateway
        .state
        .registry
        .update_status("s2", ServerStatus::Unhealthy)
        .unwrap();

    let response = client
        .post(format!("{}/api/v1/federation/broadcast", gateway.api_base))
        .json(&serde_json::json!({"id": "ping-1", "method": "ping"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["total"], 1, "unhealthy servers are excluded");
    assert_eq!(body["responses"][0]["server_id"], "s1");
    assert_eq!(body["responses"][0]["response"]["id"], "ping-1");
}

#[tokio::test]
async fn broadcast_with_no_healthy_servers_fails_top_level() {
    let gateway = start_gateway(quiet_config()).await;
    let response = reqwest::Client::new()
        .post(format!("{}/api/v1/federation/broadcast", gateway.api_base))
        .json(&serde_json::json!({"id": "ping-1", "method": "ping"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 502);
}

#[tokio::test]
async fn readiness_flips_during_shutdown() {
    let gateway = start_gateway(quiet_config()).await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{}/ready", gateway.health_base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let health: serde_json::Value = client
        .get(format!("{}/health", gateway.health_base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");

    gateway.state.shutdown().await;

    let response = client
        .get(format!("{}/ready", gateway.health_base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 503);
}
