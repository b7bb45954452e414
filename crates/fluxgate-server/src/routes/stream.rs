//! Bidirectional streaming RPC over WebSocket.
//!
//! The client sends events (JSON text frames or MessagePack binary frames);
//! the server simultaneously delivers pipeline events back as JSON text
//! frames. Each connection is a stream subscriber with a bounded queue;
//! the subscription deregisters on every termination path because it lives
//! inside the writer task and drops with it.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use tracing::{debug, warn};

use fluxgate_wire::EventCodec;

use crate::state::SharedState;

/// `GET /api/v1/events/stream` - WebSocket upgrade.
pub async fn event_stream(State(state): State<SharedState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_stream(state, socket))
}

async fn handle_stream(state: SharedState, socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();
    let connection = format!("stream-{}", uuid::Uuid::new_v4());
    let mut subscription = state.pipeline.subscribe(connection.clone());
    debug!(%connection, "stream connected");

    // Writer: pipeline -> client. Owns the subscription so any exit path
    // (client close, send failure, server shutdown abort) deregisters it.
    let writer = tokio::spawn(async move {
        while let Some(event) = subscription.recv().await {
            let text = match serde_json::to_string(event.as_ref()) {
                Ok(text) => text,
                Err(err) => {
                    warn!(%err, "event encode failed, skipping");
                    continue;
                }
            };
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    // Reader: client -> pipeline, through the same validation path as the
    // HTTP transports.
    let msgpack = EventCodec::msgpack();
    while let Some(frame) = receiver.next().await {
        let decoded = match frame {
            Ok(Message::Text(text)) => state.codec.decode(text.as_bytes()),
            Ok(Message::Binary(bytes)) => msgpack.decode(&bytes),
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(err) => {
                debug!(%connection, %err, "stream receive error");
                break;
            }
        };
        match decoded {
            Ok(event) => {
                if let Err(err) = state.ingest(event).await {
                    warn!(%connection, %err, "stream event rejected");
                }
            }
            Err(err) => {
                warn!(%connection, %err, "undecodable stream frame");
            }
        }
    }

    writer.abort();
    debug!(%connection, "stream disconnected");
}
