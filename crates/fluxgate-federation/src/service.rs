//! Protocol-specific service wrappers.
//!
//! A wrapper is created per registered server by [`ServiceFactory`] and
//! stored next to the record in the registry. Invocation goes: translate
//! the request toward the server's protocol via the bridge, attach
//! credentials via the auth manager, make the protocol-specific call, and
//! translate the response back. Wrappers hold a server id and config copy,
//! never a registry reference, so no cycle escapes the registry lifetime.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tracing::{debug, warn};

use fluxgate_grpc::{GrpcClient, GrpcClientConfig};
use fluxgate_types::{
    AuthConfig, GatewayError, GatewayResult, McpRequest, McpResponse, McpServer, Protocol,
};
use fluxgate_wire::StreamingJsonDecoder;

use crate::auth::AuthManager;
use crate::bridge::ProtocolBridge;

/// Default per-invocation timeout when the caller supplies none.
pub const DEFAULT_INVOKE_TIMEOUT: Duration = Duration::from_secs(30);

/// A federated server's invocation surface.
#[async_trait]
pub trait McpService: Send + Sync {
    /// The server's protocol.
    fn protocol(&self) -> Protocol;

    /// Invoke an MCP method. The request arrives in the hub's native
    /// (HTTP-shaped) convention; wrappers bridge as needed.
    async fn invoke(&self, request: McpRequest) -> GatewayResult<McpResponse>;

    /// Protocol-level health probe for non-HTTP servers.
    async fn health_check(&self) -> GatewayResult<bool>;

    /// Release held resources (connections, child processes).
    async fn stop(&self) {}
}

/// Builds the wrapper matching a server's protocol.
#[derive(Clone)]
pub struct ServiceFactory {
    auth: Arc<AuthManager>,
    bridge: Arc<ProtocolBridge>,
}

impl std::fmt::Debug for ServiceFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceFactory").finish_non_exhaustive()
    }
}

impl ServiceFactory {
    /// Create the factory.
    #[must_use]
    pub fn new(auth: Arc<AuthManager>, bridge: Arc<ProtocolBridge>) -> Self {
        Self { auth, bridge }
    }

    /// Instantiate a wrapper for the server. Construction is lazy: no I/O
    /// happens until the first call.
    pub fn create(&self, server: &McpServer) -> GatewayResult<Arc<dyn McpService>> {
        Ok(match server.protocol {
            Protocol::Http => Arc::new(HttpService::new(server, Arc::clone(&self.auth))?),
            Protocol::Sse => Arc::new(SseService::new(
                server,
                Arc::clone(&self.auth),
                Arc::clone(&self.bridge),
            )?),
            Protocol::Grpc => Arc::new(GrpcService::new(
                server,
                Arc::clone(&self.auth),
                Arc::clone(&self.bridge),
            )?),
            Protocol::Stdio => Arc::new(StdioService::new(server, Arc::clone(&self.bridge))),
        })
    }
}

fn ensure_response_id(request_id: &str, mut response: McpResponse) -> McpResponse {
    if response.id.is_empty() {
        response.id = request_id.to_string();
    }
    response
}

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

/// JSON-over-HTTP wrapper: POST the request envelope to the endpoint.
pub struct HttpService {
    server_id: String,
    endpoint: String,
    health_path: String,
    auth_config: Option<AuthConfig>,
    auth: Arc<AuthManager>,
    http: reqwest::Client,
}

impl HttpService {
    fn new(server: &McpServer, auth: Arc<AuthManager>) -> GatewayResult<Self> {
        url::Url::parse(&server.endpoint)
            .map_err(|e| GatewayError::validation(format!("invalid http endpoint: {e}")))?;
        Ok(Self {
            server_id: server.id.clone(),
            endpoint: server.endpoint.clone(),
            health_path: server.health_check.path.clone(),
            auth_config: server.auth.clone(),
            auth,
            http: reqwest::Client::builder()
                .timeout(DEFAULT_INVOKE_TIMEOUT)
                .build()
                .map_err(|e| GatewayError::internal(format!("http client build: {e}")))?,
        })
    }

    fn health_url(&self) -> String {
        format!(
            "{}{}",
            self.endpoint.trim_end_matches('/'),
            self.health_path
        )
    }
}

#[async_trait]
impl McpService for HttpService {
    fn protocol(&self) -> Protocol {
        Protocol::Http
    }

    async fn invoke(&self, request: McpRequest) -> GatewayResult<McpResponse> {
        let request_id = request.id.clone();
        let builder = self.http.post(&self.endpoint).json(&request);
        let builder = self
            .auth
            .add_authentication(builder, &self.server_id, self.auth_config.as_ref())
            .await?;

        let response = builder
            .send()
            .await
            .map_err(|e| GatewayError::transport(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::remote(i64::from(status.as_u16()), body));
        }
        let parsed: McpResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::validation(format!("malformed mcp response: {e}")))?;
        Ok(ensure_response_id(&request_id, parsed))
    }

    async fn health_check(&self) -> GatewayResult<bool> {
        let response = self
            .http
            .get(self.health_url())
            .send()
            .await
            .map_err(|e| GatewayError::transport(e.to_string()))?;
        Ok(response.status().is_success())
    }
}

// ---------------------------------------------------------------------------
// SSE
// ---------------------------------------------------------------------------

/// SSE wrapper: POST the request, read the response off the event stream.
pub struct SseService {
    server_id: String,
    endpoint: String,
    auth_config: Option<AuthConfig>,
    auth: Arc<AuthManager>,
    bridge: Arc<ProtocolBridge>,
    http: reqwest::Client,
}

impl SseService {
    fn new(
        server: &McpServer,
        auth: Arc<AuthManager>,
        bridge: Arc<ProtocolBridge>,
    ) -> GatewayResult<Self> {
        url::Url::parse(&server.endpoint)
            .map_err(|e| GatewayError::validation(format!("invalid sse endpoint: {e}")))?;
        Ok(Self {
            server_id: server.id.clone(),
            endpoint: server.endpoint.clone(),
            auth_config: server.auth.clone(),
            auth,
            bridge,
            http: reqwest::Client::builder()
                .timeout(DEFAULT_INVOKE_TIMEOUT)
                .build()
                .map_err(|e| GatewayError::internal(format!("http client build: {e}")))?,
        })
    }
}

#[async_trait]
impl McpService for SseService {
    fn protocol(&self) -> Protocol {
        Protocol::Sse
    }

    async fn invoke(&self, request: McpRequest) -> GatewayResult<McpResponse> {
        let request_id = request.id.clone();
        let translated =
            self.bridge
                .translate_request(Protocol::Http, Protocol::Sse, request)?;
        let builder = self
            .http
            .post(&self.endpoint)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&translated);
        let builder = self
            .auth
            .add_authentication(builder, &self.server_id, self.auth_config.as_ref())
            .await?;

        let response = builder
            .send()
            .await
            .map_err(|e| GatewayError::transport(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::remote(i64::from(status.as_u16()), body));
        }

        // The response is the first decodable event on the stream.
        let mut decoder = StreamingJsonDecoder::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| GatewayError::transport(e.to_string()))?;
            decoder.feed(&chunk);
            loop {
                match decoder.try_decode::<McpResponse>() {
                    Ok(Some(parsed)) => {
                        let back = self.bridge.translate_response(
                            Protocol::Sse,
                            Protocol::Http,
                            parsed,
                        )?;
                        return Ok(ensure_response_id(&request_id, back));
                    }
                    Ok(None) => break,
                    Err(err) => {
                        // Skip non-JSON comment/heartbeat lines.
                        debug!(%err, "skipping undecodable sse line");
                    }
                }
            }
        }
        Err(GatewayError::transport(
            "sse stream ended before a response arrived",
        ))
    }

    async fn health_check(&self) -> GatewayResult<bool> {
        let response = self
            .http
            .get(&self.endpoint)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| GatewayError::transport(e.to_string()))?;
        Ok(response.status().is_success())
    }
}

// ---------------------------------------------------------------------------
// gRPC
// ---------------------------------------------------------------------------

/// gRPC wrapper over a long-lived channel, bridging request/response shapes.
pub struct GrpcService {
    server_id: String,
    auth_config: Option<AuthConfig>,
    auth: Arc<AuthManager>,
    bridge: Arc<ProtocolBridge>,
    client: GrpcClient,
}

impl GrpcService {
    fn new(
        server: &McpServer,
        auth: Arc<AuthManager>,
        bridge: Arc<ProtocolBridge>,
    ) -> GatewayResult<Self> {
        Ok(Self {
            server_id: server.id.clone(),
            auth_config: server.auth.clone(),
            auth,
            bridge,
            client: GrpcClient::connect_lazy_with_config(
                &server.endpoint,
                GrpcClientConfig {
                    connect_timeout: Duration::from_secs(10),
                    request_timeout: DEFAULT_INVOKE_TIMEOUT,
                },
            )?,
        })
    }
}

#[async_trait]
impl McpService for GrpcService {
    fn protocol(&self) -> Protocol {
        Protocol::Grpc
    }

    async fn invoke(&self, request: McpRequest) -> GatewayResult<McpResponse> {
        let request_id = request.id.clone();
        let mut translated =
            self.bridge
                .translate_request(Protocol::Http, Protocol::Grpc, request)?;

        // Token-bearing schemes travel as call metadata.
        if let Some(config) = &self.auth_config
            && matches!(
                config.auth_type,
                fluxgate_types::AuthType::Bearer
                    | fluxgate_types::AuthType::Jwt
                    | fluxgate_types::AuthType::Oauth2
            )
        {
            let token = self.auth.get_token(&self.server_id, config).await?;
            translated
                .metadata
                .insert("authorization".to_string(), format!("Bearer {}", token.access_token));
        }

        let response = self.client.invoke(translated).await?;
        let translated =
            self.bridge
                .translate_response(Protocol::Grpc, Protocol::Http, response)?;
        Ok(ensure_response_id(&request_id, translated))
    }

    async fn health_check(&self) -> GatewayResult<bool> {
        Ok(self.client.ping().await.is_ok())
    }
}

// ---------------------------------------------------------------------------
// stdio
// ---------------------------------------------------------------------------

struct ChildIo {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

/// Child-process wrapper speaking newline-delimited JSON over stdio.
///
/// The endpoint is the command line (`command arg1 arg2 ...`). The child
/// spawns on first use and respawns after an I/O failure.
pub struct StdioService {
    server_id: String,
    command_line: String,
    bridge: Arc<ProtocolBridge>,
    io: tokio::sync::Mutex<Option<ChildIo>>,
}

impl StdioService {
    fn new(server: &McpServer, bridge: Arc<ProtocolBridge>) -> Self {
        Self {
            server_id: server.id.clone(),
            command_line: server.endpoint.clone(),
            bridge,
            io: tokio::sync::Mutex::new(None),
        }
    }

    fn spawn(&self) -> GatewayResult<ChildIo> {
        let mut parts = self.command_line.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| GatewayError::validation("stdio endpoint is empty"))?;
        let mut child = tokio::process::Command::new(program)
            .args(parts)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| GatewayError::transport(format!("spawn {program}: {e}")))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| GatewayError::internal("child stdin unavailable"))?;
        let stdout = child
            .stdout
            .take()
            .map(BufReader::new)
            .ok_or_else(|| GatewayError::internal("child stdout unavailable"))?;
        debug!(server = %self.server_id, %program, "stdio child spawned");
        Ok(ChildIo {
            child,
            stdin,
            stdout,
        })
    }

    async fn exchange(&self, line: String) -> GatewayResult<String> {
        let mut guard = self.io.lock().await;
        if guard.is_none() {
            *guard = Some(self.spawn()?);
        }
        let io = guard.as_mut().expect("just spawned");

        let result: GatewayResult<String> = async {
            io.stdin
                .write_all(line.as_bytes())
                .await
                .map_err(|e| GatewayError::transport(format!("stdio write: {e}")))?;
            io.stdin
                .write_all(b"\n")
                .await
                .map_err(|e| GatewayError::transport(format!("stdio write: {e}")))?;
            io.stdin
                .flush()
                .await
                .map_err(|e| GatewayError::transport(format!("stdio flush: {e}")))?;

            let mut reply = String::new();
            let n = io
                .stdout
                .read_line(&mut reply)
                .await
                .map_err(|e| GatewayError::transport(format!("stdio read: {e}")))?;
            if n == 0 {
                return Err(GatewayError::transport("stdio child closed its stdout"));
            }
            Ok(reply)
        }
        .await;

        if result.is_err() {
            // Drop the broken child; the next call respawns.
            if let Some(mut io) = guard.take() {
                let _ = io.child.start_kill();
            }
        }
        result
    }
}

#[async_trait]
impl McpService for StdioService {
    fn protocol(&self) -> Protocol {
        Protocol::Stdio
    }

    async fn invoke(&self, request: McpRequest) -> GatewayResult<McpResponse> {
        let request_id = request.id.clone();
        let translated =
            self.bridge
                .translate_request(Protocol::Http, Protocol::Stdio, request)?;
        let line = serde_json::to_string(&translated)
            .map_err(|e| GatewayError::internal(format!("encode request: {e}")))?;

        let reply = tokio::time::timeout(DEFAULT_INVOKE_TIMEOUT, self.exchange(line))
            .await
            .map_err(|_| GatewayError::transport("stdio invocation timed out"))??;

        let parsed: McpResponse = serde_json::from_str(reply.trim())
            .map_err(|e| GatewayError::validation(format!("malformed stdio response: {e}")))?;
        let translated =
            self.bridge
                .translate_response(Protocol::Stdio, Protocol::Http, parsed)?;
        Ok(ensure_response_id(&request_id, translated))
    }

    async fn health_check(&self) -> GatewayResult<bool> {
        let mut guard = self.io.lock().await;
        match guard.as_mut() {
            Some(io) => match io.child.try_wait() {
                Ok(None) => Ok(true),
                Ok(Some(status)) => {
                    warn!(server = %self.server_id, %status, "stdio child exited");
                    *guard = None;
                    Ok(false)
                }
                Err(e) => Err(GatewayError::internal(format!("child status: {e}"))),
            },
            // Not spawned yet counts as healthy-if-spawnable.
            None => Ok(true),
        }
    }

    async fn stop(&self) {
        let mut guard = self.io.lock().await;
        if let Some(mut io) = guard.take() {
            let _ = io.child.start_kill();
        }
    }
}
