//! Pairwise protocol bridge.
//!
//! A table keyed by `(from, to)` holds a translator: one pure function for
//! requests, one for responses. Lookups read an immutable snapshot
//! (swapped atomically on registration), so the hot path takes no lock.
//! Every translation stamps provenance metadata: `original_protocol`,
//! `target_protocol`, and an RFC 3339 `translated_at`.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::Utc;

use fluxgate_types::{GatewayError, GatewayResult, McpRequest, McpResponse, Protocol};

/// Request transformer.
pub type RequestFn = Arc<dyn Fn(McpRequest) -> McpRequest + Send + Sync>;
/// Response transformer.
pub type ResponseFn = Arc<dyn Fn(McpResponse) -> McpResponse + Send + Sync>;

#[derive(Clone)]
struct Translator {
    request: RequestFn,
    response: ResponseFn,
}

type Table = HashMap<(Protocol, Protocol), Translator>;

/// The translator table.
pub struct ProtocolBridge {
    table: ArcSwap<Table>,
}

impl std::fmt::Debug for ProtocolBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolBridge")
            .field("pairs", &self.table.load().keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for ProtocolBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl ProtocolBridge {
    /// Bridge with the built-in translator pairs installed.
    #[must_use]
    pub fn new() -> Self {
        let bridge = Self {
            table: ArcSwap::from_pointee(Table::new()),
        };
        bridge.install_builtins();
        bridge
    }

    /// Register (or replace) a custom translator for a protocol pair.
    pub fn register(
        &self,
        from: Protocol,
        to: Protocol,
        request: RequestFn,
        response: ResponseFn,
    ) {
        let mut table: Table = (**self.table.load()).clone();
        table.insert((from, to), Translator { request, response });
        self.table.store(Arc::new(table));
    }

    /// Translate a request between protocols.
    ///
    /// Identity when `from == to`; fails when no translator is registered
    /// for the pair.
    pub fn translate_request(
        &self,
        from: Protocol,
        to: Protocol,
        request: McpRequest,
    ) -> GatewayResult<McpRequest> {
        if from == to {
            return Ok(request);
        }
        let translator = self.lookup(from, to)?;
        let mut out = (translator.request)(request);
        stamp(&mut out.metadata, from, to);
        Ok(out)
    }

    /// Translate a response between protocols.
    pub fn translate_response(
        &self,
        from: Protocol,
        to: Protocol,
        response: McpResponse,
    ) -> GatewayResult<McpResponse> {
        if from == to {
            return Ok(response);
        }
        let translator = self.lookup(from, to)?;
        let mut out = (translator.response)(response);
        stamp(&mut out.meta, from, to);
        Ok(out)
    }

    /// Whether a pair is translatable (identity pairs always are).
    #[must_use]
    pub fn supports(&self, from: Protocol, to: Protocol) -> bool {
        from == to || self.table.load().contains_key(&(from, to))
    }

    fn lookup(&self, from: Protocol, to: Protocol) -> GatewayResult<Translator> {
        self.table
            .load()
            .get(&(from, to))
            .cloned()
            .ok_or_else(|| GatewayError::not_found("translator", format!("{from}->{to}")))
    }

    fn install_builtins(&self) {
        // HTTP <-> gRPC: method name case, grpc-timeout metadata, error
        // code mapping.
        self.register(
            Protocol::Http,
            Protocol::Grpc,
            Arc::new(|mut req| {
                req.method = kebab_to_pascal(&req.method);
                req.metadata
                    .insert("grpc-timeout".to_string(), "30S".to_string());
                req
            }),
            Arc::new(|mut resp| {
                if let Some(error) = &mut resp.error {
                    error.code = http_code_to_grpc(error.code);
                }
                resp
            }),
        );
        self.register(
            Protocol::Grpc,
            Protocol::Http,
            Arc::new(|mut req| {
                req.method = pascal_to_kebab(&req.method);
                req.metadata.remove("grpc-timeout");
                req
            }),
            Arc::new(|mut resp| {
                if let Some(error) = &mut resp.error {
                    error.code = grpc_code_to_http(error.code);
                }
                resp
            }),
        );

        // HTTP <-> SSE: streaming connection metadata; responses toward the
        // SSE side are tagged as response events.
        self.register(
            Protocol::Http,
            Protocol::Sse,
            Arc::new(|mut req| {
                req.metadata
                    .insert("connection".to_string(), "keep-alive".to_string());
                req.metadata
                    .insert("cache-control".to_string(), "no-cache".to_string());
                req
            }),
            Arc::new(|mut resp| {
                resp.meta
                    .insert("event_type".to_string(), "response".to_string());
                resp
            }),
        );
        self.register(
            Protocol::Sse,
            Protocol::Http,
            Arc::new(|mut req| {
                req.metadata.remove("connection");
                req.metadata.remove("cache-control");
                req
            }),
            Arc::new(|mut resp| {
                resp.meta.remove("event_type");
                resp
            }),
        );

        // gRPC <-> SSE: grpc. method prefix; responses from the gRPC side
        // carry a grpc_response tag.
        self.register(
            Protocol::Sse,
            Protocol::Grpc,
            Arc::new(|mut req| {
                if !req.method.starts_with("grpc.") {
                    req.method = format!("grpc.{}", req.method);
                }
                req
            }),
            Arc::new(|mut resp| {
                resp.meta.remove("grpc_response");
                resp
            }),
        );
        self.register(
            Protocol::Grpc,
            Protocol::Sse,
            Arc::new(|mut req| {
                if let Some(stripped) = req.method.strip_prefix("grpc.") {
                    req.method = stripped.to_string();
                }
                req
            }),
            Arc::new(|mut resp| {
                resp.meta
                    .insert("grpc_response".to_string(), "true".to_string());
                resp
            }),
        );

        // StdIO <-> HTTP: json-rpc format marker.
        self.register(
            Protocol::Http,
            Protocol::Stdio,
            Arc::new(|mut req| {
                req.metadata
                    .insert("format".to_string(), "json-rpc".to_string());
                req
            }),
            Arc::new(|mut resp| {
                resp.meta.insert("format".to_string(), "json-rpc".to_string());
                resp
            }),
        );
        self.register(
            Protocol::Stdio,
            Protocol::Http,
            Arc::new(|mut req| {
                req.metadata.remove("format");
                req
            }),
            Arc::new(|mut resp| {
                resp.meta.remove("format");
                resp
            }),
        );
    }
}

fn stamp(metadata: &mut HashMap<String, String>, from: Protocol, to: Protocol) {
    metadata.insert("original_protocol".to_string(), from.as_str().to_string());
    metadata.insert("target_protocol".to_string(), to.as_str().to_string());
    metadata.insert("translated_at".to_string(), Utc::now().to_rfc3339());
}

/// `get-servers` -> `GetServers`
fn kebab_to_pascal(method: &str) -> String {
    method
        .split('-')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

/// `GetServers` -> `get-servers`
fn pascal_to_kebab(method: &str) -> String {
    let mut out = String::with_capacity(method.len() + 4);
    for (i, c) in method.chars().enumerate() {
        if c.is_uppercase() {
            if i > 0 {
                out.push('-');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// gRPC status code to HTTP status.
fn grpc_code_to_http(code: i64) -> i64 {
    match code {
        1 => 499,
        3 => 400,
        5 => 404,
        7 => 403,
        14 => 503,
        _ => 500,
    }
}

/// HTTP status to gRPC status code (inverse of [`grpc_code_to_http`]).
fn http_code_to_grpc(code: i64) -> i64 {
    match code {
        499 => 1,
        400 => 3,
        404 => 5,
        403 => 7,
        503 => 14,
        // UNKNOWN
        _ => 2,
    }
}
