//! The MCP request/response envelope routed between the hub and federated
//! servers.
//!
//! The hub never interprets `method` or `params`; it routes, translates
//! between transports, and returns responses with the originating request id.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A request bound for a federated MCP server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpRequest {
    /// Caller-assigned correlation id; echoed in the response.
    pub id: String,
    /// Method name in the source transport's convention.
    pub method: String,
    /// Method parameters.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub params: HashMap<String, serde_json::Value>,
    /// Transport metadata; the protocol bridge reads and stamps keys here.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

impl McpRequest {
    /// A request with the given id and method and no parameters.
    #[must_use]
    pub fn new(id: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            method: method.into(),
            params: HashMap::new(),
            metadata: HashMap::new(),
        }
    }
}

/// A response from a federated MCP server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpResponse {
    /// Equals the originating request id.
    pub id: String,
    /// Success payload; mutually exclusive with `error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Error payload; mutually exclusive with `result`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RemoteErrorObject>,
    /// Transport metadata; the protocol bridge reads and stamps keys here.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub meta: HashMap<String, String>,
}

impl McpResponse {
    /// A success response carrying `result`.
    #[must_use]
    pub fn ok(id: impl Into<String>, result: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            result: Some(result),
            error: None,
            meta: HashMap::new(),
        }
    }

    /// An error response.
    #[must_use]
    pub fn err(id: impl Into<String>, code: i64, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            result: None,
            error: Some(RemoteErrorObject {
                code,
                message: message.into(),
                data: None,
            }),
            meta: HashMap::new(),
        }
    }

    /// Whether the response carries an error.
    #[must_use]
    pub fn is_err(&self) -> bool {
        self.error.is_some()
    }
}

/// Error object inside an [`McpResponse`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteErrorObject {
    /// Transport-convention error code.
    pub code: i64,
    /// Human-readable message.
    pub message: String,
    /// Optional structured detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn response_echoes_request_id() {
        let req = McpRequest::new("r1", "ping");
        let resp = McpResponse::ok(req.id.clone(), serde_json::json!({"pong": true}));
        assert_eq!(resp.id, req.id);
        assert!(!resp.is_err());
    }

    #[test]
    fn error_response_serializes_without_result() {
        let resp = McpResponse::err("r2", 404, "no such method");
        let json = serde_json::to_string(&resp).unwrap();
        assert!(!json.contains("result"));
        assert!(json.contains("no such method"));
        let back: McpResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(back, resp);
    }

    #[test]
    fn request_tolerates_missing_optional_fields() {
        let req: McpRequest = serde_json::from_str(r#"{"id":"1","method":"ping"}"#).unwrap();
        assert!(req.params.is_empty());
        assert!(req.metadata.is_empty());
    }
}
