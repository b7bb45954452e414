//! Conversions between the native model and the gRPC wire messages.

use std::collections::HashMap;

use fluxgate_types::{Event, GatewayError, GatewayResult, McpRequest, McpResponse, RemoteErrorObject};

use crate::proto;

impl From<Event> for proto::EventRecord {
    fn from(event: Event) -> Self {
        Self {
            event_id: event.event_id,
            event_type: event.event_type,
            source: event.source,
            timestamp: event.timestamp.unwrap_or(0),
            data: event.data,
            metadata: event.metadata,
        }
    }
}

impl From<&Event> for proto::EventRecord {
    fn from(event: &Event) -> Self {
        event.clone().into()
    }
}

impl From<proto::EventRecord> for Event {
    fn from(record: proto::EventRecord) -> Self {
        Self {
            event_id: record.event_id,
            event_type: record.event_type,
            source: record.source,
            timestamp: (record.timestamp != 0).then_some(record.timestamp),
            data: record.data,
            metadata: record.metadata,
        }
    }
}

impl From<McpRequest> for proto::InvokeRequest {
    fn from(request: McpRequest) -> Self {
        let params_json = if request.params.is_empty() {
            String::new()
        } else {
            serde_json::to_string(&request.params).unwrap_or_default()
        };
        Self {
            id: request.id,
            method: request.method,
            params_json,
            metadata: request.metadata,
        }
    }
}

impl TryFrom<proto::InvokeRequest> for McpRequest {
    type Error = GatewayError;

    fn try_from(request: proto::InvokeRequest) -> GatewayResult<Self> {
        let params: HashMap<String, serde_json::Value> = if request.params_json.is_empty() {
            HashMap::new()
        } else {
            serde_json::from_str(&request.params_json)
                .map_err(|e| GatewayError::validation(format!("invoke params: {e}")))?
        };
        Ok(Self {
            id: request.id,
            method: request.method,
            params,
            metadata: request.metadata,
        })
    }
}

impl TryFrom<proto::InvokeResponse> for McpResponse {
    type Error = GatewayError;

    fn try_from(response: proto::InvokeResponse) -> GatewayResult<Self> {
        let result = response
            .result_json
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| GatewayError::validation(format!("invoke result: {e}")))?;

        let error = response
            .error
            .map(|detail| {
                let data = detail
                    .data_json
                    .as_deref()
                    .filter(|s| !s.is_empty())
                    .map(serde_json::from_str)
                    .transpose()
                    .map_err(|e| GatewayError::validation(format!("invoke error data: {e}")))?;
                Ok::<_, GatewayError>(RemoteErrorObject {
                    code: detail.code,
                    message: detail.message,
                    data,
                })
            })
            .transpose()?;

        Ok(Self {
            id: response.id,
            result,
            error,
            meta: response.meta,
        })
    }
}

impl From<McpResponse> for proto::InvokeResponse {
    fn from(response: McpResponse) -> Self {
        Self {
            id: response.id,
            result_json: response.result.map(|v| v.to_string()),
            error: response.error.map(|e| proto::ErrorDetail {
                code: e.code,
                message: e.message,
                data_json: e.data.map(|v| v.to_string()),
            }),
            meta: response.meta,
        }
    }
}
