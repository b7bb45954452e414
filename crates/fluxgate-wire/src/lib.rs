//! # Fluxgate Wire Format Codecs
//!
//! Encoding/decoding for events on the wire. Two formats are supported:
//!
//! - **JSON** - the HTTP ingestion format and the stream transport's text
//!   frames
//! - **MessagePack** - the stream transport's binary frames
//!
//! [`EventCodec`] layers gateway validation on top of the raw codecs: the
//! required-field check and the [`MAX_EVENT_SIZE`] limit, applied on both
//! encode and decode. Batch payloads decode lazily element-by-element so one
//! bad element fails that element only.

use serde::{Serialize, de::DeserializeOwned};

use fluxgate_types::event::reason;
use fluxgate_types::{Event, MAX_EVENT_SIZE};

mod streaming;

pub use streaming::StreamingJsonDecoder;

/// Wire codec error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecError {
    /// Error message.
    pub message: String,
    /// Machine-usable reason token when the failure maps to one.
    pub reason: Option<&'static str>,
}

impl std::fmt::Display for CodecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "codec error: {}", self.message)
    }
}

impl std::error::Error for CodecError {}

impl CodecError {
    /// Create a new codec error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            reason: None,
        }
    }

    /// Create an encoding error.
    pub fn encode(message: impl Into<String>) -> Self {
        Self::new(format!("encode: {}", message.into()))
    }

    /// Create a decoding error.
    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(format!("decode: {}", message.into()))
    }

    /// Attach a machine-usable reason token.
    #[must_use]
    pub fn with_reason(mut self, reason: &'static str) -> Self {
        self.reason = Some(reason);
        self
    }
}

impl From<CodecError> for fluxgate_types::GatewayError {
    fn from(err: CodecError) -> Self {
        Self::validation(err.message)
    }
}

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Serialization format trait.
///
/// Implemented by [`JsonCodec`] and [`MsgPackCodec`]; both produce the same
/// logical record, differing only in framing.
pub trait Codec: Send + Sync {
    /// Encode a value to bytes.
    fn encode<T: Serialize>(&self, value: &T) -> CodecResult<Vec<u8>>;

    /// Decode bytes to a value.
    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> CodecResult<T>;

    /// Content type advertised for this codec.
    fn content_type(&self) -> &'static str;

    /// Codec name for logs.
    fn name(&self) -> &'static str;
}

/// JSON codec using serde_json.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl JsonCodec {
    /// Create a new JSON codec.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> CodecResult<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| CodecError::encode(e.to_string()))
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> CodecResult<T> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::decode(e.to_string()))
    }

    fn content_type(&self) -> &'static str {
        "application/json"
    }

    fn name(&self) -> &'static str {
        "json"
    }
}

/// MessagePack binary codec.
///
/// Named serialization so optional fields with `skip_serializing_if`
/// roundtrip correctly.
#[derive(Debug, Clone, Copy, Default)]
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Create a new MessagePack codec.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Codec for MsgPackCodec {
    fn encode<T: Serialize>(&self, value: &T) -> CodecResult<Vec<u8>> {
        rmp_serde::to_vec_named(value).map_err(|e| CodecError::encode(e.to_string()))
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> CodecResult<T> {
        rmp_serde::from_slice(bytes).map_err(|e| CodecError::decode(e.to_string()))
    }

    fn content_type(&self) -> &'static str {
        "application/msgpack"
    }

    fn name(&self) -> &'static str {
        "msgpack"
    }
}

/// Outcome of decoding one element of a batch payload.
pub type ElementResult = Result<Event, ElementError>;

/// Per-element decode/validation failure inside a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementError {
    /// Zero-based position in the batch array.
    pub index: usize,
    /// The element's `event_id` when one could be extracted.
    pub event_id: String,
    /// Machine-usable reason token.
    pub reason: &'static str,
}

/// Event codec with gateway validation.
///
/// Wraps a raw [`Codec`] and enforces the required-field and size invariants
/// on every event that crosses the wire, in either direction.
#[derive(Debug, Clone, Copy)]
pub struct EventCodec<C> {
    inner: C,
    max_size: usize,
}

impl Default for EventCodec<JsonCodec> {
    fn default() -> Self {
        Self::json()
    }
}

impl EventCodec<JsonCodec> {
    /// Event codec over JSON with the default size limit.
    #[must_use]
    pub fn json() -> Self {
        Self::new(JsonCodec)
    }
}

impl EventCodec<MsgPackCodec> {
    /// Event codec over MessagePack with the default size limit.
    #[must_use]
    pub fn msgpack() -> Self {
        Self::new(MsgPackCodec)
    }
}

impl<C: Codec> EventCodec<C> {
    /// Wrap a raw codec with the default [`MAX_EVENT_SIZE`] limit.
    #[must_use]
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            max_size: MAX_EVENT_SIZE,
        }
    }

    /// Override the size limit (tests and embedded deployments).
    #[must_use]
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    /// The configured size limit in bytes.
    #[must_use]
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Encode a validated event.
    pub fn encode(&self, event: &Event) -> CodecResult<Vec<u8>> {
        event
            .validate()
            .map_err(|r| CodecError::encode(r).with_reason(r))?;
        let bytes = self.inner.encode(event)?;
        if bytes.len() > self.max_size {
            return Err(CodecError::encode(format!(
                "event {} too large: {} bytes exceeds limit of {}",
                event.event_id,
                bytes.len(),
                self.max_size
            ))
            .with_reason(reason::EVENT_TOO_LARGE));
        }
        Ok(bytes)
    }

    /// Decode and validate a single event.
    pub fn decode(&self, bytes: &[u8]) -> CodecResult<Event> {
        if bytes.len() > self.max_size {
            return Err(CodecError::decode(format!(
                "event too large: {} bytes exceeds limit of {}",
                bytes.len(),
                self.max_size
            ))
            .with_reason(reason::EVENT_TOO_LARGE));
        }
        let event: Event = self.inner.decode(bytes)?;
        event
            .validate()
            .map_err(|r| CodecError::decode(r).with_reason(r))?;
        Ok(event)
    }
}

impl EventCodec<JsonCodec> {
    /// Decode a JSON batch array element-by-element.
    ///
    /// The envelope must be a JSON array; each element decodes and validates
    /// independently, so a malformed or invalid element yields an
    /// [`ElementError`] in its slot without failing its neighbors.
    pub fn decode_batch(&self, bytes: &[u8]) -> CodecResult<Vec<ElementResult>> {
        let elements: Vec<&serde_json::value::RawValue> = serde_json::from_slice(bytes)
            .map_err(|e| CodecError::decode(format!("batch envelope: {e}")))?;
        Ok(elements
            .into_iter()
            .enumerate()
            .map(|(index, raw)| self.decode_element(index, raw))
            .collect())
    }

    fn decode_element(&self, index: usize, raw: &serde_json::value::RawValue) -> ElementResult {
        let text = raw.get();
        // Best-effort id extraction so rejected elements still identify
        // themselves in the per-element result.
        let event_id = serde_json::from_str::<serde_json::Value>(text)
            .ok()
            .and_then(|v| v.get("event_id").and_then(|id| id.as_str().map(String::from)))
            .unwrap_or_default();
        match self.decode(text.as_bytes()) {
            Ok(event) => Ok(event),
            Err(err) => Err(ElementError {
                index,
                event_id,
                reason: err.reason.unwrap_or(reason::MALFORMED_EVENT),
            }),
        }
    }
}
