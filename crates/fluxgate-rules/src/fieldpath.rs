//! Dotted-path access into an event.
//!
//! The first segment selects a top-level field; `metadata.<key>` reads the
//! metadata map; `data.*` walks the JSON payload, which parses lazily at
//! most once per [`EventView`] and is shared across every rule evaluated
//! for that event.

use std::cell::OnceCell;

use serde_json::Value;

use fluxgate_types::Event;

/// A per-evaluation view over one event.
#[derive(Debug)]
pub struct EventView<'a> {
    event: &'a Event,
    // None caches a payload that failed to parse, so the parse attempt
    // happens once even when many rules probe data.*.
    payload: OnceCell<Option<Value>>,
}

impl<'a> EventView<'a> {
    /// Create a view; no parsing happens until a `data.*` path is resolved.
    #[must_use]
    pub fn new(event: &'a Event) -> Self {
        Self {
            event,
            payload: OnceCell::new(),
        }
    }

    /// Resolve a dotted path to a JSON value.
    ///
    /// Returns `None` for unknown fields, absent metadata keys, unparseable
    /// payloads, and paths that walk off the payload structure.
    #[must_use]
    pub fn resolve(&self, path: &str) -> Option<Value> {
        let (head, rest) = match path.split_once('.') {
            Some((head, rest)) => (head, Some(rest)),
            None => (path, None),
        };

        match head {
            "event_id" => rest.is_none().then(|| Value::String(self.event.event_id.clone())),
            "event_type" => rest
                .is_none()
                .then(|| Value::String(self.event.event_type.clone())),
            "source" => rest.is_none().then(|| Value::String(self.event.source.clone())),
            "timestamp" => rest
                .is_none()
                .then(|| self.event.timestamp.map(Value::from))
                .flatten(),
            "data" => match rest {
                // Bare `data` exposes the raw payload string.
                None => Some(Value::String(self.event.data.clone())),
                Some(rest) => walk(self.payload()?, rest).cloned(),
            },
            "metadata" => {
                let key = rest?;
                self.event
                    .metadata
                    .get(key)
                    .map(|v| Value::String(v.clone()))
            }
            _ => None,
        }
    }

    fn payload(&self) -> Option<&Value> {
        self.payload
            .get_or_init(|| serde_json::from_str(&self.event.data).ok())
            .as_ref()
    }
}

/// Walk a dotted path through objects and numeric array indexes.
fn walk<'v>(mut current: &'v Value, path: &str) -> Option<&'v Value> {
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}
