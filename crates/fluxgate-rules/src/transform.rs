//! Event transforms: payload field edits and template substitution.

use serde_json::Value;
use tracing::warn;

use crate::fieldpath::EventView;
use fluxgate_types::{Event, EventTransform};

/// Apply a transform to a clone of `event`.
///
/// Field operations (`add_fields`, `remove_fields`, `rename_fields`) edit
/// the JSON payload object; they are skipped with a warning when the payload
/// is not an object. A `template` replaces the payload entirely, with
/// `{{dotted.path}}` placeholders resolved against the original event. The
/// reserved `script` field is ignored.
#[must_use]
pub fn apply_transform(event: &Event, transform: &EventTransform) -> Event {
    let mut out = event.clone();

    if !transform.add_fields.is_empty()
        || !transform.remove_fields.is_empty()
        || !transform.rename_fields.is_empty()
    {
        match serde_json::from_str::<Value>(&out.data) {
            Ok(Value::Object(mut map)) => {
                for (key, value) in &transform.add_fields {
                    map.insert(key.clone(), value.clone());
                }
                for path in &transform.remove_fields {
                    remove_path(&mut map, path);
                }
                for (old, new) in &transform.rename_fields {
                    if let Some(value) = map.remove(old) {
                        map.insert(new.clone(), value);
                    }
                }
                out.data = Value::Object(map).to_string();
            }
            _ => {
                warn!(
                    event_id = %event.event_id,
                    "transform field edits skipped: payload is not a JSON object"
                );
            }
        }
    }

    if let Some(template) = &transform.template {
        out.data = render_template(event, template);
    }

    out
}

/// Remove a dotted path from a payload object.
fn remove_path(map: &mut serde_json::Map<String, Value>, path: &str) {
    match path.split_once('.') {
        None => {
            map.remove(path);
        }
        Some((head, rest)) => {
            // Walk to the parent of the final segment.
            let (parent_path, leaf) = match rest.rsplit_once('.') {
                None => (None, rest),
                Some((mid, leaf)) => (Some(mid), leaf),
            };
            let Some(head_value) = map.get_mut(head) else {
                return;
            };
            let parent = match parent_path {
                None => Some(head_value),
                Some(mid) => walk_mut(head_value, mid),
            };
            if let Some(Value::Object(obj)) = parent {
                obj.remove(leaf);
            }
        }
    }
}

fn walk_mut<'v>(mut current: &'v mut Value, path: &str) -> Option<&'v mut Value> {
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get_mut(segment)?,
            Value::Array(items) => items.get_mut(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Substitute `{{dotted.path}}` placeholders against the original event.
///
/// Unresolvable placeholders render as empty strings; string values
/// substitute unquoted, other values as their JSON encoding.
fn render_template(event: &Event, template: &str) -> String {
    let view = EventView::new(event);
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let path = after[..end].trim();
                match view.resolve(path) {
                    Some(Value::String(s)) => out.push_str(&s),
                    Some(value) => out.push_str(&value.to_string()),
                    None => {}
                }
                rest = &after[end + 2..];
            }
            None => {
                // Unterminated placeholder; emit verbatim.
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn event() -> Event {
        Event::new(
            "e1",
            "order.created",
            "shop",
            r#"{"severity":"high","nested":{"keep":1,"drop":2}}"#,
        )
    }

    #[test]
    fn add_remove_rename_fields() {
        let transform = EventTransform {
            add_fields: [("added".to_string(), json!(7))].into(),
            remove_fields: vec!["nested.drop".to_string()],
            rename_fields: [("severity".to_string(), "level".to_string())].into(),
            template: None,
            script: None,
        };
        let out = apply_transform(&event(), &transform);
        let data: Value = serde_json::from_str(&out.data).unwrap();
        assert_eq!(data["added"], json!(7));
        assert_eq!(data["level"], json!("high"));
        assert!(data.get("severity").is_none());
        assert_eq!(data["nested"], json!({"keep": 1}));
    }

    #[test]
    fn remove_top_level_field() {
        let transform = EventTransform {
            remove_fields: vec!["severity".to_string()],
            ..EventTransform::default()
        };
        let out = apply_transform(&event(), &transform);
        let data: Value = serde_json::from_str(&out.data).unwrap();
        assert!(data.get("severity").is_none());
    }

    #[test]
    fn non_object_payload_skips_field_edits() {
        let source = Event::new("e1", "t", "s", "[1,2,3]");
        let transform = EventTransform {
            add_fields: [("x".to_string(), json!(1))].into(),
            ..EventTransform::default()
        };
        let out = apply_transform(&source, &transform);
        assert_eq!(out.data, "[1,2,3]");
    }

    #[test]
    fn template_replaces_payload() {
        let transform = EventTransform {
            template: Some(r#"{"kind":"{{event_type}}","sev":"{{data.severity}}"}"#.to_string()),
            ..EventTransform::default()
        };
        let out = apply_transform(&event(), &transform);
        let data: Value = serde_json::from_str(&out.data).unwrap();
        assert_eq!(data, json!({"kind": "order.created", "sev": "high"}));
    }

    #[test]
    fn template_renders_missing_paths_empty() {
        let transform = EventTransform {
            template: Some("[{{data.absent}}]".to_string()),
            ..EventTransform::default()
        };
        let out = apply_transform(&event(), &transform);
        assert_eq!(out.data, "[]");
    }

    #[test]
    fn template_handles_unterminated_placeholder() {
        let transform = EventTransform {
            template: Some("x{{event_id".to_string()),
            ..EventTransform::default()
        };
        let out = apply_transform(&event(), &transform);
        assert_eq!(out.data, "x{{event_id");
    }

    #[test]
    fn empty_transform_is_identity() {
        let out = apply_transform(&event(), &EventTransform::default());
        assert_eq!(out, event());
    }
}
