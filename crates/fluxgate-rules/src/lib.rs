//! # Fluxgate Rule Engine
//!
//! Evaluates forwarding rules against events. A rule's conditions AND
//! together (individual conditions can be negated); enabled rules evaluate
//! in descending priority, ties keeping declaration order; the first match
//! per target decides forwarding and supplies the optional transform and
//! rate limit.
//!
//! Field paths address the event's top-level fields, `metadata.<key>`, and
//! `data.*` into the JSON payload. The payload parses lazily, at most once
//! per event evaluation, and the parsed view is shared across every rule
//! examined for that event.

mod fieldpath;
mod transform;

pub use fieldpath::EventView;
pub use transform::apply_transform;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use regex::Regex;
use serde_json::Value;
use tracing::warn;

use fluxgate_types::{ConditionOperator, Event, ForwardingRule, RuleCondition};

/// A rule that matched an event, plus the event to dispatch (transformed
/// when the rule carries a transform).
#[derive(Debug, Clone)]
pub struct RuleMatch {
    /// The matching rule.
    pub rule: ForwardingRule,
    /// Event to deliver; a transformed clone when the rule transforms.
    pub event: Arc<Event>,
}

/// Rule evaluator with a process-wide compiled-regex cache.
#[derive(Debug, Default)]
pub struct RuleEngine {
    // Invalid patterns cache as None so they warn once, not per event.
    regex_cache: Mutex<HashMap<String, Option<Arc<Regex>>>>,
}

impl RuleEngine {
    /// Create a rule engine.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluate a target's rules against an event.
    ///
    /// Returns the first matching rule in priority order, with the
    /// (possibly transformed) event to dispatch.
    pub fn first_match(&self, event: &Arc<Event>, rules: &[ForwardingRule]) -> Option<RuleMatch> {
        let view = EventView::new(event);

        // Stable sort keeps declaration order among equal priorities.
        let mut ordered: Vec<&ForwardingRule> = rules.iter().filter(|r| r.enabled).collect();
        ordered.sort_by_key(|r| std::cmp::Reverse(r.priority));

        for rule in ordered {
            if self.rule_matches(&view, rule) {
                let dispatched = match &rule.transform {
                    Some(transform) => Arc::new(apply_transform(event, transform)),
                    None => Arc::clone(event),
                };
                return Some(RuleMatch {
                    rule: rule.clone(),
                    event: dispatched,
                });
            }
        }
        None
    }

    fn rule_matches(&self, view: &EventView<'_>, rule: &ForwardingRule) -> bool {
        // A rule with no conditions matches everything.
        rule.conditions.iter().all(|condition| {
            let outcome = self.condition_matches(view, condition);
            outcome != condition.negate
        })
    }

    fn condition_matches(&self, view: &EventView<'_>, condition: &RuleCondition) -> bool {
        let Some(field) = view.resolve(&condition.field) else {
            // Missing fields never match; negate turns that into a
            // "field absent" predicate.
            return false;
        };
        self.apply_operator(&field, condition)
    }

    fn apply_operator(&self, field: &Value, condition: &RuleCondition) -> bool {
        let expected = &condition.value;
        match condition.operator {
            ConditionOperator::Eq => json_eq(field, expected),
            ConditionOperator::Ne => !json_eq(field, expected),
            ConditionOperator::Gt => compare(field, expected).is_some_and(|o| o.is_gt()),
            ConditionOperator::Lt => compare(field, expected).is_some_and(|o| o.is_lt()),
            ConditionOperator::Gte => compare(field, expected).is_some_and(|o| o.is_ge()),
            ConditionOperator::Lte => compare(field, expected).is_some_and(|o| o.is_le()),
            ConditionOperator::Contains => contains(field, expected),
            ConditionOperator::Regex => self.regex_matches(field, expected),
            ConditionOperator::In => list_membership(field, expected),
            ConditionOperator::NotIn => {
                expected.is_array() && !list_membership(field, expected)
            }
        }
    }

    fn regex_matches(&self, field: &Value, pattern: &Value) -> bool {
        let (Some(haystack), Some(pattern)) = (field.as_str(), pattern.as_str()) else {
            return false;
        };

        let compiled = {
            let mut cache = self.regex_cache.lock();
            cache
                .entry(pattern.to_string())
                .or_insert_with(|| match Regex::new(pattern) {
                    Ok(re) => Some(Arc::new(re)),
                    Err(err) => {
                        warn!(pattern, %err, "invalid rule regex; condition fails closed");
                        None
                    }
                })
                .clone()
        };

        compiled.is_some_and(|re| re.is_match(haystack))
    }
}

/// JSON equality with numeric coercion: `1` and `1.0` compare equal.
fn json_eq(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

/// Ordering between a field value and a literal.
///
/// Numbers compare numerically, strings by code point; anything else is
/// non-comparable and every ordering operator yields false.
fn compare(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
        return x.partial_cmp(&y);
    }
    if let (Some(x), Some(y)) = (a.as_str(), b.as_str()) {
        return Some(x.cmp(y));
    }
    None
}

/// `contains`: substring for strings, membership for list fields.
fn contains(field: &Value, expected: &Value) -> bool {
    match field {
        Value::String(s) => expected.as_str().is_some_and(|needle| s.contains(needle)),
        Value::Array(items) => items.iter().any(|item| json_eq(item, expected)),
        _ => false,
    }
}

/// `in`: the field value appears in the condition's list.
fn list_membership(field: &Value, expected: &Value) -> bool {
    expected
        .as_array()
        .is_some_and(|list| list.iter().any(|item| json_eq(item, field)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use fluxgate_types::EventTransform;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn event() -> Arc<Event> {
        Arc::new(
            Event::new(
                "e1",
                "order.created",
                "shop",
                r#"{"severity":"high","total":42.5,"items":["a","b"],"nested":{"region":"eu"}}"#,
            )
            .with_metadata("tenant", "acme"),
        )
    }

    fn condition(field: &str, operator: ConditionOperator, value: Value) -> RuleCondition {
        RuleCondition {
            field: field.to_string(),
            operator,
            value,
            negate: false,
        }
    }

    fn rule(id: &str, priority: i32, conditions: Vec<RuleCondition>) -> ForwardingRule {
        ForwardingRule {
            id: id.to_string(),
            name: String::new(),
            enabled: true,
            priority,
            conditions,
            transform: None,
            rate_limit: None,
        }
    }

    #[test]
    fn eq_on_top_level_field() {
        let engine = RuleEngine::new();
        let rules = vec![rule(
            "r1",
            0,
            vec![condition("event_type", ConditionOperator::Eq, json!("order.created"))],
        )];
        assert!(engine.first_match(&event(), &rules).is_some());
    }

    #[test]
    fn eq_coerces_numeric_types() {
        let engine = RuleEngine::new();
        let rules = vec![rule(
            "r1",
            0,
            vec![condition("data.total", ConditionOperator::Eq, json!(42.5))],
        )];
        assert!(engine.first_match(&event(), &rules).is_some());
    }

    #[test]
    fn data_path_resolves_nested_values() {
        let engine = RuleEngine::new();
        let rules = vec![rule(
            "r1",
            0,
            vec![condition(
                "data.nested.region",
                ConditionOperator::Eq,
                json!("eu"),
            )],
        )];
        assert!(engine.first_match(&event(), &rules).is_some());
    }

    #[test]
    fn ordering_operators_are_numeric() {
        let engine = RuleEngine::new();
        let gt = |v| {
            vec![rule(
                "r",
                0,
                vec![condition("data.total", ConditionOperator::Gt, v)],
            )]
        };
        assert!(engine.first_match(&event(), &gt(json!(40))).is_some());
        assert!(engine.first_match(&event(), &gt(json!(42.5))).is_none());
        // Non-comparable types yield false.
        assert!(engine.first_match(&event(), &gt(json!(["x"]))).is_none());
    }

    #[test]
    fn string_ordering_uses_code_points() {
        let engine = RuleEngine::new();
        let rules = vec![rule(
            "r1",
            0,
            vec![condition("source", ConditionOperator::Gte, json!("shop"))],
        )];
        assert!(engine.first_match(&event(), &rules).is_some());
    }

    #[test]
    fn contains_substring_and_list() {
        let engine = RuleEngine::new();
        let substring = vec![rule(
            "r1",
            0,
            vec![condition("event_type", ConditionOperator::Contains, json!("order"))],
        )];
        assert!(engine.first_match(&event(), &substring).is_some());

        let membership = vec![rule(
            "r2",
            0,
            vec![condition("data.items", ConditionOperator::Contains, json!("b"))],
        )];
        assert!(engine.first_match(&event(), &membership).is_some());
    }

    #[test]
    fn in_and_not_in() {
        let engine = RuleEngine::new();
        let included = vec![rule(
            "r1",
            0,
            vec![condition(
                "data.severity",
                ConditionOperator::In,
                json!(["high", "critical"]),
            )],
        )];
        assert!(engine.first_match(&event(), &included).is_some());

        let excluded = vec![rule(
            "r2",
            0,
            vec![condition(
                "data.severity",
                ConditionOperator::NotIn,
                json!(["low", "info"]),
            )],
        )];
        assert!(engine.first_match(&event(), &excluded).is_some());
    }

    #[test]
    fn regex_matches_and_invalid_pattern_fails_closed() {
        let engine = RuleEngine::new();
        let matching = vec![rule(
            "r1",
            0,
            vec![condition("event_type", ConditionOperator::Regex, json!(r"^order\."))],
        )];
        assert!(engine.first_match(&event(), &matching).is_some());

        let invalid = vec![rule(
            "r2",
            0,
            vec![condition("event_type", ConditionOperator::Regex, json!("(unclosed"))],
        )];
        assert!(engine.first_match(&event(), &invalid).is_none());
    }

    #[test]
    fn negate_inverts_a_condition() {
        let engine = RuleEngine::new();
        let mut negated = condition("source", ConditionOperator::Eq, json!("other"));
        negated.negate = true;
        let rules = vec![rule("r1", 0, vec![negated])];
        assert!(engine.first_match(&event(), &rules).is_some());
    }

    #[test]
    fn conditions_and_together() {
        let engine = RuleEngine::new();
        let rules = vec![rule(
            "r1",
            0,
            vec![
                condition("source", ConditionOperator::Eq, json!("shop")),
                condition("data.severity", ConditionOperator::Eq, json!("low")),
            ],
        )];
        assert!(engine.first_match(&event(), &rules).is_none());
    }

    #[test]
    fn higher_priority_wins_and_ties_keep_declaration_order() {
        let engine = RuleEngine::new();
        let anything = Vec::new();
        let rules = vec![
            rule("low", 1, anything.clone()),
            rule("first-tie", 5, anything.clone()),
            rule("second-tie", 5, anything),
        ];
        let matched = engine.first_match(&event(), &rules).unwrap();
        assert_eq!(matched.rule.id, "first-tie");
    }

    #[test]
    fn disabled_rules_are_skipped() {
        let engine = RuleEngine::new();
        let mut disabled = rule("off", 10, Vec::new());
        disabled.enabled = false;
        let rules = vec![disabled, rule("on", 0, Vec::new())];
        assert_eq!(engine.first_match(&event(), &rules).unwrap().rule.id, "on");
    }

    #[test]
    fn missing_field_does_not_match_unless_negated() {
        let engine = RuleEngine::new();
        let rules = vec![rule(
            "r1",
            0,
            vec![condition("data.absent", ConditionOperator::Eq, json!(1))],
        )];
        assert!(engine.first_match(&event(), &rules).is_none());

        let mut negated = condition("data.absent", ConditionOperator::Eq, json!(1));
        negated.negate = true;
        let rules = vec![rule("r2", 0, vec![negated])];
        assert!(engine.first_match(&event(), &rules).is_some());
    }

    #[test]
    fn transform_applies_to_a_clone() {
        let engine = RuleEngine::new();
        let mut transforming = rule("r1", 0, Vec::new());
        transforming.transform = Some(EventTransform {
            add_fields: [("routed".to_string(), json!(true))].into(),
            ..EventTransform::default()
        });
        let original = event();
        let matched = engine.first_match(&original, &[transforming]).unwrap();

        let data: Value = serde_json::from_str(&matched.event.data).unwrap();
        assert_eq!(data["routed"], json!(true));
        // The original event is untouched.
        assert!(!original.data.contains("routed"));
    }
}
