//! Forwarding targets, rules, conditions, and transforms.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::federation::AuthConfig;

/// Sink kind. Known kinds carry dedicated clients; unknown kinds are kept
/// verbatim so a custom client factory can claim them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TargetKind {
    /// HTTP webhook (accepts the alias `http`).
    Webhook,
    /// gRPC sink over a long-lived channel.
    Grpc,
    /// Kafka-style sink via a batching REST producer.
    Kafka,
    /// Argo Events webhook event source.
    ArgoEvents,
    /// Any other kind; requires a registered client factory.
    Custom(String),
}

impl From<String> for TargetKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "webhook" | "http" => Self::Webhook,
            "grpc" => Self::Grpc,
            "kafka" => Self::Kafka,
            "argo-events" => Self::ArgoEvents,
            _ => Self::Custom(s),
        }
    }
}

impl From<TargetKind> for String {
    fn from(kind: TargetKind) -> Self {
        kind.as_str().to_string()
    }
}

impl TargetKind {
    /// Wire name of the kind.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Webhook => "webhook",
            Self::Grpc => "grpc",
            Self::Kafka => "kafka",
            Self::ArgoEvents => "argo-events",
            Self::Custom(s) => s,
        }
    }
}

impl std::fmt::Display for TargetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A downstream sink plus the rules that route events into it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForwardingTarget {
    /// Unique target id.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Sink kind.
    #[serde(rename = "type")]
    pub kind: TargetKind,
    /// Kind-specific address (URL for HTTP-family sinks, host:port for gRPC).
    pub endpoint: String,
    /// Delivery configuration.
    #[serde(default)]
    pub config: TargetConfig,
    /// Ordered forwarding rules.
    #[serde(default)]
    pub rules: Vec<ForwardingRule>,
}

/// Per-target delivery configuration. All durations are milliseconds on the
/// wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Per-send timeout.
    #[serde(default = "defaults::timeout_ms")]
    pub timeout_ms: u64,
    /// Retry attempts after the initial send.
    #[serde(default = "defaults::retry_attempts")]
    pub retry_attempts: u32,
    /// Initial retry backoff; doubles per attempt.
    #[serde(default = "defaults::retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Optional URL probed while the target circuit is recovering.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check_url: Option<String>,
    /// Extra headers for HTTP-family sinks.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
    /// Sink credentials.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthConfig>,
    /// Events per batch; 1 disables batching.
    #[serde(default = "defaults::batch_size")]
    pub batch_size: usize,
    /// Flush age for a partial batch.
    #[serde(default = "defaults::batch_timeout_ms")]
    pub batch_timeout_ms: u64,
}

mod defaults {
    pub(super) fn timeout_ms() -> u64 {
        30_000
    }
    pub(super) fn retry_attempts() -> u32 {
        3
    }
    pub(super) fn retry_delay_ms() -> u64 {
        500
    }
    pub(super) fn batch_size() -> usize {
        1
    }
    pub(super) fn batch_timeout_ms() -> u64 {
        1_000
    }
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            timeout_ms: defaults::timeout_ms(),
            retry_attempts: defaults::retry_attempts(),
            retry_delay_ms: defaults::retry_delay_ms(),
            health_check_url: None,
            headers: HashMap::new(),
            auth: None,
            batch_size: defaults::batch_size(),
            batch_timeout_ms: defaults::batch_timeout_ms(),
        }
    }
}

impl TargetConfig {
    /// Per-send timeout as a [`Duration`].
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Initial retry delay as a [`Duration`].
    #[must_use]
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Batch flush age as a [`Duration`].
    #[must_use]
    pub fn batch_timeout(&self) -> Duration {
        Duration::from_millis(self.batch_timeout_ms)
    }

    /// Whether batching is enabled for this target.
    #[must_use]
    pub fn batching(&self) -> bool {
        self.batch_size > 1
    }
}

/// A routing rule: predicate, optional transform, optional rate limit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForwardingRule {
    /// Rule id, unique within its target.
    pub id: String,
    /// Human-readable name.
    #[serde(default)]
    pub name: String,
    /// Disabled rules are skipped entirely.
    #[serde(default = "enabled_default")]
    pub enabled: bool,
    /// Higher priority evaluates first; ties keep declaration order.
    #[serde(default)]
    pub priority: i32,
    /// Conditions, AND-joined (`negate` inverts an individual condition).
    #[serde(default)]
    pub conditions: Vec<RuleCondition>,
    /// Applied to a clone of the event before dispatch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<EventTransform>,
    /// Token-bucket pacing for matches of this rule.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitSpec>,
}

fn enabled_default() -> bool {
    true
}

/// A single predicate over an event field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleCondition {
    /// Dotted path: a top-level field, `metadata.key`, or `data.*` into the
    /// JSON payload.
    pub field: String,
    /// Comparison operator.
    pub operator: ConditionOperator,
    /// Operator-typed literal.
    pub value: serde_json::Value,
    /// Invert the condition's outcome.
    #[serde(default)]
    pub negate: bool,
}

/// Condition operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    /// JSON equality with numeric coercion.
    Eq,
    /// Negated [`ConditionOperator::Eq`].
    Ne,
    /// Strictly greater.
    Gt,
    /// Strictly less.
    Lt,
    /// Greater or equal.
    Gte,
    /// Less or equal.
    Lte,
    /// Substring for strings, membership for lists.
    Contains,
    /// Regular-expression match; invalid patterns fail closed.
    Regex,
    /// Field value is a member of the condition's list.
    In,
    /// Field value is not a member of the condition's list.
    NotIn,
}

/// Mutations applied to a cloned event when its rule matches.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventTransform {
    /// Fields merged into the `data` payload object.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub add_fields: HashMap<String, serde_json::Value>,
    /// Dotted paths removed from the payload.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remove_fields: Vec<String>,
    /// Payload fields renamed old -> new.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub rename_fields: HashMap<String, String>,
    /// Replacement payload with `{{dotted.path}}` substitution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    /// Reserved; accepted but not executed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
}

/// Token-bucket rate limit attached to a rule.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateLimitSpec {
    /// Sustained rate.
    pub requests_per_second: f64,
    /// Bucket capacity: immediate passes before pacing kicks in.
    pub burst: u32,
}
