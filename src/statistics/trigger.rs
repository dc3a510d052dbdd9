//! Transports and trigger identity.
//!
//! A trigger is the upstream stream that backs client subscriptions. Two
//! subscriptions share a trigger when their [`TriggerKey`]s are equal. The
//! key never includes the client transport: a WebSocket and an SSE client
//! subscribed to the same Kafka topic share one trigger.

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeSet;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How a connection reaches the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    WebSocket,
    Sse,
    Kafka,
    Nats,
    Redis,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::WebSocket => "websocket",
            TransportKind::Sse => "sse",
            TransportKind::Kafka => "kafka",
            TransportKind::Nats => "nats",
            TransportKind::Redis => "redis",
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Broker of an event-driven subgraph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventProvider {
    Kafka,
    Nats,
    Redis,
}

impl From<EventProvider> for TransportKind {
    fn from(provider: EventProvider) -> Self {
        match provider {
            EventProvider::Kafka => TransportKind::Kafka,
            EventProvider::Nats => TransportKind::Nats,
            EventProvider::Redis => TransportKind::Redis,
        }
    }
}

/// What a subscription listens to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggerSource {
    /// A subscription forwarded to a GraphQL subgraph.
    Subgraph {
        name: String,
        /// Hash of the normalized subgraph operation.
        operation_hash: u64,
        #[serde(default)]
        variables: Value,
    },
    /// Topics, subjects or channels of an event broker.
    Event {
        provider: EventProvider,
        provider_id: String,
        subjects: Vec<String>,
        #[serde(default)]
        arguments: Value,
    },
}

impl TriggerSource {
    pub fn subgraph(name: impl Into<String>, operation_hash: u64, variables: Value) -> Self {
        TriggerSource::Subgraph {
            name: name.into(),
            operation_hash,
            variables,
        }
    }

    pub fn event<S: Into<String>>(
        provider: EventProvider,
        provider_id: impl Into<String>,
        subjects: impl IntoIterator<Item = S>,
    ) -> Self {
        TriggerSource::Event {
            provider,
            provider_id: provider_id.into(),
            subjects: subjects.into_iter().map(Into::into).collect(),
            arguments: Value::Null,
        }
    }

    pub fn with_arguments(mut self, value: Value) -> Self {
        match &mut self {
            TriggerSource::Subgraph { variables, .. } => *variables = value,
            TriggerSource::Event { arguments, .. } => *arguments = value,
        }
        self
    }

    /// Deduplication key. Subject order and duplicates do not matter.
    pub fn key(&self) -> TriggerKey {
        let mut hasher = DefaultHasher::new();
        match self {
            TriggerSource::Subgraph {
                name,
                operation_hash,
                variables,
            } => {
                "subgraph".hash(&mut hasher);
                name.hash(&mut hasher);
                operation_hash.hash(&mut hasher);
                canonical_json(variables).hash(&mut hasher);
            }
            TriggerSource::Event {
                provider,
                provider_id,
                subjects,
                arguments,
            } => {
                "event".hash(&mut hasher);
                provider.hash(&mut hasher);
                provider_id.hash(&mut hasher);
                let subjects: BTreeSet<&str> = subjects.iter().map(String::as_str).collect();
                subjects.hash(&mut hasher);
                canonical_json(arguments).hash(&mut hasher);
            }
        }
        TriggerKey(hasher.finish())
    }
}

/// serde_json maps are ordered, so serialization is canonical.
fn canonical_json(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Identity of a deduplicated trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TriggerKey(u64);

impl TriggerKey {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for TriggerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "trigger-{:016x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn subject_order_does_not_matter() {
        let a = TriggerSource::event(
            EventProvider::Nats,
            "default",
            ["employeeUpdated.1", "employeeUpdated.2"],
        );
        let b = TriggerSource::event(
            EventProvider::Nats,
            "default",
            ["employeeUpdated.2", "employeeUpdated.1", "employeeUpdated.1"],
        );
        assert_eq!(a.key(), b.key());
    }

    #[test]
    fn provider_and_arguments_are_part_of_key() {
        let kafka = TriggerSource::event(EventProvider::Kafka, "my-kafka", ["employeeUpdated"]);
        let redis = TriggerSource::event(EventProvider::Redis, "my-kafka", ["employeeUpdated"]);
        assert_ne!(kafka.key(), redis.key());

        let other_instance =
            TriggerSource::event(EventProvider::Kafka, "other", ["employeeUpdated"]);
        assert_ne!(kafka.key(), other_instance.key());

        let filtered = kafka.clone().with_arguments(json!({"id": 1}));
        assert_ne!(kafka.key(), filtered.key());
    }

    #[test]
    fn variable_object_key_order_does_not_matter() {
        let a = TriggerSource::subgraph("employees", 7, json!({"a": 1, "b": 2}));
        let b = TriggerSource::subgraph("employees", 7, json!({"b": 2, "a": 1}));
        assert_eq!(a.key(), b.key());
        assert_ne!(a.key(), TriggerSource::subgraph("employees", 8, json!({"a": 1, "b": 2})).key());
    }

    #[test]
    fn event_providers_map_to_transports() {
        assert_eq!(TransportKind::from(EventProvider::Kafka), TransportKind::Kafka);
        assert_eq!(TransportKind::from(EventProvider::Redis).as_str(), "redis");
    }
}
