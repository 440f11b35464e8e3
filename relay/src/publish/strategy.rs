use serde::Serialize;

use crate::types::PublishedEvent;

/// One broker destination for an event.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicTarget {
    /// Topic the event is published to.
    pub topic: String,
    /// Partition key; the broker guarantees ordered delivery per key.
    pub key: String,
}

/// Decides destinations and wire envelope for accepted events.
///
/// Injected per pipeline so that different source technologies can share the
/// relay loop while customizing routing.
pub trait PublishingStrategy: Send + Sync {
    /// Returns the destinations the event is published to, in publish order.
    fn destinations_for(&self, event: &PublishedEvent) -> Vec<TopicTarget>;

    /// Shapes the wire-level envelope for the event.
    fn envelope(&self, event: &PublishedEvent) -> serde_json::Value;
}

/// Envelope written to the broker by [`AggregateTopicStrategy`].
#[derive(Debug, Serialize)]
struct EventEnvelope<'a> {
    id: &'a str,
    #[serde(rename = "entityType")]
    aggregate_type: &'a str,
    #[serde(rename = "entityId")]
    aggregate_id: &'a str,
    #[serde(rename = "eventType")]
    event_type: &'a str,
    #[serde(rename = "eventData")]
    payload: &'a str,
    metadata: &'a std::collections::HashMap<String, String>,
}

/// Default strategy: one destination per event, topic named after the
/// aggregate type and keyed by the aggregate id.
///
/// Keying by aggregate id keeps all events of one aggregate on one partition,
/// which is what preserves their relative order downstream.
#[derive(Debug, Clone, Default)]
pub struct AggregateTopicStrategy {
    /// Optional prefix prepended to every topic name.
    topic_prefix: Option<String>,
}

impl AggregateTopicStrategy {
    /// Creates a strategy without a topic prefix.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a strategy that prefixes every topic with `prefix`.
    pub fn with_topic_prefix(prefix: impl Into<String>) -> Self {
        Self {
            topic_prefix: Some(prefix.into()),
        }
    }
}

impl PublishingStrategy for AggregateTopicStrategy {
    fn destinations_for(&self, event: &PublishedEvent) -> Vec<TopicTarget> {
        let topic = match &self.topic_prefix {
            Some(prefix) => format!("{prefix}{}", event.aggregate_type),
            None => event.aggregate_type.clone(),
        };

        vec![TopicTarget {
            topic,
            key: event.aggregate_id.clone(),
        }]
    }

    fn envelope(&self, event: &PublishedEvent) -> serde_json::Value {
        serde_json::to_value(EventEnvelope {
            id: &event.id,
            aggregate_type: &event.aggregate_type,
            aggregate_id: &event.aggregate_id,
            event_type: &event.event_type,
            payload: &event.payload,
            metadata: &event.metadata,
        })
        // Serialization of a struct of strings cannot fail.
        .unwrap_or(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SourcePosition;

    fn order_event() -> PublishedEvent {
        PublishedEvent {
            id: "10".to_string(),
            aggregate_type: "Order".to_string(),
            aggregate_id: "order-7".to_string(),
            event_type: "OrderCreated".to_string(),
            payload: "{}".to_string(),
            metadata: Default::default(),
            position: SourcePosition::RowId(10),
        }
    }

    #[test]
    fn routes_to_aggregate_topic_keyed_by_aggregate_id() {
        let strategy = AggregateTopicStrategy::new();
        let targets = strategy.destinations_for(&order_event());

        assert_eq!(
            targets,
            vec![TopicTarget {
                topic: "Order".to_string(),
                key: "order-7".to_string(),
            }]
        );
    }

    #[test]
    fn topic_prefix_is_applied() {
        let strategy = AggregateTopicStrategy::with_topic_prefix("cdc.");
        let targets = strategy.destinations_for(&order_event());

        assert_eq!(targets[0].topic, "cdc.Order");
    }

    #[test]
    fn envelope_carries_the_event_fields() {
        let strategy = AggregateTopicStrategy::new();
        let envelope = strategy.envelope(&order_event());

        assert_eq!(envelope["id"], "10");
        assert_eq!(envelope["eventType"], "OrderCreated");
        assert_eq!(envelope["entityId"], "order-7");
    }
}
