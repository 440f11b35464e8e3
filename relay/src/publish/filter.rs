use std::collections::HashSet;

use crate::types::PublishedEvent;

/// Side-effect-free predicate deciding whether an event is published.
///
/// Evaluated for every converted event before any broker call; a rejected
/// event is skipped at the record level, never treated as a failure.
pub trait PublishingFilter: Send + Sync {
    /// Returns true when the event should be published.
    fn accepts(&self, event: &PublishedEvent) -> bool;
}

/// Filter that accepts every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl PublishingFilter for AcceptAll {
    fn accepts(&self, _event: &PublishedEvent) -> bool {
        true
    }
}

/// Filter that accepts only events derived from an allow-listed source table.
///
/// Useful for log-based sources, where the transaction log carries entries
/// for every table in the database and only outbox tables should be relayed.
#[derive(Debug, Clone)]
pub struct SourceTableFilter {
    tables: HashSet<String>,
}

impl SourceTableFilter {
    /// Creates a filter accepting events from the given tables.
    pub fn new<I, S>(tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tables: tables.into_iter().map(Into::into).collect(),
        }
    }
}

impl PublishingFilter for SourceTableFilter {
    fn accepts(&self, event: &PublishedEvent) -> bool {
        event
            .source_table()
            .is_some_and(|table| self.tables.contains(table))
    }
}

/// Filter that accepts only events of allow-listed aggregate types.
#[derive(Debug, Clone)]
pub struct AggregateTypeFilter {
    aggregate_types: HashSet<String>,
}

impl AggregateTypeFilter {
    /// Creates a filter accepting events of the given aggregate types.
    pub fn new<I, S>(aggregate_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            aggregate_types: aggregate_types.into_iter().map(Into::into).collect(),
        }
    }
}

impl PublishingFilter for AggregateTypeFilter {
    fn accepts(&self, event: &PublishedEvent) -> bool {
        self.aggregate_types.contains(&event.aggregate_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SourcePosition;

    fn event_from(table: &str, aggregate_type: &str) -> PublishedEvent {
        let mut metadata = std::collections::HashMap::new();
        metadata.insert(
            PublishedEvent::SOURCE_TABLE_METADATA_KEY.to_string(),
            table.to_string(),
        );

        PublishedEvent {
            id: "1".to_string(),
            aggregate_type: aggregate_type.to_string(),
            aggregate_id: "a".to_string(),
            event_type: "Created".to_string(),
            payload: "{}".to_string(),
            metadata,
            position: SourcePosition::LogOffset(1),
        }
    }

    #[test]
    fn source_table_filter_rejects_other_tables() {
        let filter = SourceTableFilter::new(["events"]);

        assert!(filter.accepts(&event_from("events", "Order")));
        assert!(!filter.accepts(&event_from("other_table", "Order")));
    }

    #[test]
    fn aggregate_type_filter_rejects_other_aggregates() {
        let filter = AggregateTypeFilter::new(["Order"]);

        assert!(filter.accepts(&event_from("events", "Order")));
        assert!(!filter.accepts(&event_from("events", "Customer")));
    }
}
