//! Conversion of raw change records into canonical published events.

use std::collections::HashMap;

use crate::error::{ErrorKind, RelayResult};
use crate::relay_error;
use crate::types::{ChangeRecord, PublishedEvent};

/// Maps a raw change record into a canonical [`PublishedEvent`].
///
/// Implementations must be pure and deterministic: the same record always
/// produces the same event id and ordering key. Converters never perform I/O;
/// they only shape payload and metadata and derive the id from the source
/// position.
pub trait EventConverter: Send + Sync {
    /// Converts one change record.
    ///
    /// A conversion failure is a per-record error: the capture loop logs it
    /// and skips the record without terminating the stream.
    fn convert(&self, record: &ChangeRecord) -> RelayResult<PublishedEvent>;
}

/// Column names of an outbox-style events table.
#[derive(Debug, Clone)]
pub struct OutboxColumns {
    /// Primary key column carrying the event id.
    pub id: String,
    /// Column carrying the application-level event type.
    pub event_type: String,
    /// Column carrying the serialized event payload.
    pub payload: String,
    /// Column carrying the aggregate type.
    pub aggregate_type: String,
    /// Column carrying the aggregate instance id.
    pub aggregate_id: String,
    /// Column carrying optional string metadata as a JSON object.
    pub metadata: String,
}

impl Default for OutboxColumns {
    fn default() -> Self {
        Self {
            id: "event_id".to_string(),
            event_type: "event_type".to_string(),
            payload: "event_data".to_string(),
            aggregate_type: "entity_type".to_string(),
            aggregate_id: "entity_id".to_string(),
            metadata: "metadata".to_string(),
        }
    }
}

/// Converter for outbox-style events tables.
///
/// Reads the well-known columns of an events table and falls back to
/// table-derived values where a column is absent, so that rows from tables
/// with a different shape still convert and can be routed or rejected by the
/// publishing filter rather than dying here.
#[derive(Debug, Clone, Default)]
pub struct OutboxEventConverter {
    columns: OutboxColumns,
}

impl OutboxEventConverter {
    /// Creates a converter with the default Eventuate-style column names.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a converter with custom column names.
    pub fn with_columns(columns: OutboxColumns) -> Self {
        Self { columns }
    }

    /// Derives the stable event id for a record.
    ///
    /// Prefers the id column; falls back to a position-derived id for sources
    /// whose rows carry no explicit event id (log-based capture of arbitrary
    /// tables).
    fn event_id(&self, record: &ChangeRecord) -> String {
        match record.row.get(&self.columns.id) {
            Some(serde_json::Value::String(id)) => id.clone(),
            Some(serde_json::Value::Number(id)) => id.to_string(),
            _ => format!("{}:{}", record.table, record.position),
        }
    }

    fn metadata(&self, record: &ChangeRecord) -> HashMap<String, String> {
        let mut metadata = HashMap::new();

        if let Some(serde_json::Value::Object(fields)) = record.row.get(&self.columns.metadata) {
            for (key, value) in fields {
                if let serde_json::Value::String(value) = value {
                    metadata.insert(key.clone(), value.clone());
                }
            }
        }

        metadata.insert(
            PublishedEvent::SOURCE_TABLE_METADATA_KEY.to_string(),
            record.table.clone(),
        );

        metadata
    }
}

impl EventConverter for OutboxEventConverter {
    fn convert(&self, record: &ChangeRecord) -> RelayResult<PublishedEvent> {
        if record.row.is_empty() {
            return Err(relay_error!(
                ErrorKind::ConversionError,
                "Change record carries no columns",
                format!("table {}, position {}", record.table, record.position)
            ));
        }

        let id = self.event_id(record);

        let aggregate_type = record
            .column_str(&self.columns.aggregate_type)
            .unwrap_or(&record.table)
            .to_string();

        let aggregate_id = record
            .column_str(&self.columns.aggregate_id)
            .unwrap_or(&id)
            .to_string();

        let event_type = record
            .column_str(&self.columns.event_type)
            .unwrap_or(&aggregate_type)
            .to_string();

        let payload = match record.row.get(&self.columns.payload) {
            Some(serde_json::Value::String(payload)) => payload.clone(),
            Some(value) => value.to_string(),
            None => serde_json::Value::Object(record.row.clone()).to_string(),
        };

        Ok(PublishedEvent {
            id,
            aggregate_type,
            aggregate_id,
            event_type,
            payload,
            metadata: self.metadata(record),
            position: record.position,
        })
    }
}
