use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::SourcePosition;

/// Raw, source-specific change record.
///
/// Produced by a change source in commit order, consumed exactly once by the
/// event converter. The row payload is carried as a JSON object keyed by
/// column name so that both polled rows and decoded log entries share one
/// shape.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeRecord {
    /// Name of the originating source table.
    pub table: String,
    /// Resumable position of this record within its source.
    pub position: SourcePosition,
    /// Column values of the changed row.
    pub row: serde_json::Map<String, serde_json::Value>,
}

impl ChangeRecord {
    /// Creates a new change record.
    pub fn new(
        table: impl Into<String>,
        position: SourcePosition,
        row: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self {
            table: table.into(),
            position,
            row,
        }
    }

    /// Returns the string value of a column, if present.
    pub fn column_str(&self, column: &str) -> Option<&str> {
        self.row.get(column).and_then(|value| value.as_str())
    }
}

/// Canonical event produced by the converter and handed to the publishing
/// pipeline.
///
/// The id is derived deterministically from the source row or position and is
/// unique and monotonically orderable within one aggregate. Downstream
/// consumers dedupe by this id, which is what makes at-least-once delivery
/// tolerable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedEvent {
    /// Stable, source-position-derived identifier.
    pub id: String,
    /// Type of the aggregate the event belongs to; also the default topic.
    pub aggregate_type: String,
    /// Identifier of the aggregate instance; also the default partition key.
    pub aggregate_id: String,
    /// Application-level event type.
    pub event_type: String,
    /// Serialized event payload, opaque to the engine.
    pub payload: String,
    /// Free-form string metadata, possibly carrying causal or tracing fields.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// Position of the originating change record.
    pub position: SourcePosition,
}

impl PublishedEvent {
    /// Metadata key under which converters record the originating table name.
    pub const SOURCE_TABLE_METADATA_KEY: &'static str = "relay.source_table";

    /// Returns the originating source table recorded by the converter, if any.
    pub fn source_table(&self) -> Option<&str> {
        self.metadata
            .get(Self::SOURCE_TABLE_METADATA_KEY)
            .map(String::as_str)
    }
}
