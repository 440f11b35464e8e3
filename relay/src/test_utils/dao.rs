use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Map, Value, json};

use crate::error::{ErrorKind, RelayResult};
use crate::relay_error;
use crate::source::polling::PendingEventsDao;
use crate::types::{ChangeRecord, SourcePosition};

#[derive(Debug, Clone)]
struct StoredRow {
    id: i64,
    row: Map<String, Value>,
    published: bool,
}

#[derive(Debug, Default)]
struct DaoInner {
    table: String,
    rows: Vec<StoredRow>,
    mark_calls: Vec<Vec<i64>>,
    fail_next_finds: u32,
    fail_next_marks: u32,
}

/// In-memory stand-in for a polled events table.
///
/// Rows carry the outbox column shape expected by the default converter.
/// Failures can be injected per call to exercise retry behavior, and every
/// `mark_published` invocation is recorded for assertions.
#[derive(Debug, Clone)]
pub struct InMemoryPendingEventsDao {
    inner: Arc<Mutex<DaoInner>>,
}

impl InMemoryPendingEventsDao {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(DaoInner {
                table: "events".to_string(),
                ..Default::default()
            })),
        }
    }

    /// Inserts an unpublished outbox row with the default column names.
    pub fn insert_event(
        &self,
        id: i64,
        aggregate_type: &str,
        aggregate_id: &str,
        event_type: &str,
        payload: &str,
    ) {
        let mut row = Map::new();
        row.insert("event_id".to_string(), json!(id.to_string()));
        row.insert("entity_type".to_string(), json!(aggregate_type));
        row.insert("entity_id".to_string(), json!(aggregate_id));
        row.insert("event_type".to_string(), json!(event_type));
        row.insert("event_data".to_string(), json!(payload));

        self.insert_row(id, row);
    }

    /// Inserts an unpublished row with an arbitrary column shape.
    pub fn insert_row(&self, id: i64, row: Map<String, Value>) {
        let mut inner = self.inner.lock().unwrap();
        inner.rows.push(StoredRow {
            id,
            row,
            published: false,
        });
        inner.rows.sort_by_key(|row| row.id);
    }

    /// Makes the next `count` calls to `find_pending` fail.
    pub fn fail_next_finds(&self, count: u32) {
        self.inner.lock().unwrap().fail_next_finds = count;
    }

    /// Makes the next `mark_published` call fail once.
    pub fn fail_next_mark(&self) {
        self.inner.lock().unwrap().fail_next_marks = 1;
    }

    /// Every id list passed to `mark_published`, in call order.
    pub fn mark_calls(&self) -> Vec<Vec<i64>> {
        self.inner.lock().unwrap().mark_calls.clone()
    }

    /// Ids of rows currently marked published.
    pub fn published_ids(&self) -> Vec<i64> {
        self.inner
            .lock()
            .unwrap()
            .rows
            .iter()
            .filter(|row| row.published)
            .map(|row| row.id)
            .collect()
    }

    /// Number of rows not yet marked published.
    pub fn pending_count(&self) -> usize {
        self.inner
            .lock()
            .unwrap()
            .rows
            .iter()
            .filter(|row| !row.published)
            .count()
    }
}

impl Default for InMemoryPendingEventsDao {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PendingEventsDao for InMemoryPendingEventsDao {
    async fn find_pending(&self, limit: usize) -> RelayResult<Vec<ChangeRecord>> {
        let mut inner = self.inner.lock().unwrap();

        if inner.fail_next_finds > 0 {
            inner.fail_next_finds -= 1;
            return Err(relay_error!(
                ErrorKind::SourceQueryFailed,
                "Injected find failure"
            ));
        }

        Ok(inner
            .rows
            .iter()
            .filter(|row| !row.published)
            .take(limit)
            .map(|row| {
                ChangeRecord::new(
                    inner.table.clone(),
                    SourcePosition::RowId(row.id),
                    row.row.clone(),
                )
            })
            .collect())
    }

    async fn mark_published(&self, ids: &[i64]) -> RelayResult<()> {
        let mut inner = self.inner.lock().unwrap();

        if inner.fail_next_marks > 0 {
            inner.fail_next_marks -= 1;
            return Err(relay_error!(
                ErrorKind::SourceQueryFailed,
                "Injected mark failure"
            ));
        }

        inner.mark_calls.push(ids.to_vec());
        for row in &mut inner.rows {
            if ids.contains(&row.id) {
                row.published = true;
            }
        }

        Ok(())
    }
}
