use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Notify;

use crate::error::{RelayResult, RelayError};
use crate::source::log::{LogEntry, LogTailClient};

#[derive(Debug, Default)]
struct ScriptInner {
    batches: VecDeque<RelayResult<Vec<LogEntry>>>,
    opened_from: Vec<Option<u64>>,
    closed: bool,
}

/// Log-tail client fed by the test.
///
/// `next_entries` blocks until a batch is pushed, which mirrors how a real
/// replication stream parks between transactions. Every `open` records the
/// requested resume offset for assertions.
#[derive(Debug, Clone, Default)]
pub struct ScriptedLogTailClient {
    inner: Arc<Mutex<ScriptInner>>,
    notify: Arc<Notify>,
}

impl ScriptedLogTailClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a batch of entries for the next `next_entries` call.
    pub fn push_entries(&self, entries: Vec<LogEntry>) {
        self.inner.lock().unwrap().batches.push_back(Ok(entries));
        self.notify.notify_one();
    }

    /// Queues a stream error for the next `next_entries` call.
    pub fn push_error(&self, err: RelayError) {
        self.inner.lock().unwrap().batches.push_back(Err(err));
        self.notify.notify_one();
    }

    /// The resume offsets handed to `open`, in call order.
    pub fn opened_from(&self) -> Vec<Option<u64>> {
        self.inner.lock().unwrap().opened_from.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().unwrap().closed
    }
}

#[async_trait]
impl LogTailClient for ScriptedLogTailClient {
    async fn open(&mut self, from: Option<u64>) -> RelayResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.opened_from.push(from);
        inner.closed = false;
        Ok(())
    }

    async fn next_entries(&mut self) -> RelayResult<Vec<LogEntry>> {
        loop {
            if let Some(batch) = self.inner.lock().unwrap().batches.pop_front() {
                return batch;
            }

            self.notify.notified().await;
        }
    }

    async fn close(&mut self) -> RelayResult<()> {
        self.inner.lock().unwrap().closed = true;
        Ok(())
    }
}

/// Builds a log entry whose payload is an outbox-shaped row.
pub fn outbox_log_entry(
    table: &str,
    offset: u64,
    aggregate_type: &str,
    aggregate_id: &str,
    event_type: &str,
    payload: &str,
) -> LogEntry {
    LogEntry {
        table: table.to_string(),
        offset,
        payload: json!({
            "event_id": offset.to_string(),
            "entity_type": aggregate_type,
            "entity_id": aggregate_id,
            "event_type": event_type,
            "event_data": payload,
        }),
    }
}
