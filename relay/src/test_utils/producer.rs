use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::timeout;

use crate::error::{ErrorKind, RelayResult};
use crate::publish::producer::{Producer, ProducerFactory};
use crate::relay_error;

/// Timeout after which waiting for publishes panics instead of hanging the test.
const WAIT_TIMEOUT: Duration = Duration::from_secs(10);

/// One message recorded by the [`MemoryProducer`].
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub topic: String,
    pub key: String,
    pub envelope: serde_json::Value,
}

#[derive(Debug, Default)]
struct ProducerInner {
    published: Vec<PublishedMessage>,
    fail_next: u32,
    closed: bool,
}

/// Producer that records every acknowledged publish in memory.
///
/// Failures can be injected for the next N publishes to exercise the
/// no-advance-on-failure behavior of the capture loop.
#[derive(Debug, Clone, Default)]
pub struct MemoryProducer {
    inner: Arc<Mutex<ProducerInner>>,
    notify: Arc<Notify>,
}

impl MemoryProducer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every message published so far, in publish order.
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.inner.lock().unwrap().published.clone()
    }

    /// Event ids published so far, extracted from the envelopes.
    pub fn published_event_ids(&self) -> Vec<String> {
        self.published()
            .iter()
            .filter_map(|message| {
                message
                    .envelope
                    .get("id")
                    .and_then(|id| id.as_str())
                    .map(str::to_string)
            })
            .collect()
    }

    /// Makes the next `count` publish calls fail.
    pub fn fail_next_publishes(&self, count: u32) {
        self.inner.lock().unwrap().fail_next = count;
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().unwrap().closed
    }

    /// Waits until at least `count` messages have been published.
    ///
    /// # Panics
    ///
    /// Panics after a bounded timeout so a broken pipeline fails the test
    /// instead of hanging it.
    pub async fn wait_for_publishes(&self, count: usize) {
        let wait = async {
            loop {
                if self.inner.lock().unwrap().published.len() >= count {
                    return;
                }
                self.notify.notified().await;
            }
        };

        timeout(WAIT_TIMEOUT, wait)
            .await
            .expect("timed out waiting for publishes");
    }
}

#[async_trait]
impl Producer for MemoryProducer {
    async fn publish(&self, topic: &str, key: &str, envelope: serde_json::Value) -> RelayResult<()> {
        let mut inner = self.inner.lock().unwrap();

        if inner.closed {
            return Err(relay_error!(
                ErrorKind::InvalidState,
                "Producer is closed"
            ));
        }

        if inner.fail_next > 0 {
            inner.fail_next -= 1;
            return Err(relay_error!(
                ErrorKind::PublishFailed,
                "Injected publish failure"
            ));
        }

        inner.published.push(PublishedMessage {
            topic: topic.to_string(),
            key: key.to_string(),
            envelope,
        });
        drop(inner);

        self.notify.notify_one();

        Ok(())
    }

    async fn close(&self) -> RelayResult<()> {
        self.inner.lock().unwrap().closed = true;
        Ok(())
    }
}

/// Factory handing out clones of one shared [`MemoryProducer`].
#[derive(Debug, Clone)]
pub struct MemoryProducerFactory {
    producer: MemoryProducer,
    fail_create: Arc<Mutex<bool>>,
}

impl MemoryProducerFactory {
    pub fn new(producer: MemoryProducer) -> Self {
        Self {
            producer,
            fail_create: Arc::new(Mutex::new(false)),
        }
    }

    /// Makes the next `create` call fail once.
    pub fn fail_next_create(&self) {
        *self.fail_create.lock().unwrap() = true;
    }
}

#[async_trait]
impl ProducerFactory for MemoryProducerFactory {
    async fn create(&self) -> RelayResult<Arc<dyn Producer>> {
        let mut fail = self.fail_create.lock().unwrap();
        if *fail {
            *fail = false;
            return Err(relay_error!(
                ErrorKind::SourceConnectionFailed,
                "Injected broker connection failure"
            ));
        }
        drop(fail);

        // A pipeline restart goes through the factory again, so the shared
        // recorder is reopened.
        self.producer.inner.lock().unwrap().closed = false;

        Ok(Arc::new(self.producer.clone()))
    }
}
