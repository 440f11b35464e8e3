use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use relay::error::{ErrorKind, RelayResult};
use relay::offset::OffsetStore;
use relay::offset::memory::MemoryOffsetStore;
use relay::pipeline::Pipeline;
use relay::publish::producer::{Producer, ProducerFactory};
use relay::source::log::LogBasedChangeSource;
use relay::source::polling::PollingChangeSource;
use relay::test_utils::coordination::InMemoryCoordinationService;
use relay::test_utils::dao::InMemoryPendingEventsDao;
use relay::test_utils::log::{ScriptedLogTailClient, outbox_log_entry};
use relay::test_utils::pipeline::{fast_log_config, fast_polling_config, memory_deps};
use relay::test_utils::producer::MemoryProducer;
use relay::types::{PublishPosition, SourcePosition};
use relay::workers::capture::CaptureState;
use relay_config::shared::PipelineConfig;
use relay_telemetry::tracing::init_test_tracing;
use tokio::time::{sleep, timeout};

type PollingPipeline = Pipeline<PollingChangeSource<InMemoryPendingEventsDao>, MemoryOffsetStore>;
type LogPipeline = Pipeline<LogBasedChangeSource<ScriptedLogTailClient>, MemoryOffsetStore>;

fn polling_pipeline(
    config: PipelineConfig,
    dao: &InMemoryPendingEventsDao,
    offsets: &MemoryOffsetStore,
    producer: &MemoryProducer,
    coordination: &InMemoryCoordinationService,
) -> PollingPipeline {
    let polling = config.polling.clone().unwrap_or_default();
    let source = PollingChangeSource::new(
        dao.clone(),
        Duration::from_millis(polling.interval_ms),
        config.batch.max_size,
    );

    Pipeline::new(
        Arc::new(config),
        source,
        offsets.clone(),
        memory_deps(producer, coordination),
    )
}

fn log_pipeline(
    config: PipelineConfig,
    client: &ScriptedLogTailClient,
    offsets: &MemoryOffsetStore,
    producer: &MemoryProducer,
    coordination: &InMemoryCoordinationService,
) -> LogPipeline {
    let tables = config.log.clone().map(|log| log.tables).unwrap_or_default();
    let source = LogBasedChangeSource::new(client.clone(), tables);

    Pipeline::new(
        Arc::new(config),
        source,
        offsets.clone(),
        memory_deps(producer, coordination),
    )
}

async fn wait_until(condition: impl Fn() -> bool) {
    timeout(Duration::from_secs(10), async {
        while !condition() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition was not reached in time");
}

#[tokio::test]
async fn pipeline_becomes_ready_on_an_empty_source() {
    init_test_tracing();

    let dao = InMemoryPendingEventsDao::new();
    let offsets = MemoryOffsetStore::new();
    let producer = MemoryProducer::new();
    let coordination = InMemoryCoordinationService::new();

    let mut pipeline = polling_pipeline(
        fast_polling_config("orders", "orders-db"),
        &dao,
        &offsets,
        &producer,
        &coordination,
    );

    pipeline.start().await.unwrap();
    pipeline.wait_until_ready().await.unwrap();

    assert!(producer.published().is_empty());

    pipeline.shutdown_and_wait().await.unwrap();
}

#[tokio::test]
async fn relays_rows_in_commit_order_and_marks_them_published() {
    init_test_tracing();

    let dao = InMemoryPendingEventsDao::new();
    dao.insert_event(10, "Order", "order-1", "OrderCreated", r#"{"total":10}"#);
    dao.insert_event(11, "Order", "order-1", "OrderPaid", r#"{"total":10}"#);
    dao.insert_event(12, "Order", "order-2", "OrderCreated", r#"{"total":7}"#);

    let offsets = MemoryOffsetStore::new();
    let producer = MemoryProducer::new();
    let coordination = InMemoryCoordinationService::new();

    let mut pipeline = polling_pipeline(
        fast_polling_config("orders", "orders-db"),
        &dao,
        &offsets,
        &producer,
        &coordination,
    );

    pipeline.start().await.unwrap();
    pipeline.wait_until_ready().await.unwrap();

    producer.wait_for_publishes(3).await;
    wait_until(|| dao.pending_count() == 0).await;

    let published = producer.published();
    assert_eq!(producer.published_event_ids(), vec!["10", "11", "12"]);
    assert!(published.iter().all(|message| message.topic == "Order"));
    assert_eq!(published[0].key, "order-1");
    assert_eq!(published[2].key, "order-2");

    // Rows are marked by explicit id list, in one call for the whole batch.
    assert_eq!(dao.mark_calls(), vec![vec![10, 11, 12]]);
    assert_eq!(
        offsets.load("orders").await.unwrap(),
        Some(PublishPosition(SourcePosition::RowId(12)))
    );

    pipeline.shutdown_and_wait().await.unwrap();
    assert!(producer.is_closed());
}

#[tokio::test]
async fn does_not_advance_anything_when_a_publish_fails() {
    init_test_tracing();

    let dao = InMemoryPendingEventsDao::new();
    dao.insert_event(1, "Order", "order-1", "OrderCreated", "{}");
    dao.insert_event(2, "Order", "order-2", "OrderCreated", "{}");

    let offsets = MemoryOffsetStore::new();
    let producer = MemoryProducer::new();
    producer.fail_next_publishes(1);
    let coordination = InMemoryCoordinationService::new();

    let mut pipeline = polling_pipeline(
        fast_polling_config("orders", "orders-db"),
        &dao,
        &offsets,
        &producer,
        &coordination,
    );

    pipeline.start().await.unwrap();

    // The failed first cycle leaves rows unmarked, so the retried cycle
    // republishes the full batch.
    producer.wait_for_publishes(2).await;
    wait_until(|| dao.pending_count() == 0).await;

    assert_eq!(producer.published_event_ids(), vec!["1", "2"]);
    assert_eq!(dao.published_ids(), vec![1, 2]);
    assert_eq!(
        offsets.load("orders").await.unwrap(),
        Some(PublishPosition(SourcePosition::RowId(2)))
    );

    pipeline.shutdown_and_wait().await.unwrap();
}

#[tokio::test]
async fn republishes_rows_when_marking_fails() {
    init_test_tracing();

    let dao = InMemoryPendingEventsDao::new();
    dao.insert_event(1, "Order", "order-1", "OrderCreated", "{}");
    dao.fail_next_mark();

    let offsets = MemoryOffsetStore::new();
    let producer = MemoryProducer::new();
    let coordination = InMemoryCoordinationService::new();

    let mut pipeline = polling_pipeline(
        fast_polling_config("orders", "orders-db"),
        &dao,
        &offsets,
        &producer,
        &coordination,
    );

    pipeline.start().await.unwrap();
    wait_until(|| dao.pending_count() == 0).await;

    // At-least-once: the publish before the failed mark is repeated.
    assert_eq!(producer.published_event_ids(), vec!["1", "1"]);
    assert_eq!(dao.published_ids(), vec![1]);

    pipeline.shutdown_and_wait().await.unwrap();
}

#[tokio::test]
async fn stops_after_too_many_consecutive_errors() {
    init_test_tracing();

    let dao = InMemoryPendingEventsDao::new();
    dao.fail_next_finds(5);

    let offsets = MemoryOffsetStore::new();
    let producer = MemoryProducer::new();
    let coordination = InMemoryCoordinationService::new();

    let mut config = fast_polling_config("orders", "orders-db");
    config.max_consecutive_errors = 2;

    let mut pipeline = polling_pipeline(config, &dao, &offsets, &producer, &coordination);

    pipeline.start().await.unwrap();

    let err = pipeline.wait_until_ready().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ErrorThresholdExceeded);

    let err = pipeline.wait().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ErrorThresholdExceeded);

    // The lease was released during teardown.
    assert_eq!(coordination.holder("orders-db"), None);
}

#[tokio::test]
async fn shutdown_before_start_is_a_no_op() {
    init_test_tracing();

    let dao = InMemoryPendingEventsDao::new();
    let offsets = MemoryOffsetStore::new();
    let producer = MemoryProducer::new();
    let coordination = InMemoryCoordinationService::new();

    let pipeline = polling_pipeline(
        fast_polling_config("orders", "orders-db"),
        &dao,
        &offsets,
        &producer,
        &coordination,
    );

    pipeline.shutdown();
    pipeline.wait().await.unwrap();
}

#[tokio::test]
async fn shutdown_while_idle_completes_promptly() {
    init_test_tracing();

    let dao = InMemoryPendingEventsDao::new();
    let offsets = MemoryOffsetStore::new();
    let producer = MemoryProducer::new();
    let coordination = InMemoryCoordinationService::new();

    // An interval far beyond the test timeout: shutdown has to interrupt the
    // idle sleep rather than wait it out.
    let mut config = fast_polling_config("orders", "orders-db");
    if let Some(polling) = config.polling.as_mut() {
        polling.interval_ms = 60_000;
    }

    let mut pipeline = polling_pipeline(config, &dao, &offsets, &producer, &coordination);

    pipeline.start().await.unwrap();

    let mut states = pipeline.state_watch().unwrap();
    timeout(
        Duration::from_secs(10),
        states.wait_for(|state| *state == CaptureState::LeadingIdle),
    )
    .await
    .expect("worker did not go idle in time")
    .unwrap();

    timeout(Duration::from_secs(5), pipeline.shutdown_and_wait())
        .await
        .expect("shutdown did not interrupt the idle sleep")
        .unwrap();
}

#[tokio::test]
async fn starting_twice_is_an_invalid_state() {
    init_test_tracing();

    let dao = InMemoryPendingEventsDao::new();
    let offsets = MemoryOffsetStore::new();
    let producer = MemoryProducer::new();
    let coordination = InMemoryCoordinationService::new();

    let mut pipeline = polling_pipeline(
        fast_polling_config("orders", "orders-db"),
        &dao,
        &offsets,
        &producer,
        &coordination,
    );

    pipeline.start().await.unwrap();

    let err = pipeline.start().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    pipeline.shutdown_and_wait().await.unwrap();
}

#[tokio::test]
async fn only_one_instance_relays_per_source_and_a_standby_takes_over() {
    init_test_tracing();

    let dao = InMemoryPendingEventsDao::new();
    dao.insert_event(1, "Order", "order-1", "OrderCreated", "{}");

    let offsets = MemoryOffsetStore::new();
    let coordination = InMemoryCoordinationService::new();
    let producer_a = MemoryProducer::new();
    let producer_b = MemoryProducer::new();

    let mut pipeline_a = polling_pipeline(
        fast_polling_config("orders", "orders-db"),
        &dao,
        &offsets,
        &producer_a,
        &coordination,
    );
    let mut pipeline_b = polling_pipeline(
        fast_polling_config("orders", "orders-db"),
        &dao,
        &offsets,
        &producer_b,
        &coordination,
    );

    pipeline_a.start().await.unwrap();
    pipeline_a.wait_until_ready().await.unwrap();
    producer_a.wait_for_publishes(1).await;
    wait_until(|| dao.pending_count() == 0).await;

    // The standby keeps retrying acquisition and must not relay anything.
    pipeline_b.start().await.unwrap();
    sleep(Duration::from_millis(100)).await;
    assert!(producer_b.published().is_empty());
    assert_eq!(coordination.fencing_token("orders-db"), Some(1));

    // Revoking the leader's lease forces a clean stop; the standby takes over
    // under a higher fencing token.
    coordination.revoke("orders-db");
    pipeline_a.wait().await.unwrap();

    dao.insert_event(2, "Order", "order-2", "OrderCreated", "{}");

    producer_b.wait_for_publishes(1).await;
    assert_eq!(producer_b.published_event_ids(), vec!["2"]);
    assert_eq!(coordination.fencing_token("orders-db"), Some(2));

    pipeline_b.shutdown_and_wait().await.unwrap();
}

struct RevokeAfterFirstPublish {
    inner: MemoryProducer,
    coordination: InMemoryCoordinationService,
    source_id: String,
    revoked: AtomicBool,
}

#[async_trait]
impl Producer for RevokeAfterFirstPublish {
    async fn publish(&self, topic: &str, key: &str, envelope: serde_json::Value) -> RelayResult<()> {
        self.inner.publish(topic, key, envelope).await?;

        if !self.revoked.swap(true, Ordering::SeqCst) {
            self.coordination.revoke(&self.source_id);
        }

        Ok(())
    }

    async fn close(&self) -> RelayResult<()> {
        self.inner.close().await
    }
}

struct FixedProducerFactory(Arc<dyn Producer>);

#[async_trait]
impl ProducerFactory for FixedProducerFactory {
    async fn create(&self) -> RelayResult<Arc<dyn Producer>> {
        Ok(self.0.clone())
    }
}

#[tokio::test]
async fn losing_leadership_mid_batch_discards_the_rest_of_the_batch() {
    init_test_tracing();

    let dao = InMemoryPendingEventsDao::new();
    dao.insert_event(1, "Order", "order-1", "OrderCreated", "{}");
    dao.insert_event(2, "Order", "order-1", "OrderPaid", "{}");
    dao.insert_event(3, "Order", "order-2", "OrderCreated", "{}");

    let offsets = MemoryOffsetStore::new();
    let coordination = InMemoryCoordinationService::new();
    let recorder = MemoryProducer::new();

    let config = fast_polling_config("orders", "orders-db");
    let source = PollingChangeSource::new(dao.clone(), Duration::from_millis(10), 100);

    let mut deps = memory_deps(&recorder, &coordination);
    deps.producer_factory = Arc::new(FixedProducerFactory(Arc::new(RevokeAfterFirstPublish {
        inner: recorder.clone(),
        coordination: coordination.clone(),
        source_id: "orders-db".to_string(),
        revoked: AtomicBool::new(false),
    })));

    let mut pipeline = Pipeline::new(Arc::new(config), source, offsets.clone(), deps);

    pipeline.start().await.unwrap();

    // Losing the lease mid-batch stops the pipeline cleanly without marking
    // rows or moving the watermark.
    pipeline.wait().await.unwrap();

    assert_eq!(recorder.published_event_ids(), vec!["1"]);
    assert_eq!(dao.published_ids(), Vec::<i64>::new());
    assert_eq!(offsets.load("orders").await.unwrap(), None);
}

#[tokio::test]
async fn log_pipeline_relays_only_configured_tables() {
    init_test_tracing();

    let client = ScriptedLogTailClient::new();
    let offsets = MemoryOffsetStore::new();
    let producer = MemoryProducer::new();
    let coordination = InMemoryCoordinationService::new();

    let mut pipeline = log_pipeline(
        fast_log_config("wal", "orders-db", &["events"]),
        &client,
        &offsets,
        &producer,
        &coordination,
    );

    client.push_entries(vec![
        outbox_log_entry("events", 1, "Order", "order-1", "OrderCreated", "{}"),
        outbox_log_entry("audit_log", 2, "Audit", "audit-1", "Ignored", "{}"),
        outbox_log_entry("events", 3, "Order", "order-1", "OrderPaid", "{}"),
    ]);

    pipeline.start().await.unwrap();
    pipeline.wait_until_ready().await.unwrap();

    producer.wait_for_publishes(2).await;
    assert_eq!(producer.published_event_ids(), vec!["1", "3"]);

    // The watermark covers the whole batch, skipped entries included.
    timeout(Duration::from_secs(10), async {
        loop {
            let watermark = offsets.load("wal").await.unwrap();
            if watermark == Some(PublishPosition(SourcePosition::LogOffset(3))) {
                break;
            }
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("watermark did not advance in time");

    pipeline.shutdown_and_wait().await.unwrap();
    assert!(client.is_closed());
}

#[tokio::test]
async fn log_pipeline_resumes_strictly_after_the_stored_watermark() {
    init_test_tracing();

    let client = ScriptedLogTailClient::new();
    let offsets = MemoryOffsetStore::new();
    offsets
        .advance("wal", PublishPosition(SourcePosition::LogOffset(7)))
        .await
        .unwrap();

    let producer = MemoryProducer::new();
    let coordination = InMemoryCoordinationService::new();

    let mut pipeline = log_pipeline(
        fast_log_config("wal", "orders-db", &["events"]),
        &client,
        &offsets,
        &producer,
        &coordination,
    );

    pipeline.start().await.unwrap();
    wait_until(|| client.opened_from() == vec![Some(7)]).await;

    client.push_entries(vec![outbox_log_entry(
        "events",
        8,
        "Order",
        "order-9",
        "OrderShipped",
        "{}",
    )]);

    producer.wait_for_publishes(1).await;
    assert_eq!(
        offsets.load("wal").await.unwrap(),
        Some(PublishPosition(SourcePosition::LogOffset(8)))
    );

    pipeline.shutdown_and_wait().await.unwrap();
}

#[tokio::test]
async fn log_pipeline_reopens_at_the_watermark_after_a_stream_error() {
    init_test_tracing();

    let client = ScriptedLogTailClient::new();
    let offsets = MemoryOffsetStore::new();
    let producer = MemoryProducer::new();
    let coordination = InMemoryCoordinationService::new();

    let mut pipeline = log_pipeline(
        fast_log_config("wal", "orders-db", &["events"]),
        &client,
        &offsets,
        &producer,
        &coordination,
    );

    client.push_entries(vec![outbox_log_entry(
        "events",
        1,
        "Order",
        "order-1",
        "OrderCreated",
        "{}",
    )]);

    pipeline.start().await.unwrap();
    producer.wait_for_publishes(1).await;

    client.push_error(relay::relay_error!(
        relay::error::ErrorKind::SourceQueryFailed,
        "stream interrupted"
    ));

    // The source is reopened at the stored watermark before retrying.
    wait_until(|| client.opened_from() == vec![None, Some(1)]).await;

    client.push_entries(vec![outbox_log_entry(
        "events",
        2,
        "Order",
        "order-1",
        "OrderPaid",
        "{}",
    )]);

    producer.wait_for_publishes(2).await;
    assert_eq!(producer.published_event_ids(), vec!["1", "2"]);

    pipeline.shutdown_and_wait().await.unwrap();
}
