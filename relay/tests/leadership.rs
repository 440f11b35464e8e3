use std::sync::Arc;
use std::time::Duration;

use relay::concurrency::shutdown::create_shutdown_channel;
use relay::leadership::{BackoffPolicy, CoordinationService, LeadershipCoordinator};
use relay::test_utils::coordination::InMemoryCoordinationService;
use relay_telemetry::tracing::init_test_tracing;
use tokio::time::{sleep, timeout};

fn fast_backoff() -> BackoffPolicy {
    BackoffPolicy::new(Duration::from_millis(5), Duration::from_millis(20))
}

#[tokio::test]
async fn acquire_retries_until_the_lease_frees() {
    init_test_tracing();

    let service = InMemoryCoordinationService::new();
    let blocker = service
        .try_acquire("orders-db", "other-instance")
        .await
        .unwrap()
        .unwrap();

    let mut coordinator =
        LeadershipCoordinator::new(Arc::new(service.clone()), "orders-db", fast_backoff());
    let (_shutdown_tx, mut shutdown_rx) = create_shutdown_channel();

    let holder_id = coordinator.holder_id().to_string();
    let acquire = tokio::spawn(async move {
        let lease = coordinator.acquire(&mut shutdown_rx).await.unwrap();
        (coordinator, lease)
    });

    sleep(Duration::from_millis(50)).await;
    service.release(&blocker).await.unwrap();

    let (coordinator, lease) = timeout(Duration::from_secs(10), acquire)
        .await
        .expect("acquisition did not complete in time")
        .unwrap();
    let lease = lease.expect("expected a lease, not a shutdown");

    assert_eq!(lease.holder_id(), holder_id);
    assert_eq!(lease.fencing_token(), 2);
    assert_eq!(coordinator.tracker().consecutive_failures(), 0);

    coordinator.release(&lease).await.unwrap();
    assert_eq!(service.holder("orders-db"), None);
}

#[tokio::test]
async fn acquire_returns_none_on_shutdown() {
    init_test_tracing();

    let service = InMemoryCoordinationService::new();
    let _blocker = service
        .try_acquire("orders-db", "other-instance")
        .await
        .unwrap()
        .unwrap();

    let mut coordinator =
        LeadershipCoordinator::new(Arc::new(service), "orders-db", fast_backoff());
    let (shutdown_tx, mut shutdown_rx) = create_shutdown_channel();

    let acquire = tokio::spawn(async move { coordinator.acquire(&mut shutdown_rx).await });

    sleep(Duration::from_millis(20)).await;
    shutdown_tx.shutdown().unwrap();

    let lease = timeout(Duration::from_secs(10), acquire)
        .await
        .expect("acquisition did not observe shutdown in time")
        .unwrap()
        .unwrap();

    assert!(lease.is_none());
}

#[tokio::test]
async fn acquire_survives_coordination_failures() {
    init_test_tracing();

    let service = InMemoryCoordinationService::new();
    service.fail_next_acquire();

    let mut coordinator =
        LeadershipCoordinator::new(Arc::new(service), "orders-db", fast_backoff());
    let (_shutdown_tx, mut shutdown_rx) = create_shutdown_channel();

    let lease = coordinator
        .acquire(&mut shutdown_rx)
        .await
        .unwrap()
        .expect("expected a lease after the transient failure");

    assert_eq!(lease.fencing_token(), 1);
}

#[tokio::test]
async fn fencing_tokens_increase_across_acquisitions() {
    let service = InMemoryCoordinationService::new();

    let first = service
        .try_acquire("orders-db", "a")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.fencing_token(), 1);

    // While held, nobody else gets in.
    assert!(service.try_acquire("orders-db", "b").await.unwrap().is_none());

    service.release(&first).await.unwrap();

    let second = service
        .try_acquire("orders-db", "b")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(second.fencing_token(), 2);
}

#[tokio::test]
async fn revocation_notifies_lease_holders() {
    let service = InMemoryCoordinationService::new();

    let mut lease = service
        .try_acquire("orders-db", "a")
        .await
        .unwrap()
        .unwrap();
    assert!(!lease.is_lost());

    let waiter = tokio::spawn(async move {
        lease.wait_lost().await;
        lease
    });

    service.revoke("orders-db");

    let lease = timeout(Duration::from_secs(10), waiter)
        .await
        .expect("lease loss was not observed in time")
        .unwrap();
    assert!(lease.is_lost());
}
