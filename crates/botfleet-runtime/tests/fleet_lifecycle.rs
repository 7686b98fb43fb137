// Full-fleet lifecycle tests over the in-memory backend and scripted
// sources, with the production vault in the loop.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use botfleet_core::{FleetConfig, FleetError, WorkerState};
use botfleet_runtime::{Fleet, ScriptedConnector};
use botfleet_storage::{generate_vault_key, MemoryBackend, MemoryConnectionFactory, TokenVault};

const TOKEN: &str = "123456789:AAHrZn9cXWp0qkLm3vTyBdEfGh1iJkLmNo5";

fn build_fleet(
    config: FleetConfig,
) -> (
    Fleet<MemoryConnectionFactory>,
    MemoryBackend,
    ScriptedConnector,
) {
    let backend = MemoryBackend::new();
    let factory = MemoryConnectionFactory::new(backend.clone());
    let vault = Arc::new(TokenVault::new(&generate_vault_key()).unwrap());
    let connector = ScriptedConnector::new();
    let fleet = Fleet::new(config, factory, vault, Arc::new(connector.clone())).unwrap();
    (fleet, backend, connector)
}

async fn eventually<F, Fut>(what: &str, mut predicate: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..300 {
        if predicate().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition never held: {what}");
}

#[tokio::test]
async fn worker_lifecycle_end_to_end() {
    let config = FleetConfig::default().with_batch_size(3);
    let (fleet, backend, connector) = build_fleet(config);
    let script = connector.script(TOKEN);

    // Adopt: encrypt the plaintext token, start the worker, reach Running
    let worker_id = fleet.adopt(TOKEN, "w1").await.unwrap();
    assert_ne!(worker_id, TOKEN, "credential must be stored encrypted");

    let workers = fleet.list_workers().await;
    assert_eq!(workers.len(), 1);
    assert_eq!(workers[0].state, WorkerState::Running);
    assert_eq!(workers[0].name, "w1");

    // Three sightings of the same subject; the last label wins
    script.emit(7777, "a");
    script.emit(7777, "a");
    script.emit(7777, "b");

    let backend_ref = &backend;
    let worker_ref = &worker_id;
    eventually("events flushed", move || async move {
        backend_ref
            .row(worker_ref, 7777)
            .map(|row| row.subject_label == "b")
            .unwrap_or(false)
    })
    .await;

    assert_eq!(backend.rows().len(), 1, "merge must collapse to one row");

    let workers = fleet.list_workers().await;
    assert_eq!(workers[0].events_seen, 3);
    assert_eq!(workers[0].events_persisted, 3);

    // Paused: events are received but not forwarded
    assert!(fleet.pause_worker(&worker_id).await);
    script.emit(8888, "c");
    script.emit(9999, "d");

    let fleet_ref = &fleet;
    eventually("paused events received", move || async move {
        fleet_ref
            .list_workers()
            .await
            .first()
            .map(|w| w.events_seen == 5)
            .unwrap_or(false)
    })
    .await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(fleet.metrics().await.events_persisted, 3);
    assert!(backend.row(&worker_id, 8888).is_none());

    // Stop: the record leaves the registry within the grace period
    assert!(fleet.stop_worker(&worker_id).await);
    assert!(fleet.list_workers().await.is_empty());

    fleet.shutdown().await;
}

#[tokio::test]
async fn shutdown_flushes_queued_events() {
    // Batch size far above what we submit: only the final drain can flush
    let config = FleetConfig::default().with_batch_size(100);
    let (fleet, backend, connector) = build_fleet(config);
    let script = connector.script(TOKEN);

    let worker_id = fleet.adopt(TOKEN, "w1").await.unwrap();
    script.emit(1, "alice");
    script.emit(2, "bob");

    let fleet_ref = &fleet;
    eventually("events received", move || async move {
        fleet_ref
            .list_workers()
            .await
            .first()
            .map(|w| w.events_seen == 2)
            .unwrap_or(false)
    })
    .await;
    assert_eq!(fleet.metrics().await.events_persisted, 0);

    fleet.shutdown().await;

    assert_eq!(backend.rows().len(), 2);
    assert!(backend.row(&worker_id, 1).is_some());
    assert!(backend.row(&worker_id, 2).is_some());
}

#[tokio::test]
async fn adopt_rejects_malformed_tokens() {
    let (fleet, _backend, _connector) = build_fleet(FleetConfig::default());
    let err = fleet.adopt("not-a-token", "bad").await.unwrap_err();
    assert!(matches!(err, FleetError::InvalidCredential { .. }));
    assert!(fleet.list_workers().await.is_empty());
    fleet.shutdown().await;
}

#[tokio::test]
async fn metrics_reflect_fleet_state() {
    let config = FleetConfig::default()
        .with_batch_size(1)
        .with_max_connections(4);
    let (fleet, _backend, connector) = build_fleet(config);
    let script = connector.script(TOKEN);

    let metrics = fleet.metrics().await;
    assert_eq!(metrics.workers, 0);
    assert_eq!(metrics.running, 0);
    assert_eq!(metrics.pool.max, 4);

    fleet.adopt(TOKEN, "w1").await.unwrap();
    script.emit(5, "eve");

    let fleet_ref = &fleet;
    eventually("event persisted", move || async move {
        fleet_ref.metrics().await.events_persisted == 1
    })
    .await;

    let metrics = fleet.metrics().await;
    assert_eq!(metrics.workers, 1);
    assert_eq!(metrics.running, 1);
    assert_eq!(metrics.queue_depth, 0);

    fleet.shutdown().await;
}
