// Event batcher: single consumer draining all workers into transactional
// flushes
//
// Trigger rules: a flush happens when the working batch reaches
// `batch_size`, or when `batch_timeout` has passed since the batch first
// became non-empty, whichever comes first. Flushes never overlap; the one
// consumer task is the only place they run.
//
// Failure policy: a group whose transaction fails is logged and dropped
// (at-most-once). Admission permits are returned on both paths so a failed
// flush cannot leak pipeline capacity.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use botfleet_core::{FleetConfig, FleetError, SubjectEvent, WorkerId};
use botfleet_storage::{ConnectionFactory, ConnectionPool, StoreConnection, SubjectUpsert};

use crate::admission::AdmissionGate;
use crate::registry::WorkerRegistry;

#[derive(Default)]
struct BatcherShared {
    /// Events admitted but not yet drained into a batch
    queue_depth: AtomicUsize,
    /// Events successfully persisted since startup
    persisted: AtomicU64,
}

/// Producer handle: admission control plus the queue sender.
///
/// Each worker task holds a clone; submissions fail with `ShuttingDown`
/// once the batcher has begun shutdown.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::Sender<SubjectEvent>,
    gate: AdmissionGate,
    shared: Arc<BatcherShared>,
}

impl EventSink {
    /// Submit one event, blocking while the system-wide in-flight limit is
    /// reached. This is the backpressure point.
    pub async fn submit(&self, event: SubjectEvent) -> Result<(), FleetError> {
        self.gate.acquire().await?;
        self.shared.queue_depth.fetch_add(1, Ordering::Relaxed);
        if self.tx.send(event).await.is_err() {
            self.shared.queue_depth.fetch_sub(1, Ordering::Relaxed);
            self.gate.release(1);
            return Err(FleetError::ShuttingDown);
        }
        Ok(())
    }
}

/// The batching pipeline: owns the consumer task
pub struct EventBatcher {
    sink: EventSink,
    shared: Arc<BatcherShared>,
    gate: AdmissionGate,
    shutdown: watch::Sender<bool>,
    consumer: JoinHandle<()>,
}

impl EventBatcher {
    /// Launch the consumer task over the given pool and registry
    pub fn spawn<F: ConnectionFactory>(
        pool: Arc<ConnectionPool<F>>,
        registry: WorkerRegistry,
        config: &FleetConfig,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.admission_limit);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let gate = AdmissionGate::new(config.admission_limit);
        let shared = Arc::new(BatcherShared::default());

        let consumer = Consumer {
            rx,
            shutdown: shutdown_rx,
            pool,
            registry,
            gate: gate.clone(),
            shared: shared.clone(),
            batch_size: config.batch_size,
            batch_timeout: config.batch_timeout,
        };
        let handle = tokio::spawn(consumer.run());

        Self {
            sink: EventSink {
                tx,
                gate: gate.clone(),
                shared: shared.clone(),
            },
            shared,
            gate,
            shutdown: shutdown_tx,
            consumer: handle,
        }
    }

    /// Producer handle for worker tasks
    pub fn sink(&self) -> EventSink {
        self.sink.clone()
    }

    /// Events admitted but not yet drained into a batch
    pub fn queue_depth(&self) -> usize {
        self.shared.queue_depth.load(Ordering::Relaxed)
    }

    /// Events successfully persisted since startup
    pub fn events_persisted(&self) -> u64 {
        self.shared.persisted.load(Ordering::Relaxed)
    }

    /// Stop accepting events, flush everything still queued in one final
    /// drain, and return once the consumer task has exited.
    pub async fn shutdown(self) {
        self.gate.close();
        let _ = self.shutdown.send(true);
        drop(self.sink);
        if let Err(e) = self.consumer.await {
            warn!(error = %e, "batch consumer task join error");
        }
    }
}

enum Step {
    Event(SubjectEvent),
    Closed,
    TimedOut,
    Shutdown,
}

struct Consumer<F: ConnectionFactory> {
    rx: mpsc::Receiver<SubjectEvent>,
    shutdown: watch::Receiver<bool>,
    pool: Arc<ConnectionPool<F>>,
    registry: WorkerRegistry,
    gate: AdmissionGate,
    shared: Arc<BatcherShared>,
    batch_size: usize,
    batch_timeout: Duration,
}

impl<F: ConnectionFactory> Consumer<F> {
    async fn run(mut self) {
        let mut batch: Vec<SubjectEvent> = Vec::with_capacity(self.batch_size);
        // Set when the batch becomes non-empty; the time trigger fires here
        let mut deadline: Option<Instant> = None;

        loop {
            match self.next_step(deadline).await {
                Step::Event(event) => {
                    if batch.is_empty() {
                        deadline = Some(Instant::now() + self.batch_timeout);
                    }
                    self.shared.queue_depth.fetch_sub(1, Ordering::Relaxed);
                    batch.push(event);

                    // Drain greedily up to the size trigger
                    while batch.len() < self.batch_size {
                        match self.rx.try_recv() {
                            Ok(event) => {
                                self.shared.queue_depth.fetch_sub(1, Ordering::Relaxed);
                                batch.push(event);
                            }
                            Err(_) => break,
                        }
                    }

                    if batch.len() >= self.batch_size {
                        self.flush(&mut batch).await;
                        deadline = None;
                    }
                }
                Step::TimedOut => {
                    // Time trigger: the batch is non-empty by construction
                    self.flush(&mut batch).await;
                    deadline = None;
                }
                Step::Closed | Step::Shutdown => break,
            }
        }

        // Final drain: everything still queued goes out in one last pass
        while let Ok(event) = self.rx.try_recv() {
            self.shared.queue_depth.fetch_sub(1, Ordering::Relaxed);
            batch.push(event);
            if batch.len() >= self.batch_size {
                self.flush(&mut batch).await;
            }
        }
        if !batch.is_empty() {
            self.flush(&mut batch).await;
        }
        info!("event batcher stopped");
    }

    async fn next_step(&mut self, deadline: Option<Instant>) -> Step {
        match deadline {
            Some(at) => tokio::select! {
                _ = self.shutdown.changed() => Step::Shutdown,
                received = tokio::time::timeout_at(at, self.rx.recv()) => match received {
                    Ok(Some(event)) => Step::Event(event),
                    Ok(None) => Step::Closed,
                    Err(_) => Step::TimedOut,
                },
            },
            None => tokio::select! {
                _ = self.shutdown.changed() => Step::Shutdown,
                received = self.rx.recv() => match received {
                    Some(event) => Step::Event(event),
                    None => Step::Closed,
                },
            },
        }
    }

    /// Flush the working batch: one transaction per worker group, counters
    /// updated and permits returned per group.
    async fn flush(&self, batch: &mut Vec<SubjectEvent>) {
        let events = std::mem::take(batch);
        debug!(events = events.len(), "flushing batch");

        // Group by worker; receive order is preserved within each group
        let mut groups: Vec<(WorkerId, Vec<SubjectUpsert>)> = Vec::new();
        let mut index: HashMap<WorkerId, usize> = HashMap::new();
        for event in &events {
            let slot = *index.entry(event.worker_id.clone()).or_insert_with(|| {
                groups.push((event.worker_id.clone(), Vec::new()));
                groups.len() - 1
            });
            groups[slot].1.push(SubjectUpsert::from(event));
        }

        for (worker_id, rows) in groups {
            let count = rows.len();
            let result = self
                .pool
                .execute_transaction(move |conn| {
                    Box::pin(async move {
                        for row in &rows {
                            conn.upsert_subject(row).await?;
                        }
                        Ok(())
                    })
                })
                .await;

            match result {
                Ok(()) => {
                    self.shared.persisted.fetch_add(count as u64, Ordering::Relaxed);
                    let stats = {
                        let registry = self.registry.read().await;
                        registry.get(&worker_id).map(|record| record.stats.clone())
                    };
                    if let Some(stats) = stats {
                        stats.add_persisted(count as u64);
                    }
                }
                Err(e) => {
                    warn!(
                        events = count,
                        error = %e,
                        "batch flush failed, dropping events"
                    );
                }
            }

            // Returned on both paths: a dropped batch must not leak capacity
            self.gate.release(count);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::registry::{new_registry, WorkerRecord};
    use botfleet_core::FleetConfig;
    use botfleet_storage::{MemoryBackend, MemoryConnectionFactory};

    fn test_config() -> FleetConfig {
        FleetConfig::default()
            .with_batch_size(3)
            .with_batch_timeout(Duration::from_secs(5))
            .with_admission_limit(16)
    }

    fn pipeline(
        backend: &MemoryBackend,
        config: &FleetConfig,
    ) -> (EventBatcher, WorkerRegistry) {
        let pool = Arc::new(ConnectionPool::new(
            MemoryConnectionFactory::new(backend.clone()),
            config,
        ));
        let registry = new_registry();
        let batcher = EventBatcher::spawn(pool, registry.clone(), config);
        (batcher, registry)
    }

    async fn register(registry: &WorkerRegistry, id: &str) {
        let (record, _cancel_rx) = WorkerRecord::new(id);
        registry.write().await.insert(id.to_string(), record);
    }

    async fn wait_for_persisted(batcher: &EventBatcher, expected: u64) {
        for _ in 0..200 {
            if batcher.events_persisted() >= expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "persisted count never reached {expected}, got {}",
            batcher.events_persisted()
        );
    }

    #[tokio::test]
    async fn size_trigger_flushes_a_full_batch() {
        let backend = MemoryBackend::new();
        let config = test_config();
        let (batcher, registry) = pipeline(&backend, &config);
        register(&registry, "w1").await;

        let sink = batcher.sink();
        for i in 0..3 {
            sink.submit(SubjectEvent::new("w1", i, format!("user-{i}")))
                .await
                .unwrap();
        }

        // Full batch flushes without waiting out the 5s time trigger
        wait_for_persisted(&batcher, 3).await;
        assert_eq!(backend.rows().len(), 3);
        assert_eq!(batcher.queue_depth(), 0);

        let registry_guard = registry.read().await;
        assert_eq!(registry_guard["w1"].stats.events_persisted(), 3);
        drop(registry_guard);

        batcher.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn time_trigger_flushes_a_partial_batch() {
        let backend = MemoryBackend::new();
        let config = test_config().with_batch_size(100);
        let (batcher, registry) = pipeline(&backend, &config);
        register(&registry, "w1").await;

        batcher
            .sink()
            .submit(SubjectEvent::new("w1", 1, "alice"))
            .await
            .unwrap();

        // Nothing before the timeout elapses
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(batcher.events_persisted(), 0);

        tokio::time::sleep(Duration::from_secs(5)).await;
        wait_for_persisted(&batcher, 1).await;
        assert_eq!(backend.row("w1", 1).unwrap().subject_label, "alice");

        batcher.shutdown().await;
    }

    #[tokio::test]
    async fn replayed_subject_merges_to_latest_label() {
        let backend = MemoryBackend::new();
        let config = test_config().with_batch_size(2);
        let (batcher, registry) = pipeline(&backend, &config);
        register(&registry, "w1").await;

        let sink = batcher.sink();
        sink.submit(SubjectEvent::new("w1", 42, "old-name"))
            .await
            .unwrap();
        sink.submit(SubjectEvent::new("w1", 42, "new-name"))
            .await
            .unwrap();

        wait_for_persisted(&batcher, 2).await;
        let rows = backend.rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(
            backend.row("w1", 42).unwrap().subject_label,
            "new-name"
        );

        batcher.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_flushes_everything_still_queued() {
        let backend = MemoryBackend::new();
        let config = test_config().with_batch_size(100);
        let (batcher, registry) = pipeline(&backend, &config);
        register(&registry, "w1").await;

        let sink = batcher.sink();
        for i in 0..4 {
            sink.submit(SubjectEvent::new("w1", i, format!("user-{i}")))
                .await
                .unwrap();
        }

        // Far below batch_size and well before the time trigger
        batcher.shutdown().await;
        assert_eq!(backend.rows().len(), 4);
    }

    #[tokio::test]
    async fn failed_flush_drops_the_batch_and_returns_permits() {
        let backend = MemoryBackend::new();
        let config = test_config().with_batch_size(2).with_admission_limit(2);
        let (batcher, registry) = pipeline(&backend, &config);
        register(&registry, "w1").await;

        backend.fail_next_commits(1);
        let sink = batcher.sink();
        sink.submit(SubjectEvent::new("w1", 1, "a")).await.unwrap();
        sink.submit(SubjectEvent::new("w1", 2, "b")).await.unwrap();

        // First batch is dropped; with the permits returned, a second
        // batch can be admitted and persists normally
        sink.submit(SubjectEvent::new("w1", 3, "c")).await.unwrap();
        sink.submit(SubjectEvent::new("w1", 4, "d")).await.unwrap();

        wait_for_persisted(&batcher, 2).await;
        let rows = backend.rows();
        assert!(backend.row("w1", 1).is_none());
        assert!(backend.row("w1", 2).is_none());
        assert!(backend.row("w1", 3).is_some());
        assert!(backend.row("w1", 4).is_some());
        assert_eq!(rows.len(), 2);

        batcher.shutdown().await;
    }

    #[tokio::test]
    async fn submit_after_shutdown_is_refused() {
        let backend = MemoryBackend::new();
        let config = test_config();
        let (batcher, _registry) = pipeline(&backend, &config);

        let sink = batcher.sink();
        batcher.shutdown().await;

        let err = sink
            .submit(SubjectEvent::new("w1", 1, "late"))
            .await
            .unwrap_err();
        assert!(matches!(err, FleetError::ShuttingDown));
    }
}
