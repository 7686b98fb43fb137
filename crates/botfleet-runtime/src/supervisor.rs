// Worker supervisor: registration, lifecycle control, and the per-worker
// receive task
//
// Key design decisions:
// - start() rendezvouses with the task over a oneshot so it never reports
//   success for a worker that cannot attach to its source
// - Cancellation is cooperative: the task races its cancel signal against
//   the next receive; stop() waits a bounded grace period, then aborts
// - A crash inside one worker's receive loop is contained there: the task
//   logs, deregisters itself, and no other worker or control call is
//   affected

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{oneshot, watch};
use tracing::{error, info, warn};

use botfleet_core::{
    is_valid_token, CredentialVault, FleetConfig, FleetError, Result, SourceConnector, SourceError,
    SubjectEvent, WorkerId, WorkerSnapshot, WorkerSpec, WorkerState,
};

use crate::batcher::EventSink;
use crate::registry::{WorkerRecord, WorkerRegistry, WorkerStats};

/// Manages worker tasks under the capacity cap
pub struct WorkerSupervisor {
    registry: WorkerRegistry,
    vault: Arc<dyn CredentialVault>,
    connector: Arc<dyn SourceConnector>,
    sink: EventSink,
    max_active_workers: usize,
    stop_grace: Duration,
}

impl WorkerSupervisor {
    pub fn new(
        registry: WorkerRegistry,
        vault: Arc<dyn CredentialVault>,
        connector: Arc<dyn SourceConnector>,
        sink: EventSink,
        config: &FleetConfig,
    ) -> Self {
        Self {
            registry,
            vault,
            connector,
            sink,
            max_active_workers: config.max_active_workers,
            stop_grace: config.stop_grace,
        }
    }

    /// Register and launch a worker.
    ///
    /// Returns only after the task has attached to its source (the worker
    /// is `Running`) or failed to (the record is removed again and the
    /// failure is returned).
    pub async fn start(&self, spec: WorkerSpec) -> Result<()> {
        let worker_id: WorkerId = spec.encrypted_token.clone();

        let token = self
            .vault
            .decrypt(&worker_id)
            .map_err(|e| FleetError::invalid_credential(&spec.name, e.to_string()))?;
        if !is_valid_token(&token) {
            return Err(FleetError::invalid_credential(
                &spec.name,
                "token does not match the required shape",
            ));
        }

        let (record, cancel_rx) = WorkerRecord::new(&spec.name);
        let stats = record.stats.clone();
        let paused = record.paused.clone();
        {
            let mut registry = self.registry.write().await;
            if registry.len() >= self.max_active_workers {
                return Err(FleetError::CapacityExceeded {
                    limit: self.max_active_workers,
                });
            }
            if registry.contains_key(&worker_id) {
                return Err(FleetError::DuplicateWorker(spec.name.clone()));
            }
            registry.insert(worker_id.clone(), record);
        }

        let (ready_tx, ready_rx) = oneshot::channel();
        let task = WorkerTask {
            id: worker_id.clone(),
            name: spec.name.clone(),
            connector: self.connector.clone(),
            sink: self.sink.clone(),
            stats,
            paused,
            cancel: cancel_rx,
            registry: self.registry.clone(),
        };
        let handle = tokio::spawn(task.run(token, ready_tx));

        {
            let mut registry = self.registry.write().await;
            if let Some(record) = registry.get_mut(&worker_id) {
                record.task = Some(handle);
            }
        }

        match ready_rx.await {
            Ok(Ok(())) => {
                let mut registry = self.registry.write().await;
                if let Some(record) = registry.get_mut(&worker_id) {
                    record.state = WorkerState::Running;
                }
                info!(worker = %spec.name, "worker running");
                Ok(())
            }
            Ok(Err(e)) => {
                self.registry.write().await.remove(&worker_id);
                Err(FleetError::attach(&spec.name, e.to_string()))
            }
            Err(_) => {
                self.registry.write().await.remove(&worker_id);
                Err(FleetError::attach(
                    &spec.name,
                    "worker task exited before attaching",
                ))
            }
        }
    }

    /// Request a worker to stop and wait for it to terminate.
    ///
    /// Waits up to the grace period for the task to observe the signal;
    /// an unresponsive task is aborted with a warning. Returns false for
    /// an unknown id.
    pub async fn stop(&self, id: &str) -> bool {
        let (name, handle) = {
            let mut registry = self.registry.write().await;
            match registry.get_mut(id) {
                None => return false,
                Some(record) => {
                    record.state = WorkerState::Stopping;
                    let _ = record.cancel.send(true);
                    (record.name.clone(), record.task.take())
                }
            }
        };

        if let Some(handle) = handle {
            let abort = handle.abort_handle();
            match tokio::time::timeout(self.stop_grace, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(worker = %name, error = %e, "worker task join error"),
                Err(_) => {
                    warn!(worker = %name, "worker did not stop within the grace period, aborting");
                    abort.abort();
                }
            }
        }

        self.registry.write().await.remove(id);
        info!(worker = %name, "worker stopped");
        true
    }

    /// Pause event forwarding. The worker keeps its source attachment and
    /// keeps receiving. Idempotent; false for an unknown or not-yet-running
    /// worker.
    pub async fn pause(&self, id: &str) -> bool {
        let mut registry = self.registry.write().await;
        match registry.get_mut(id) {
            Some(record)
                if matches!(record.state, WorkerState::Running | WorkerState::Paused) =>
            {
                record.state = WorkerState::Paused;
                record.paused.store(true, Ordering::Relaxed);
                true
            }
            _ => false,
        }
    }

    /// Resume event forwarding. Idempotent; false for an unknown or
    /// not-yet-running worker.
    pub async fn resume(&self, id: &str) -> bool {
        let mut registry = self.registry.write().await;
        match registry.get_mut(id) {
            Some(record)
                if matches!(record.state, WorkerState::Running | WorkerState::Paused) =>
            {
                record.state = WorkerState::Running;
                record.paused.store(false, Ordering::Relaxed);
                true
            }
            _ => false,
        }
    }

    /// Point-in-time snapshot of every registered worker, oldest first
    pub async fn list_workers(&self) -> Vec<WorkerSnapshot> {
        let registry = self.registry.read().await;
        let mut snapshots: Vec<WorkerSnapshot> = registry
            .iter()
            .map(|(id, record)| record.snapshot(id))
            .collect();
        snapshots.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        snapshots
    }

    pub async fn worker_count(&self) -> usize {
        self.registry.read().await.len()
    }

    pub async fn running_count(&self) -> usize {
        self.registry
            .read()
            .await
            .values()
            .filter(|record| record.state == WorkerState::Running)
            .count()
    }

    /// Stop every registered worker
    pub async fn shutdown(&self) {
        let ids: Vec<WorkerId> = self.registry.read().await.keys().cloned().collect();
        for id in ids {
            self.stop(&id).await;
        }
    }
}

enum Exit {
    /// Cancel signal observed
    Cancelled,
    /// The receive loop failed
    Crashed(SourceError),
    /// The batching pipeline refused the submission (process shutdown)
    SinkClosed,
}

struct WorkerTask {
    id: WorkerId,
    name: String,
    connector: Arc<dyn SourceConnector>,
    sink: EventSink,
    stats: Arc<WorkerStats>,
    paused: Arc<std::sync::atomic::AtomicBool>,
    cancel: watch::Receiver<bool>,
    registry: WorkerRegistry,
}

impl WorkerTask {
    async fn run(mut self, token: String, ready: oneshot::Sender<std::result::Result<(), SourceError>>) {
        let mut source = match self.connector.attach(&token).await {
            Ok(source) => {
                let _ = ready.send(Ok(()));
                source
            }
            Err(e) => {
                let _ = ready.send(Err(e));
                return;
            }
        };
        // The plaintext token dies with this scope; only the source keeps
        // whatever it needs for the transport
        drop(token);

        let exit = self.receive_loop(source.as_mut()).await;
        match exit {
            Exit::Cancelled | Exit::SinkClosed => {
                let mut registry = self.registry.write().await;
                if let Some(record) = registry.get_mut(&self.id) {
                    record.state = WorkerState::Stopped;
                }
            }
            Exit::Crashed(e) => {
                error!(worker = %self.name, error = %e, "worker receive loop failed, deregistering");
                self.registry.write().await.remove(&self.id);
            }
        }
    }

    async fn receive_loop(&mut self, source: &mut dyn botfleet_core::EventSource) -> Exit {
        loop {
            if *self.cancel.borrow() {
                return Exit::Cancelled;
            }
            tokio::select! {
                changed = self.cancel.changed() => {
                    if changed.is_err() || *self.cancel.borrow() {
                        return Exit::Cancelled;
                    }
                }
                received = source.next_event() => match received {
                    Ok(event) => {
                        self.stats.record_seen();
                        if self.paused.load(Ordering::Relaxed) {
                            // Received but not forwarded while paused
                            continue;
                        }
                        let event = SubjectEvent {
                            worker_id: self.id.clone(),
                            subject_id: event.subject_id,
                            subject_label: event.subject_label,
                            observed_at: Utc::now(),
                        };
                        if self.sink.submit(event).await.is_err() {
                            return Exit::SinkClosed;
                        }
                    }
                    Err(e) => return Exit::Crashed(e),
                }
            }
        }
    }
}
