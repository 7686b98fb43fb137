// Fleet facade: wires pool, batcher, and supervisor into one surface
//
// The administrative surface is plain calls returning snapshots; UI
// concerns live with whatever drives this (daemon, chat frontend).
// Shutdown is ordered: workers first (producers stop), then the batcher
// (final flush), then the pool (drain).

use std::sync::Arc;

use tracing::info;

use botfleet_core::{
    is_valid_token, CredentialVault, FleetConfig, FleetError, Result, SourceConnector,
    WorkerId, WorkerSnapshot, WorkerSpec,
};
use botfleet_storage::{ConnectionFactory, ConnectionPool, PoolStats};

use crate::batcher::EventBatcher;
use crate::registry::new_registry;
use crate::supervisor::WorkerSupervisor;

/// Aggregate metrics for the administrative surface
#[derive(Debug, Clone)]
pub struct FleetMetrics {
    /// Registered workers
    pub workers: usize,
    /// Workers currently in `Running` state
    pub running: usize,
    /// Events admitted but not yet drained into a batch
    pub queue_depth: usize,
    /// Events successfully persisted since startup
    pub events_persisted: u64,
    pub pool: PoolStats,
}

/// One process-wide fleet: supervisor + batcher + pool
pub struct Fleet<F: ConnectionFactory> {
    vault: Arc<dyn CredentialVault>,
    pool: Arc<ConnectionPool<F>>,
    batcher: EventBatcher,
    supervisor: WorkerSupervisor,
}

impl<F: ConnectionFactory> Fleet<F> {
    pub fn new(
        config: FleetConfig,
        factory: F,
        vault: Arc<dyn CredentialVault>,
        connector: Arc<dyn SourceConnector>,
    ) -> Result<Self> {
        config.validate()?;

        let pool = Arc::new(ConnectionPool::new(factory, &config));
        let registry = new_registry();
        let batcher = EventBatcher::spawn(pool.clone(), registry.clone(), &config);
        let supervisor = WorkerSupervisor::new(
            registry,
            vault.clone(),
            connector,
            batcher.sink(),
            &config,
        );

        Ok(Self {
            vault,
            pool,
            batcher,
            supervisor,
        })
    }

    /// Start a worker from an already-encrypted credential
    pub async fn start_worker(&self, spec: WorkerSpec) -> Result<()> {
        self.supervisor.start(spec).await
    }

    /// Encrypt a plaintext token and start a worker for it.
    /// Returns the worker id (the encrypted credential).
    pub async fn adopt(&self, token: &str, name: &str) -> Result<WorkerId> {
        if !is_valid_token(token) {
            return Err(FleetError::invalid_credential(
                name,
                "token does not match the required shape",
            ));
        }
        let encrypted = self
            .vault
            .encrypt(token)
            .map_err(|e| FleetError::invalid_credential(name, e.to_string()))?;
        self.supervisor
            .start(WorkerSpec::new(encrypted.clone(), name))
            .await?;
        Ok(encrypted)
    }

    pub async fn stop_worker(&self, id: &str) -> bool {
        self.supervisor.stop(id).await
    }

    pub async fn pause_worker(&self, id: &str) -> bool {
        self.supervisor.pause(id).await
    }

    pub async fn resume_worker(&self, id: &str) -> bool {
        self.supervisor.resume(id).await
    }

    pub async fn list_workers(&self) -> Vec<WorkerSnapshot> {
        self.supervisor.list_workers().await
    }

    pub async fn metrics(&self) -> FleetMetrics {
        FleetMetrics {
            workers: self.supervisor.worker_count().await,
            running: self.supervisor.running_count().await,
            queue_depth: self.batcher.queue_depth(),
            events_persisted: self.batcher.events_persisted(),
            pool: self.pool.stats().await,
        }
    }

    /// Stop all workers, flush whatever is still queued, drain the pool.
    /// Proceeds through every phase even if individual operations fail.
    pub async fn shutdown(self) {
        info!("fleet shutting down");
        self.supervisor.shutdown().await;
        self.batcher.shutdown().await;
        self.pool.shutdown().await;
        info!("fleet shutdown complete");
    }
}
