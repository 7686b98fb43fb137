// Bounded connection pool with validation-before-handout
//
// Key design decisions:
// - Connections are created on demand up to `max_connections`; the live
//   count includes checked-out connections, so the bound holds globally
// - Every handout is preceded by a liveness probe; a failed probe destroys
//   the connection and frees its capacity slot before the next attempt
// - The state mutex is never held across connect/ping/close calls

use std::collections::VecDeque;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::{debug, warn};

use botfleet_core::FleetConfig;

use crate::connection::{ConnectionFactory, StoreConnection};
use crate::error::{PoolError, StoreError};

/// Point-in-time pool counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Live connections, idle plus checked out
    pub total: usize,
    /// Connections currently idle in the pool
    pub idle: usize,
    /// Configured maximum
    pub max: usize,
}

struct PoolState<C> {
    idle: VecDeque<C>,
    total: usize,
    shutdown: bool,
}

enum Checkout<C> {
    /// An idle connection was available
    Idle(C),
    /// Capacity was reserved for a fresh connection
    Reserved,
    /// The wait elapsed without either
    TimedOut,
}

/// Bounded, validated pool of backing-store connections
pub struct ConnectionPool<F: ConnectionFactory> {
    factory: F,
    max_connections: usize,
    acquire_timeout: Duration,
    retry_attempts: u32,
    state: Mutex<PoolState<F::Conn>>,
    available: Notify,
}

impl<F: ConnectionFactory> ConnectionPool<F> {
    pub fn new(factory: F, config: &FleetConfig) -> Self {
        Self {
            factory,
            max_connections: config.max_connections,
            acquire_timeout: config.acquire_timeout,
            retry_attempts: config.retry_attempts,
            state: Mutex::new(PoolState {
                idle: VecDeque::new(),
                total: 0,
                shutdown: false,
            }),
            available: Notify::new(),
        }
    }

    /// Check out a validated connection.
    ///
    /// Blocks until an idle connection is available or capacity allows
    /// creating one, retrying up to the configured attempt count when a
    /// candidate fails its liveness probe. Each attempt waits at most the
    /// acquire timeout.
    pub async fn acquire(&self) -> Result<F::Conn, PoolError> {
        let mut timed_out = false;

        for attempt in 1..=self.retry_attempts {
            match self.checkout().await? {
                Checkout::Idle(conn) => {
                    if let Some(conn) = self.probe(conn, attempt).await {
                        return Ok(conn);
                    }
                }
                Checkout::Reserved => match self.factory.connect().await {
                    Ok(conn) => {
                        if let Some(conn) = self.probe(conn, attempt).await {
                            return Ok(conn);
                        }
                    }
                    Err(e) => {
                        warn!(attempt, error = %e, "connection creation failed");
                        self.forfeit_reservation().await;
                    }
                },
                Checkout::TimedOut => {
                    timed_out = true;
                }
            }
        }

        if timed_out {
            Err(PoolError::Timeout(self.acquire_timeout))
        } else {
            Err(PoolError::Exhausted {
                attempts: self.retry_attempts,
            })
        }
    }

    /// Return a connection to the pool.
    ///
    /// Destroys it instead if the pool is shutting down or the connection
    /// fails validation; otherwise exactly one waiter is woken.
    pub async fn release(&self, mut conn: F::Conn) {
        if self.state.lock().await.shutdown {
            self.destroy(conn).await;
            return;
        }

        if let Err(e) = conn.ping().await {
            warn!(error = %e, "connection failed validation on release, destroying");
            self.destroy(conn).await;
            return;
        }

        let mut state = self.state.lock().await;
        if state.shutdown {
            // Shutdown began while we were validating
            drop(state);
            self.destroy(conn).await;
            return;
        }
        state.idle.push_back(conn);
        drop(state);
        self.available.notify_one();
    }

    /// Run `work` inside a transaction on a pooled connection.
    ///
    /// Commits on success, rolls back on any failure raised by `work`, and
    /// releases the connection on every path before re-raising the original
    /// error.
    pub async fn execute_transaction<T, W>(&self, work: W) -> Result<T, PoolError>
    where
        T: Send,
        W: for<'c> FnOnce(&'c mut F::Conn) -> BoxFuture<'c, Result<T, StoreError>> + Send,
    {
        let mut conn = self.acquire().await?;

        if let Err(e) = conn.begin().await {
            self.release(conn).await;
            return Err(e.into());
        }

        match work(&mut conn).await {
            Ok(value) => {
                if let Err(e) = conn.commit().await {
                    self.release(conn).await;
                    return Err(e.into());
                }
                self.release(conn).await;
                Ok(value)
            }
            Err(e) => {
                if let Err(rb) = conn.rollback().await {
                    warn!(error = %rb, "rollback failed after transaction error");
                }
                self.release(conn).await;
                Err(e.into())
            }
        }
    }

    /// Close the pool: wake all waiters with `PoolError::Shutdown` and
    /// destroy every idle connection. Checked-out connections are destroyed
    /// as they come back through `release`. Idempotent.
    pub async fn shutdown(&self) {
        let drained: Vec<F::Conn> = {
            let mut state = self.state.lock().await;
            if state.shutdown {
                return;
            }
            state.shutdown = true;
            state.idle.drain(..).collect()
        };
        self.available.notify_waiters();

        let count = drained.len();
        for conn in drained {
            if let Err(e) = conn.close().await {
                debug!(error = %e, "error closing idle connection during shutdown");
            }
        }

        let mut state = self.state.lock().await;
        state.total = state.total.saturating_sub(count);
    }

    /// Current pool counters
    pub async fn stats(&self) -> PoolStats {
        let state = self.state.lock().await;
        PoolStats {
            total: state.total,
            idle: state.idle.len(),
            max: self.max_connections,
        }
    }

    /// Wait for an idle connection or a free capacity slot, up to the
    /// acquire timeout.
    async fn checkout(&self) -> Result<Checkout<F::Conn>, PoolError> {
        let deadline = Instant::now() + self.acquire_timeout;

        loop {
            let notified = self.available.notified();
            {
                let mut state = self.state.lock().await;
                if state.shutdown {
                    return Err(PoolError::Shutdown);
                }
                if let Some(conn) = state.idle.pop_front() {
                    return Ok(Checkout::Idle(conn));
                }
                if state.total < self.max_connections {
                    // Reserve the slot before connecting outside the lock
                    state.total += 1;
                    return Ok(Checkout::Reserved);
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(Checkout::TimedOut);
            }
            if tokio::time::timeout(remaining, notified).await.is_err() {
                return Ok(Checkout::TimedOut);
            }
        }
    }

    /// Validate a candidate connection; destroys it on failure.
    async fn probe(&self, mut conn: F::Conn, attempt: u32) -> Option<F::Conn> {
        match conn.ping().await {
            Ok(()) => Some(conn),
            Err(e) => {
                warn!(attempt, error = %e, "connection failed liveness probe, discarding");
                self.destroy(conn).await;
                None
            }
        }
    }

    /// Close a connection and give its capacity slot back
    async fn destroy(&self, conn: F::Conn) {
        if let Err(e) = conn.close().await {
            debug!(error = %e, "error closing destroyed connection");
        }
        self.forfeit_reservation().await;
    }

    /// Decrement the live count and wake one waiter (capacity freed)
    async fn forfeit_reservation(&self) {
        let mut state = self.state.lock().await;
        state.total = state.total.saturating_sub(1);
        drop(state);
        self.available.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::memory::{MemoryBackend, MemoryConnectionFactory};
    use crate::models::SubjectUpsert;
    use botfleet_core::FleetConfig;
    use chrono::Utc;

    fn pool_with(
        backend: &MemoryBackend,
        max: usize,
        timeout_ms: u64,
    ) -> ConnectionPool<MemoryConnectionFactory> {
        let config = FleetConfig::default()
            .with_max_connections(max)
            .with_acquire_timeout(Duration::from_millis(timeout_ms));
        ConnectionPool::new(MemoryConnectionFactory::new(backend.clone()), &config)
    }

    fn upsert(worker: &str, subject: i64, label: &str) -> SubjectUpsert {
        SubjectUpsert {
            worker_id: worker.to_string(),
            subject_id: subject,
            subject_label: label.to_string(),
            seen_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn live_count_never_exceeds_max() {
        let backend = MemoryBackend::new();
        let pool = pool_with(&backend, 2, 50);

        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();

        // Third acquire must time out rather than create a connection
        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, PoolError::Timeout(_)));

        let stats = pool.stats().await;
        assert_eq!(stats.total, 2);
        assert_eq!(stats.idle, 0);

        pool.release(a).await;
        pool.release(b).await;
        assert_eq!(pool.stats().await.idle, 2);
    }

    #[tokio::test]
    async fn concurrent_acquirers_never_share_a_connection() {
        let backend = MemoryBackend::new();
        let pool = Arc::new(pool_with(&backend, 4, 1_000));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let pool = pool.clone();
            handles.push(tokio::spawn(
                async move { pool.acquire().await.unwrap().id() },
            ));
        }

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap());
        }
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 4, "two callers received the same connection");
    }

    #[tokio::test]
    async fn failed_probe_discards_and_retries() {
        let backend = MemoryBackend::new();
        let pool = pool_with(&backend, 2, 50);

        backend.fail_next_pings(1);
        let conn = pool.acquire().await.unwrap();

        // First candidate was destroyed, a second one was created
        assert_eq!(backend.connects(), 2);
        assert_eq!(pool.stats().await.total, 1);

        pool.release(conn).await;
    }

    #[tokio::test]
    async fn acquire_exhausts_after_repeated_probe_failures() {
        let backend = MemoryBackend::new();
        let pool = pool_with(&backend, 2, 50);

        backend.fail_next_pings(16);
        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, PoolError::Exhausted { attempts: 3 }));

        // Nothing leaked: every failed candidate gave its slot back
        assert_eq!(pool.stats().await.total, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn waiter_is_woken_by_release() {
        let backend = MemoryBackend::new();
        let pool = Arc::new(pool_with(&backend, 1, 5_000));

        let held = pool.acquire().await.unwrap();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        pool.release(held).await;

        let conn = waiter.await.unwrap().unwrap();
        pool.release(conn).await;
        assert_eq!(pool.stats().await.total, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_wakes_waiters_with_shutdown_error() {
        let backend = MemoryBackend::new();
        let pool = Arc::new(pool_with(&backend, 1, 60_000));

        let held = pool.acquire().await.unwrap();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        pool.shutdown().await;

        let err = waiter.await.unwrap().unwrap_err();
        assert!(matches!(err, PoolError::Shutdown));

        // Checked-out connection is destroyed on release after shutdown
        pool.release(held).await;
        assert_eq!(pool.stats().await.total, 0);
    }

    #[tokio::test]
    async fn shutdown_is_idempotent_and_drains_idle() {
        let backend = MemoryBackend::new();
        let pool = pool_with(&backend, 2, 50);

        let conn = pool.acquire().await.unwrap();
        pool.release(conn).await;
        assert_eq!(pool.stats().await.idle, 1);

        pool.shutdown().await;
        pool.shutdown().await;

        let stats = pool.stats().await;
        assert_eq!(stats.total, 0);
        assert_eq!(stats.idle, 0);

        assert!(matches!(pool.acquire().await, Err(PoolError::Shutdown)));
    }

    #[tokio::test]
    async fn transaction_commits_and_releases() {
        let backend = MemoryBackend::new();
        let pool = pool_with(&backend, 2, 50);

        let row = upsert("worker-a", 7, "alice");
        pool.execute_transaction(|conn| {
            Box::pin(async move {
                conn.upsert_subject(&row).await?;
                Ok(())
            })
        })
        .await
        .unwrap();

        let stored = backend.row("worker-a", 7).unwrap();
        assert_eq!(stored.subject_label, "alice");
        // Connection returned to the idle set
        assert_eq!(pool.stats().await.idle, 1);
    }

    #[tokio::test]
    async fn transaction_rolls_back_on_work_error() {
        let backend = MemoryBackend::new();
        let pool = pool_with(&backend, 2, 50);

        let row = upsert("worker-a", 7, "alice");
        let result: Result<(), PoolError> = pool
            .execute_transaction(|conn| {
                Box::pin(async move {
                    conn.upsert_subject(&row).await?;
                    Err(StoreError::backend("boom"))
                })
            })
            .await;

        assert!(matches!(result, Err(PoolError::Store(_))));
        // Rolled back: nothing was persisted, connection still released
        assert!(backend.row("worker-a", 7).is_none());
        assert_eq!(pool.stats().await.idle, 1);
    }

    #[tokio::test]
    async fn transaction_surfaces_commit_failure() {
        let backend = MemoryBackend::new();
        let pool = pool_with(&backend, 2, 50);

        backend.fail_next_commits(1);
        let row = upsert("worker-a", 7, "alice");
        let result: Result<(), PoolError> = pool
            .execute_transaction(|conn| {
                Box::pin(async move {
                    conn.upsert_subject(&row).await?;
                    Ok(())
                })
            })
            .await;

        assert!(matches!(result, Err(PoolError::Store(_))));
        assert!(backend.row("worker-a", 7).is_none());
    }
}
