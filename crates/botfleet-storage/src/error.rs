// Error types for the storage layer

use std::time::Duration;

use thiserror::Error;

/// Errors from a backing-store connection
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store rejected the operation
    #[error("backing store error: {0}")]
    Backend(String),

    /// The connection is no longer usable
    #[error("connection lost: {0}")]
    ConnectionLost(String),
}

impl StoreError {
    /// Create a backend error
    pub fn backend(msg: impl Into<String>) -> Self {
        StoreError::Backend(msg.into())
    }
}

/// Errors from the connection pool
#[derive(Debug, Error)]
pub enum PoolError {
    /// The pool has been shut down; waiters are woken with this error
    #[error("connection pool is shut down")]
    Shutdown,

    /// No connection became available within the acquire timeout
    #[error("timed out after {0:?} waiting for a connection")]
    Timeout(Duration),

    /// Every attempt produced an invalid connection or a connect failure
    #[error("no valid connection after {attempts} attempts")]
    Exhausted { attempts: u32 },

    /// A store operation inside a pooled call failed
    #[error(transparent)]
    Store(#[from] StoreError),
}
