// Connection seam between the pool and the backing store
//
// The pool is generic over these traits so it can be exercised against the
// in-memory backend without a database.

use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::SubjectUpsert;

/// One live connection to the backing store.
///
/// The pool owns a connection while it is idle; a caller owns it while it
/// is checked out. `close` consumes the connection and must only be called
/// when it leaves the pool for good.
#[async_trait]
pub trait StoreConnection: Send + 'static {
    /// Liveness probe. A failing probe marks the connection unusable.
    async fn ping(&mut self) -> Result<(), StoreError>;

    /// Open a transaction
    async fn begin(&mut self) -> Result<(), StoreError>;

    /// Commit the open transaction
    async fn commit(&mut self) -> Result<(), StoreError>;

    /// Roll back the open transaction
    async fn rollback(&mut self) -> Result<(), StoreError>;

    /// Merge one (worker, subject) record: insert if absent, otherwise
    /// update label and last-seen timestamp
    async fn upsert_subject(&mut self, row: &SubjectUpsert) -> Result<(), StoreError>;

    /// Disconnect and drop the connection
    async fn close(self) -> Result<(), StoreError>;
}

/// Creates new connections for the pool, up to its configured maximum
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    type Conn: StoreConnection;

    async fn connect(&self) -> Result<Self::Conn, StoreError>;
}
