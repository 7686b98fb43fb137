// Storage layer for botfleet
//
// This crate provides:
// - ConnectionPool: bounded, validated pool with blocking acquisition
// - StoreConnection/ConnectionFactory: the seam between pool and store
// - PgConnectionFactory: production Postgres backend (sqlx)
// - MemoryBackend: in-memory backend for tests and examples
// - TokenVault: AES-256-GCM credential vault

pub mod connection;
pub mod error;
pub mod memory;
pub mod models;
pub mod pg;
pub mod pool;
pub mod vault;

pub use connection::{ConnectionFactory, StoreConnection};
pub use error::{PoolError, StoreError};
pub use memory::{MemoryBackend, MemoryConnectionFactory, MemoryStoreConnection, SubjectRecord};
pub use models::SubjectUpsert;
pub use pg::{PgConnectionFactory, PgStoreConnection};
pub use pool::{ConnectionPool, PoolStats};
pub use vault::{generate_vault_key, TokenVault, VAULT_KEY_ENV};
