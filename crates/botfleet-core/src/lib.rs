// Core fleet abstractions
//
// This crate provides the domain types shared by the storage and runtime
// crates.
//
// Key design decisions:
// - Capability seams (CredentialVault, EventSource, SourceConnector) are
//   traits with one production implementation and one in-memory fake each
// - Worker ids are the encrypted credential strings; tasks hold only ids,
//   never registry back-pointers
// - Configuration is an explicitly constructed value passed into component
//   constructors, no ambient globals

pub mod config;
pub mod error;
pub mod event;
pub mod traits;
pub mod worker;

// Re-exports for convenience
pub use config::FleetConfig;
pub use error::{FleetError, Result, SourceError, VaultError};
pub use event::SubjectEvent;
pub use traits::{CredentialVault, EventSource, IdentityVault, SourceConnector, SourceEvent};
pub use worker::{is_valid_token, WorkerId, WorkerSnapshot, WorkerSpec, WorkerState};
