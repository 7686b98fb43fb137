// Fleet runtime
//
// This crate provides the concurrency layer of botfleet:
// - AdmissionGate: system-wide bound on in-flight submissions
// - EventBatcher: single-consumer size-or-time batching over the pool
// - WorkerSupervisor: worker lifecycle under a capacity cap
// - Fleet: the wired-together facade the daemon and tests drive
// - sources: Telegram long-polling production connector + scripted fake

pub mod admission;
pub mod batcher;
pub mod fleet;
pub mod registry;
pub mod sources;
pub mod supervisor;

pub use admission::AdmissionGate;
pub use batcher::{EventBatcher, EventSink};
pub use fleet::{Fleet, FleetMetrics};
pub use registry::{new_registry, WorkerRecord, WorkerRegistry, WorkerStats};
pub use sources::{ScriptHandle, ScriptedConnector, TelegramConnector};
pub use supervisor::WorkerSupervisor;
