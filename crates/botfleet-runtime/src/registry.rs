// Worker registry: the arena holding one record per managed worker
//
// Records are keyed by worker id (the encrypted credential). Tasks never
// hold a record reference, only the id plus the shared handles below; all
// record mutation happens through the registry's write lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;

use botfleet_core::{WorkerId, WorkerSnapshot, WorkerState};

/// Shared registry of worker records
pub type WorkerRegistry = Arc<RwLock<HashMap<WorkerId, WorkerRecord>>>;

pub fn new_registry() -> WorkerRegistry {
    Arc::new(RwLock::new(HashMap::new()))
}

/// Monotonic per-worker counters, shared between the record, the worker
/// task, and the batcher. Only ever incremented.
#[derive(Debug)]
pub struct WorkerStats {
    events_seen: AtomicU64,
    events_persisted: AtomicU64,
    last_activity_ms: AtomicI64,
}

impl WorkerStats {
    pub fn new() -> Self {
        Self {
            events_seen: AtomicU64::new(0),
            events_persisted: AtomicU64::new(0),
            last_activity_ms: AtomicI64::new(Utc::now().timestamp_millis()),
        }
    }

    /// Count one received event and refresh the activity timestamp
    pub fn record_seen(&self) {
        self.events_seen.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    /// Count `n` persisted events
    pub fn add_persisted(&self, n: u64) {
        self.events_persisted.fetch_add(n, Ordering::Relaxed);
    }

    pub fn touch(&self) {
        self.last_activity_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn events_seen(&self) -> u64 {
        self.events_seen.load(Ordering::Relaxed)
    }

    pub fn events_persisted(&self) -> u64 {
        self.events_persisted.load(Ordering::Relaxed)
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        let ms = self.last_activity_ms.load(Ordering::Relaxed);
        Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
    }
}

impl Default for WorkerStats {
    fn default() -> Self {
        Self::new()
    }
}

/// One registry entry
pub struct WorkerRecord {
    pub name: String,
    pub state: WorkerState,
    pub stats: Arc<WorkerStats>,
    pub created_at: DateTime<Utc>,
    /// Read by the task between receives; a paused worker keeps its
    /// attachment but stops forwarding
    pub paused: Arc<AtomicBool>,
    /// Cancellation signal observed at the task's receive boundary
    pub cancel: watch::Sender<bool>,
    pub task: Option<JoinHandle<()>>,
}

impl WorkerRecord {
    /// Create a record in `Starting` state, returning the cancel receiver
    /// for the worker task.
    pub fn new(name: impl Into<String>) -> (Self, watch::Receiver<bool>) {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let record = Self {
            name: name.into(),
            state: WorkerState::Starting,
            stats: Arc::new(WorkerStats::new()),
            created_at: Utc::now(),
            paused: Arc::new(AtomicBool::new(false)),
            cancel: cancel_tx,
            task: None,
        };
        (record, cancel_rx)
    }

    /// Detached point-in-time copy of this record
    pub fn snapshot(&self, id: &str) -> WorkerSnapshot {
        WorkerSnapshot {
            id: id.to_string(),
            name: self.name.clone(),
            state: self.state,
            events_seen: self.stats.events_seen(),
            events_persisted: self.stats.events_persisted(),
            created_at: self.created_at,
            last_activity: self.stats.last_activity(),
        }
    }
}
