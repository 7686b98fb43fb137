// In-memory backing store for tests and examples
//
// Mirrors the Postgres backend's transaction semantics: upserts issued
// inside a transaction are staged on the connection and only merged into
// the shared table on commit. Failure-injection knobs drive the pool's
// validation/retry paths.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use botfleet_core::WorkerId;

use crate::connection::{ConnectionFactory, StoreConnection};
use crate::error::StoreError;
use crate::models::SubjectUpsert;

/// One stored (worker, subject) record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectRecord {
    pub subject_label: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct MemoryState {
    rows: HashMap<(WorkerId, i64), SubjectRecord>,
    fail_pings: usize,
    fail_connects: usize,
    fail_commits: usize,
    connects: usize,
}

/// Shared in-memory table, cloneable across factory and connections
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all stored rows
    pub fn rows(&self) -> HashMap<(WorkerId, i64), SubjectRecord> {
        self.state.lock().unwrap().rows.clone()
    }

    /// Look up one stored row
    pub fn row(&self, worker_id: &str, subject_id: i64) -> Option<SubjectRecord> {
        self.state
            .lock()
            .unwrap()
            .rows
            .get(&(worker_id.to_string(), subject_id))
            .cloned()
    }

    /// How many connections have ever been created
    pub fn connects(&self) -> usize {
        self.state.lock().unwrap().connects
    }

    /// Make the next `n` liveness probes fail
    pub fn fail_next_pings(&self, n: usize) {
        self.state.lock().unwrap().fail_pings = n;
    }

    /// Make the next `n` connection attempts fail
    pub fn fail_next_connects(&self, n: usize) {
        self.state.lock().unwrap().fail_connects = n;
    }

    /// Make the next `n` commits fail
    pub fn fail_next_commits(&self, n: usize) {
        self.state.lock().unwrap().fail_commits = n;
    }

    fn apply(&self, staged: Vec<SubjectUpsert>) {
        let mut state = self.state.lock().unwrap();
        for row in staged {
            state
                .rows
                .entry((row.worker_id, row.subject_id))
                .and_modify(|existing| {
                    existing.subject_label = row.subject_label.clone();
                    existing.last_seen = row.seen_at;
                })
                .or_insert(SubjectRecord {
                    subject_label: row.subject_label,
                    first_seen: row.seen_at,
                    last_seen: row.seen_at,
                });
        }
    }
}

/// Factory producing in-memory connections
#[derive(Clone)]
pub struct MemoryConnectionFactory {
    backend: MemoryBackend,
}

impl MemoryConnectionFactory {
    pub fn new(backend: MemoryBackend) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl ConnectionFactory for MemoryConnectionFactory {
    type Conn = MemoryStoreConnection;

    async fn connect(&self) -> Result<MemoryStoreConnection, StoreError> {
        let id = {
            let mut state = self.backend.state.lock().unwrap();
            if state.fail_connects > 0 {
                state.fail_connects -= 1;
                return Err(StoreError::ConnectionLost(
                    "injected connect failure".into(),
                ));
            }
            state.connects += 1;
            state.connects
        };
        Ok(MemoryStoreConnection {
            backend: self.backend.clone(),
            id,
            staged: Vec::new(),
            in_tx: false,
        })
    }
}

/// One in-memory connection with transaction staging
#[derive(Debug)]
pub struct MemoryStoreConnection {
    backend: MemoryBackend,
    id: usize,
    staged: Vec<SubjectUpsert>,
    in_tx: bool,
}

impl MemoryStoreConnection {
    /// Unique id of this connection, for handout assertions
    pub fn id(&self) -> usize {
        self.id
    }
}

#[async_trait]
impl StoreConnection for MemoryStoreConnection {
    async fn ping(&mut self) -> Result<(), StoreError> {
        let mut state = self.backend.state.lock().unwrap();
        if state.fail_pings > 0 {
            state.fail_pings -= 1;
            return Err(StoreError::ConnectionLost("injected ping failure".into()));
        }
        Ok(())
    }

    async fn begin(&mut self) -> Result<(), StoreError> {
        self.staged.clear();
        self.in_tx = true;
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        let staged = std::mem::take(&mut self.staged);
        self.in_tx = false;
        {
            let mut state = self.backend.state.lock().unwrap();
            if state.fail_commits > 0 {
                state.fail_commits -= 1;
                return Err(StoreError::Backend("injected commit failure".into()));
            }
        }
        self.backend.apply(staged);
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        self.staged.clear();
        self.in_tx = false;
        Ok(())
    }

    async fn upsert_subject(&mut self, row: &SubjectUpsert) -> Result<(), StoreError> {
        if self.in_tx {
            self.staged.push(row.clone());
        } else {
            self.backend.apply(vec![row.clone()]);
        }
        Ok(())
    }

    async fn close(self) -> Result<(), StoreError> {
        Ok(())
    }
}
