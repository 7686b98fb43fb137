// Event types flowing from workers into the persistence pipeline

use chrono::{DateTime, Utc};

use crate::worker::WorkerId;

/// One unit of work: a subject sighting reported by a worker.
///
/// Immutable once created. Owned by the batching queue until consumed
/// into a batch, discarded after persistence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectEvent {
    /// The reporting worker (its encrypted credential)
    pub worker_id: WorkerId,
    /// External subject identifier (user id)
    pub subject_id: i64,
    /// Subject label (username) at the time of the sighting
    pub subject_label: String,
    /// When the worker observed the event
    pub observed_at: DateTime<Utc>,
}

impl SubjectEvent {
    pub fn new(worker_id: impl Into<WorkerId>, subject_id: i64, label: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            subject_id,
            subject_label: label.into(),
            observed_at: Utc::now(),
        }
    }
}
