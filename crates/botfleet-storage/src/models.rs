// Row models for the persistence layer

use botfleet_core::{SubjectEvent, WorkerId};
use chrono::{DateTime, Utc};

/// One merge into the (worker, subject) table.
///
/// Idempotent under replay: inserting twice with the same key updates the
/// label and last-seen timestamp instead of adding a row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectUpsert {
    pub worker_id: WorkerId,
    pub subject_id: i64,
    pub subject_label: String,
    pub seen_at: DateTime<Utc>,
}

impl From<&SubjectEvent> for SubjectUpsert {
    fn from(event: &SubjectEvent) -> Self {
        Self {
            worker_id: event.worker_id.clone(),
            subject_id: event.subject_id,
            subject_label: event.subject_label.clone(),
            seen_at: event.observed_at,
        }
    }
}
