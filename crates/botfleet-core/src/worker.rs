// Worker lifecycle types
//
// A worker is identified by its encrypted credential: the registry key,
// the persistence key, and the only form the token ever takes outside a
// running task.

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Worker identifier: the encrypted credential string
pub type WorkerId = String;

/// Lifecycle states of a managed worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    /// Registered, task launched, source not yet attached
    Starting,
    /// Attached and forwarding events
    Running,
    /// Attached but not forwarding; toggled by pause/resume
    Paused,
    /// Cancellation requested, task not yet terminated
    Stopping,
    /// Task terminated
    Stopped,
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkerState::Starting => "starting",
            WorkerState::Running => "running",
            WorkerState::Paused => "paused",
            WorkerState::Stopping => "stopping",
            WorkerState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Registration input for a new worker
#[derive(Debug, Clone)]
pub struct WorkerSpec {
    /// Encrypted credential; doubles as the worker id
    pub encrypted_token: String,
    /// Display name
    pub name: String,
}

impl WorkerSpec {
    pub fn new(encrypted_token: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            encrypted_token: encrypted_token.into(),
            name: name.into(),
        }
    }
}

/// Point-in-time copy of one registry entry.
///
/// Snapshots are detached from the live record; counters will not move
/// under the reader.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerSnapshot {
    pub id: WorkerId,
    pub name: String,
    pub state: WorkerState,
    pub events_seen: u64,
    pub events_persisted: u64,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

/// Check a decrypted credential against the required shape:
/// a numeric id, a colon, and a 35-character token.
pub fn is_valid_token(token: &str) -> bool {
    static TOKEN_RE: OnceLock<Regex> = OnceLock::new();
    let re = TOKEN_RE.get_or_init(|| {
        Regex::new(r"^[0-9]+:[a-zA-Z0-9_-]{35}$").expect("token regex is well-formed")
    });
    re.is_match(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_well_formed_token() {
        assert!(is_valid_token(
            "123456789:AAHrZn9cXWp0qkLm3vTyBdEfGh1iJkLmNo5"
        ));
    }

    #[test]
    fn rejects_malformed_tokens() {
        // no colon
        assert!(!is_valid_token("123456789AAHrZn9cXWp0qkLm3vTyBdEfGh1iJk"));
        // token part too short
        assert!(!is_valid_token("123456789:short"));
        // non-numeric id
        assert!(!is_valid_token(
            "abc:AAHrZn9cXWp0qkLm3vTyBdEfGh1iJkLmNo5"
        ));
        // illegal character in token part
        assert!(!is_valid_token(
            "123456789:AAHrZn9cXWp0qkLm3vTyBdEfGh1iJkLmN!5"
        ));
        assert!(!is_valid_token(""));
    }
}
