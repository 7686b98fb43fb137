// Error types for the fleet control surface

use thiserror::Error;

/// Result type alias for fleet operations
pub type Result<T> = std::result::Result<T, FleetError>;

/// Errors surfaced by the supervisor and fleet facade
#[derive(Debug, Error)]
pub enum FleetError {
    /// Bad limits, malformed values. Fatal at the call site, never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Registry already holds `max_active_workers` entries
    #[error("worker capacity reached ({limit})")]
    CapacityExceeded { limit: usize },

    /// A worker with the same credential is already registered
    #[error("worker already registered: {0}")]
    DuplicateWorker(String),

    /// Credential failed to decrypt or does not match the required shape
    #[error("invalid credential for worker {worker}: {reason}")]
    InvalidCredential { worker: String, reason: String },

    /// The worker task could not attach to its message source
    #[error("source attach failed for worker {worker}: {reason}")]
    SourceAttach { worker: String, reason: String },

    /// The component has begun shutdown and no longer accepts work
    #[error("shutting down")]
    ShuttingDown,

    /// Internal error
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl FleetError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        FleetError::Configuration(msg.into())
    }

    /// Create an invalid-credential error
    pub fn invalid_credential(worker: impl Into<String>, reason: impl Into<String>) -> Self {
        FleetError::InvalidCredential {
            worker: worker.into(),
            reason: reason.into(),
        }
    }

    /// Create a source-attach error
    pub fn attach(worker: impl Into<String>, reason: impl Into<String>) -> Self {
        FleetError::SourceAttach {
            worker: worker.into(),
            reason: reason.into(),
        }
    }
}

/// Errors from the credential vault.
///
/// Decryption fails closed: any tampered or malformed input maps to
/// `Authentication`, never partial plaintext.
#[derive(Debug, Error)]
pub enum VaultError {
    /// Key material is missing or has the wrong length/encoding
    #[error("invalid vault key: {0}")]
    InvalidKey(String),

    /// Input is not a well-formed payload (truncated, bad base64)
    #[error("malformed vault payload: {0}")]
    Malformed(String),

    /// Authentication tag mismatch or cipher failure
    #[error("vault authentication failed")]
    Authentication,

    /// Cipher-level failure during encryption
    #[error("cipher failure: {0}")]
    Crypto(String),
}

/// Errors from a worker's external message source
#[derive(Debug, Error)]
pub enum SourceError {
    /// Attaching to the source failed (bad token, unreachable endpoint)
    #[error("attach failed: {0}")]
    Attach(String),

    /// Receiving the next event failed
    #[error("receive failed: {0}")]
    Receive(String),

    /// The source ended the stream and will produce no further events
    #[error("source closed")]
    Closed,
}
