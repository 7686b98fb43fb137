// Capability traits at the seams
//
// These traits allow the runtime to be used with different collaborators:
// - Production implementations (AES-GCM vault, long-polling source)
// - In-memory implementations for tests

use async_trait::async_trait;

use crate::error::{SourceError, VaultError};

// ============================================================================
// CredentialVault - protects worker credentials at rest
// ============================================================================

/// Encrypts and decrypts worker credentials.
///
/// Contract: encryption is non-deterministic (fresh randomness per call);
/// decryption fails closed on tampered input. Stateless per call and safe
/// for concurrent use.
pub trait CredentialVault: Send + Sync {
    /// Encrypt a plaintext credential
    fn encrypt(&self, plaintext: &str) -> Result<String, VaultError>;

    /// Decrypt a stored credential
    fn decrypt(&self, ciphertext: &str) -> Result<String, VaultError>;
}

/// Identity vault for tests: "ciphertext" is the plaintext.
#[derive(Debug, Clone, Default)]
pub struct IdentityVault;

impl CredentialVault for IdentityVault {
    fn encrypt(&self, plaintext: &str) -> Result<String, VaultError> {
        Ok(plaintext.to_string())
    }

    fn decrypt(&self, ciphertext: &str) -> Result<String, VaultError> {
        Ok(ciphertext.to_string())
    }
}

// ============================================================================
// EventSource / SourceConnector - the external message source
// ============================================================================

/// One event as delivered by the external source, before it is stamped
/// with the reporting worker's identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEvent {
    pub subject_id: i64,
    pub subject_label: String,
}

/// A live attachment to one worker's message source.
///
/// `next_event` blocks until an event arrives; cancellation happens at the
/// call boundary (the worker task races it against its cancel signal).
#[async_trait]
pub trait EventSource: Send + std::fmt::Debug {
    async fn next_event(&mut self) -> Result<SourceEvent, SourceError>;
}

/// Attaches workers to their message source.
///
/// The transport is the connector's concern; the runtime only consumes
/// "attach with this token" and "receive next event".
#[async_trait]
pub trait SourceConnector: Send + Sync {
    async fn attach(&self, token: &str) -> Result<Box<dyn EventSource>, SourceError>;
}
