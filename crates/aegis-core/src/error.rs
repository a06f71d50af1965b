use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::model::Collection;

/// Errors surfaced by every layer of the encrypted store.
///
/// Messages never carry key material or plaintext. Decryption failures are
/// deliberately generic so a caller cannot tell a wrong key from a flipped bit.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum VaultError {
    /// Key derivation or the platform crypto provider failed.
    #[error("key derivation failed: {reason}")]
    Derivation { reason: String },
    /// Wrong key, corrupted ciphertext, or tampering.
    #[error("decryption failed")]
    Decryption { reason: String },
    /// Stored digest does not match the decrypted plaintext.
    #[error("integrity violation in {collection} for record {id}")]
    IntegrityViolation { collection: Collection, id: String },
    /// Requested record does not exist.
    #[error("record {id} not found in {collection}")]
    NotFound { collection: Collection, id: String },
    /// Underlying persistence failure.
    #[error("storage failure: {reason}")]
    Storage { reason: String },
    /// Backup file rejected before any decryption was attempted.
    #[error("invalid import format: {reason}")]
    InvalidImportFormat { reason: String },
    /// Authentication is blocked until `unlock_at`.
    #[error("authentication locked for another {remaining_secs}s")]
    LockedOut {
        unlock_at: DateTime<Utc>,
        remaining_secs: u64,
    },
    /// A record could not be mapped to or from its typed shape.
    #[error("encoding failure: {reason}")]
    Encoding { reason: String },
    /// The collection is append-only through the audit log.
    #[error("collection {collection} is read-only")]
    ReadOnlyCollection { collection: Collection },
}

pub type Result<T> = std::result::Result<T, VaultError>;

impl VaultError {
    pub fn storage(err: impl ToString) -> Self {
        VaultError::Storage {
            reason: err.to_string(),
        }
    }

    pub fn encoding(err: impl ToString) -> Self {
        VaultError::Encoding {
            reason: err.to_string(),
        }
    }

    pub fn decryption(reason: impl Into<String>) -> Self {
        VaultError::Decryption {
            reason: reason.into(),
        }
    }

    /// True for failures that must leave a trace in the audit log.
    pub fn is_security_relevant(&self) -> bool {
        matches!(
            self,
            VaultError::Decryption { .. }
                | VaultError::IntegrityViolation { .. }
                | VaultError::LockedOut { .. }
        )
    }
}
