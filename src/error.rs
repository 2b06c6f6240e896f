//! Error types for the vault persistence engine.

use crate::types::OwnerId;
use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the vault persistence engine.
#[derive(Error, Debug)]
pub enum Error {
    /// An operation is already in flight for this owner; back off and retry.
    #[error("vault busy for {0}: an operation is already in progress")]
    Busy(OwnerId),

    /// The owner has no slot capacity granted.
    #[error("no capacity granted for {0}")]
    NoAccess(OwnerId),

    /// No cached record exists for the owner; join first.
    #[error("no loaded vault for {0}")]
    NotLoaded(OwnerId),

    /// A committed copy does not match the canonical record's shape.
    #[error("commit rejected for {owner}: copy has {got} slots, canonical has {expected}")]
    ShapeMismatch {
        owner: OwnerId,
        got: usize,
        expected: usize,
    },

    /// Storage backend errors.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Configuration errors.
    #[error("config error: {0}")]
    Config(String),

    /// The operation timed out.
    #[error("operation timed out")]
    Timeout,
}

impl Error {
    /// Whether the caller should simply retry later.
    pub fn is_busy(&self) -> bool {
        matches!(self, Error::Busy(_))
    }
}

/// Storage layer errors.
///
/// The engine treats `Timeout` like `Transient`: both are absorbed on the
/// save path and retried by the next auto-save cycle. `Corrupt` means the
/// durable bytes no longer decode; the backend must leave them untouched
/// so a human can attempt recovery.
#[derive(Error, Debug)]
pub enum StorageError {
    /// I/O hiccup; the next auto-save cycle retries.
    #[error("transient storage failure: {0}")]
    Transient(String),

    /// Stored bytes no longer deserialize. The durable copy is left as-is.
    #[error("stored data is corrupt: {reason}")]
    Corrupt { reason: String },

    /// A storage operation exceeded its deadline.
    #[error("storage operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

impl StorageError {
    /// Whether a later retry can be expected to succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StorageError::Transient(_) | StorageError::Timeout { .. }
        )
    }
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        StorageError::Transient(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(StorageError::Transient("disk".into()).is_transient());
        assert!(StorageError::Timeout { timeout_ms: 100 }.is_transient());
        assert!(!StorageError::Corrupt {
            reason: "bad magic".into()
        }
        .is_transient());
    }

    #[test]
    fn busy_is_busy() {
        let owner = uuid::Uuid::new_v4();
        assert!(Error::Busy(owner).is_busy());
        assert!(!Error::NotLoaded(owner).is_busy());
    }
}
