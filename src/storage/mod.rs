//! Pluggable durable storage for vault records.
//!
//! The engine is backend-agnostic: anything implementing
//! [`StorageBackend`] can hold the durable copies. Concrete production
//! backends (file-per-owner, embedded SQL, networked SQL) live outside
//! this crate; [`MemoryBackend`] ships here as the reference
//! implementation used by tests and local development.

pub mod format;
pub mod memory;

pub use format::{FormatError, FormatTag};
pub use memory::MemoryBackend;

use crate::error::StorageError;
use crate::types::{Item, OwnerId, Vault};
use async_trait::async_trait;

/// Result of loading a record.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    /// No record has ever been stored for this owner.
    Missing,

    /// Bytes exist but no longer decode. The durable copy must be left
    /// untouched so a human can attempt recovery; the engine warns and
    /// proceeds with an empty record. Distinct from `Missing` so a
    /// returning owner is never silently treated as new.
    Unreadable,

    /// The record decoded successfully. A legacy `format` tells the
    /// coordinator to schedule a background re-save in the current
    /// format; the read path never waits on that rewrite.
    Loaded {
        /// The decoded record.
        vault: Vault,
        /// Representation the durable copy was found in.
        format: FormatTag,
    },
}

/// Durable storage contract.
///
/// All operations are async and safe to invoke concurrently for distinct
/// owners; serialization per owner is the coordinator's job, not the
/// backend's. `save` must be an idempotent upsert. Backends own their
/// resources (connection pools, file handles) entirely.
#[async_trait]
pub trait StorageBackend: Send + Sync + 'static {
    /// Prepare tables/files. Idempotent.
    async fn init(&self) -> Result<(), StorageError>;

    /// Load the record for `owner`.
    async fn load(&self, owner: OwnerId) -> Result<LoadOutcome, StorageError>;

    /// Upsert the record for `owner`. `display_name` is bookkeeping only.
    async fn save(
        &self,
        owner: OwnerId,
        display_name: &str,
        vault: &Vault,
    ) -> Result<(), StorageError>;

    /// Delete the record for `owner`.
    async fn delete(&self, owner: OwnerId) -> Result<(), StorageError>;

    /// Whether a record exists for `owner`.
    async fn exists(&self, owner: OwnerId) -> Result<bool, StorageError>;

    /// Bookkeeping display-name lookup for offline owners.
    async fn display_name(&self, owner: OwnerId) -> Result<Option<String>, StorageError>;

    /// Load the stored overflow sequence for `owner`, in insertion order.
    /// An absent overflow record yields an empty sequence.
    async fn load_overflow(&self, owner: OwnerId) -> Result<Vec<Item>, StorageError>;

    /// Replace the stored overflow sequence for `owner`.
    async fn save_overflow(&self, owner: OwnerId, items: &[Item]) -> Result<(), StorageError>;

    /// Delete the stored overflow sequence for `owner`.
    async fn clear_overflow(&self, owner: OwnerId) -> Result<(), StorageError>;

    /// Whether a non-empty overflow sequence is stored for `owner`.
    async fn has_overflow(&self, owner: OwnerId) -> Result<bool, StorageError>;
}
