//! In-memory reference backend.
//!
//! Stores *encoded* bytes rather than live structures so serialization,
//! corruption handling, and legacy migration behave exactly as they do
//! against a real backend. Failure-injection knobs let tests drive the
//! engine's degradation paths: artificial latency per operation and
//! fail-the-next-N counters for loads and saves.

use crate::error::StorageError;
use crate::storage::{format, LoadOutcome, StorageBackend};
use crate::types::{Item, OwnerId, Vault};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Clone)]
struct StoredRecord {
    display_name: String,
    bytes: Bytes,
}

/// Reference backend holding encoded records in process memory.
#[derive(Debug)]
pub struct MemoryBackend {
    records: RwLock<HashMap<OwnerId, StoredRecord>>,
    overflow: RwLock<HashMap<OwnerId, Vec<Item>>>,

    /// Artificial latency applied to every operation, in milliseconds.
    latency_ms: AtomicU64,

    /// Remaining saves to fail with a transient error.
    fail_saves: AtomicU64,

    /// Remaining loads to fail with a transient error.
    fail_loads: AtomicU64,

    /// Sanity cap forwarded to decode.
    max_slots: usize,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_MAX_SLOTS)
    }
}

impl MemoryBackend {
    /// Create a backend with the given decode sanity cap.
    pub fn new(max_slots: usize) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            overflow: RwLock::new(HashMap::new()),
            latency_ms: AtomicU64::new(0),
            fail_saves: AtomicU64::new(0),
            fail_loads: AtomicU64::new(0),
            max_slots,
        }
    }

    /// Apply artificial latency to every subsequent operation.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    /// Fail the next `n` save operations with a transient error.
    pub fn fail_next_saves(&self, n: u64) {
        self.fail_saves.store(n, Ordering::Relaxed);
    }

    /// Fail the next `n` load operations with a transient error.
    pub fn fail_next_loads(&self, n: u64) {
        self.fail_loads.store(n, Ordering::Relaxed);
    }

    /// Seed raw durable bytes for an owner, bypassing the encoder.
    /// Lets tests plant legacy or corrupt records.
    pub fn seed_raw(&self, owner: OwnerId, display_name: impl Into<String>, bytes: Bytes) {
        self.records.write().insert(
            owner,
            StoredRecord {
                display_name: display_name.into(),
                bytes,
            },
        );
    }

    /// The stored bytes for an owner, if any. Lets tests assert that
    /// corrupt records are left untouched and migrations rewrote them.
    pub fn raw_bytes(&self, owner: OwnerId) -> Option<Bytes> {
        self.records.read().get(&owner).map(|r| r.bytes.clone())
    }

    /// Number of stored records.
    pub fn record_count(&self) -> usize {
        self.records.read().len()
    }

    async fn simulate_io(&self) {
        let ms = self.latency_ms.load(Ordering::Relaxed);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }

    fn take_injected_failure(counter: &AtomicU64, op: &str) -> Result<(), StorageError> {
        let mut current = counter.load(Ordering::Relaxed);
        while current > 0 {
            match counter.compare_exchange(
                current,
                current - 1,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    return Err(StorageError::Transient(format!("injected {op} failure")));
                }
                Err(observed) => current = observed,
            }
        }
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn init(&self) -> Result<(), StorageError> {
        Ok(())
    }

    async fn load(&self, owner: OwnerId) -> Result<LoadOutcome, StorageError> {
        self.simulate_io().await;
        Self::take_injected_failure(&self.fail_loads, "load")?;

        let stored = match self.records.read().get(&owner) {
            Some(record) => record.bytes.clone(),
            None => return Ok(LoadOutcome::Missing),
        };

        let tag = format::detect(&stored);
        match format::decode(tag, &stored, self.max_slots) {
            Ok(vault) => Ok(LoadOutcome::Loaded { vault, format: tag }),
            // Durable bytes stay untouched; the engine warns and degrades.
            Err(_) => Ok(LoadOutcome::Unreadable),
        }
    }

    async fn save(
        &self,
        owner: OwnerId,
        display_name: &str,
        vault: &Vault,
    ) -> Result<(), StorageError> {
        self.simulate_io().await;
        Self::take_injected_failure(&self.fail_saves, "save")?;

        self.records.write().insert(
            owner,
            StoredRecord {
                display_name: display_name.to_string(),
                bytes: format::encode(vault),
            },
        );
        Ok(())
    }

    async fn delete(&self, owner: OwnerId) -> Result<(), StorageError> {
        self.simulate_io().await;
        self.records.write().remove(&owner);
        Ok(())
    }

    async fn exists(&self, owner: OwnerId) -> Result<bool, StorageError> {
        self.simulate_io().await;
        Ok(self.records.read().contains_key(&owner))
    }

    async fn display_name(&self, owner: OwnerId) -> Result<Option<String>, StorageError> {
        self.simulate_io().await;
        Ok(self
            .records
            .read()
            .get(&owner)
            .map(|r| r.display_name.clone()))
    }

    async fn load_overflow(&self, owner: OwnerId) -> Result<Vec<Item>, StorageError> {
        self.simulate_io().await;
        Ok(self.overflow.read().get(&owner).cloned().unwrap_or_default())
    }

    async fn save_overflow(&self, owner: OwnerId, items: &[Item]) -> Result<(), StorageError> {
        self.simulate_io().await;
        Self::take_injected_failure(&self.fail_saves, "save_overflow")?;
        self.overflow.write().insert(owner, items.to_vec());
        Ok(())
    }

    async fn clear_overflow(&self, owner: OwnerId) -> Result<(), StorageError> {
        self.simulate_io().await;
        self.overflow.write().remove(&owner);
        Ok(())
    }

    async fn has_overflow(&self, owner: OwnerId) -> Result<bool, StorageError> {
        self.simulate_io().await;
        Ok(self
            .overflow
            .read()
            .get(&owner)
            .is_some_and(|items| !items.is_empty()))
    }
}
