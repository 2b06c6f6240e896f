//! Moka-backed live cache of per-owner vault entries.

use crate::types::{OwnerId, VaultEntry};
use moka::future::Cache;
use std::time::Duration;

/// In-memory working set of vault records, with idle expiry.
///
/// Exactly one entry exists per owner at a time; creation and removal
/// are the only lifecycle events visible to callers. Entries untouched
/// for the idle window are evicted automatically, acceptable only
/// because the periodic auto-save persists idle entries before they age
/// out. Every other removal path must have triggered a save first.
pub struct LiveCache {
    inner: Cache<OwnerId, VaultEntry>,
}

impl LiveCache {
    /// Create a cache with the given idle window and entry bound.
    pub fn new(idle_timeout: Duration, max_entries: u64) -> Self {
        let inner = Cache::builder()
            .max_capacity(max_entries)
            .time_to_idle(idle_timeout)
            .build();

        Self { inner }
    }

    /// Get a copy of the entry for `owner`, refreshing its idle timer.
    pub async fn get(&self, owner: OwnerId) -> Option<VaultEntry> {
        self.inner.get(&owner).await
    }

    /// Insert or replace the entry for `owner`.
    pub async fn put(&self, owner: OwnerId, entry: VaultEntry) {
        self.inner.insert(owner, entry).await;
    }

    /// Remove the entry for `owner`.
    pub async fn invalidate(&self, owner: OwnerId) {
        self.inner.invalidate(&owner).await;
    }

    /// Whether an entry exists for `owner` (does not refresh the timer).
    pub fn contains(&self, owner: OwnerId) -> bool {
        self.inner.contains_key(&owner)
    }

    /// Number of live entries.
    pub fn entry_count(&self) -> u64 {
        self.inner.entry_count()
    }

    /// Point-in-time snapshot of all entries, for iteration without
    /// holding any lock on the structure. Idle timers are not refreshed.
    /// Concurrent inserts may or may not appear; removed entries do not.
    pub fn snapshot(&self) -> Vec<(OwnerId, VaultEntry)> {
        self.inner.iter().map(|(k, v)| (*k, v)).collect()
    }

    /// Run pending maintenance tasks (expiry housekeeping).
    pub async fn run_pending_tasks(&self) {
        self.inner.run_pending_tasks().await;
    }
}

impl std::fmt::Debug for LiveCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveCache")
            .field("entry_count", &self.entry_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Vault;

    fn entry(capacity: usize) -> VaultEntry {
        VaultEntry::new(Vault::empty(capacity), "tester", capacity)
    }

    #[tokio::test]
    async fn put_get_invalidate() {
        let cache = LiveCache::new(Duration::from_secs(60), 100);
        let owner = uuid::Uuid::new_v4();

        assert!(cache.get(owner).await.is_none());

        cache.put(owner, entry(27)).await;
        let got = cache.get(owner).await.unwrap();
        assert_eq!(got.vault.capacity(), 27);
        assert_eq!(got.granted, 27);

        cache.invalidate(owner).await;
        assert!(cache.get(owner).await.is_none());
    }

    #[tokio::test]
    async fn snapshot_sees_all_entries() {
        let cache = LiveCache::new(Duration::from_secs(60), 100);
        let owners: Vec<_> = (0..5).map(|_| uuid::Uuid::new_v4()).collect();

        for &owner in &owners {
            cache.put(owner, entry(9)).await;
        }
        cache.run_pending_tasks().await;

        let snapshot = cache.snapshot();
        assert_eq!(snapshot.len(), 5);
        for (owner, entry) in snapshot {
            assert!(owners.contains(&owner));
            assert_eq!(entry.vault.capacity(), 9);
        }
    }

    #[tokio::test]
    async fn idle_entries_expire() {
        let cache = LiveCache::new(Duration::from_millis(50), 100);
        let owner = uuid::Uuid::new_v4();

        cache.put(owner, entry(9)).await;
        assert!(cache.get(owner).await.is_some());

        tokio::time::sleep(Duration::from_millis(120)).await;
        cache.run_pending_tasks().await;
        assert!(cache.get(owner).await.is_none());
    }

    #[tokio::test]
    async fn replacement_keeps_single_entry() {
        let cache = LiveCache::new(Duration::from_secs(60), 100);
        let owner = uuid::Uuid::new_v4();

        cache.put(owner, entry(9)).await;
        cache.put(owner, entry(18)).await;
        cache.run_pending_tasks().await;

        assert_eq!(cache.entry_count(), 1);
        assert_eq!(cache.get(owner).await.unwrap().vault.capacity(), 18);
    }
}
