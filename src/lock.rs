//! Per-owner mutual exclusion tokens.
//!
//! The lock table prevents a load and a save from interleaving on one
//! owner. Locks are advisory to callers (a failed `try_lock` means "an
//! operation is already in progress", never an error) but mandatory for
//! internal load/save paths. There is deliberately no blocking variant:
//! callers that fail to acquire back off or abort rather than stalling
//! on in-flight I/O.

use crate::types::OwnerId;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

/// Per-owner lock token set.
///
/// `try_lock` is a single atomic check-and-set: one `insert` on a set
/// behind one mutex. Locks are strictly per-owner and never nested; no
/// code path holds one owner's token while doing another owner's I/O.
#[derive(Debug, Default)]
pub struct LockTable {
    locked: Mutex<HashSet<OwnerId>>,
}

impl LockTable {
    /// Create an empty lock table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempt to acquire the token for `owner`.
    ///
    /// Returns `true` iff no token was held; the check and the set are
    /// one operation under the table's mutex.
    pub fn try_lock(&self, owner: OwnerId) -> bool {
        self.locked.lock().insert(owner)
    }

    /// Release the token for `owner`. Releasing an absent token is a no-op.
    pub fn unlock(&self, owner: OwnerId) {
        self.locked.lock().remove(&owner);
    }

    /// Whether a token is currently held for `owner`.
    pub fn is_locked(&self, owner: OwnerId) -> bool {
        self.locked.lock().contains(&owner)
    }

    /// Number of tokens currently held.
    pub fn locked_count(&self) -> usize {
        self.locked.lock().len()
    }

    /// Acquire the token as an RAII guard, releasing on drop.
    ///
    /// The guard keeps the table alive, so it can cross `await` points
    /// and task boundaries; unlock runs on every exit path.
    pub fn acquire(self: &Arc<Self>, owner: OwnerId) -> Option<LockGuard> {
        if self.try_lock(owner) {
            Some(LockGuard {
                table: Arc::clone(self),
                owner,
            })
        } else {
            None
        }
    }
}

/// RAII token for a single owner; releases the lock when dropped.
#[derive(Debug)]
pub struct LockGuard {
    table: Arc<LockTable>,
    owner: OwnerId,
}

impl LockGuard {
    /// The owner this guard locks.
    pub fn owner(&self) -> OwnerId {
        self.owner
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.table.unlock(self.owner);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn lock_unlock_cycle() {
        let table = LockTable::new();
        let owner = uuid::Uuid::new_v4();

        assert!(!table.is_locked(owner));
        assert!(table.try_lock(owner));
        assert!(table.is_locked(owner));
        assert!(!table.try_lock(owner));

        table.unlock(owner);
        assert!(!table.is_locked(owner));
        assert!(table.try_lock(owner));
    }

    #[test]
    fn unlock_absent_is_noop() {
        let table = LockTable::new();
        table.unlock(uuid::Uuid::new_v4());
        assert_eq!(table.locked_count(), 0);
    }

    #[test]
    fn disjoint_owners_do_not_contend() {
        let table = LockTable::new();
        let a = uuid::Uuid::new_v4();
        let b = uuid::Uuid::new_v4();

        assert!(table.try_lock(a));
        assert!(table.try_lock(b));
        assert_eq!(table.locked_count(), 2);
    }

    #[test]
    fn guard_releases_on_drop() {
        let table = Arc::new(LockTable::new());
        let owner = uuid::Uuid::new_v4();

        {
            let guard = table.acquire(owner).unwrap();
            assert_eq!(guard.owner(), owner);
            assert!(table.acquire(owner).is_none());
        }
        assert!(!table.is_locked(owner));
    }

    #[test]
    fn concurrent_try_lock_grants_exactly_one() {
        let table = Arc::new(LockTable::new());
        let owner = uuid::Uuid::new_v4();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let table = table.clone();
                thread::spawn(move || table.try_lock(owner))
            })
            .collect();

        let granted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|granted| *granted)
            .count();
        assert_eq!(granted, 1);
        assert!(table.is_locked(owner));
    }
}
