//! Persistence coordinator: the engine's state machine per owner.
//!
//! Orchestrates join-load, quit-save, capacity reconciliation, periodic
//! auto-save, and the shutdown drain over the lock table, the live
//! cache, the resize engine, and a pluggable storage backend. All
//! dependencies are injected at construction; there are no globals.
//!
//! Per-owner operations are linearized by lock acquisition order: no two
//! load/save operations for the same owner ever run their I/O
//! concurrently. Operations on distinct owners are fully concurrent. No
//! code path holds one owner's token while doing another owner's I/O.

use crate::cache::LiveCache;
use crate::config::EngineConfig;
use crate::error::{Error, Result, StorageError};
use crate::events::VaultEvent;
use crate::lock::LockTable;
use crate::metrics::{EngineMetrics, MetricsSnapshot};
use crate::resize;
use crate::storage::{FormatTag, LoadOutcome, StorageBackend};
use crate::types::{Item, OwnerId, Vault, VaultEntry};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Coordinates the data lifecycle of per-owner vault records.
pub struct Coordinator {
    config: EngineConfig,
    cache: Arc<LiveCache>,
    locks: Arc<LockTable>,
    backend: Arc<dyn StorageBackend>,
    metrics: Arc<EngineMetrics>,
    events: mpsc::UnboundedSender<VaultEvent>,

    /// Stop handle for the auto-save loop, set by `start`.
    autosave_stop: Mutex<Option<mpsc::Sender<()>>>,
}

impl Coordinator {
    /// Create a coordinator with freshly constructed parts.
    ///
    /// Returns the coordinator and the event receiver; the caller renders
    /// events to end users (the engine never formats user-facing text).
    pub fn new(
        config: EngineConfig,
        backend: Arc<dyn StorageBackend>,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<VaultEvent>)> {
        let cache = Arc::new(LiveCache::new(config.idle_timeout, config.max_cached));
        let locks = Arc::new(LockTable::new());
        let metrics = Arc::new(EngineMetrics::new());
        Self::with_parts(config, cache, locks, backend, metrics)
    }

    /// Create a coordinator from explicitly shared parts.
    pub fn with_parts(
        config: EngineConfig,
        cache: Arc<LiveCache>,
        locks: Arc<LockTable>,
        backend: Arc<dyn StorageBackend>,
        metrics: Arc<EngineMetrics>,
    ) -> Result<(Arc<Self>, mpsc::UnboundedReceiver<VaultEvent>)> {
        config.validate()?;
        let (events, event_rx) = mpsc::unbounded_channel();

        let coordinator = Arc::new(Self {
            config,
            cache,
            locks,
            backend,
            metrics,
            events,
            autosave_stop: Mutex::new(None),
        });

        Ok((coordinator, event_rx))
    }

    /// The live cache shared with this coordinator.
    pub fn cache(&self) -> &Arc<LiveCache> {
        &self.cache
    }

    /// The lock table shared with this coordinator.
    pub fn locks(&self) -> &Arc<LockTable> {
        &self.locks
    }

    /// Engine counters.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Whether an operation currently holds the owner's token.
    pub fn is_busy(&self, owner: OwnerId) -> bool {
        self.locks.is_locked(owner)
    }

    /// A copy of the cached record, if loaded. Refreshes the idle timer.
    pub async fn loaded_vault(&self, owner: OwnerId) -> Option<Vault> {
        self.cache.get(owner).await.map(|entry| entry.vault)
    }

    // ==================== Lifecycle hooks ====================

    /// Startup hook: wires the periodic auto-save loop. A `None`
    /// interval in the config disables the sweep.
    pub fn start(self: &Arc<Self>) {
        let Some(interval) = self.config.auto_save_interval else {
            debug!("auto-save disabled by configuration");
            return;
        };

        let (stop_tx, mut stop_rx) = mpsc::channel::<()>(1);
        *self.autosave_stop.lock() = Some(stop_tx);

        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately; skip it.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = stop_rx.recv() => {
                        debug!("auto-save loop stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        coordinator.auto_save_all().await;
                    }
                }
            }
        });
    }

    /// Shutdown hook: stops the auto-save loop and force-saves every
    /// cached entry regardless of lock state, bounded by one overall
    /// timeout. Entries still in flight when the timeout fires are
    /// logged as a summary count; shutdown never hangs and never fails.
    ///
    /// Call before tearing down the backend's resources.
    pub async fn shutdown(&self) {
        if let Some(stop) = self.autosave_stop.lock().take() {
            let _ = stop.try_send(());
        }

        let entries = self.cache.snapshot();
        if entries.is_empty() {
            info!("shutdown drain: no cached vaults to save");
            return;
        }

        let total = entries.len();
        info!(count = total, "shutdown drain: force-saving cached vaults");

        let mut tasks = JoinSet::new();
        for (owner, entry) in entries {
            let backend = Arc::clone(&self.backend);
            tasks.spawn(async move {
                let result = backend.save(owner, &entry.display_name, &entry.vault).await;
                (owner, result)
            });
        }

        let completed = Arc::new(AtomicUsize::new(0));
        let drain = {
            let completed = Arc::clone(&completed);
            let metrics = Arc::clone(&self.metrics);
            async move {
                let mut saved = 0usize;
                while let Some(joined) = tasks.join_next().await {
                    completed.fetch_add(1, Ordering::Relaxed);
                    match joined {
                        Ok((_, Ok(()))) => {
                            saved += 1;
                            metrics.saves.inc();
                        }
                        Ok((owner, Err(e))) => {
                            metrics.save_failures.inc();
                            warn!(owner = %owner, error = %e, "shutdown save failed");
                        }
                        Err(e) => warn!(error = %e, "shutdown save task failed"),
                    }
                }
                saved
            }
        };

        match tokio::time::timeout(self.config.shutdown_timeout, drain).await {
            Ok(saved) => info!(saved, total, "shutdown drain complete"),
            Err(_) => {
                let unsaved = total - completed.load(Ordering::Relaxed);
                warn!(
                    unsaved,
                    total,
                    timeout_ms = self.config.shutdown_timeout.as_millis() as u64,
                    "shutdown drain timed out; some vaults may not have been saved"
                );
            }
        }
    }

    // ==================== Join / Quit ====================

    /// Load the owner's record into the live cache.
    ///
    /// A warm cache is a no-op. Storage trouble never fails the join:
    /// load errors and unreadable data degrade to an empty record with a
    /// loud warning and an event, so the owner is never stuck loading.
    /// Returns [`Error::Busy`] when another operation holds the token.
    pub async fn handle_join(
        &self,
        owner: OwnerId,
        display_name: &str,
        capacity: usize,
    ) -> Result<()> {
        if capacity == 0 {
            // No access: an entry must not exist at capacity zero. Any
            // warm entry is saved on the way out, never just dropped.
            return self.handle_quit(owner).await;
        }

        if self.cache.get(owner).await.is_some() {
            debug!(owner = %owner, "vault already cached, skipping load");
            return Ok(());
        }

        let Some(_guard) = self.locks.acquire(owner) else {
            self.metrics.lock_conflicts.inc();
            return Err(Error::Busy(owner));
        };

        let loaded = match self.backend.load(owner).await {
            Ok(LoadOutcome::Loaded { vault, format }) => {
                self.metrics.loads.inc();
                if format == FormatTag::Legacy {
                    self.schedule_format_rewrite(owner);
                }
                vault
            }
            Ok(LoadOutcome::Missing) => {
                self.metrics.loads.inc();
                Vault::empty(0)
            }
            Ok(LoadOutcome::Unreadable) => {
                self.metrics.load_failures.inc();
                warn!(
                    owner = %owner,
                    "stored vault is unreadable; continuing with an empty record, durable bytes left untouched"
                );
                self.emit(VaultEvent::CorruptData { owner });
                Vault::empty(0)
            }
            Err(e) => {
                self.metrics.load_failures.inc();
                warn!(owner = %owner, error = %e, "vault load failed; continuing with an empty record");
                self.emit(VaultEvent::LoadFailed { owner });
                Vault::empty(0)
            }
        };

        // Size to the granted capacity, extended over any occupied slot
        // from a prior oversized write so nothing is silently truncated.
        let target = resize::expected_display_size(&loaded, capacity, self.config.slot_block);
        let outcome = resize::resize(&loaded, target);
        if !outcome.overflow.is_empty() {
            self.spawn_overflow_append(owner, outcome.overflow);
        }

        self.cache
            .put(owner, VaultEntry::new(outcome.vault, display_name, capacity))
            .await;
        Ok(())
        // Guard drops here: unlock runs on every path above as well.
    }

    /// Save the owner's record and drop it from the live cache.
    ///
    /// A held token means another operation owns this record right now;
    /// the quit-save is skipped rather than double-saved. The entry is
    /// invalidated before the save runs; on save failure or timeout it
    /// is re-inserted so the next auto-save cycle picks it up.
    pub async fn handle_quit(&self, owner: OwnerId) -> Result<()> {
        let Some(_guard) = self.locks.acquire(owner) else {
            self.metrics.lock_conflicts.inc();
            debug!(owner = %owner, "quit-save skipped, vault busy");
            return Ok(());
        };

        let Some(entry) = self.cache.get(owner).await else {
            return Ok(());
        };

        // Invalidate first so no second writer can race this record.
        self.cache.invalidate(owner).await;

        let saved = self
            .save_bounded(
                owner,
                &entry.display_name,
                &entry.vault,
                self.config.quit_save_timeout,
            )
            .await;

        if !saved {
            // Re-warm the entry so auto-save or the shutdown drain can
            // retry; the idle window is longer than the sweep interval.
            self.cache.put(owner, entry).await;
        }
        Ok(())
    }

    // ==================== Capacity reconciliation ====================

    /// Reconcile the cached record with a newly granted capacity.
    ///
    /// - capacity 0: quit-style save-then-invalidate; an entry never
    ///   survives at zero capacity.
    /// - downgrade: strict split at the new capacity; displaced items
    ///   are appended to the durable overflow sequence. A storage
    ///   failure defers the whole change; items are never dropped while
    ///   their overflow copy is unconfirmed.
    /// - upgrade: the record grows and previously overflowed items merge
    ///   back in, first-fit in stored order; the remainder stays in
    ///   overflow.
    /// - unchanged: display fix-up only (length drifts when occupied
    ///   slots appeared beyond the grant in a prior oversized write).
    ///
    /// Uncached owners are a no-op. Returns [`Error::Busy`] when the
    /// token is held; this is the user-visible "still loading" case.
    pub async fn sync_capacity(&self, owner: OwnerId, capacity: usize) -> Result<()> {
        if capacity == 0 {
            return self.handle_quit(owner).await;
        }

        let Some(_guard) = self.locks.acquire(owner) else {
            self.metrics.lock_conflicts.inc();
            return Err(Error::Busy(owner));
        };

        let Some(mut entry) = self.cache.get(owner).await else {
            return Ok(());
        };

        if capacity < entry.granted {
            let outcome = resize::resize(&entry.vault, capacity);
            if !outcome.overflow.is_empty() {
                let count = outcome.overflow.len();
                if let Err(e) = append_overflow(&*self.backend, owner, outcome.overflow).await {
                    warn!(
                        owner = %owner,
                        error = %e,
                        "overflow save failed; capacity change deferred"
                    );
                    return Err(Error::Storage(e));
                }
                self.metrics.overflow_items_out.inc_by(count as u64);
                self.emit(VaultEvent::OverflowSaved { owner, count });
                debug!(owner = %owner, count, "items moved to overflow");
            }
            entry.vault = outcome.vault;
            entry.granted = capacity;
            self.cache.put(owner, entry).await;
        } else if capacity > entry.granted {
            let target =
                resize::expected_display_size(&entry.vault, capacity, self.config.slot_block);
            let grown = resize::resize(&entry.vault, target).vault;

            // Merge stored overflow into the newly freed slots. The
            // durable side is updated before the merged record is
            // adopted, so a failure leaves both copies consistent.
            let mut merged = grown.clone();
            let vault = match self.restore_overflow(owner, &mut merged).await {
                Ok(0) => grown,
                Ok(restored) => {
                    self.metrics.overflow_items_in.inc_by(restored as u64);
                    self.emit(VaultEvent::OverflowRestored { owner, restored });
                    debug!(owner = %owner, restored, "items restored from overflow");
                    merged
                }
                Err(e) => {
                    warn!(owner = %owner, error = %e, "overflow restore failed; items stay in overflow");
                    grown
                }
            };

            entry.vault = vault;
            entry.granted = capacity;
            self.cache.put(owner, entry).await;
        } else {
            let target =
                resize::expected_display_size(&entry.vault, capacity, self.config.slot_block);
            if entry.vault.capacity() != target {
                // The target covers every occupied slot, so nothing spills.
                entry.vault = resize::resize(&entry.vault, target).vault;
                self.cache.put(owner, entry).await;
            }
        }

        Ok(())
    }

    // ==================== Views and write-back ====================

    /// Reconcile with the granted capacity and return a copy of the
    /// record for display. The coordinator keeps the canonical record;
    /// edits come back only through [`commit`](Self::commit).
    pub async fn open(&self, owner: OwnerId, capacity: usize) -> Result<Vault> {
        if capacity == 0 {
            return Err(Error::NoAccess(owner));
        }

        self.sync_capacity(owner, capacity).await?;

        match self.cache.get(owner).await {
            Some(entry) => Ok(entry.vault),
            None => Err(Error::NotLoaded(owner)),
        }
    }

    /// Commit an edited copy back as the canonical record.
    ///
    /// The copy must match the canonical record's current length; a
    /// mismatch means the record was reconciled since the copy was
    /// taken, and the caller should re-open.
    pub async fn commit(&self, owner: OwnerId, vault: Vault) -> Result<()> {
        let Some(_guard) = self.locks.acquire(owner) else {
            self.metrics.lock_conflicts.inc();
            return Err(Error::Busy(owner));
        };

        let Some(mut entry) = self.cache.get(owner).await else {
            return Err(Error::NotLoaded(owner));
        };

        if vault.capacity() != entry.vault.capacity() {
            return Err(Error::ShapeMismatch {
                owner,
                got: vault.capacity(),
                expected: entry.vault.capacity(),
            });
        }

        entry.vault = vault;
        self.cache.put(owner, entry).await;
        Ok(())
    }

    // ==================== Administrative operations ====================

    /// First-time import: persist `vault` only if the owner has no
    /// durable record yet. Returns whether the import happened.
    pub async fn import_if_absent(
        &self,
        owner: OwnerId,
        display_name: &str,
        vault: &Vault,
    ) -> Result<bool> {
        if self.backend.exists(owner).await? {
            debug!(owner = %owner, "import skipped, durable record exists");
            return Ok(false);
        }
        self.backend.save(owner, display_name, vault).await?;
        self.metrics.saves.inc();
        Ok(true)
    }

    /// Remove the owner's record everywhere: live cache, durable store,
    /// and overflow.
    pub async fn remove(&self, owner: OwnerId) -> Result<()> {
        let Some(_guard) = self.locks.acquire(owner) else {
            self.metrics.lock_conflicts.inc();
            return Err(Error::Busy(owner));
        };

        self.cache.invalidate(owner).await;
        self.backend.delete(owner).await?;
        self.backend.clear_overflow(owner).await?;
        Ok(())
    }

    // ==================== Auto-save ====================

    /// Save every cached entry whose token is free, fire-and-forget.
    ///
    /// Entries stay warm; per-owner failures are logged and never abort
    /// the sweep. Locked owners are skipped; whoever holds the token is
    /// already responsible for persistence. Returns the number of saves
    /// scheduled.
    pub async fn auto_save_all(&self) -> usize {
        let snapshot = self.cache.snapshot();
        if snapshot.is_empty() {
            return 0;
        }

        self.metrics.autosave_cycles.inc();
        let mut scheduled = 0;

        for (owner, entry) in snapshot {
            if self.locks.is_locked(owner) {
                continue;
            }
            scheduled += 1;

            let backend = Arc::clone(&self.backend);
            let metrics = Arc::clone(&self.metrics);
            tokio::spawn(async move {
                match backend.save(owner, &entry.display_name, &entry.vault).await {
                    Ok(()) => metrics.saves.inc(),
                    Err(e) => {
                        metrics.save_failures.inc();
                        warn!(owner = %owner, error = %e, "auto-save failed");
                    }
                }
            });
        }

        debug!(scheduled, "auto-save sweep scheduled");
        scheduled
    }

    // ==================== Internals ====================

    fn emit(&self, event: VaultEvent) {
        // A dropped receiver just discards events.
        let _ = self.events.send(event);
    }

    /// Save with a deadline. Returns whether the save succeeded; failure
    /// and timeout are absorbed (logged + event), retried by the next
    /// sweep.
    async fn save_bounded(
        &self,
        owner: OwnerId,
        display_name: &str,
        vault: &Vault,
        timeout: Duration,
    ) -> bool {
        match tokio::time::timeout(timeout, self.backend.save(owner, display_name, vault)).await {
            Ok(Ok(())) => {
                self.metrics.saves.inc();
                true
            }
            Ok(Err(e)) => {
                self.metrics.save_failures.inc();
                warn!(owner = %owner, error = %e, "save failed; auto-save will retry");
                self.emit(VaultEvent::SaveFailed { owner });
                false
            }
            Err(_) => {
                self.metrics.save_failures.inc();
                warn!(
                    owner = %owner,
                    timeout_ms = timeout.as_millis() as u64,
                    "save timed out; auto-save will retry"
                );
                self.emit(VaultEvent::SaveFailed { owner });
                false
            }
        }
    }

    /// Background write-back of a legacy-format record, off the read
    /// path. The task takes the owner's token and re-reads the canonical
    /// entry before writing, so it can never overwrite a newer save; if
    /// the entry is gone a quit-save already landed the current format,
    /// and if the token stays contended it gives up; any regular save
    /// also migrates the representation.
    fn schedule_format_rewrite(&self, owner: OwnerId) {
        let backend = Arc::clone(&self.backend);
        let cache = Arc::clone(&self.cache);
        let locks = Arc::clone(&self.locks);
        let metrics = Arc::clone(&self.metrics);
        let events = self.events.clone();

        tokio::spawn(async move {
            // The join that scheduled this still holds the token; wait it
            // out briefly instead of racing it.
            let mut guard = None;
            for _ in 0..20 {
                match locks.acquire(owner) {
                    Some(g) => {
                        guard = Some(g);
                        break;
                    }
                    None => tokio::time::sleep(Duration::from_millis(50)).await,
                }
            }
            if guard.is_none() {
                debug!(owner = %owner, "legacy rewrite skipped, vault stayed busy");
                return;
            }

            let Some(entry) = cache.get(owner).await else {
                debug!(owner = %owner, "legacy rewrite skipped, record already saved on quit");
                return;
            };

            match backend.save(owner, &entry.display_name, &entry.vault).await {
                Ok(()) => {
                    metrics.saves.inc();
                    metrics.format_rewrites.inc();
                    info!(owner = %owner, "rewrote legacy vault in the current format");
                    let _ = events.send(VaultEvent::MigrationRewritten { owner });
                }
                Err(e) => {
                    warn!(owner = %owner, error = %e, "legacy rewrite failed; the next save will retry");
                }
            }
        });
    }

    /// Fire-and-forget append to the durable overflow sequence.
    fn spawn_overflow_append(&self, owner: OwnerId, items: Vec<Item>) {
        let backend = Arc::clone(&self.backend);
        let metrics = Arc::clone(&self.metrics);
        let events = self.events.clone();
        let count = items.len();

        tokio::spawn(async move {
            match append_overflow(&*backend, owner, items).await {
                Ok(_) => {
                    metrics.overflow_items_out.inc_by(count as u64);
                    let _ = events.send(VaultEvent::OverflowSaved { owner, count });
                }
                Err(e) => {
                    warn!(owner = %owner, error = %e, "overflow save failed");
                }
            }
        });
    }

    /// Merge the stored overflow sequence into `vault`, first-fit in
    /// stored order. The durable remainder is written (or cleared)
    /// before this returns `Ok`, so callers may only adopt the merged
    /// record on success. Returns the number of items merged in.
    async fn restore_overflow(
        &self,
        owner: OwnerId,
        vault: &mut Vault,
    ) -> std::result::Result<usize, StorageError> {
        if !self.backend.has_overflow(owner).await? {
            return Ok(0);
        }

        let stored = self.backend.load_overflow(owner).await?;
        if stored.is_empty() {
            self.backend.clear_overflow(owner).await?;
            return Ok(0);
        }

        let total = stored.len();
        let remainder = resize::merge_overflow(vault, stored);
        let restored = total - remainder.len();
        if restored == 0 {
            return Ok(0);
        }

        if remainder.is_empty() {
            self.backend.clear_overflow(owner).await?;
        } else {
            self.backend.save_overflow(owner, &remainder).await?;
        }
        Ok(restored)
    }
}

/// Append `items` to the owner's stored overflow sequence, preserving
/// insertion order across repeated shrinks.
async fn append_overflow(
    backend: &dyn StorageBackend,
    owner: OwnerId,
    mut items: Vec<Item>,
) -> std::result::Result<usize, StorageError> {
    let mut combined = backend.load_overflow(owner).await?;
    combined.append(&mut items);
    backend.save_overflow(owner, &combined).await?;
    Ok(combined.len())
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("cached", &self.cache.entry_count())
            .field("locked", &self.locks.locked_count())
            .finish()
    }
}
