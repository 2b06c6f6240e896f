//! Helpers shared by the integration tests.

use crate::config::EngineConfig;
use crate::coordinator::Coordinator;
use crate::events::VaultEvent;
use crate::storage::MemoryBackend;
use crate::types::{Item, Vault};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::sleep;

/// A coordinator wired to an inspectable in-memory backend.
pub struct TestEngine {
    pub engine: Arc<Coordinator>,
    pub backend: Arc<MemoryBackend>,
    pub events: mpsc::UnboundedReceiver<VaultEvent>,
}

/// Build an engine with the given configuration.
pub fn engine_with(config: EngineConfig) -> TestEngine {
    let backend = Arc::new(MemoryBackend::new(config.max_slots));
    let (engine, events) =
        Coordinator::new(config, backend.clone() as Arc<dyn crate::storage::StorageBackend>)
            .expect("valid test config");
    TestEngine {
        engine,
        backend,
        events,
    }
}

/// Build an engine with auto-save disabled; tests drive sweeps manually.
pub fn engine() -> TestEngine {
    engine_with(EngineConfig::new().without_auto_save())
}

/// A single-byte-payload item, distinguishable by tag.
pub fn item(tag: u8) -> Item {
    Item::new(vec![tag])
}

/// A vault with the given occupied `(slot, tag)` pairs.
pub fn vault_with(capacity: usize, occupied: &[(usize, u8)]) -> Vault {
    let mut vault = Vault::empty(capacity);
    for &(slot, tag) in occupied {
        vault.set_slot(slot, Some(item(tag)));
    }
    vault
}

/// A vault whose every slot holds the same tag.
pub fn uniform_vault(capacity: usize, tag: u8) -> Vault {
    Vault::from_slots(vec![Some(item(tag)); capacity])
}

/// Distinct tags among a vault's occupied items.
pub fn distinct_tags(vault: &Vault) -> Vec<u8> {
    let mut tags: Vec<u8> = vault.occupied().map(|(_, item)| item.payload()[0]).collect();
    tags.sort_unstable();
    tags.dedup();
    tags
}

/// Poll `condition` until it holds or `timeout` elapses.
pub async fn wait_until<F>(mut condition: F, timeout: Duration) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Receive events until one matches `predicate` or `timeout` elapses.
pub async fn expect_event<F>(
    events: &mut mpsc::UnboundedReceiver<VaultEvent>,
    mut predicate: F,
    timeout: Duration,
) -> Option<VaultEvent>
where
    F: FnMut(&VaultEvent) -> bool,
{
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return None;
        }
        match tokio::time::timeout(remaining, events.recv()).await {
            Ok(Some(event)) if predicate(&event) => return Some(event),
            Ok(Some(_)) => continue,
            Ok(None) | Err(_) => return None,
        }
    }
}
