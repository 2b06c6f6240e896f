//! Core types used throughout the vault persistence engine.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Stable unique identifier for a vault owner.
pub type OwnerId = uuid::Uuid;

/// An opaque, serializable item payload occupying one vault slot.
///
/// The engine never inspects item contents; it only moves them between
/// slots and the durable store. An item with an empty payload is a
/// placeholder and is never treated as occupying its slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Item {
    payload: Bytes,
}

impl Item {
    /// Create an item from an opaque payload.
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    /// The raw payload bytes.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Placeholder items carry no payload and never count as occupied.
    pub fn is_placeholder(&self) -> bool {
        self.payload.is_empty()
    }
}

/// An ordered, fixed-length sequence of optional item slots.
///
/// The capacity of a vault is the length of its slot sequence. Slots are
/// either empty (`None`, or a placeholder item) or occupied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vault {
    slots: Vec<Option<Item>>,
}

impl Vault {
    /// Create an empty vault with the given capacity.
    pub fn empty(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity],
        }
    }

    /// Create a vault from explicit slot contents.
    pub fn from_slots(slots: Vec<Option<Item>>) -> Self {
        Self { slots }
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// The slot contents at `index`, if occupied.
    pub fn slot(&self, index: usize) -> Option<&Item> {
        self.slots
            .get(index)
            .and_then(|s| s.as_ref())
            .filter(|item| !item.is_placeholder())
    }

    /// Set the slot at `index`. Out-of-range indices are ignored.
    pub fn set_slot(&mut self, index: usize, item: Option<Item>) {
        if let Some(slot) = self.slots.get_mut(index) {
            *slot = item;
        }
    }

    /// Raw slot view, placeholders included.
    pub fn slots(&self) -> &[Option<Item>] {
        &self.slots
    }

    /// Iterate occupied slots in ascending index order.
    pub fn occupied(&self) -> impl Iterator<Item = (usize, &Item)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|item| (i, item)))
            .filter(|(_, item)| !item.is_placeholder())
    }

    /// Number of occupied slots.
    pub fn occupied_count(&self) -> usize {
        self.occupied().count()
    }

    /// Index of the highest occupied slot, if any.
    pub fn highest_occupied(&self) -> Option<usize> {
        self.slots
            .iter()
            .enumerate()
            .rev()
            .find(|(_, s)| s.as_ref().is_some_and(|item| !item.is_placeholder()))
            .map(|(i, _)| i)
    }

    /// Index of the first empty slot, if any.
    pub fn first_empty(&self) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.as_ref().map_or(true, Item::is_placeholder))
    }

    /// Whether no slot is occupied.
    pub fn is_empty(&self) -> bool {
        self.occupied().next().is_none()
    }

    /// All occupied items in slot order. Useful for conservation checks.
    pub fn items(&self) -> Vec<Item> {
        self.occupied().map(|(_, item)| item.clone()).collect()
    }
}

/// A cached record: the canonical vault plus bookkeeping.
///
/// `granted` is the slot capacity that was in force when the entry was
/// last reconciled; the coordinator compares it against newly supplied
/// capacities to tell a real downgrade apart from oversized loaded data.
#[derive(Debug, Clone)]
pub struct VaultEntry {
    /// The canonical record. Callers receive copies; writes come back
    /// only through an explicit commit.
    pub vault: Vault,

    /// Display-name hint, passed through to the backend for bookkeeping.
    pub display_name: String,

    /// Capacity granted at last reconcile.
    pub granted: usize,
}

impl VaultEntry {
    /// Create an entry for a freshly reconciled vault.
    pub fn new(vault: Vault, display_name: impl Into<String>, granted: usize) -> Self {
        Self {
            vault,
            display_name: display_name.into(),
            granted,
        }
    }
}
