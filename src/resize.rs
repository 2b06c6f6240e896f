//! Capacity reconciliation: splitting records into accessible and
//! overflow portions, merging overflow back, and display sizing.
//!
//! Everything here is a pure function of its inputs; the coordinator
//! supplies stored overflow and persists results. Conservation holds
//! throughout: every occupied item ends up in exactly one of the
//! returned vault or the overflow sequence.

use crate::types::{Item, Vault};

/// Result of a strict resize: the re-sized vault plus the items that no
/// longer fit, in ascending original slot order.
#[derive(Debug, Clone, PartialEq)]
pub struct ResizeOutcome {
    /// The record at its new length.
    pub vault: Vault,
    /// Items displaced by the shrink, insertion order preserved.
    pub overflow: Vec<Item>,
}

/// Round `n` up to the next multiple of `block`.
pub fn round_up_to_block(n: usize, block: usize) -> usize {
    debug_assert!(block > 0);
    n.div_ceil(block) * block
}

/// The length a cached record should have for a granted capacity.
///
/// Normally just `capacity`; an occupied slot at or beyond it is
/// authoritative and extends the length to the next block boundary past
/// that slot, so prior oversized data stays visible instead of being
/// silently truncated.
pub fn expected_display_size(vault: &Vault, capacity: usize, block: usize) -> usize {
    match vault.highest_occupied() {
        Some(highest) if highest >= capacity => {
            capacity.max(round_up_to_block(highest + 1, block))
        }
        _ => capacity,
    }
}

/// Resize `old` to exactly `new_len` slots.
///
/// Occupied slots below `new_len` keep their indices; occupied slots at
/// or beyond it become overflow in ascending slot order. Placeholder
/// markers are dropped, never counted as occupied.
pub fn resize(old: &Vault, new_len: usize) -> ResizeOutcome {
    let mut vault = Vault::empty(new_len);
    let mut overflow = Vec::new();

    for (index, item) in old.occupied() {
        if index < new_len {
            vault.set_slot(index, Some(item.clone()));
        } else {
            overflow.push(item.clone());
        }
    }

    ResizeOutcome { vault, overflow }
}

/// Merge overflowed items back into `vault`, first-fit in the order the
/// items were stored, stopping when no empty slot remains. Returns the
/// items that did not fit, their order preserved.
pub fn merge_overflow(vault: &mut Vault, overflow: Vec<Item>) -> Vec<Item> {
    let mut remainder = Vec::new();

    for item in overflow {
        if item.is_placeholder() {
            continue;
        }
        match vault.first_empty() {
            Some(slot) => vault.set_slot(slot, Some(item)),
            None => remainder.push(item),
        }
    }

    remainder
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashMap;

    fn item(tag: u8) -> Item {
        Item::new(vec![tag])
    }

    fn vault_with(capacity: usize, occupied: &[(usize, u8)]) -> Vault {
        let mut vault = Vault::empty(capacity);
        for &(slot, tag) in occupied {
            vault.set_slot(slot, Some(item(tag)));
        }
        vault
    }

    fn multiset(items: &[Item]) -> HashMap<Item, usize> {
        let mut counts = HashMap::new();
        for item in items {
            *counts.entry(item.clone()).or_insert(0) += 1;
        }
        counts
    }

    #[test]
    fn round_up() {
        assert_eq!(round_up_to_block(0, 9), 0);
        assert_eq!(round_up_to_block(1, 9), 9);
        assert_eq!(round_up_to_block(9, 9), 9);
        assert_eq!(round_up_to_block(10, 9), 18);
        assert_eq!(round_up_to_block(31, 9), 36);
    }

    #[test]
    fn display_size_plain() {
        let vault = vault_with(27, &[(3, 1)]);
        assert_eq!(expected_display_size(&vault, 27, 9), 27);
        assert_eq!(expected_display_size(&Vault::empty(27), 27, 9), 27);
    }

    #[test]
    fn display_size_extends_over_oversized_slot() {
        // Occupied slot 30 with capacity 27: extend to the next block.
        let vault = vault_with(36, &[(30, 1)]);
        assert_eq!(expected_display_size(&vault, 27, 9), 36);

        // Slot 35 still fits in 36; slot 36 would push to 45.
        let vault = vault_with(45, &[(36, 1)]);
        assert_eq!(expected_display_size(&vault, 27, 9), 45);
    }

    #[test]
    fn shrink_moves_excess_to_overflow() {
        let occupied: Vec<(usize, u8)> = (10..=20).map(|i| (i, i as u8)).collect();
        let vault = vault_with(27, &occupied);

        let outcome = resize(&vault, 9);
        assert_eq!(outcome.vault.capacity(), 9);
        assert_eq!(outcome.vault.occupied_count(), 0);
        assert_eq!(outcome.overflow.len(), 11);
        // Ascending original slot order.
        let tags: Vec<u8> = outcome
            .overflow
            .iter()
            .map(|i| i.payload()[0])
            .collect();
        assert_eq!(tags, (10..=20).map(|i| i as u8).collect::<Vec<_>>());
    }

    #[test]
    fn grow_preserves_indices() {
        let vault = vault_with(9, &[(0, 1), (8, 2)]);
        let outcome = resize(&vault, 27);

        assert_eq!(outcome.vault.capacity(), 27);
        assert!(outcome.overflow.is_empty());
        assert_eq!(outcome.vault.slot(0), Some(&item(1)));
        assert_eq!(outcome.vault.slot(8), Some(&item(2)));
    }

    #[test]
    fn placeholders_never_overflow() {
        let mut vault = Vault::empty(18);
        vault.set_slot(12, Some(Item::new(Vec::new())));
        vault.set_slot(13, Some(item(5)));

        let outcome = resize(&vault, 9);
        assert_eq!(outcome.overflow, vec![item(5)]);
    }

    #[test]
    fn merge_is_first_fit_in_stored_order() {
        let mut vault = vault_with(9, &[(0, 1), (2, 2)]);
        let remainder = merge_overflow(&mut vault, vec![item(10), item(11), item(12)]);

        assert!(remainder.is_empty());
        assert_eq!(vault.slot(1), Some(&item(10)));
        assert_eq!(vault.slot(3), Some(&item(11)));
        assert_eq!(vault.slot(4), Some(&item(12)));
    }

    #[test]
    fn merge_remainder_keeps_order() {
        let mut vault = vault_with(3, &[(0, 1), (1, 2)]);
        let remainder = merge_overflow(&mut vault, vec![item(10), item(11), item(12)]);

        assert_eq!(vault.slot(2), Some(&item(10)));
        assert_eq!(remainder, vec![item(11), item(12)]);
    }

    #[test]
    fn shrink_then_grow_round_trip() {
        // Capacity 27, slots 10-20 occupied, shrink to 9, grow back to 27:
        // every original item present exactly once afterwards.
        let occupied: Vec<(usize, u8)> = (10..=20).map(|i| (i, i as u8)).collect();
        let original = vault_with(27, &occupied);
        let before = multiset(&original.items());

        let shrunk = resize(&original, 9);
        let mut grown = resize(&shrunk.vault, 27).vault;
        let remainder = merge_overflow(&mut grown, shrunk.overflow);

        assert!(remainder.is_empty());
        assert_eq!(multiset(&grown.items()), before);
        assert_eq!(grown.occupied_count(), 11);
    }

    proptest! {
        #[test]
        fn conservation(
            slots in proptest::collection::vec(
                proptest::option::weighted(0.4, 0u8..=255),
                0..64,
            ),
            new_len in 0usize..64,
        ) {
            let vault = Vault::from_slots(
                slots.iter().map(|s| s.map(|tag| item(tag))).collect(),
            );
            let before = multiset(&vault.items());

            let outcome = resize(&vault, new_len);
            let mut after = outcome.vault.items();
            after.extend(outcome.overflow.iter().cloned());

            prop_assert_eq!(multiset(&after), before);
            prop_assert_eq!(outcome.vault.capacity(), new_len);
        }

        #[test]
        fn merge_conserves(
            occupied in proptest::collection::vec(0u8..=255, 0..16),
            extra in proptest::collection::vec(0u8..=255, 0..16),
            capacity in 0usize..32,
        ) {
            let mut vault = Vault::empty(capacity);
            for (i, tag) in occupied.iter().enumerate().take(capacity) {
                vault.set_slot(i, Some(item(*tag)));
            }
            let incoming: Vec<Item> = extra.iter().map(|t| item(*t)).collect();

            let mut before = vault.items();
            before.extend(incoming.iter().cloned());

            let remainder = merge_overflow(&mut vault, incoming);
            let mut after = vault.items();
            after.extend(remainder.iter().cloned());

            prop_assert_eq!(multiset(&after), multiset(&before));
        }
    }
}
