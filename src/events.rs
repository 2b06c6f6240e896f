//! Engine notification events.
//!
//! The coordinator emits events describing outcomes the host application
//! may want to surface to the end user (it does not format user-facing
//! text itself). Events are delivered on an unbounded channel returned by
//! [`Coordinator::new`](crate::coordinator::Coordinator::new); dropping
//! the receiver silently discards further events.

use crate::types::OwnerId;

/// Events emitted by the persistence coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VaultEvent {
    /// Loading durable data failed; the owner proceeds with an empty vault.
    LoadFailed {
        /// The affected owner.
        owner: OwnerId,
    },

    /// Durable bytes exist but no longer decode; they were left untouched
    /// and the owner proceeds with an empty vault.
    CorruptData {
        /// The affected owner.
        owner: OwnerId,
    },

    /// A save failed or timed out; the next auto-save cycle retries.
    SaveFailed {
        /// The affected owner.
        owner: OwnerId,
    },

    /// Items that no longer fit were moved to durable overflow.
    OverflowSaved {
        /// The affected owner.
        owner: OwnerId,
        /// Number of items moved out.
        count: usize,
    },

    /// Previously overflowed items were merged back into the vault.
    OverflowRestored {
        /// The affected owner.
        owner: OwnerId,
        /// Number of items merged back in.
        restored: usize,
    },

    /// A record stored in a legacy format was re-saved in the current one.
    MigrationRewritten {
        /// The affected owner.
        owner: OwnerId,
    },
}

impl VaultEvent {
    /// The owner this event concerns.
    pub fn owner(&self) -> OwnerId {
        match self {
            VaultEvent::LoadFailed { owner }
            | VaultEvent::CorruptData { owner }
            | VaultEvent::SaveFailed { owner }
            | VaultEvent::OverflowSaved { owner, .. }
            | VaultEvent::OverflowRestored { owner, .. }
            | VaultEvent::MigrationRewritten { owner } => *owner,
        }
    }

    /// Whether this event signals a problem rather than routine progress.
    pub fn is_warning(&self) -> bool {
        matches!(
            self,
            VaultEvent::LoadFailed { .. }
                | VaultEvent::CorruptData { .. }
                | VaultEvent::SaveFailed { .. }
        )
    }
}
