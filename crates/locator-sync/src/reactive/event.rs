//! ChangeEvent — describes why the snapshot changed.
//!
//! Emitted by `SyncEngine` after every mutation so that subscribers know
//! which collection moved and whether the change is local or authoritative.

use crate::{feed::event::ChangeKind, types::Collection, types::CorrelationToken};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    /// An unconfirmed local write was applied.
    Optimistic {
        collection: Collection,
        token: CorrelationToken,
    },
    /// The backend accepted a local write.
    Confirmed {
        collection: Collection,
        token: CorrelationToken,
    },
    /// The backend refused a local write and it was undone.
    RolledBack {
        collection: Collection,
        token: CorrelationToken,
    },
    /// A change-feed event was merged.
    Remote {
        collection: Collection,
        kind: ChangeKind,
        id: i64,
    },
    /// The collection was re-queried from scratch.
    Reloaded { collection: Collection },
}

impl ChangeEvent {
    /// The collection that was affected.
    pub fn collection(&self) -> Collection {
        match self {
            Self::Optimistic { collection, .. } => *collection,
            Self::Confirmed { collection, .. } => *collection,
            Self::RolledBack { collection, .. } => *collection,
            Self::Remote { collection, .. } => *collection,
            Self::Reloaded { collection } => *collection,
        }
    }

    /// The local write this event resolves, if any.
    pub fn token(&self) -> Option<CorrelationToken> {
        match self {
            Self::Optimistic { token, .. }
            | Self::Confirmed { token, .. }
            | Self::RolledBack { token, .. } => Some(*token),
            Self::Remote { .. } | Self::Reloaded { .. } => None,
        }
    }
}
