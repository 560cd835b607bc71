//! Sync-specific types: write intents, engine options and feed status.

use std::sync::Arc;

use crate::{
    error::LocatorError,
    store::RemoteStore,
    types::{Collection, Location, LocationFields, LocationId, OrderBy, Review, ReviewDraft, ShelterPatch},
};

// ============================================================================
// Write intents
// ============================================================================

/// A validated draft ready for optimistic insertion.
#[derive(Debug, Clone, PartialEq)]
pub enum Draft {
    Location(LocationFields),
    Review(ReviewDraft),
}

impl Draft {
    pub fn collection(&self) -> Collection {
        match self {
            Self::Location(_) => Collection::Locations,
            Self::Review(_) => Collection::Reviews,
        }
    }
}

/// A write issued by presentation code.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteIntent {
    AddLocation(LocationFields),
    AddReview(ReviewDraft),
    UpdateShelter {
        location_id: LocationId,
        patch: ShelterPatch,
    },
}

impl WriteIntent {
    pub fn collection(&self) -> Collection {
        match self {
            Self::AddLocation(_) | Self::UpdateShelter { .. } => Collection::Locations,
            Self::AddReview(_) => Collection::Reviews,
        }
    }
}

/// What the backend confirmed for a successful write.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome {
    Location(Location),
    Review(Review),
    Updated(LocationId),
}

// ============================================================================
// Feed status
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedStatus {
    /// Not subscribed (before `start()` or after `shutdown()`).
    Idle,
    Live,
    /// Disconnected. The snapshot is kept but may be stale.
    Lost,
    /// Reconnected after a loss. Changes made while disconnected are missing
    /// until `resync()` completes.
    Stale,
}

// ============================================================================
// SyncEngine Options
// ============================================================================

/// Callback type for conditions that are reported rather than returned,
/// such as a lost subscription or a malformed feed payload.
pub type SyncErrorCallback = dyn Fn(&LocatorError) + Send + Sync;

/// Configuration for `SyncEngine`.
pub struct SyncEngineOptions {
    pub store: Arc<dyn RemoteStore>,
    /// Order the `locations` query asks for (default: `id` ascending).
    /// Only affects which of several field-identical pending inserts a
    /// loaded row confirms; the snapshot always lists confirmed rows by id.
    pub location_order: Option<OrderBy>,
    /// Order the `reviews` query asks for (default: `created_at` ascending).
    /// Only breaks ties between equal `created_at` values; groups are always
    /// sorted by `created_at`.
    pub review_order: Option<OrderBy>,
    /// Stamp shelter updates with `updated_at = now` (default: true)
    pub stamp_updates: Option<bool>,
    /// Called for subscription losses and undeliverable feed payloads
    pub on_error: Option<Arc<SyncErrorCallback>>,
}

impl SyncEngineOptions {
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self {
            store,
            location_order: None,
            review_order: None,
            stamp_updates: None,
            on_error: None,
        }
    }
}
