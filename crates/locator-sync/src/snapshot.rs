//! Snapshot — the read-only view handed to presentation code.
//!
//! A snapshot is a value: it is cloned on write behind an `Arc`, so a view
//! obtained from [`SyncEngine::snapshot`](crate::sync::SyncEngine::snapshot)
//! never changes underneath its holder.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::types::{
    CorrelationToken, Location, LocationFields, LocationId, Review, ReviewDraft, ReviewId,
};

/// Position of a location in the snapshot. Confirmed rows sort first by
/// ascending id, unconfirmed ones follow in submission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntryKey {
    Confirmed(LocationId),
    Pending(CorrelationToken),
}

impl EntryKey {
    pub fn id(&self) -> Option<LocationId> {
        match self {
            Self::Confirmed(id) => Some(*id),
            Self::Pending(_) => None,
        }
    }

    pub fn token(&self) -> Option<CorrelationToken> {
        match self {
            Self::Pending(token) => Some(*token),
            Self::Confirmed(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocationEntry {
    pub key: EntryKey,
    pub fields: LocationFields,
    pub updated_at: Option<DateTime<Utc>>,
}

impl LocationEntry {
    pub(crate) fn confirmed(location: Location) -> Self {
        Self {
            key: EntryKey::Confirmed(location.id),
            fields: location.fields,
            updated_at: location.updated_at,
        }
    }

    pub(crate) fn pending(token: CorrelationToken, fields: LocationFields) -> Self {
        Self {
            key: EntryKey::Pending(token),
            fields,
            updated_at: None,
        }
    }

    pub fn id(&self) -> Option<LocationId> {
        self.key.id()
    }

    pub fn is_confirmed(&self) -> bool {
        matches!(self.key, EntryKey::Confirmed(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewEntry {
    /// `None` until the backend confirms the row.
    pub id: Option<ReviewId>,
    /// Set while unconfirmed.
    pub token: Option<CorrelationToken>,
    pub location_id: LocationId,
    pub text: String,
    pub created_at: Option<DateTime<Utc>>,
}

impl ReviewEntry {
    pub(crate) fn confirmed(review: Review) -> Self {
        Self {
            id: Some(review.id),
            token: None,
            location_id: review.location_id,
            text: review.text,
            created_at: Some(review.created_at),
        }
    }

    pub(crate) fn pending(token: CorrelationToken, draft: ReviewDraft) -> Self {
        Self {
            id: None,
            token: Some(token),
            location_id: draft.location_id,
            text: draft.text,
            created_at: None,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        self.id.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub(crate) locations: BTreeMap<EntryKey, LocationEntry>,
    /// Groups never exist empty. Within a group confirmed reviews come first
    /// in non-decreasing `created_at` order, then unconfirmed ones.
    pub(crate) reviews: BTreeMap<LocationId, Vec<ReviewEntry>>,
}

impl Snapshot {
    /// All locations, confirmed first by ascending id.
    pub fn locations(&self) -> impl Iterator<Item = &LocationEntry> {
        self.locations.values()
    }

    pub fn location(&self, id: LocationId) -> Option<&LocationEntry> {
        self.locations.get(&EntryKey::Confirmed(id))
    }

    pub fn pending_location(&self, token: CorrelationToken) -> Option<&LocationEntry> {
        self.locations.get(&EntryKey::Pending(token))
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    /// Reviews for a location in display order. The location itself does
    /// not have to be in the snapshot.
    pub fn reviews_for(&self, id: LocationId) -> &[ReviewEntry] {
        self.reviews.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn review_groups(&self) -> impl Iterator<Item = (LocationId, &[ReviewEntry])> {
        self.reviews.iter().map(|(id, group)| (*id, group.as_slice()))
    }

    pub fn review_count(&self) -> usize {
        self.reviews.values().map(Vec::len).sum()
    }

    /// Locations and reviews still waiting for the backend.
    pub fn unconfirmed_count(&self) -> usize {
        let locations = self.locations.values().filter(|e| !e.is_confirmed()).count();
        let reviews = self
            .reviews
            .values()
            .flatten()
            .filter(|r| !r.is_confirmed())
            .count();
        locations + reviews
    }
}
