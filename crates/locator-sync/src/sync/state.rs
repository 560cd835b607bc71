//! SyncState — the reconciliation core behind [`SyncEngine`](super::SyncEngine).
//!
//! Holds the authoritative rows, the unconfirmed local writes layered on top
//! of them, and the materialized [`Snapshot`]. Everything here is synchronous
//! and free of I/O: the engine serializes access with a mutex and does the
//! remote calls itself.
//!
//! # Reconciliation rules
//!
//! - Unconfirmed inserts live in the snapshot under `EntryKey::Pending`.
//! - Optimistic shelter updates are ordered patches over the authoritative
//!   row. The displayed row is always `authoritative + patches`.
//! - A remote row whose id is already confirmed is a plain upsert. Otherwise
//!   it confirms the earliest unconfirmed entry with equal caller-supplied
//!   fields, if any.
//! - A write confirmed through its own `insert` response is matched by token,
//!   never by fields.
//! - A write response never replaces authoritative state the change feed
//!   delivered after the write was issued, and never revives a deleted row.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use crate::{
    error::{ValidationError, ValidationErrors},
    feed::event::{Change, RemoteEvent},
    snapshot::{EntryKey, LocationEntry, ReviewEntry, Snapshot},
    types::{
        Amenities, Collection, CorrelationToken, Location, LocationFields, LocationId, Review,
        ReviewId, ShelterPatch,
    },
};

use super::types::Draft;

struct PendingPatch {
    token: CorrelationToken,
    location_id: LocationId,
    patch: ShelterPatch,
    /// Revision of the authoritative row when the patch was pushed.
    base_revision: u64,
}

pub struct SyncState {
    snapshot: Arc<Snapshot>,
    /// Last authoritative version of every confirmed location.
    confirmed: BTreeMap<LocationId, Location>,
    /// Unconfirmed shelter updates, in submission order.
    patches: Vec<PendingPatch>,
    /// Bumped whenever the authoritative row for an id changes or goes away.
    revisions: HashMap<LocationId, u64>,
    deleted_locations: HashSet<LocationId>,
    deleted_reviews: HashSet<ReviewId>,
    next_token: u64,
}

impl SyncState {
    pub fn new() -> Self {
        Self {
            snapshot: Arc::new(Snapshot::default()),
            confirmed: BTreeMap::new(),
            patches: Vec::new(),
            revisions: HashMap::new(),
            deleted_locations: HashSet::new(),
            deleted_reviews: HashSet::new(),
            next_token: 1,
        }
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.snapshot)
    }

    /// The authoritative row, ignoring pending patches.
    pub fn authoritative(&self, id: LocationId) -> Option<&Location> {
        self.confirmed.get(&id)
    }

    pub fn pending_patch_count(&self) -> usize {
        self.patches.len()
    }

    fn revision(&self, id: LocationId) -> u64 {
        self.revisions.get(&id).copied().unwrap_or(0)
    }

    fn bump_revision(&mut self, id: LocationId) {
        *self.revisions.entry(id).or_insert(0) += 1;
    }

    fn issue_token(&mut self) -> CorrelationToken {
        let token = CorrelationToken(self.next_token);
        self.next_token += 1;
        token
    }

    // -----------------------------------------------------------------------
    // Optimistic writes
    // -----------------------------------------------------------------------

    /// Add an unconfirmed entry. The draft must already be validated.
    pub fn apply_optimistic_insert(&mut self, draft: Draft) -> CorrelationToken {
        let token = self.issue_token();
        let snapshot = Arc::make_mut(&mut self.snapshot);
        match draft {
            Draft::Location(fields) => {
                snapshot
                    .locations
                    .insert(EntryKey::Pending(token), LocationEntry::pending(token, fields));
            }
            Draft::Review(draft) => {
                snapshot
                    .reviews
                    .entry(draft.location_id)
                    .or_default()
                    .push(ReviewEntry::pending(token, draft));
            }
        }
        token
    }

    /// Layer an optimistic update over a confirmed shelter.
    pub fn push_patch(
        &mut self,
        location_id: LocationId,
        patch: ShelterPatch,
    ) -> Result<CorrelationToken, ValidationErrors> {
        let location = self.confirmed.get(&location_id).ok_or_else(|| {
            ValidationError::new("location_id", "a known location", location_id.to_string())
        })?;
        if !matches!(location.fields.amenities, Amenities::Shelter { .. }) {
            return Err(ValidationError::new(
                "location_id",
                "a shelter",
                location.fields.category().to_string(),
            )
            .into());
        }

        let token = self.issue_token();
        let base_revision = self.revision(location_id);
        self.patches.push(PendingPatch {
            token,
            location_id,
            patch,
            base_revision,
        });
        self.refresh_location(location_id);
        Ok(token)
    }

    // -----------------------------------------------------------------------
    // Write resolution
    // -----------------------------------------------------------------------

    /// The backend accepted an insert and returned the row. If the change
    /// feed already confirmed or deleted that id, its version stands.
    pub fn confirm_location(&mut self, token: CorrelationToken, location: Location) {
        let key = EntryKey::Pending(token);
        if self.snapshot.locations.contains_key(&key) {
            Arc::make_mut(&mut self.snapshot).locations.remove(&key);
        }
        let id = location.id;
        if self.confirmed.contains_key(&id) || self.deleted_locations.contains(&id) {
            return;
        }
        self.upsert_location(location);
    }

    pub fn confirm_review(&mut self, token: CorrelationToken, review: Review) {
        self.remove_pending_review(token);
        if self.find_review(review.id).is_some() || self.deleted_reviews.contains(&review.id) {
            return;
        }
        self.place_review(review);
    }

    /// The backend accepted an update. The patch is folded into the
    /// authoritative row unless a newer row arrived since it was pushed, in
    /// which case that row already reflects the update or supersedes it.
    pub fn commit_patch(&mut self, token: CorrelationToken) -> bool {
        let Some(pos) = self.patches.iter().position(|p| p.token == token) else {
            return false;
        };
        let pending = self.patches.remove(pos);
        if self.revision(pending.location_id) == pending.base_revision {
            if let Some(base) = self.confirmed.get_mut(&pending.location_id) {
                pending.patch.apply_to(base);
            }
        }
        self.refresh_location(pending.location_id);
        true
    }

    /// Undo an unconfirmed write. Returns the collection it touched, or
    /// `None` if the token was already resolved.
    pub fn rollback(&mut self, token: CorrelationToken) -> Option<Collection> {
        let key = EntryKey::Pending(token);
        if self.snapshot.locations.contains_key(&key) {
            Arc::make_mut(&mut self.snapshot).locations.remove(&key);
            return Some(Collection::Locations);
        }
        if let Some(pos) = self.patches.iter().position(|p| p.token == token) {
            let pending = self.patches.remove(pos);
            self.refresh_location(pending.location_id);
            return Some(Collection::Locations);
        }
        if self.remove_pending_review(token) {
            return Some(Collection::Reviews);
        }
        None
    }

    // -----------------------------------------------------------------------
    // Remote events
    // -----------------------------------------------------------------------

    /// Merge an authoritative change. Replaying an event is a no-op.
    pub fn apply_remote_event(&mut self, event: &RemoteEvent) {
        match event {
            RemoteEvent::Location(Change::Inserted(location) | Change::Updated(location)) => {
                self.apply_location_row(location.clone());
            }
            RemoteEvent::Location(Change::Deleted(id)) => self.delete_location(*id),
            RemoteEvent::Review(Change::Inserted(review) | Change::Updated(review)) => {
                self.apply_review_row(review.clone());
            }
            RemoteEvent::Review(Change::Deleted(id)) => self.delete_review(*id),
        }
    }

    fn apply_location_row(&mut self, location: Location) {
        if !self.confirmed.contains_key(&location.id) {
            if let Some(token) = self.match_pending_location(&location.fields) {
                tracing::debug!(%token, id = %location.id, "self-echo confirmed pending location");
                Arc::make_mut(&mut self.snapshot)
                    .locations
                    .remove(&EntryKey::Pending(token));
            }
        }
        self.upsert_location(location);
    }

    fn match_pending_location(&self, fields: &LocationFields) -> Option<CorrelationToken> {
        self.snapshot
            .locations
            .range(EntryKey::Pending(CorrelationToken(0))..)
            .find(|(_, entry)| entry.fields == *fields)
            .and_then(|(key, _)| key.token())
    }

    fn upsert_location(&mut self, location: Location) {
        let id = location.id;
        if self.confirmed.get(&id) != Some(&location) {
            self.bump_revision(id);
            self.confirmed.insert(id, location);
        }
        self.refresh_location(id);
    }

    fn delete_location(&mut self, id: LocationId) {
        self.deleted_locations.insert(id);
        if self.confirmed.remove(&id).is_none() {
            return;
        }
        self.bump_revision(id);
        self.patches.retain(|p| p.location_id != id);
        self.refresh_location(id);
    }

    /// Recompute the displayed row for `id` from its authoritative version
    /// and the pending patches that target it.
    fn refresh_location(&mut self, id: LocationId) {
        let key = EntryKey::Confirmed(id);
        let displayed = self.confirmed.get(&id).map(|base| {
            let mut shown = base.clone();
            for pending in self.patches.iter().filter(|p| p.location_id == id) {
                pending.patch.apply_to(&mut shown);
            }
            LocationEntry::confirmed(shown)
        });

        if self.snapshot.locations.get(&key) == displayed.as_ref() {
            return;
        }
        let snapshot = Arc::make_mut(&mut self.snapshot);
        match displayed {
            Some(entry) => {
                snapshot.locations.insert(key, entry);
            }
            None => {
                snapshot.locations.remove(&key);
            }
        }
    }

    fn apply_review_row(&mut self, review: Review) {
        if self.find_review(review.id).is_none() {
            if let Some(token) = self.match_pending_review(&review) {
                tracing::debug!(%token, id = %review.id, "self-echo confirmed pending review");
                self.remove_pending_review(token);
            }
        }
        self.place_review(review);
    }

    fn match_pending_review(&self, review: &Review) -> Option<CorrelationToken> {
        self.snapshot
            .reviews
            .get(&review.location_id)?
            .iter()
            .find(|e| !e.is_confirmed() && e.text == review.text)
            .and_then(|e| e.token)
    }

    /// Upsert a confirmed review by id, keeping its group sorted by
    /// `created_at` with ties in arrival order.
    fn place_review(&mut self, review: Review) {
        let entry = ReviewEntry::confirmed(review);

        if let Some((location_id, idx)) = self.find_review_position(&entry) {
            let existing = &self.snapshot.reviews[&location_id][idx];
            if existing == &entry {
                return;
            }
            let same_slot =
                location_id == entry.location_id && existing.created_at == entry.created_at;
            let snapshot = Arc::make_mut(&mut self.snapshot);
            if same_slot {
                if let Some(group) = snapshot.reviews.get_mut(&location_id) {
                    group[idx] = entry;
                }
                return;
            }
            remove_review_at(snapshot, location_id, idx);
        }

        let snapshot = Arc::make_mut(&mut self.snapshot);
        let group = snapshot.reviews.entry(entry.location_id).or_default();
        let at = group
            .iter()
            .position(|e| match e.created_at {
                None => true,
                Some(t) => Some(t) > entry.created_at,
            })
            .unwrap_or(group.len());
        group.insert(at, entry);
    }

    fn find_review_position(&self, entry: &ReviewEntry) -> Option<(LocationId, usize)> {
        entry.id.and_then(|id| self.find_review(id))
    }

    fn find_review(&self, id: ReviewId) -> Option<(LocationId, usize)> {
        self.snapshot.reviews.iter().find_map(|(location_id, group)| {
            group
                .iter()
                .position(|e| e.id == Some(id))
                .map(|idx| (*location_id, idx))
        })
    }

    fn delete_review(&mut self, id: ReviewId) {
        self.deleted_reviews.insert(id);
        if let Some((location_id, idx)) = self.find_review(id) {
            remove_review_at(Arc::make_mut(&mut self.snapshot), location_id, idx);
        }
    }

    fn remove_pending_review(&mut self, token: CorrelationToken) -> bool {
        let found = self.snapshot.reviews.iter().find_map(|(location_id, group)| {
            group
                .iter()
                .position(|e| e.token == Some(token))
                .map(|idx| (*location_id, idx))
        });
        match found {
            Some((location_id, idx)) => {
                remove_review_at(Arc::make_mut(&mut self.snapshot), location_id, idx);
                true
            }
            None => false,
        }
    }

    // -----------------------------------------------------------------------
    // Full reloads
    // -----------------------------------------------------------------------

    /// Replace every confirmed location with `locations`. Unconfirmed
    /// inserts and patches on surviving rows are kept. Rows equal to the
    /// current ones leave the snapshot untouched.
    pub fn reload_locations(&mut self, locations: Vec<Location>) {
        let incoming: HashSet<LocationId> = locations.iter().map(|l| l.id).collect();
        let gone: Vec<LocationId> = self
            .confirmed
            .keys()
            .filter(|id| !incoming.contains(id))
            .copied()
            .collect();
        for id in gone {
            self.delete_location(id);
        }

        for location in locations {
            if self.confirmed.contains_key(&location.id) {
                self.upsert_location(location);
            } else {
                self.apply_location_row(location);
            }
        }
    }

    /// Replace every confirmed review with `reviews`, keeping unconfirmed ones.
    pub fn reload_reviews(&mut self, reviews: Vec<Review>) {
        let incoming: HashSet<ReviewId> = reviews.iter().map(|r| r.id).collect();
        let gone: Vec<ReviewId> = self
            .snapshot
            .reviews
            .values()
            .flatten()
            .filter_map(|e| e.id)
            .filter(|id| !incoming.contains(id))
            .collect();
        for id in gone {
            self.delete_review(id);
        }

        for review in reviews {
            if self.find_review(review.id).is_some() {
                self.place_review(review);
            } else {
                self.apply_review_row(review);
            }
        }
    }
}

impl Default for SyncState {
    fn default() -> Self {
        Self::new()
    }
}

fn remove_review_at(snapshot: &mut Snapshot, location_id: LocationId, idx: usize) {
    if let Some(group) = snapshot.reviews.get_mut(&location_id) {
        group.remove(idx);
        if group.is_empty() {
            snapshot.reviews.remove(&location_id);
        }
    }
}
