//! SyncState tests: optimistic entries, self-echo de-duplication, review
//! grouping, patches and rollback.

use chrono::{DateTime, TimeZone, Utc};
use proptest::prelude::*;

use locator_sync::{
    feed::{Change, RemoteEvent},
    snapshot::Snapshot,
    sync::{Draft, SyncState},
    types::{
        Amenities, Collection, Location, LocationFields, LocationId, Review, ReviewDraft,
        ReviewId, ShelterPatch,
    },
};

// ============================================================================
// Helpers
// ============================================================================

fn shelter(name: &str, beds: u32) -> LocationFields {
    LocationFields {
        name: name.to_string(),
        lat: 40.7,
        lng: -74.0,
        address: None,
        hours: None,
        contact: None,
        amenities: Amenities::Shelter {
            available_beds: beds,
            capacity: 20,
        },
    }
}

fn restaurant(name: &str) -> LocationFields {
    LocationFields {
        amenities: Amenities::Restaurant { extra_food: None },
        ..shelter(name, 0)
    }
}

fn location(id: i64, fields: LocationFields) -> Location {
    Location {
        id: LocationId(id),
        fields,
        updated_at: None,
    }
}

fn at(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(1_700_000_000_000 + ms).unwrap()
}

fn review(id: i64, location_id: i64, text: &str, ms: i64) -> Review {
    Review {
        id: ReviewId(id),
        location_id: LocationId(location_id),
        text: text.to_string(),
        created_at: at(ms),
    }
}

fn draft(location_id: i64, text: &str) -> Draft {
    Draft::Review(ReviewDraft {
        location_id: LocationId(location_id),
        text: text.to_string(),
    })
}

fn loc_inserted(l: Location) -> RemoteEvent {
    RemoteEvent::Location(Change::Inserted(l))
}

fn loc_updated(l: Location) -> RemoteEvent {
    RemoteEvent::Location(Change::Updated(l))
}

fn rev_inserted(r: Review) -> RemoteEvent {
    RemoteEvent::Review(Change::Inserted(r))
}

fn review_ids(snapshot: &Snapshot, location_id: i64) -> Vec<Option<i64>> {
    snapshot
        .reviews_for(LocationId(location_id))
        .iter()
        .map(|e| e.id.map(|id| id.0))
        .collect()
}

fn beds(snapshot: &Snapshot, id: i64) -> Option<u32> {
    snapshot
        .location(LocationId(id))
        .and_then(|e| e.fields.available_beds())
}

// ============================================================================
// Optimistic inserts and self-echo
// ============================================================================

#[test]
fn optimistic_insert_is_visible_immediately() {
    let mut state = SyncState::new();
    let token = state.apply_optimistic_insert(Draft::Location(shelter("Harbor House", 5)));

    let snapshot = state.snapshot();
    let entry = snapshot.pending_location(token).expect("pending entry");
    assert_eq!(entry.fields.name, "Harbor House");
    assert!(!entry.is_confirmed());
    assert_eq!(snapshot.unconfirmed_count(), 1);
}

#[test]
fn tokens_are_distinct_and_increasing() {
    let mut state = SyncState::new();
    let a = state.apply_optimistic_insert(Draft::Location(shelter("A", 1)));
    let b = state.apply_optimistic_insert(draft(1, "hi"));
    assert!(a < b);
}

#[test]
fn self_echo_replaces_the_pending_entry() {
    let mut state = SyncState::new();
    let token = state.apply_optimistic_insert(Draft::Location(shelter("Harbor House", 5)));

    state.apply_remote_event(&loc_inserted(location(42, shelter("Harbor House", 5))));

    let snapshot = state.snapshot();
    assert_eq!(snapshot.len(), 1);
    assert!(snapshot.pending_location(token).is_none());
    assert!(snapshot.location(LocationId(42)).unwrap().is_confirmed());
}

#[test]
fn echo_with_different_fields_is_a_separate_location() {
    let mut state = SyncState::new();
    let token = state.apply_optimistic_insert(Draft::Location(shelter("Harbor House", 5)));

    state.apply_remote_event(&loc_inserted(location(42, shelter("Harbor House", 6))));

    let snapshot = state.snapshot();
    assert_eq!(snapshot.len(), 2);
    assert!(snapshot.pending_location(token).is_some());
}

#[test]
fn earliest_matching_pending_entry_is_confirmed_first() {
    let mut state = SyncState::new();
    let first = state.apply_optimistic_insert(Draft::Location(shelter("Twin", 1)));
    let second = state.apply_optimistic_insert(Draft::Location(shelter("Twin", 1)));

    state.apply_remote_event(&loc_inserted(location(1, shelter("Twin", 1))));

    let snapshot = state.snapshot();
    assert!(snapshot.pending_location(first).is_none());
    assert!(snapshot.pending_location(second).is_some());

    state.apply_remote_event(&loc_inserted(location(2, shelter("Twin", 1))));
    let snapshot = state.snapshot();
    assert_eq!(snapshot.len(), 2);
    assert_eq!(snapshot.unconfirmed_count(), 0);
}

#[test]
fn confirmation_by_token_ignores_field_matches() {
    let mut state = SyncState::new();
    let first = state.apply_optimistic_insert(Draft::Location(shelter("Twin", 1)));
    let second = state.apply_optimistic_insert(Draft::Location(shelter("Twin", 1)));

    state.confirm_location(second, location(7, shelter("Twin", 1)));

    let snapshot = state.snapshot();
    assert!(snapshot.pending_location(first).is_some());
    assert!(snapshot.pending_location(second).is_none());
    assert!(snapshot.location(LocationId(7)).is_some());
}

#[test]
fn echo_after_token_confirmation_changes_nothing() {
    let mut state = SyncState::new();
    let token = state.apply_optimistic_insert(Draft::Location(shelter("Harbor House", 5)));
    state.confirm_location(token, location(42, shelter("Harbor House", 5)));
    let before = state.snapshot();

    state.apply_remote_event(&loc_inserted(location(42, shelter("Harbor House", 5))));

    assert_eq!(*state.snapshot(), *before);
    assert_eq!(state.snapshot().len(), 1);
}

#[test]
fn token_confirmation_keeps_a_newer_remote_row() {
    let mut state = SyncState::new();
    let token = state.apply_optimistic_insert(Draft::Location(shelter("Harbor House", 5)));
    state.apply_remote_event(&loc_inserted(location(42, shelter("Harbor House", 5))));
    state.apply_remote_event(&loc_updated(location(42, shelter("Harbor House", 9))));

    state.confirm_location(token, location(42, shelter("Harbor House", 5)));

    assert_eq!(beds(&state.snapshot(), 42), Some(9));
    assert_eq!(state.snapshot().len(), 1);
}

#[test]
fn token_confirmation_does_not_revive_a_deleted_row() {
    let mut state = SyncState::new();
    let token = state.apply_optimistic_insert(Draft::Location(shelter("Harbor House", 5)));
    state.apply_remote_event(&loc_inserted(location(42, shelter("Harbor House", 5))));
    state.apply_remote_event(&RemoteEvent::Location(Change::Deleted(LocationId(42))));

    state.confirm_location(token, location(42, shelter("Harbor House", 5)));

    assert!(state.snapshot().is_empty());
    assert_eq!(state.snapshot().unconfirmed_count(), 0);
}

#[test]
fn token_confirmation_after_echo_changes_nothing() {
    let mut state = SyncState::new();
    let token = state.apply_optimistic_insert(Draft::Location(shelter("Harbor House", 5)));
    state.apply_remote_event(&loc_inserted(location(42, shelter("Harbor House", 5))));
    let before = state.snapshot();

    state.confirm_location(token, location(42, shelter("Harbor House", 5)));

    assert_eq!(*state.snapshot(), *before);
}

#[test]
fn unchanged_event_keeps_the_same_snapshot_allocation() {
    let mut state = SyncState::new();
    state.apply_remote_event(&loc_inserted(location(1, shelter("A", 1))));
    let before = state.snapshot();

    state.apply_remote_event(&loc_updated(location(1, shelter("A", 1))));

    assert!(std::sync::Arc::ptr_eq(&before, &state.snapshot()));
}

// ============================================================================
// Remote updates and deletes
// ============================================================================

#[test]
fn remote_update_replaces_the_row() {
    let mut state = SyncState::new();
    state.apply_remote_event(&loc_inserted(location(1, shelter("A", 5))));
    state.apply_remote_event(&loc_updated(location(1, shelter("A", 2))));

    assert_eq!(beds(&state.snapshot(), 1), Some(2));
    assert_eq!(state.snapshot().len(), 1);
}

#[test]
fn update_for_unseen_id_is_inserted() {
    let mut state = SyncState::new();
    state.apply_remote_event(&loc_updated(location(9, shelter("Late", 1))));
    assert!(state.snapshot().location(LocationId(9)).is_some());
}

#[test]
fn delete_removes_location_but_keeps_its_reviews() {
    let mut state = SyncState::new();
    state.apply_remote_event(&loc_inserted(location(1, shelter("A", 5))));
    state.apply_remote_event(&rev_inserted(review(1, 1, "ok", 0)));

    state.apply_remote_event(&RemoteEvent::Location(Change::Deleted(LocationId(1))));

    let snapshot = state.snapshot();
    assert!(snapshot.location(LocationId(1)).is_none());
    assert_eq!(snapshot.reviews_for(LocationId(1)).len(), 1);
}

#[test]
fn delete_of_unknown_id_is_a_no_op() {
    let mut state = SyncState::new();
    state.apply_remote_event(&loc_inserted(location(1, shelter("A", 5))));
    let before = state.snapshot();

    state.apply_remote_event(&RemoteEvent::Location(Change::Deleted(LocationId(99))));
    state.apply_remote_event(&RemoteEvent::Review(Change::Deleted(ReviewId(99))));

    assert_eq!(*state.snapshot(), *before);
}

#[test]
fn review_delete_removes_empty_group() {
    let mut state = SyncState::new();
    state.apply_remote_event(&rev_inserted(review(3, 1, "ok", 0)));
    state.apply_remote_event(&RemoteEvent::Review(Change::Deleted(ReviewId(3))));

    assert_eq!(state.snapshot().review_groups().count(), 0);
}

// ============================================================================
// Review grouping
// ============================================================================

#[test]
fn reviews_are_grouped_and_sorted_by_created_at() {
    let mut state = SyncState::new();
    state.apply_remote_event(&rev_inserted(review(1, 1, "late", 30)));
    state.apply_remote_event(&rev_inserted(review(2, 2, "other", 0)));
    state.apply_remote_event(&rev_inserted(review(3, 1, "early", 10)));
    state.apply_remote_event(&rev_inserted(review(4, 1, "middle", 20)));

    let snapshot = state.snapshot();
    assert_eq!(review_ids(&snapshot, 1), vec![Some(3), Some(4), Some(1)]);
    assert_eq!(review_ids(&snapshot, 2), vec![Some(2)]);
    assert_eq!(snapshot.review_count(), 4);
}

#[test]
fn equal_timestamps_keep_arrival_order() {
    let mut state = SyncState::new();
    state.apply_remote_event(&rev_inserted(review(5, 1, "first", 10)));
    state.apply_remote_event(&rev_inserted(review(3, 1, "second", 10)));

    assert_eq!(review_ids(&state.snapshot(), 1), vec![Some(5), Some(3)]);
}

#[test]
fn pending_reviews_sort_after_confirmed_ones() {
    let mut state = SyncState::new();
    state.apply_remote_event(&rev_inserted(review(1, 1, "old", 0)));
    state.apply_optimistic_insert(draft(1, "fresh"));
    state.apply_remote_event(&rev_inserted(review(2, 1, "newer", 5)));

    assert_eq!(review_ids(&state.snapshot(), 1), vec![Some(1), Some(2), None]);
}

#[test]
fn review_echo_confirms_pending_review() {
    let mut state = SyncState::new();
    let token = state.apply_optimistic_insert(draft(42, "Clean and quiet"));

    state.apply_remote_event(&rev_inserted(review(7, 42, "Clean and quiet", 0)));

    let snapshot = state.snapshot();
    let group = snapshot.reviews_for(LocationId(42));
    assert_eq!(group.len(), 1);
    assert_eq!(group[0].id, Some(ReviewId(7)));
    assert_eq!(group[0].token, None);
    assert_eq!(state.rollback(token), None);
}

#[test]
fn review_moved_to_another_location_changes_group() {
    let mut state = SyncState::new();
    state.apply_remote_event(&rev_inserted(review(1, 1, "x", 0)));
    state.apply_remote_event(&RemoteEvent::Review(Change::Updated(review(1, 2, "x", 0))));

    let snapshot = state.snapshot();
    assert!(snapshot.reviews_for(LocationId(1)).is_empty());
    assert_eq!(review_ids(&snapshot, 2), vec![Some(1)]);
}

// ============================================================================
// Rollback
// ============================================================================

#[test]
fn rollback_restores_the_prior_snapshot() {
    let mut state = SyncState::new();
    state.apply_remote_event(&loc_inserted(location(1, shelter("A", 5))));
    let before = state.snapshot();

    let location_token = state.apply_optimistic_insert(Draft::Location(shelter("B", 1)));
    let review_token = state.apply_optimistic_insert(draft(1, "hello"));

    assert_eq!(state.rollback(review_token), Some(Collection::Reviews));
    assert_eq!(state.rollback(location_token), Some(Collection::Locations));
    assert_eq!(*state.snapshot(), *before);
}

#[test]
fn rollback_of_resolved_token_is_none() {
    let mut state = SyncState::new();
    let token = state.apply_optimistic_insert(Draft::Location(shelter("A", 1)));
    state.confirm_location(token, location(1, shelter("A", 1)));

    assert_eq!(state.rollback(token), None);
    assert_eq!(state.snapshot().len(), 1);
}

// ============================================================================
// Shelter patches
// ============================================================================

#[test]
fn patch_overlays_the_authoritative_row() {
    let mut state = SyncState::new();
    state.apply_remote_event(&loc_inserted(location(1, shelter("A", 5))));
    let before = state.snapshot();

    let token = state.push_patch(LocationId(1), ShelterPatch::beds(3)).unwrap();
    assert_eq!(beds(&state.snapshot(), 1), Some(3));
    assert_eq!(
        state.authoritative(LocationId(1)).unwrap().fields.available_beds(),
        Some(5)
    );

    assert_eq!(state.rollback(token), Some(Collection::Locations));
    assert_eq!(*state.snapshot(), *before);
    assert_eq!(state.pending_patch_count(), 0);
}

#[test]
fn commit_folds_the_patch_into_the_base() {
    let mut state = SyncState::new();
    state.apply_remote_event(&loc_inserted(location(1, shelter("A", 5))));

    let token = state.push_patch(LocationId(1), ShelterPatch::beds(3)).unwrap();
    assert!(state.commit_patch(token));
    assert!(!state.commit_patch(token));

    assert_eq!(
        state.authoritative(LocationId(1)).unwrap().fields.available_beds(),
        Some(3)
    );
    assert_eq!(beds(&state.snapshot(), 1), Some(3));
    assert_eq!(state.pending_patch_count(), 0);
}

#[test]
fn remote_update_under_a_pending_patch_keeps_the_patch_on_top() {
    let mut state = SyncState::new();
    state.apply_remote_event(&loc_inserted(location(1, shelter("A", 5))));
    let token = state.push_patch(LocationId(1), ShelterPatch::beds(3)).unwrap();

    let mut renamed = shelter("A (annex)", 5);
    renamed.amenities = Amenities::Shelter {
        available_beds: 5,
        capacity: 30,
    };
    state.apply_remote_event(&loc_updated(location(1, renamed)));

    let snapshot = state.snapshot();
    let entry = snapshot.location(LocationId(1)).unwrap();
    assert_eq!(entry.fields.name, "A (annex)");
    assert_eq!(entry.fields.available_beds(), Some(3));
    assert_eq!(entry.fields.capacity(), Some(30));

    state.rollback(token);
    assert_eq!(beds(&state.snapshot(), 1), Some(5));
    assert_eq!(state.snapshot().location(LocationId(1)).unwrap().fields.capacity(), Some(30));
}

#[test]
fn commit_after_a_newer_remote_row_keeps_the_remote_row() {
    let mut state = SyncState::new();
    state.apply_remote_event(&loc_inserted(location(1, shelter("A", 5))));
    let token = state.push_patch(LocationId(1), ShelterPatch::beds(3)).unwrap();

    state.apply_remote_event(&loc_updated(location(1, shelter("A", 7))));
    assert!(state.commit_patch(token));

    assert_eq!(
        state.authoritative(LocationId(1)).unwrap().fields.available_beds(),
        Some(7)
    );
    assert_eq!(beds(&state.snapshot(), 1), Some(7));
}

#[test]
fn replayed_row_does_not_block_folding_the_patch() {
    let mut state = SyncState::new();
    let row = loc_inserted(location(1, shelter("A", 5)));
    state.apply_remote_event(&row);
    let token = state.push_patch(LocationId(1), ShelterPatch::beds(3)).unwrap();

    state.apply_remote_event(&row);
    state.commit_patch(token);

    assert_eq!(beds(&state.snapshot(), 1), Some(3));
}

#[test]
fn later_patches_win() {
    let mut state = SyncState::new();
    state.apply_remote_event(&loc_inserted(location(1, shelter("A", 5))));
    let first = state.push_patch(LocationId(1), ShelterPatch::beds(4)).unwrap();
    let _second = state.push_patch(LocationId(1), ShelterPatch::beds(2)).unwrap();
    assert_eq!(beds(&state.snapshot(), 1), Some(2));

    state.rollback(first);
    assert_eq!(beds(&state.snapshot(), 1), Some(2));
}

#[test]
fn patch_requires_a_known_shelter() {
    let mut state = SyncState::new();
    state.apply_remote_event(&loc_inserted(location(2, restaurant("Noodles"))));

    let unknown = state.push_patch(LocationId(1), ShelterPatch::beds(1)).unwrap_err();
    assert_eq!(unknown.paths(), vec!["location_id"]);

    let not_shelter = state.push_patch(LocationId(2), ShelterPatch::beds(1)).unwrap_err();
    assert_eq!(not_shelter.paths(), vec!["location_id"]);
    assert_eq!(state.pending_patch_count(), 0);
}

#[test]
fn deleting_a_location_drops_its_patches() {
    let mut state = SyncState::new();
    state.apply_remote_event(&loc_inserted(location(1, shelter("A", 5))));
    state.push_patch(LocationId(1), ShelterPatch::beds(3)).unwrap();

    state.apply_remote_event(&RemoteEvent::Location(Change::Deleted(LocationId(1))));

    assert_eq!(state.pending_patch_count(), 0);
    assert!(state.snapshot().is_empty());
}

// ============================================================================
// Reloads
// ============================================================================

#[test]
fn reload_replaces_confirmed_rows_and_keeps_pending_ones() {
    let mut state = SyncState::new();
    state.apply_remote_event(&loc_inserted(location(1, shelter("Gone", 1))));
    let pending = state.apply_optimistic_insert(Draft::Location(shelter("Mine", 2)));
    let unmatched = state.apply_optimistic_insert(Draft::Location(shelter("Still mine", 3)));

    state.reload_locations(vec![
        location(2, shelter("New", 1)),
        location(3, shelter("Mine", 2)),
    ]);

    let snapshot = state.snapshot();
    assert!(snapshot.location(LocationId(1)).is_none());
    assert!(snapshot.location(LocationId(2)).is_some());
    assert!(snapshot.location(LocationId(3)).is_some());
    assert!(snapshot.pending_location(pending).is_none());
    assert!(snapshot.pending_location(unmatched).is_some());
}

#[test]
fn reload_keeps_patches_on_surviving_rows() {
    let mut state = SyncState::new();
    state.apply_remote_event(&loc_inserted(location(1, shelter("A", 5))));
    state.apply_remote_event(&loc_inserted(location(2, shelter("B", 5))));
    state.push_patch(LocationId(1), ShelterPatch::beds(3)).unwrap();
    state.push_patch(LocationId(2), ShelterPatch::beds(3)).unwrap();

    state.reload_locations(vec![location(1, shelter("A", 6))]);

    assert_eq!(state.pending_patch_count(), 1);
    assert_eq!(beds(&state.snapshot(), 1), Some(3));
}

#[test]
fn reload_reviews_resorts_and_keeps_pending() {
    let mut state = SyncState::new();
    state.apply_remote_event(&rev_inserted(review(1, 1, "stale", 0)));
    state.apply_optimistic_insert(draft(1, "queued"));
    state.apply_optimistic_insert(draft(1, "echoed"));

    state.reload_reviews(vec![
        review(3, 1, "echoed", 20),
        review(2, 1, "kept", 10),
    ]);

    let snapshot = state.snapshot();
    assert_eq!(review_ids(&snapshot, 1), vec![Some(2), Some(3), None]);
    assert_eq!(snapshot.reviews_for(LocationId(1))[2].text, "queued");
}

#[test]
fn reload_with_identical_rows_keeps_the_snapshot_allocation() {
    let mut state = SyncState::new();
    state.apply_remote_event(&loc_inserted(location(1, shelter("A", 5))));
    state.apply_remote_event(&rev_inserted(review(1, 1, "kept", 10)));
    state.apply_optimistic_insert(draft(1, "queued"));
    let before = state.snapshot();

    state.reload_locations(vec![location(1, shelter("A", 5))]);
    state.reload_reviews(vec![review(1, 1, "kept", 10)]);

    assert!(std::sync::Arc::ptr_eq(&before, &state.snapshot()));
}

// ============================================================================
// Properties
// ============================================================================

#[derive(Debug, Clone)]
enum Op {
    Upsert { id: i64, beds: u32 },
    DeleteLocation(i64),
    Review { id: i64, location_id: i64, ms: i64 },
    DeleteReview(i64),
    Draft { beds: u32 },
    ReviewDraft { location_id: i64, id: i64 },
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (1i64..5, 0u32..4).prop_map(|(id, beds)| Op::Upsert { id, beds }),
        (1i64..5).prop_map(Op::DeleteLocation),
        (1i64..8, 1i64..3, 0i64..4).prop_map(|(id, location_id, ms)| Op::Review {
            id,
            location_id,
            ms
        }),
        (1i64..8).prop_map(Op::DeleteReview),
        (0u32..4).prop_map(|beds| Op::Draft { beds }),
        (1i64..3, 1i64..8).prop_map(|(location_id, id)| Op::ReviewDraft { location_id, id }),
    ]
}

fn fields_for(beds: u32) -> LocationFields {
    shelter("Generated", beds)
}

/// Apply `op`; remote ops return their event so callers can replay it.
fn run(state: &mut SyncState, op: &Op) -> Option<RemoteEvent> {
    let event = match op {
        Op::Upsert { id, beds } => loc_updated(location(*id, fields_for(*beds))),
        Op::DeleteLocation(id) => RemoteEvent::Location(Change::Deleted(LocationId(*id))),
        Op::Review {
            id,
            location_id,
            ms,
        } => rev_inserted(review(*id, *location_id, &format!("review {id}"), *ms)),
        Op::DeleteReview(id) => RemoteEvent::Review(Change::Deleted(ReviewId(*id))),
        Op::Draft { beds } => {
            state.apply_optimistic_insert(Draft::Location(fields_for(*beds)));
            return None;
        }
        Op::ReviewDraft { location_id, id } => {
            state.apply_optimistic_insert(draft(*location_id, &format!("review {id}")));
            return None;
        }
    };
    state.apply_remote_event(&event);
    Some(event)
}

fn assert_groups_well_formed(snapshot: &Snapshot) -> Result<(), TestCaseError> {
    for (location_id, group) in snapshot.review_groups() {
        prop_assert!(!group.is_empty(), "empty group for {location_id}");
        let mut seen_pending = false;
        let mut last = None;
        for entry in group {
            prop_assert_eq!(entry.location_id, location_id);
            match entry.created_at {
                None => seen_pending = true,
                Some(t) => {
                    prop_assert!(!seen_pending, "confirmed review after a pending one");
                    prop_assert!(last.map_or(true, |prev| prev <= t), "group out of order");
                    last = Some(t);
                }
            }
        }
    }
    Ok(())
}

proptest! {
    #[test]
    fn replaying_any_event_is_idempotent(ops in prop::collection::vec(op(), 0..40)) {
        let mut state = SyncState::new();
        for op in &ops {
            if let Some(event) = run(&mut state, op) {
                let once = state.snapshot();
                state.apply_remote_event(&event);
                prop_assert_eq!(state.snapshot(), once);
            }
        }
    }

    #[test]
    fn review_groups_stay_sorted(ops in prop::collection::vec(op(), 0..40)) {
        let mut state = SyncState::new();
        for op in &ops {
            run(&mut state, op);
            assert_groups_well_formed(&state.snapshot())?;
        }
    }

    #[test]
    fn rollback_restores_any_prior_state(
        ops in prop::collection::vec(op(), 0..30),
        pending in op(),
    ) {
        let mut state = SyncState::new();
        for op in &ops {
            run(&mut state, op);
        }
        let before = state.snapshot();

        let token = match pending {
            Op::Upsert { beds, .. } | Op::Draft { beds } => {
                state.apply_optimistic_insert(Draft::Location(fields_for(beds)))
            }
            Op::Review { location_id, id, .. } | Op::ReviewDraft { location_id, id } => {
                state.apply_optimistic_insert(draft(location_id, &format!("review {id}")))
            }
            Op::DeleteLocation(id) | Op::DeleteReview(id) => {
                match state.push_patch(LocationId(id), ShelterPatch::beds(99)) {
                    Ok(token) => token,
                    Err(_) => return Ok(()),
                }
            }
        };
        prop_assert_ne!(state.snapshot(), before.clone());
        prop_assert!(state.rollback(token).is_some());
        prop_assert_eq!(state.snapshot(), before);
    }
}
