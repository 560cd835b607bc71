//! Tests for wire-row conversions.

use chrono::{TimeZone, Utc};
use serde_json::json;

use locator_sync::{
    error::FeedError,
    schema::{
        decode_location, decode_review,
        row::{row_id, shelter_patch_row},
        LocationRow, ReviewRow,
    },
    types::{Amenities, Collection, LocationFields, LocationId, ReviewDraft, ShelterPatch},
};

fn shelter_fields() -> LocationFields {
    LocationFields {
        name: "Harbor House".to_string(),
        lat: 40.7,
        lng: -74.0,
        address: Some("1 Pier Rd".to_string()),
        hours: None,
        contact: None,
        amenities: Amenities::Shelter {
            available_beds: 5,
            capacity: 20,
        },
    }
}

// ============================================================================
// Outbound rows
// ============================================================================

#[test]
fn shelter_row_nulls_restaurant_columns() {
    let row = serde_json::to_value(LocationRow::from(&shelter_fields())).unwrap();

    assert_eq!(row["type"], json!("shelter"));
    assert_eq!(row["available_beds"], json!(5));
    assert_eq!(row["capacity"], json!(20));
    assert_eq!(row["extra_food"], json!(null));
    assert_eq!(row["hours"], json!(null));
    assert!(row.get("id").is_none(), "drafts must not send an id");
    assert!(row.get("updated_at").is_none());
}

#[test]
fn restaurant_row_nulls_bed_columns() {
    let fields = LocationFields {
        amenities: Amenities::Restaurant {
            extra_food: Some("soup after 9pm".to_string()),
        },
        ..shelter_fields()
    };
    let row = serde_json::to_value(LocationRow::from(&fields)).unwrap();

    assert_eq!(row["type"], json!("restaurant"));
    assert_eq!(row["available_beds"], json!(null));
    assert_eq!(row["capacity"], json!(null));
    assert_eq!(row["extra_food"], json!("soup after 9pm"));
}

#[test]
fn review_draft_row_has_no_server_columns() {
    let draft = ReviewDraft {
        location_id: LocationId(42),
        text: "Clean and quiet".to_string(),
    };
    let row = serde_json::to_value(ReviewRow::from(&draft)).unwrap();
    assert_eq!(row, json!({ "location_id": 42, "text": "Clean and quiet" }));
}

#[test]
fn patch_row_only_sends_changed_columns() {
    let row = shelter_patch_row(&ShelterPatch::beds(3));
    assert_eq!(row, json!({ "available_beds": 3 }));

    let stamped = ShelterPatch {
        available_beds: None,
        capacity: Some(30),
        updated_at: Some(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()),
    };
    let row = shelter_patch_row(&stamped);
    assert_eq!(row["capacity"], json!(30));
    assert!(row.get("available_beds").is_none());
    assert!(row["updated_at"].as_str().unwrap().starts_with("2024-03-01T12:00:00"));
}

// ============================================================================
// Inbound rows
// ============================================================================

#[test]
fn decode_shelter_row() {
    let location = decode_location(json!({
        "id": 42, "type": "shelter", "name": "Harbor House", "lat": 40.7, "lng": -74,
        "address": "1 Pier Rd", "hours": null, "contact": null,
        "available_beds": 5, "capacity": 20, "extra_food": null,
    }))
    .unwrap();

    assert_eq!(location.id, LocationId(42));
    assert_eq!(location.fields.lng, -74.0);
    assert_eq!(location.fields.available_beds(), Some(5));
    assert_eq!(location.fields.address.as_deref(), Some("1 Pier Rd"));
    assert_eq!(location.updated_at, None);
}

#[test]
fn decode_drops_columns_of_the_other_category() {
    let location = decode_location(json!({
        "id": 3, "type": "restaurant", "name": "Lucky Noodle", "lat": 1.0, "lng": 2.0,
        "available_beds": 4, "capacity": 8, "extra_food": "rice",
    }))
    .unwrap();

    assert_eq!(
        location.fields.amenities,
        Amenities::Restaurant {
            extra_food: Some("rice".to_string())
        }
    );
}

#[test]
fn missing_bed_counts_default_to_zero() {
    let location = decode_location(json!({
        "id": 7, "type": "shelter", "name": "St. Anne", "lat": 1.0, "lng": 2.0,
    }))
    .unwrap();
    assert_eq!(location.fields.available_beds(), Some(0));
    assert_eq!(location.fields.capacity(), Some(0));
}

#[test]
fn negative_bed_count_is_malformed() {
    let err = decode_location(json!({
        "id": 7, "type": "shelter", "name": "St. Anne", "lat": 1.0, "lng": 2.0,
        "available_beds": -1,
    }))
    .unwrap_err();
    assert!(matches!(
        err,
        FeedError::Malformed {
            collection: Collection::Locations,
            ..
        }
    ));
}

#[test]
fn location_without_id_is_malformed() {
    let err = decode_location(json!({
        "type": "shelter", "name": "St. Anne", "lat": 1.0, "lng": 2.0,
    }))
    .unwrap_err();
    assert!(err.to_string().contains("missing id"), "{err}");
}

#[test]
fn unknown_category_is_malformed() {
    let err = decode_location(json!({
        "id": 1, "type": "hospital", "name": "x", "lat": 1.0, "lng": 2.0,
    }))
    .unwrap_err();
    assert!(matches!(err, FeedError::Malformed { .. }));
}

#[test]
fn decode_review_row() {
    let review = decode_review(json!({
        "id": 5, "location_id": 42, "text": "Clean and quiet",
        "created_at": "2024-03-01T12:00:00+00:00",
    }))
    .unwrap();
    assert_eq!(review.id.0, 5);
    assert_eq!(review.location_id, LocationId(42));
    assert_eq!(
        review.created_at,
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    );
}

#[test]
fn review_without_created_at_is_malformed() {
    let err = decode_review(json!({ "id": 5, "location_id": 42, "text": "ok" })).unwrap_err();
    assert!(matches!(
        err,
        FeedError::Malformed {
            collection: Collection::Reviews,
            ..
        }
    ));
}

#[test]
fn row_id_reads_partial_rows() {
    assert_eq!(row_id(&json!({ "id": 9 })), Some(9));
    assert_eq!(row_id(&json!({})), None);
    assert_eq!(row_id(&json!(null)), None);
}
