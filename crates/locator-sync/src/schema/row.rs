//! Wire-level row shapes for the `locations` and `reviews` tables, and the
//! conversions between them and the typed domain model.
//!
//! Outbound rows always carry both category-specific column groups; the ones
//! that do not belong to the row's category are sent as explicit `null`.
//! Inbound rows are authoritative: wrong-category columns are dropped with a
//! warning instead of rejecting the row.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    error::FeedError,
    types::{
        Amenities, Category, Collection, Location, LocationFields, LocationId, Review,
        ReviewDraft, ReviewId, ShelterPatch,
    },
};

// ============================================================================
// locations
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationRow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(rename = "type")]
    pub category: Category,
    pub name: String,
    pub lat: f64,
    pub lng: f64,
    pub address: Option<String>,
    pub hours: Option<String>,
    pub contact: Option<String>,
    pub available_beds: Option<i64>,
    pub capacity: Option<i64>,
    pub extra_food: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<&LocationFields> for LocationRow {
    fn from(fields: &LocationFields) -> Self {
        let (available_beds, capacity, extra_food) = match &fields.amenities {
            Amenities::Shelter {
                available_beds,
                capacity,
            } => (Some(i64::from(*available_beds)), Some(i64::from(*capacity)), None),
            Amenities::Restaurant { extra_food } => (None, None, extra_food.clone()),
        };
        Self {
            id: None,
            category: fields.category(),
            name: fields.name.clone(),
            lat: fields.lat,
            lng: fields.lng,
            address: fields.address.clone(),
            hours: fields.hours.clone(),
            contact: fields.contact.clone(),
            available_beds,
            capacity,
            extra_food,
            updated_at: None,
        }
    }
}

impl From<&Location> for LocationRow {
    fn from(location: &Location) -> Self {
        Self {
            id: Some(location.id.0),
            updated_at: location.updated_at,
            ..Self::from(&location.fields)
        }
    }
}

impl LocationRow {
    /// Convert an authoritative row into a [`Location`].
    pub fn into_location(self) -> Result<Location, FeedError> {
        let id = self
            .id
            .ok_or_else(|| FeedError::malformed(Collection::Locations, "missing id"))?;

        let amenities = match self.category {
            Category::Shelter => {
                if self.extra_food.is_some() {
                    tracing::warn!(
                        collection = %Collection::Locations,
                        id,
                        "dropping extra_food on a shelter row"
                    );
                }
                Amenities::Shelter {
                    available_beds: count(id, "available_beds", self.available_beds)?,
                    capacity: count(id, "capacity", self.capacity)?,
                }
            }
            Category::Restaurant => {
                if self.available_beds.is_some() || self.capacity.is_some() {
                    tracing::warn!(
                        collection = %Collection::Locations,
                        id,
                        "dropping bed counts on a restaurant row"
                    );
                }
                Amenities::Restaurant {
                    extra_food: self.extra_food,
                }
            }
        };

        Ok(Location {
            id: LocationId(id),
            fields: LocationFields {
                name: self.name,
                lat: self.lat,
                lng: self.lng,
                address: self.address,
                hours: self.hours,
                contact: self.contact,
                amenities,
            },
            updated_at: self.updated_at,
        })
    }
}

/// Bed counts are non-negative and default to 0 when unset.
fn count(id: i64, field: &str, value: Option<i64>) -> Result<u32, FeedError> {
    match value {
        None => Ok(0),
        Some(v) => u32::try_from(v).map_err(|_| {
            FeedError::malformed(
                Collection::Locations,
                format!("{field} on row {id} is out of range: {v}"),
            )
        }),
    }
}

pub fn decode_location(value: Value) -> Result<Location, FeedError> {
    serde_json::from_value::<LocationRow>(value)
        .map_err(|e| FeedError::malformed(Collection::Locations, e.to_string()))?
        .into_location()
}

// ============================================================================
// reviews
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewRow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub location_id: i64,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl From<&ReviewDraft> for ReviewRow {
    fn from(draft: &ReviewDraft) -> Self {
        Self {
            id: None,
            location_id: draft.location_id.0,
            text: draft.text.clone(),
            created_at: None,
        }
    }
}

impl From<&Review> for ReviewRow {
    fn from(review: &Review) -> Self {
        Self {
            id: Some(review.id.0),
            location_id: review.location_id.0,
            text: review.text.clone(),
            created_at: Some(review.created_at),
        }
    }
}

impl ReviewRow {
    pub fn into_review(self) -> Result<Review, FeedError> {
        let id = self
            .id
            .ok_or_else(|| FeedError::malformed(Collection::Reviews, "missing id"))?;
        let created_at = self.created_at.ok_or_else(|| {
            FeedError::malformed(Collection::Reviews, format!("row {id} has no created_at"))
        })?;
        Ok(Review {
            id: ReviewId(id),
            location_id: LocationId(self.location_id),
            text: self.text,
            created_at,
        })
    }
}

pub fn decode_review(value: Value) -> Result<Review, FeedError> {
    serde_json::from_value::<ReviewRow>(value)
        .map_err(|e| FeedError::malformed(Collection::Reviews, e.to_string()))?
        .into_review()
}

// ============================================================================
// Partial rows
// ============================================================================

/// The `update` payload for a shelter patch: only the columns that change.
pub fn shelter_patch_row(patch: &ShelterPatch) -> Value {
    let mut row = Map::new();
    if let Some(beds) = patch.available_beds {
        row.insert("available_beds".to_string(), Value::from(beds));
    }
    if let Some(capacity) = patch.capacity {
        row.insert("capacity".to_string(), Value::from(capacity));
    }
    if let Some(at) = patch.updated_at {
        row.insert("updated_at".to_string(), Value::String(at.to_rfc3339()));
    }
    Value::Object(row)
}

/// Read the primary key from a (possibly partial) row.
pub fn row_id(row: &Value) -> Option<i64> {
    row.get("id").and_then(Value::as_i64)
}
