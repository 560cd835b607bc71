use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Collections and identities
// ============================================================================

/// The two backend tables the engine keeps in sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    Locations,
    Reviews,
}

impl Collection {
    pub const ALL: [Collection; 2] = [Collection::Locations, Collection::Reviews];

    /// Table name on the backend.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Locations => "locations",
            Self::Reviews => "reviews",
        }
    }

    pub fn from_table(table: &str) -> Option<Self> {
        match table {
            "locations" => Some(Self::Locations),
            "reviews" => Some(Self::Reviews),
            _ => None,
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Server-assigned primary key of a `locations` row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocationId(pub i64);

impl fmt::Display for LocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Server-assigned primary key of a `reviews` row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReviewId(pub i64);

impl fmt::Display for ReviewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Process-local handle for an unconfirmed write. Tokens increase
/// monotonically, so their order is submission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CorrelationToken(pub u64);

impl fmt::Display for CorrelationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "local-{}", self.0)
    }
}

// ============================================================================
// Locations
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Shelter,
    Restaurant,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Shelter => "shelter",
            Self::Restaurant => "restaurant",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "shelter" => Some(Self::Shelter),
            "restaurant" => Some(Self::Restaurant),
            _ => None,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category-specific fields. A location carries exactly one variant, so the
/// fields of the other category can never be populated.
#[derive(Debug, Clone, PartialEq)]
pub enum Amenities {
    Shelter { available_beds: u32, capacity: u32 },
    Restaurant { extra_food: Option<String> },
}

impl Amenities {
    pub fn category(&self) -> Category {
        match self {
            Self::Shelter { .. } => Category::Shelter,
            Self::Restaurant { .. } => Category::Restaurant,
        }
    }

    /// Defaults for a category: zero beds, no food note.
    pub fn empty(category: Category) -> Self {
        match category {
            Category::Shelter => Self::Shelter {
                available_beds: 0,
                capacity: 0,
            },
            Category::Restaurant => Self::Restaurant { extra_food: None },
        }
    }
}

/// Every caller-supplied field of a location. Two drafts with equal
/// `LocationFields` are indistinguishable to the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationFields {
    pub name: String,
    pub lat: f64,
    pub lng: f64,
    pub address: Option<String>,
    pub hours: Option<String>,
    pub contact: Option<String>,
    pub amenities: Amenities,
}

impl LocationFields {
    pub fn category(&self) -> Category {
        self.amenities.category()
    }

    pub fn available_beds(&self) -> Option<u32> {
        match self.amenities {
            Amenities::Shelter { available_beds, .. } => Some(available_beds),
            Amenities::Restaurant { .. } => None,
        }
    }

    pub fn capacity(&self) -> Option<u32> {
        match self.amenities {
            Amenities::Shelter { capacity, .. } => Some(capacity),
            Amenities::Restaurant { .. } => None,
        }
    }

    pub fn extra_food(&self) -> Option<&str> {
        match &self.amenities {
            Amenities::Restaurant { extra_food } => extra_food.as_deref(),
            Amenities::Shelter { .. } => None,
        }
    }
}

/// An authoritative `locations` row.
#[derive(Debug, Clone, PartialEq)]
pub struct Location {
    pub id: LocationId,
    pub fields: LocationFields,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Partial update of a shelter's bed counts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShelterPatch {
    pub available_beds: Option<u32>,
    pub capacity: Option<u32>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl ShelterPatch {
    pub fn beds(available_beds: u32) -> Self {
        Self {
            available_beds: Some(available_beds),
            ..Self::default()
        }
    }

    /// True when neither count is set. A timestamp alone is not an update.
    pub fn is_empty(&self) -> bool {
        self.available_beds.is_none() && self.capacity.is_none()
    }

    /// Apply onto `location`. Restaurants are left untouched.
    pub fn apply_to(&self, location: &mut Location) {
        if let Amenities::Shelter {
            available_beds,
            capacity,
        } = &mut location.fields.amenities
        {
            if let Some(beds) = self.available_beds {
                *available_beds = beds;
            }
            if let Some(cap) = self.capacity {
                *capacity = cap;
            }
            if self.updated_at.is_some() {
                location.updated_at = self.updated_at;
            }
        }
    }
}

// ============================================================================
// Reviews
// ============================================================================

/// A review write intent: no identity or timestamp yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewDraft {
    pub location_id: LocationId,
    pub text: String,
}

/// An authoritative `reviews` row. Reviews are immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Review {
    pub id: ReviewId,
    pub location_id: LocationId,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Queries
// ============================================================================

/// Column ordering for the startup query of a collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub column: String,
    pub ascending: bool,
}

impl OrderBy {
    pub fn ascending(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            ascending: true,
        }
    }

    pub fn descending(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            ascending: false,
        }
    }
}
