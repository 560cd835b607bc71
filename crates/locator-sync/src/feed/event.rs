//! Change-feed payloads and their normalization.
//!
//! The backend pushes row-level notifications shaped like
//! `{ "eventType": "INSERT", "table": "locations", "new": {..}, "old": {..} }`.
//! [`normalize`] turns one of those into a typed [`RemoteEvent`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    error::FeedError,
    schema::row::{decode_location, decode_review, row_id},
    types::{Collection, Location, LocationId, Review, ReviewId},
};

// ============================================================================
// Raw payloads
// ============================================================================

/// A change notification exactly as the backend delivers it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawChange {
    #[serde(rename = "eventType")]
    pub event_type: String,
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default)]
    pub new: Value,
    #[serde(default)]
    pub old: Value,
}

impl RawChange {
    pub fn inserted(collection: Collection, row: Value) -> Self {
        Self {
            event_type: "INSERT".to_string(),
            table: Some(collection.as_str().to_string()),
            new: row,
            old: Value::Null,
        }
    }

    pub fn updated(collection: Collection, old: Value, new: Value) -> Self {
        Self {
            event_type: "UPDATE".to_string(),
            table: Some(collection.as_str().to_string()),
            new,
            old,
        }
    }

    pub fn deleted(collection: Collection, old: Value) -> Self {
        Self {
            event_type: "DELETE".to_string(),
            table: Some(collection.as_str().to_string()),
            new: Value::Null,
            old,
        }
    }
}

/// What a subscription delivers: a row change, or a channel status change.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedSignal {
    Change(RawChange),
    /// The channel disconnected. No changes arrive until `Resumed`.
    Lost { reason: String },
    /// The channel is back. Changes made while it was down are not replayed.
    Resumed,
}

// ============================================================================
// Normalized events
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Inserted,
    Updated,
    Deleted,
}

impl ChangeKind {
    pub fn parse(event_type: &str) -> Option<Self> {
        match event_type.to_ascii_uppercase().as_str() {
            "INSERT" => Some(Self::Inserted),
            "UPDATE" => Some(Self::Updated),
            "DELETE" => Some(Self::Deleted),
            _ => None,
        }
    }
}

/// A row change. Deletes only need the identity; the backend may not send
/// more than the primary key for them.
#[derive(Debug, Clone, PartialEq)]
pub enum Change<T, K> {
    Inserted(T),
    Updated(T),
    Deleted(K),
}

impl<T, K> Change<T, K> {
    pub fn kind(&self) -> ChangeKind {
        match self {
            Self::Inserted(_) => ChangeKind::Inserted,
            Self::Updated(_) => ChangeKind::Updated,
            Self::Deleted(_) => ChangeKind::Deleted,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RemoteEvent {
    Location(Change<Location, LocationId>),
    Review(Change<Review, ReviewId>),
}

impl RemoteEvent {
    pub fn collection(&self) -> Collection {
        match self {
            Self::Location(_) => Collection::Locations,
            Self::Review(_) => Collection::Reviews,
        }
    }

    pub fn kind(&self) -> ChangeKind {
        match self {
            Self::Location(change) => change.kind(),
            Self::Review(change) => change.kind(),
        }
    }

    /// Primary key of the affected row.
    pub fn row_id(&self) -> i64 {
        match self {
            Self::Location(Change::Inserted(l) | Change::Updated(l)) => l.id.0,
            Self::Location(Change::Deleted(id)) => id.0,
            Self::Review(Change::Inserted(r) | Change::Updated(r)) => r.id.0,
            Self::Review(Change::Deleted(id)) => id.0,
        }
    }
}

/// Normalize a raw notification received on `collection`'s channel.
pub fn normalize(collection: Collection, raw: &RawChange) -> Result<RemoteEvent, FeedError> {
    if let Some(table) = raw.table.as_deref() {
        if Collection::from_table(table) != Some(collection) {
            return Err(FeedError::CollectionMismatch {
                expected: collection,
                received: table.to_string(),
            });
        }
    }

    let kind = ChangeKind::parse(&raw.event_type)
        .ok_or_else(|| FeedError::UnknownEventType(raw.event_type.clone()))?;

    if kind == ChangeKind::Deleted {
        let id = row_id(&raw.old)
            .ok_or_else(|| FeedError::malformed(collection, "delete without an old id"))?;
        return Ok(match collection {
            Collection::Locations => RemoteEvent::Location(Change::Deleted(LocationId(id))),
            Collection::Reviews => RemoteEvent::Review(Change::Deleted(ReviewId(id))),
        });
    }

    let row = raw.new.clone();
    Ok(match collection {
        Collection::Locations => {
            let location = decode_location(row)?;
            RemoteEvent::Location(match kind {
                ChangeKind::Inserted => Change::Inserted(location),
                _ => Change::Updated(location),
            })
        }
        Collection::Reviews => {
            let review = decode_review(row)?;
            RemoteEvent::Review(match kind {
                ChangeKind::Inserted => Change::Inserted(review),
                _ => Change::Updated(review),
            })
        }
    })
}
