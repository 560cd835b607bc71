use std::fmt;
use thiserror::Error;

use crate::types::Collection;

// ---------------------------------------------------------------------------
// ValidationError / ValidationErrors
// ---------------------------------------------------------------------------

/// A single field-level validation failure on a write intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub path: String,
    pub expected: String,
    pub received: String,
}

impl ValidationError {
    pub fn new(
        path: impl Into<String>,
        expected: impl Into<String>,
        received: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            expected: expected.into(),
            received: received.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            r#"Validation failed at "{}": expected {}, received {}"#,
            self.path, self.expected, self.received
        )
    }
}

impl std::error::Error for ValidationError {}

/// One or more `ValidationError`s collected while normalizing a draft.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationErrors(pub Vec<ValidationError>);

impl ValidationErrors {
    pub fn single(error: ValidationError) -> Self {
        Self(vec![error])
    }

    /// `Ok(())` when nothing was collected.
    pub fn into_result(self) -> std::result::Result<(), Self> {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }

    pub fn paths(&self) -> Vec<&str> {
        self.0.iter().map(|e| e.path.as_str()).collect()
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Validation failed:")?;
        for e in &self.0 {
            write!(f, "\n  - {}: expected {}, received {}", e.path, e.expected, e.received)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

impl From<ValidationError> for ValidationErrors {
    fn from(error: ValidationError) -> Self {
        Self::single(error)
    }
}

// ---------------------------------------------------------------------------
// StoreError
// ---------------------------------------------------------------------------

/// Why the remote store refused a call.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq, Hash)]
pub enum RejectReason {
    /// The request never reached the backend (offline, timeout, reset).
    #[error("network")]
    Network,
    /// The session is missing or not allowed to touch the row.
    #[error("authorization")]
    Authorization,
    /// The backend rejected the row contents.
    #[error("server-validation")]
    ServerValidation,
}

/// Failure returned by a [`RemoteStore`](crate::store::RemoteStore) call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message} ({reason})")]
pub struct StoreError {
    pub message: String,
    pub reason: RejectReason,
}

impl StoreError {
    /// A network failure, the most common case for a client.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            reason: RejectReason::Network,
        }
    }

    pub fn with_reason(message: impl Into<String>, reason: RejectReason) -> Self {
        Self {
            message: message.into(),
            reason,
        }
    }
}

// ---------------------------------------------------------------------------
// FeedError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FeedError {
    #[error("Malformed {collection} row: {message}")]
    Malformed {
        collection: Collection,
        message: String,
    },

    #[error("Unknown change event type \"{0}\"")]
    UnknownEventType(String),

    #[error("Change for table \"{received}\" delivered on the {expected} channel")]
    CollectionMismatch {
        expected: Collection,
        received: String,
    },
}

impl FeedError {
    pub fn malformed(collection: Collection, message: impl Into<String>) -> Self {
        Self::Malformed {
            collection,
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// LocatorError — top-level rollup
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum LocatorError {
    #[error(transparent)]
    Validation(#[from] ValidationErrors),

    #[error("Write to {collection} rejected ({reason}): {message}")]
    WriteRejected {
        collection: Collection,
        reason: RejectReason,
        message: String,
    },

    #[error("Change feed for {collection} lost: {reason}")]
    SubscriptionLost { collection: Collection, reason: String },

    #[error("Query on {collection} failed: {source}")]
    Query {
        collection: Collection,
        #[source]
        source: StoreError,
    },

    #[error("Subscribing to {collection} failed: {source}")]
    Subscribe {
        collection: Collection,
        #[source]
        source: StoreError,
    },

    #[error(transparent)]
    Feed(#[from] FeedError),

    #[error(transparent)]
    Encode(#[from] serde_json::Error),

    #[error("Sync engine disposed")]
    Disposed,
}

impl LocatorError {
    pub fn rejected(collection: Collection, error: StoreError) -> Self {
        Self::WriteRejected {
            collection,
            reason: error.reason,
            message: error.message,
        }
    }

    /// The rejection subtype, if this is a `WriteRejected`.
    pub fn reject_reason(&self) -> Option<RejectReason> {
        match self {
            Self::WriteRejected { reason, .. } => Some(*reason),
            _ => None,
        }
    }
}

/// Result alias defaulting to `LocatorError`.
pub type Result<T, E = LocatorError> = std::result::Result<T, E>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
