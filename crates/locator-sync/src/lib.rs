//! Client-side sync core for a shelter and restaurant locator.
//!
//! A [`SyncEngine`] keeps a process-wide snapshot of `locations` and
//! `reviews` consistent with a [`RemoteStore`]: local writes are shown
//! immediately, confirmed or rolled back when the store answers, and merged
//! with the change feed so every write appears exactly once.

pub mod error;
pub mod types;

pub mod feed;
pub mod reactive;
pub mod schema;
pub mod snapshot;
pub mod store;
pub mod sync;

pub use error::{LocatorError, RejectReason, Result, StoreError};
pub use snapshot::Snapshot;
pub use store::{MemoryStore, RemoteStore};
pub use sync::{SyncEngine, SyncEngineOptions};
