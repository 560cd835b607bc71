//! Change feed — raw notifications in, typed [`RemoteEvent`]s out.
//!
//! - [`event`] — [`RawChange`], [`FeedSignal`], [`RemoteEvent`] and [`normalize`].
//! - [`listener`] — [`ChangeFeedListener`], one subscription per collection.

pub mod event;
pub mod listener;

pub use event::{normalize, Change, ChangeKind, FeedSignal, RawChange, RemoteEvent};
pub use listener::{ChangeFeedListener, FeedDelivery};
