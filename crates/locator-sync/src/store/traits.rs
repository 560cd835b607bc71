//! RemoteStore — the backend contract the sync engine depends on.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::{
    error::StoreError,
    feed::event::FeedSignal,
    types::{Collection, OrderBy},
};

/// Receives every signal of one subscription, in delivery order.
pub type FeedSink = Arc<dyn Fn(FeedSignal) + Send + Sync>;

/// Opaque handle returned by [`RemoteStore::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(pub u64);

/// User-implemented backend client: queries, writes and a change feed over
/// the `locations` and `reviews` tables.
///
/// Rows cross this boundary as JSON objects in the wire shape of
/// [`LocationRow`](crate::schema::LocationRow) / [`ReviewRow`](crate::schema::ReviewRow).
/// Access control is the backend's concern; refusals come back as a
/// [`StoreError`] with the matching [`RejectReason`](crate::error::RejectReason).
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Every row of `collection`, sorted by `order_by`.
    async fn query(&self, collection: Collection, order_by: &OrderBy)
        -> Result<Vec<Value>, StoreError>;

    /// Insert a row and return it as stored, with server-assigned columns.
    async fn insert(&self, collection: Collection, row: Value) -> Result<Value, StoreError>;

    /// Shallow-merge `patch` into the row with primary key `id`.
    async fn update(&self, collection: Collection, id: i64, patch: Value)
        -> Result<(), StoreError>;

    /// Start delivering changes of `collection` to `sink`.
    fn subscribe(&self, collection: Collection, sink: FeedSink)
        -> Result<SubscriptionHandle, StoreError>;

    /// Stop a subscription. Nothing is delivered to its sink afterwards.
    /// Unknown handles are ignored.
    fn unsubscribe(&self, handle: SubscriptionHandle);
}
