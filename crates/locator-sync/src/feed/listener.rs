//! ChangeFeedListener — one subscription per collection, normalized and
//! forwarded to a single handler.
//!
//! Every raw notification produces exactly one [`FeedDelivery`], in receipt
//! order per channel. Nothing is coalesced; payloads that cannot be
//! normalized are forwarded as [`FeedDelivery::Malformed`] so the handler can
//! report them.
//!
//! Teardown unsubscribes every channel and closes a gate shared with the
//! forwarding closures, so a notification already in flight when
//! [`teardown`](ChangeFeedListener::teardown) runs is dropped rather than
//! delivered.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::{
    error::{FeedError, LocatorError, Result},
    store::{FeedSink, RemoteStore, SubscriptionHandle},
    types::Collection,
};

use super::event::{normalize, FeedSignal, RemoteEvent};

/// What the listener hands to its handler.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedDelivery {
    Event(RemoteEvent),
    Malformed(FeedError),
    Lost { collection: Collection, reason: String },
    Resumed { collection: Collection },
}

/// Closure type for the listener's handler.
pub type DeliveryHandler = dyn Fn(FeedDelivery) + Send + Sync;

pub struct ChangeFeedListener {
    store: Arc<dyn RemoteStore>,
    handles: Mutex<Vec<(Collection, SubscriptionHandle)>>,
    open: Arc<AtomicBool>,
}

impl ChangeFeedListener {
    /// Subscribe to every collection in `collections`. If any subscription
    /// fails, the ones already made are torn down before returning the error.
    pub fn subscribe(
        store: Arc<dyn RemoteStore>,
        collections: &[Collection],
        handler: impl Fn(FeedDelivery) + Send + Sync + 'static,
    ) -> Result<Self> {
        let handler: Arc<DeliveryHandler> = Arc::new(handler);
        let listener = Self {
            store,
            handles: Mutex::new(Vec::new()),
            open: Arc::new(AtomicBool::new(true)),
        };

        for &collection in collections {
            let sink = forwarder(collection, Arc::clone(&listener.open), Arc::clone(&handler));
            match listener.store.subscribe(collection, sink) {
                Ok(handle) => {
                    tracing::debug!(%collection, handle = handle.0, "subscribed to change feed");
                    listener.handles.lock().push((collection, handle));
                }
                Err(source) => {
                    listener.teardown();
                    return Err(LocatorError::Subscribe { collection, source });
                }
            }
        }
        Ok(listener)
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    pub fn subscription_count(&self) -> usize {
        self.handles.lock().len()
    }

    /// Unsubscribe everything. Safe to call more than once.
    pub fn teardown(&self) {
        self.open.store(false, Ordering::SeqCst);
        let handles = std::mem::take(&mut *self.handles.lock());
        for (collection, handle) in handles {
            self.store.unsubscribe(handle);
            tracing::debug!(%collection, handle = handle.0, "unsubscribed from change feed");
        }
    }
}

impl Drop for ChangeFeedListener {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn forwarder(collection: Collection, open: Arc<AtomicBool>, handler: Arc<DeliveryHandler>) -> FeedSink {
    Arc::new(move |signal: FeedSignal| {
        if !open.load(Ordering::SeqCst) {
            return;
        }
        let delivery = match signal {
            FeedSignal::Change(raw) => match normalize(collection, &raw) {
                Ok(event) => FeedDelivery::Event(event),
                Err(error) => {
                    tracing::warn!(%collection, error = %error, "unusable change notification");
                    FeedDelivery::Malformed(error)
                }
            },
            FeedSignal::Lost { reason } => FeedDelivery::Lost { collection, reason },
            FeedSignal::Resumed => FeedDelivery::Resumed { collection },
        };
        handler(delivery);
    })
}
