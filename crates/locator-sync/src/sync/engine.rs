//! SyncEngine — one process-wide owner of the locations/reviews snapshot.
//!
//! Two write sources feed the snapshot:
//!   - local write intents, applied optimistically and then sent to the
//!     [`RemoteStore`]; a refusal rolls the optimistic change back.
//!   - the change feed, whose events are merged as authoritative.
//!
//! Lifecycle: [`start`](SyncEngine::start) loads both collections and
//! subscribes; [`shutdown`](SyncEngine::shutdown) unsubscribes. Writes already
//! in flight at shutdown still reconcile the snapshot when they resolve.
//!
//! # Locking
//! `state` is a `parking_lot::Mutex` that is only held inside synchronous
//! sections, never across an `.await` and never while listeners run.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;

use crate::{
    error::{FeedError, LocatorError, Result, StoreError},
    feed::{ChangeFeedListener, FeedDelivery, RemoteEvent},
    reactive::{ChangeEvent, ChangeNotifier, ListenerId},
    schema::{
        decode_location, decode_review,
        row::shelter_patch_row,
        validate::{normalize_review, validate_location, validate_patch, validate_review},
        LocationInput, LocationRow, ReviewRow,
    },
    snapshot::Snapshot,
    store::RemoteStore,
    types::{
        Collection, CorrelationToken, Location, LocationFields, LocationId, OrderBy, Review,
        ReviewDraft, ShelterPatch,
    },
};

use super::{
    state::SyncState,
    types::{Draft, FeedStatus, SyncEngineOptions, SyncErrorCallback, WriteIntent, WriteOutcome},
};

// ============================================================================
// Shared state (reachable from the feed listener)
// ============================================================================

struct Shared {
    state: Mutex<SyncState>,
    notifier: ChangeNotifier,
    feed_status: Mutex<HashMap<Collection, FeedStatus>>,
    on_error: Option<Arc<SyncErrorCallback>>,
}

impl Shared {
    /// Run `f` under the state lock. The snapshot is returned only if `f`
    /// changed it.
    fn mutate<R>(&self, f: impl FnOnce(&mut SyncState) -> R) -> (R, Option<Arc<Snapshot>>) {
        let mut state = self.state.lock();
        // Holding `before` forces copy-on-write, so pointer identity tells
        // whether anything changed.
        let before = state.snapshot();
        let value = f(&mut state);
        let after = state.snapshot();
        let changed = (!Arc::ptr_eq(&before, &after)).then_some(after);
        (value, changed)
    }

    fn notify(&self, event: ChangeEvent, snapshot: Option<Arc<Snapshot>>) {
        if let Some(snapshot) = snapshot {
            self.notifier.notify(&event, &snapshot);
        }
    }

    /// Token resolutions are announced even when the change feed already
    /// brought the snapshot to its final state.
    fn announce(&self, event: ChangeEvent, snapshot: Option<Arc<Snapshot>>) {
        let snapshot = snapshot.unwrap_or_else(|| self.state.lock().snapshot());
        self.notifier.notify(&event, &snapshot);
    }

    fn apply_remote_event(&self, event: &RemoteEvent) {
        let collection = event.collection();
        let kind = event.kind();
        let id = event.row_id();
        tracing::debug!(%collection, kind = ?kind, id, "applying remote event");
        let ((), snapshot) = self.mutate(|s| s.apply_remote_event(event));
        self.notify(ChangeEvent::Remote { collection, kind, id }, snapshot);
    }

    fn handle(&self, delivery: FeedDelivery) {
        match delivery {
            FeedDelivery::Event(event) => self.apply_remote_event(&event),
            FeedDelivery::Malformed(error) => self.report(&LocatorError::Feed(error)),
            FeedDelivery::Lost { collection, reason } => {
                tracing::warn!(%collection, reason = %reason, "change feed lost; serving last snapshot");
                self.feed_status.lock().insert(collection, FeedStatus::Lost);
                self.report(&LocatorError::SubscriptionLost { collection, reason });
            }
            FeedDelivery::Resumed { collection } => {
                tracing::info!(%collection, "change feed resumed; snapshot stale until resync");
                self.feed_status.lock().insert(collection, FeedStatus::Stale);
            }
        }
    }

    fn report(&self, error: &LocatorError) {
        if let Some(ref on_error) = self.on_error {
            // A panicking callback must not break sync.
            let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                on_error(error);
            }));
        }
    }

    fn stale_collections(&self) -> Vec<Collection> {
        self.feed_status
            .lock()
            .iter()
            .filter(|(_, status)| **status == FeedStatus::Stale)
            .map(|(collection, _)| *collection)
            .collect()
    }

    /// Mark `collections` live again if they are still stale. Channels that
    /// went stale after the reload began stay stale.
    fn clear_stale(&self, collections: &[Collection]) {
        let mut statuses = self.feed_status.lock();
        for collection in collections {
            if let Some(status) = statuses.get_mut(collection) {
                if *status == FeedStatus::Stale {
                    *status = FeedStatus::Live;
                }
            }
        }
    }

    fn set_status(&self, status: FeedStatus) {
        let mut statuses = self.feed_status.lock();
        for collection in Collection::ALL {
            statuses.insert(collection, status);
        }
    }
}

// ============================================================================
// SyncEngine
// ============================================================================

pub struct SyncEngine {
    store: Arc<dyn RemoteStore>,
    shared: Arc<Shared>,
    listener: Mutex<Option<ChangeFeedListener>>,
    location_order: OrderBy,
    review_order: OrderBy,
    stamp_updates: bool,
    disposed: AtomicBool,
}

impl SyncEngine {
    pub fn new(options: SyncEngineOptions) -> Self {
        Self {
            store: options.store,
            shared: Arc::new(Shared {
                state: Mutex::new(SyncState::new()),
                notifier: ChangeNotifier::new(),
                feed_status: Mutex::new(HashMap::new()),
                on_error: options.on_error,
            }),
            listener: Mutex::new(None),
            location_order: options.location_order.unwrap_or_else(|| OrderBy::ascending("id")),
            review_order: options
                .review_order
                .unwrap_or_else(|| OrderBy::ascending("created_at")),
            stamp_updates: options.stamp_updates.unwrap_or(true),
            disposed: AtomicBool::new(false),
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Load both collections, then subscribe to their change feeds.
    /// Calling `start` again only reloads.
    pub async fn start(&self) -> Result<()> {
        self.check_disposed()?;
        self.resync().await?;
        // shutdown() may have run while the queries were in flight.
        self.check_disposed()?;

        let mut listener = self.listener.lock();
        if listener.is_none() {
            let shared = Arc::clone(&self.shared);
            *listener = Some(ChangeFeedListener::subscribe(
                Arc::clone(&self.store),
                &Collection::ALL,
                move |delivery| shared.handle(delivery),
            )?);
            self.shared.set_status(FeedStatus::Live);
            tracing::info!("sync engine started");
        }
        Ok(())
    }

    /// Re-query both collections and replace the confirmed rows.
    /// Unconfirmed local writes survive. Collections marked
    /// [`FeedStatus::Stale`] after a reconnect are `Live` again afterwards.
    pub async fn resync(&self) -> Result<()> {
        self.check_disposed()?;
        let stale = self.shared.stale_collections();

        let location_rows = self
            .store
            .query(Collection::Locations, &self.location_order)
            .await
            .map_err(|source| LocatorError::Query {
                collection: Collection::Locations,
                source,
            })?;
        let review_rows = self
            .store
            .query(Collection::Reviews, &self.review_order)
            .await
            .map_err(|source| LocatorError::Query {
                collection: Collection::Reviews,
                source,
            })?;

        let locations = self.decode_rows(location_rows, decode_location);
        let reviews = self.decode_rows(review_rows, decode_review);
        let (location_count, review_count) = (locations.len(), reviews.len());

        let ((), after_locations) = self.shared.mutate(|s| s.reload_locations(locations));
        self.shared.notify(
            ChangeEvent::Reloaded {
                collection: Collection::Locations,
            },
            after_locations,
        );
        let ((), after_reviews) = self.shared.mutate(|s| s.reload_reviews(reviews));
        self.shared.notify(
            ChangeEvent::Reloaded {
                collection: Collection::Reviews,
            },
            after_reviews,
        );
        self.shared.clear_stale(&stale);

        tracing::info!(
            locations = location_count,
            reviews = review_count,
            "snapshot loaded"
        );
        Ok(())
    }

    /// Unsubscribe from the change feed. New writes are refused afterwards.
    pub fn shutdown(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(listener) = self.listener.lock().take() {
            listener.teardown();
        }
        self.shared.set_status(FeedStatus::Idle);
        tracing::info!("sync engine shut down");
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    pub fn feed_status(&self, collection: Collection) -> FeedStatus {
        self.shared
            .feed_status
            .lock()
            .get(&collection)
            .copied()
            .unwrap_or(FeedStatus::Idle)
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// The current snapshot. Never waits on a remote call.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.shared.state.lock().snapshot()
    }

    /// Call `callback` after every snapshot change.
    pub fn on_change(
        &self,
        callback: impl Fn(&ChangeEvent, &Arc<Snapshot>) + Send + Sync + 'static,
    ) -> ListenerId {
        self.shared.notifier.on(callback)
    }

    pub fn off(&self, id: ListenerId) {
        self.shared.notifier.off(id);
    }

    // -----------------------------------------------------------------------
    // Snapshot entry points
    // -----------------------------------------------------------------------

    /// Add `draft` to the snapshot as unconfirmed and return its token.
    pub fn apply_optimistic_insert(&self, draft: Draft) -> Result<CorrelationToken> {
        match &draft {
            Draft::Location(fields) => validate_location(fields)?,
            Draft::Review(review) => validate_review(review)?,
        }
        let collection = draft.collection();
        let (token, snapshot) = self.shared.mutate(|s| s.apply_optimistic_insert(draft));
        tracing::debug!(%collection, %token, "optimistic insert");
        self.shared
            .notify(ChangeEvent::Optimistic { collection, token }, snapshot);
        Ok(token)
    }

    /// Merge an authoritative change, as the change feed does.
    pub fn apply_remote_event(&self, event: RemoteEvent) {
        self.shared.apply_remote_event(&event);
    }

    // -----------------------------------------------------------------------
    // Write intents
    // -----------------------------------------------------------------------

    /// Apply `intent` optimistically and send it to the store. A refusal is
    /// rolled back and returned as `WriteRejected`; it is not retried.
    pub async fn submit_write(&self, intent: WriteIntent) -> Result<WriteOutcome> {
        self.check_disposed()?;
        match intent {
            WriteIntent::AddLocation(fields) => {
                self.insert_location(fields).await.map(WriteOutcome::Location)
            }
            WriteIntent::AddReview(draft) => {
                self.insert_review(draft).await.map(WriteOutcome::Review)
            }
            WriteIntent::UpdateShelter { location_id, patch } => self
                .write_patch(location_id, patch)
                .await
                .map(|()| WriteOutcome::Updated(location_id)),
        }
    }

    /// Normalize the add-location form and submit it.
    pub async fn add_location(&self, input: &LocationInput) -> Result<Location> {
        self.check_disposed()?;
        let fields = input.normalize()?;
        self.insert_location(fields).await
    }

    pub async fn add_review(&self, location_id: LocationId, text: &str) -> Result<Review> {
        self.check_disposed()?;
        let draft = normalize_review(location_id, text)?;
        self.insert_review(draft).await
    }

    pub async fn update_beds(&self, location_id: LocationId, available_beds: u32) -> Result<()> {
        self.update_shelter(location_id, ShelterPatch::beds(available_beds))
            .await
    }

    pub async fn update_shelter(&self, location_id: LocationId, patch: ShelterPatch) -> Result<()> {
        self.check_disposed()?;
        self.write_patch(location_id, patch).await
    }

    async fn insert_location(&self, fields: LocationFields) -> Result<Location> {
        let row = serde_json::to_value(LocationRow::from(&fields))?;
        let token = self.apply_optimistic_insert(Draft::Location(fields))?;

        let stored = match self.store.insert(Collection::Locations, row).await {
            Ok(stored) => stored,
            Err(error) => return Err(self.reject(Collection::Locations, token, error)),
        };
        let location = self.decode_confirmation(Collection::Locations, token, stored, decode_location)?;

        let confirmed = location.clone();
        let ((), snapshot) = self.shared.mutate(|s| s.confirm_location(token, confirmed));
        self.shared.announce(
            ChangeEvent::Confirmed {
                collection: Collection::Locations,
                token,
            },
            snapshot,
        );
        Ok(location)
    }

    async fn insert_review(&self, draft: ReviewDraft) -> Result<Review> {
        let row = serde_json::to_value(ReviewRow::from(&draft))?;
        let token = self.apply_optimistic_insert(Draft::Review(draft))?;

        let stored = match self.store.insert(Collection::Reviews, row).await {
            Ok(stored) => stored,
            Err(error) => return Err(self.reject(Collection::Reviews, token, error)),
        };
        let review = self.decode_confirmation(Collection::Reviews, token, stored, decode_review)?;

        let confirmed = review.clone();
        let ((), snapshot) = self.shared.mutate(|s| s.confirm_review(token, confirmed));
        self.shared.announce(
            ChangeEvent::Confirmed {
                collection: Collection::Reviews,
                token,
            },
            snapshot,
        );
        Ok(review)
    }

    async fn write_patch(&self, location_id: LocationId, mut patch: ShelterPatch) -> Result<()> {
        validate_patch(&patch)?;
        if self.stamp_updates && patch.updated_at.is_none() {
            patch.updated_at = Some(Utc::now());
        }
        let row = shelter_patch_row(&patch);

        let (token, snapshot) = self.shared.mutate(|s| s.push_patch(location_id, patch));
        let token = token?;
        tracing::debug!(id = %location_id, %token, "optimistic shelter update");
        self.shared.notify(
            ChangeEvent::Optimistic {
                collection: Collection::Locations,
                token,
            },
            snapshot,
        );

        if let Err(error) = self
            .store
            .update(Collection::Locations, location_id.0, row)
            .await
        {
            return Err(self.reject(Collection::Locations, token, error));
        }

        let (_, snapshot) = self.shared.mutate(|s| s.commit_patch(token));
        self.shared.announce(
            ChangeEvent::Confirmed {
                collection: Collection::Locations,
                token,
            },
            snapshot,
        );
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn reject(&self, collection: Collection, token: CorrelationToken, error: StoreError) -> LocatorError {
        tracing::warn!(
            %collection,
            %token,
            reason = %error.reason,
            error = %error.message,
            "write rejected; rolling back"
        );
        let (_, snapshot) = self.shared.mutate(|s| s.rollback(token));
        self.shared
            .announce(ChangeEvent::RolledBack { collection, token }, snapshot);
        LocatorError::rejected(collection, error)
    }

    /// Decode the row returned by an accepted insert. If it is unusable the
    /// optimistic entry is left for the change feed to confirm.
    fn decode_confirmation<T>(
        &self,
        collection: Collection,
        token: CorrelationToken,
        stored: Value,
        decode: fn(Value) -> std::result::Result<T, FeedError>,
    ) -> Result<T> {
        decode(stored).map_err(|error| {
            tracing::warn!(
                %collection,
                %token,
                error = %error,
                "insert accepted but the returned row is unusable; awaiting change feed"
            );
            LocatorError::Feed(error)
        })
    }

    fn decode_rows<T>(
        &self,
        rows: Vec<Value>,
        decode: fn(Value) -> std::result::Result<T, FeedError>,
    ) -> Vec<T> {
        rows.into_iter()
            .filter_map(|row| match decode(row) {
                Ok(value) => Some(value),
                Err(error) => {
                    tracing::warn!(error = %error, "skipping unusable row");
                    self.shared.report(&LocatorError::Feed(error));
                    None
                }
            })
            .collect()
    }

    fn check_disposed(&self) -> Result<()> {
        if self.is_disposed() {
            Err(LocatorError::Disposed)
        } else {
            Ok(())
        }
    }
}
