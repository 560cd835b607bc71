//! ChangeNotifier — synchronous pub/sub for snapshot changes.
//!
//! Listeners receive the [`ChangeEvent`] together with the snapshot it
//! produced. Listeners are stored as `Arc<dyn Fn>` so the list can be copied
//! cheaply before each round:
//!   - A listener removed *during* notification is still called in that round.
//!   - A listener added *during* notification is NOT called until the next one.
//!
//! A panicking listener is caught and logged; the remaining listeners still
//! run and the engine state is unaffected.
//!
//! All methods take `&self`; the internal `parking_lot::Mutex` is never held
//! while a listener runs, so listeners may call `on()`/`off()` freely.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::snapshot::Snapshot;

use super::event::ChangeEvent;

/// Returned by [`ChangeNotifier::on`]; pass to [`ChangeNotifier::off`].
pub type ListenerId = u64;

/// Closure type for snapshot listeners.
pub type SnapshotListener = dyn Fn(&ChangeEvent, &Arc<Snapshot>) + Send + Sync;

pub struct ChangeNotifier {
    listeners: Mutex<Vec<(ListenerId, Arc<SnapshotListener>)>>,
    next_id: AtomicU64,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn on(
        &self,
        callback: impl Fn(&ChangeEvent, &Arc<Snapshot>) + Send + Sync + 'static,
    ) -> ListenerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().push((id, Arc::new(callback)));
        id
    }

    /// Does nothing if `id` is not registered.
    pub fn off(&self, id: ListenerId) {
        self.listeners.lock().retain(|(lid, _)| *lid != id);
    }

    pub fn notify(&self, event: &ChangeEvent, snapshot: &Arc<Snapshot>) {
        let round: Vec<(ListenerId, Arc<SnapshotListener>)> = {
            let guard = self.listeners.lock();
            guard.iter().map(|(id, cb)| (*id, Arc::clone(cb))).collect()
        };
        for (id, cb) in round {
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                cb(event, snapshot);
            }));
            if outcome.is_err() {
                tracing::warn!(
                    listener = id,
                    collection = %event.collection(),
                    "snapshot listener panicked"
                );
            }
        }
    }

    pub fn size(&self) -> usize {
        self.listeners.lock().len()
    }
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        Self::new()
    }
}
