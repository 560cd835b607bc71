//! MemoryStore — an in-process [`RemoteStore`] with a realtime change feed.
//!
//! Behaves like the hosted backend from the client's point of view:
//! server-assigned ids and `created_at`, row checks on write, an
//! authenticated-session rule for updates, and a broadcast of every accepted
//! write to all subscribers (including the writer).
//!
//! Test knobs model the failure modes a client has to survive: going offline,
//! scripted rejections, held writes, deferred or dropped feed delivery.
//!
//! # Threading
//! State sits behind a `parking_lot::Mutex` that is never held while a sink
//! runs, so sinks may call back into the store.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BTreeMap, HashMap, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::sync::watch;

use crate::{
    error::{RejectReason, StoreError},
    feed::event::{FeedSignal, RawChange},
    types::{Category, Collection, OrderBy},
};

use super::traits::{FeedSink, RemoteStore, SubscriptionHandle};

struct Subscriber {
    handle: SubscriptionHandle,
    collection: Collection,
    sink: FeedSink,
}

/// Kinds of write, for the session rule and the call counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteOp {
    Insert,
    Update,
}

struct Inner {
    tables: HashMap<Collection, BTreeMap<i64, Value>>,
    next_id: HashMap<Collection, i64>,
    subscribers: Vec<Subscriber>,
    next_handle: u64,
    offline: bool,
    authenticated: bool,
    scripted: VecDeque<StoreError>,
    defer_feed: bool,
    deferred: Vec<(Collection, RawChange)>,
    /// `false` between `drop_connections` and `restore_connections`.
    connected: bool,
    clock: DateTime<Utc>,
    inserts: usize,
    updates: usize,
}

type Delivery = (FeedSink, FeedSignal);

impl Inner {
    fn table(&mut self, collection: Collection) -> &mut BTreeMap<i64, Value> {
        self.tables.entry(collection).or_default()
    }

    fn tick(&mut self) -> DateTime<Utc> {
        self.clock += Duration::milliseconds(1);
        self.clock
    }

    fn check_write(&mut self, op: WriteOp) -> Result<(), StoreError> {
        if self.offline {
            return Err(StoreError::new("Failed to fetch"));
        }
        if let Some(err) = self.scripted.pop_front() {
            return Err(err);
        }
        if op == WriteOp::Update && !self.authenticated {
            return Err(StoreError::with_reason(
                "new row violates row-level security policy",
                RejectReason::Authorization,
            ));
        }
        Ok(())
    }

    fn check_row(&self, collection: Collection, row: &Map<String, Value>) -> Result<(), StoreError> {
        let reject = |msg: String| Err(StoreError::with_reason(msg, RejectReason::ServerValidation));
        match collection {
            Collection::Locations => {
                let name = row.get("name").and_then(Value::as_str).unwrap_or("");
                if name.trim().is_empty() {
                    return reject("null value in column \"name\" violates not-null constraint".into());
                }
                let category = row.get("type").and_then(Value::as_str).and_then(Category::parse);
                if category.is_none() {
                    return reject("invalid input value for column \"type\"".into());
                }
                for column in ["lat", "lng"] {
                    if !row.get(column).map_or(false, Value::is_number) {
                        return reject(format!("column \"{column}\" must be numeric"));
                    }
                }
            }
            Collection::Reviews => {
                let text = row.get("text").and_then(Value::as_str).unwrap_or("");
                if text.trim().is_empty() {
                    return reject("review text must not be empty".into());
                }
                let location_id = row.get("location_id").and_then(Value::as_i64);
                let exists = location_id.map_or(false, |id| {
                    self.tables
                        .get(&Collection::Locations)
                        .map_or(false, |t| t.contains_key(&id))
                });
                if !exists {
                    return reject(
                        "insert on table \"reviews\" violates foreign key constraint".into(),
                    );
                }
            }
        }
        Ok(())
    }

    fn insert_row(&mut self, collection: Collection, row: Value) -> Result<Value, StoreError> {
        let Value::Object(mut row) = row else {
            return Err(StoreError::with_reason(
                "row must be a JSON object",
                RejectReason::ServerValidation,
            ));
        };
        self.check_row(collection, &row)?;

        let id = {
            let next = self.next_id.entry(collection).or_insert(1);
            let id = *next;
            *next += 1;
            id
        };
        row.insert("id".to_string(), Value::from(id));
        if collection == Collection::Reviews {
            let at = self.tick();
            row.insert("created_at".to_string(), Value::String(at.to_rfc3339()));
        }
        let stored = Value::Object(row);
        self.table(collection).insert(id, stored.clone());
        Ok(stored)
    }

    /// Route a change to subscribers, or park it while delivery is deferred.
    /// Changes made while connections are down are never delivered.
    fn route(&mut self, collection: Collection, change: RawChange) -> Vec<Delivery> {
        if self.defer_feed {
            self.deferred.push((collection, change));
            return Vec::new();
        }
        self.deliveries(collection, change)
    }

    fn deliveries(&self, collection: Collection, change: RawChange) -> Vec<Delivery> {
        if !self.connected {
            return Vec::new();
        }
        self.subscribers
            .iter()
            .filter(|s| s.collection == collection)
            .map(|s| (s.sink.clone(), FeedSignal::Change(change.clone())))
            .collect()
    }

    fn broadcast(&self, signal: FeedSignal) -> Vec<Delivery> {
        self.subscribers
            .iter()
            .map(|s| (s.sink.clone(), signal.clone()))
            .collect()
    }
}

fn deliver(deliveries: Vec<Delivery>) {
    for (sink, signal) in deliveries {
        sink(signal);
    }
}

pub struct MemoryStore {
    inner: Mutex<Inner>,
    /// `true` while writes are held.
    gate: watch::Sender<bool>,
}

impl MemoryStore {
    /// An empty, online store with an authenticated session.
    pub fn new() -> Self {
        let (gate, _) = watch::channel(false);
        Self {
            inner: Mutex::new(Inner {
                tables: HashMap::new(),
                next_id: HashMap::new(),
                subscribers: Vec::new(),
                next_handle: 1,
                offline: false,
                authenticated: true,
                scripted: VecDeque::new(),
                defer_feed: false,
                deferred: Vec::new(),
                connected: true,
                clock: Utc::now(),
                inserts: 0,
                updates: 0,
            }),
            gate,
        }
    }

    // -----------------------------------------------------------------------
    // Knobs
    // -----------------------------------------------------------------------

    /// While offline every call fails with a network error.
    pub fn set_offline(&self, offline: bool) {
        self.inner.lock().offline = offline;
    }

    /// Without a session, updates are refused with an authorization error.
    pub fn set_authenticated(&self, authenticated: bool) {
        self.inner.lock().authenticated = authenticated;
    }

    /// Fail the next write with `error`. Queued errors are used in order.
    pub fn reject_next(&self, error: StoreError) {
        self.inner.lock().scripted.push_back(error);
    }

    /// Park feed notifications until [`flush_feed`](Self::flush_feed).
    pub fn defer_feed(&self, defer: bool) {
        self.inner.lock().defer_feed = defer;
    }

    /// Deliver parked notifications in order. Returns how many changes were
    /// flushed.
    pub fn flush_feed(&self) -> usize {
        let (count, deliveries) = {
            let mut inner = self.inner.lock();
            let parked = std::mem::take(&mut inner.deferred);
            let count = parked.len();
            let mut deliveries = Vec::new();
            for (collection, change) in parked {
                deliveries.extend(inner.deliveries(collection, change));
            }
            (count, deliveries)
        };
        deliver(deliveries);
        count
    }

    /// Hold writes: `insert` and `update` wait until [`resume_writes`](Self::resume_writes).
    pub fn pause_writes(&self) {
        self.gate.send_replace(true);
    }

    pub fn resume_writes(&self) {
        self.gate.send_replace(false);
    }

    /// Tell every subscriber its channel dropped. Changes made until
    /// [`restore_connections`](Self::restore_connections) are missed.
    pub fn drop_connections(&self, reason: &str) {
        let deliveries = {
            let mut inner = self.inner.lock();
            let deliveries = inner.broadcast(FeedSignal::Lost {
                reason: reason.to_string(),
            });
            inner.connected = false;
            deliveries
        };
        deliver(deliveries);
    }

    pub fn restore_connections(&self) {
        let deliveries = {
            let mut inner = self.inner.lock();
            inner.connected = true;
            inner.broadcast(FeedSignal::Resumed)
        };
        deliver(deliveries);
    }

    // -----------------------------------------------------------------------
    // Other clients
    // -----------------------------------------------------------------------

    /// Insert as another client would: stored and broadcast, bypassing the
    /// write gate, scripted failures and offline mode.
    pub fn external_insert(&self, collection: Collection, row: Value) -> Result<Value, StoreError> {
        let (stored, deliveries) = {
            let mut inner = self.inner.lock();
            let stored = inner.insert_row(collection, row)?;
            let deliveries = inner.route(collection, RawChange::inserted(collection, stored.clone()));
            (stored, deliveries)
        };
        deliver(deliveries);
        Ok(stored)
    }

    pub fn external_update(&self, collection: Collection, id: i64, patch: Value) -> bool {
        let deliveries = {
            let mut inner = self.inner.lock();
            match merge_row(inner.table(collection), id, &patch) {
                Some((old, new)) => inner.route(collection, RawChange::updated(collection, old, new)),
                None => return false,
            }
        };
        deliver(deliveries);
        true
    }

    /// Delete as another client would. The notification carries only the id.
    pub fn external_delete(&self, collection: Collection, id: i64) -> bool {
        let deliveries = {
            let mut inner = self.inner.lock();
            if inner.table(collection).remove(&id).is_none() {
                return false;
            }
            let mut old = Map::new();
            old.insert("id".to_string(), Value::from(id));
            inner.route(collection, RawChange::deleted(collection, Value::Object(old)))
        };
        deliver(deliveries);
        true
    }

    /// Push a notification that did not come from a write, e.g. a replay.
    pub fn emit(&self, collection: Collection, change: RawChange) {
        let deliveries = self.inner.lock().route(collection, change);
        deliver(deliveries);
    }

    // -----------------------------------------------------------------------
    // Inspection
    // -----------------------------------------------------------------------

    pub fn rows(&self, collection: Collection) -> Vec<Value> {
        self.inner
            .lock()
            .tables
            .get(&collection)
            .map(|t| t.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn row(&self, collection: Collection, id: i64) -> Option<Value> {
        self.inner.lock().tables.get(&collection)?.get(&id).cloned()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }

    /// Accepted plus refused `insert` calls from this client.
    pub fn insert_calls(&self) -> usize {
        self.inner.lock().inserts
    }

    pub fn update_calls(&self) -> usize {
        self.inner.lock().updates
    }

    async fn wait_for_gate(&self) {
        let mut rx = self.gate.subscribe();
        let _ = rx.wait_for(|held| !*held).await.map(|_| ());
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Shallow-merge `patch` into row `id`. Returns `(old, new)` when found.
fn merge_row(table: &mut BTreeMap<i64, Value>, id: i64, patch: &Value) -> Option<(Value, Value)> {
    let row = table.get_mut(&id)?;
    let old = row.clone();
    if let (Value::Object(target), Value::Object(changes)) = (&mut *row, patch) {
        for (key, value) in changes {
            if key != "id" {
                target.insert(key.clone(), value.clone());
            }
        }
    }
    Some((old, row.clone()))
}

fn compare_column(a: &Value, b: &Value, column: &str) -> CmpOrdering {
    match (a.get(column), b.get(column)) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(CmpOrdering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (None | Some(Value::Null), Some(v)) if !v.is_null() => CmpOrdering::Greater,
        (Some(v), None | Some(Value::Null)) if !v.is_null() => CmpOrdering::Less,
        _ => CmpOrdering::Equal,
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn query(
        &self,
        collection: Collection,
        order_by: &OrderBy,
    ) -> Result<Vec<Value>, StoreError> {
        let mut rows = {
            let inner = self.inner.lock();
            if inner.offline {
                return Err(StoreError::new("Failed to fetch"));
            }
            inner
                .tables
                .get(&collection)
                .map(|t| t.values().cloned().collect::<Vec<_>>())
                .unwrap_or_default()
        };
        rows.sort_by(|a, b| {
            let ord = compare_column(a, b, &order_by.column);
            if order_by.ascending {
                ord
            } else {
                ord.reverse()
            }
        });
        Ok(rows)
    }

    async fn insert(&self, collection: Collection, row: Value) -> Result<Value, StoreError> {
        self.wait_for_gate().await;
        let (stored, deliveries) = {
            let mut inner = self.inner.lock();
            inner.inserts += 1;
            inner.check_write(WriteOp::Insert)?;
            let stored = inner.insert_row(collection, row)?;
            let deliveries = inner.route(collection, RawChange::inserted(collection, stored.clone()));
            (stored, deliveries)
        };
        deliver(deliveries);
        Ok(stored)
    }

    async fn update(&self, collection: Collection, id: i64, patch: Value) -> Result<(), StoreError> {
        self.wait_for_gate().await;
        let deliveries = {
            let mut inner = self.inner.lock();
            inner.updates += 1;
            inner.check_write(WriteOp::Update)?;
            if !patch.is_object() {
                return Err(StoreError::with_reason(
                    "patch must be a JSON object",
                    RejectReason::ServerValidation,
                ));
            }
            // Updating zero rows is not an error.
            match merge_row(inner.table(collection), id, &patch) {
                Some((old, new)) => inner.route(collection, RawChange::updated(collection, old, new)),
                None => Vec::new(),
            }
        };
        deliver(deliveries);
        Ok(())
    }

    fn subscribe(
        &self,
        collection: Collection,
        sink: FeedSink,
    ) -> Result<SubscriptionHandle, StoreError> {
        let mut inner = self.inner.lock();
        if inner.offline {
            return Err(StoreError::new("realtime connection refused"));
        }
        let handle = SubscriptionHandle(inner.next_handle);
        inner.next_handle += 1;
        inner.subscribers.push(Subscriber {
            handle,
            collection,
            sink,
        });
        Ok(handle)
    }

    fn unsubscribe(&self, handle: SubscriptionHandle) {
        self.inner.lock().subscribers.retain(|s| s.handle != handle);
    }
}
