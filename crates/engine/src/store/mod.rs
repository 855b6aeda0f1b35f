//! Store: the façade over identity map, relationship graph and record arrays
//!
//! All state lives in one [`StoreState`] behind a `parking_lot::Mutex`.
//! Every public operation that mutates it runs as one batch:
//!
//! 1. the operation mutates models, relationships (canonical first) and
//!    queues touched records
//! 2. `finish_batch` flushes canonical changes into current state, removes
//!    orphaned subgraphs, re-evaluates arrays for touched records and
//!    collects one [`ArrayChange`] per changed array
//! 3. the lock is released and observers are called
//!
//! Observers run outside the lock, so they may call back into the store.
//! Filter predicates run inside it and only see owned snapshots; store
//! calls from a predicate fail with `Error::Reentrant`.
//!
//! Network requests never hold the lock: a request is planned in one batch,
//! awaited, and settled in another.

mod builder;
pub mod config;
pub(crate) mod edit;
mod find;
mod push;
mod save;
mod unload;

pub use builder::StoreBuilder;
pub use config::{StoreConfig, CONFIG_FILE_NAME};

use crate::adapter::Adapter;
use crate::observer::{Notifications, ObserverId, Observers, RecordChange};
use crate::record::Record;
use crate::record_array::RecordArray;
use parking_lot::{Mutex, MutexGuard};
use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::collections::BTreeSet;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use tessera_arrays::{ArrayChange, Predicate, RecordArrayManager, RecordSource};
use tessera_core::schema::RelationshipKind;
use tessera_core::{ArrayId, Attributes, ClientId, Error, Result, Schema};
use tessera_graph::{Layer, RelationshipGraph, RelationshipStatus};
use tessera_storage::{
    IdentityMap, InternalModel, RecordEvent, RecordState, RelationshipSnapshot, Snapshot,
};
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

pub(crate) type FindWaiter = oneshot::Sender<Result<()>>;

thread_local! {
    /// Stores whose state lock this thread holds
    static HELD: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

/// Locked [`StoreState`], registered as held by the current thread
pub(crate) struct StateGuard<'a> {
    state: MutexGuard<'a, StoreState>,
    key: usize,
}

impl Deref for StateGuard<'_> {
    type Target = StoreState;

    fn deref(&self) -> &StoreState {
        &self.state
    }
}

impl DerefMut for StateGuard<'_> {
    fn deref_mut(&mut self) -> &mut StoreState {
        &mut self.state
    }
}

impl Drop for StateGuard<'_> {
    fn drop(&mut self) {
        let key = self.key;
        HELD.with(|held| held.borrow_mut().retain(|k| *k != key));
    }
}

// ============================================================================
// Store handle
// ============================================================================

/// Client-side record store
///
/// Cheap to clone; clones share state.
///
/// ```ignore
/// let store = Store::builder().schema(schema).adapter(adapter).build()?;
/// store.push(&document)?;
/// let post = store.find_record("post", "1").await?;
/// ```
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    schema: Arc<Schema>,
    adapter: Arc<dyn Adapter>,
    state: Mutex<StoreState>,
    observers: Mutex<Observers>,
}

impl Store {
    /// Start configuring a store
    pub fn builder() -> StoreBuilder {
        StoreBuilder::new()
    }

    pub(crate) fn from_parts(schema: Arc<Schema>, adapter: Arc<dyn Adapter>, config: StoreConfig) -> Self {
        debug!(
            target: "tessera::store",
            models = schema.model_names().count(),
            coalesce = config.coalesce_find_requests,
            "store created"
        );
        Self {
            inner: Arc::new(StoreInner {
                state: Mutex::new(StoreState::new(Arc::clone(&schema), config)),
                schema,
                adapter,
                observers: Mutex::new(Observers::default()),
            }),
        }
    }

    /// Schema this store was built with
    pub fn schema(&self) -> &Arc<Schema> {
        &self.inner.schema
    }

    /// Active configuration
    pub fn config(&self) -> Result<StoreConfig> {
        self.read(|state| Ok(state.config.clone()))
    }

    pub(crate) fn adapter(&self) -> &dyn Adapter {
        &*self.inner.adapter
    }

    pub(crate) fn ptr_eq(&self, other: &Store) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // =========================================================================
    // Batching
    // =========================================================================

    /// Run `f` as one batch and notify observers afterwards
    ///
    /// The batch is finished even when `f` fails, so partial effects are
    /// propagated consistently.
    pub(crate) fn mutate<T>(&self, f: impl FnOnce(&mut StoreState) -> Result<T>) -> Result<T> {
        let (result, notifications) = {
            let mut state = self.lock()?;
            let result = f(&mut state);
            let notifications = state.finish_batch();
            (result, notifications)
        };
        self.dispatch(notifications);
        result
    }

    /// Read-only access
    pub(crate) fn read<T>(&self, f: impl FnOnce(&StoreState) -> Result<T>) -> Result<T> {
        f(&*self.lock()?)
    }

    /// Access for bookkeeping that nobody observes (materialization)
    pub(crate) fn with_state<T>(&self, f: impl FnOnce(&mut StoreState) -> Result<T>) -> Result<T> {
        f(&mut *self.lock()?)
    }

    /// Take the state lock
    ///
    /// Fails with `Reentrant` instead of deadlocking when this thread
    /// already holds it, which only happens from inside a filter predicate.
    fn lock(&self) -> Result<StateGuard<'_>> {
        let key = Arc::as_ptr(&self.inner) as usize;
        if HELD.with(|held| held.borrow().contains(&key)) {
            return Err(Error::Reentrant);
        }
        let state = self.inner.state.lock();
        HELD.with(|held| held.borrow_mut().push(key));
        Ok(StateGuard { state, key })
    }

    #[cfg(test)]
    pub(crate) fn inspect<T>(&self, f: impl FnOnce(&StoreState) -> T) -> T {
        f(&self.inner.state.lock())
    }

    fn dispatch(&self, notifications: Notifications) {
        if notifications.is_empty() {
            return;
        }
        let (arrays, records) = self.inner.observers.lock().route(&notifications);
        for (callback, change) in arrays {
            callback(&change);
        }
        for (callback, change) in records {
            callback(&change);
        }
    }

    pub(crate) fn handle(&self, cid: ClientId) -> Result<Record> {
        self.with_state(|state| state.handle(self, cid))
    }

    // =========================================================================
    // Peek
    // =========================================================================

    /// Loaded record for `(type, id)` without fetching
    pub fn peek_record(&self, record_type: &str, id: &str) -> Result<Option<Record>> {
        self.inner.schema.model(record_type)?;
        self.with_state(|state| match state.map.lookup(record_type, id) {
            Some(cid) if state.is_loaded(cid) => state.handle(self, cid).map(Some),
            _ => Ok(None),
        })
    }

    /// Whether a loaded record exists for `(type, id)`
    pub fn has_record_for_id(&self, record_type: &str, id: &str) -> bool {
        self.read(|state| {
            Ok(state
                .map
                .lookup(record_type, id)
                .is_some_and(|cid| state.is_loaded(cid)))
        })
        .unwrap_or(false)
    }

    /// The live array of every loaded record of a type
    pub fn peek_all(&self, record_type: &str) -> Result<RecordArray> {
        let id = self.mutate(|state| {
            state.schema.model(record_type)?;
            Ok(state.live_array(record_type))
        })?;
        Ok(RecordArray::new(self.clone(), id))
    }

    /// An array of loaded records of a type matching `predicate`
    ///
    /// The predicate is re-evaluated for one record whenever that record
    /// changes. It runs while the store is locked; store calls made from
    /// inside it fail with [`Error::Reentrant`].
    pub fn filter<F>(&self, record_type: &str, predicate: F) -> Result<RecordArray>
    where
        F: Fn(&Snapshot) -> bool + Send + Sync + 'static,
    {
        let predicate: Predicate = Arc::new(predicate);
        let id = self.mutate(|state| {
            state.schema.model(record_type)?;
            let view = StoreView::new(&state.schema, &state.map, &state.graph);
            Ok(state.arrays.create_filtered(&view, record_type, predicate))
        })?;
        Ok(RecordArray::new(self.clone(), id))
    }

    // =========================================================================
    // Create
    // =========================================================================

    /// Create a record locally; it has no id until saved
    pub fn create_record(&self, record_type: &str, attributes: Attributes) -> Result<Record> {
        self.mutate(|state| {
            state.schema.model(record_type)?;
            let cid = state.map.create_local(record_type);
            let model = state.map.model_mut(cid)?;
            model.send(RecordEvent::Created)?;
            for (key, value) in attributes {
                model.set_attribute(&key, value);
            }
            debug!(target: "tessera::store", record = %model.identity(), "record created");
            state.touched.insert(cid);
            state.handle(self, cid)
        })
    }

    // =========================================================================
    // Observers
    // =========================================================================

    /// Call `callback` with the single change of each batch that alters `array`
    pub fn observe_array<F>(&self, array: &RecordArray, callback: F) -> Result<ObserverId>
    where
        F: Fn(&ArrayChange) + Send + Sync + 'static,
    {
        let id = array.id();
        if !self.read(|state| Ok(state.arrays.contains(id)))? {
            return Err(Error::ArrayDestroyed(id.as_u64()));
        }
        Ok(self.inner.observers.lock().observe_array(id, Arc::new(callback)))
    }

    /// Call `callback` after each batch that touches `record`
    pub fn observe_record<F>(&self, record: &Record, callback: F) -> Result<ObserverId>
    where
        F: Fn(&RecordChange) + Send + Sync + 'static,
    {
        let cid = record.client_id();
        self.read(|state| state.check_live(cid, record.epoch()))?;
        Ok(self.inner.observers.lock().observe_record(cid, Arc::new(callback)))
    }

    /// Remove an observer; returns whether it was registered
    pub fn unobserve(&self, id: ObserverId) -> bool {
        self.inner.observers.lock().remove(id)
    }

    pub(crate) fn forget_array_observers(&self, array: ArrayId) {
        self.inner.observers.lock().remove_array(array);
    }

    // =========================================================================
    // Teardown
    // =========================================================================

    /// Unload every record and destroy every array
    ///
    /// Records with a save in flight are unloaded once it settles. Existing
    /// record and array handles become invalid.
    pub fn destroy(&self) -> Result<()> {
        self.mutate(|state| {
            state.unload_types(None)?;
            state.arrays.destroy_all();
            Ok(())
        })?;
        self.inner.observers.lock().clear();
        debug!(target: "tessera::store", "store destroyed");
        Ok(())
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let records = self.read(|state| Ok(state.map.len())).ok();
        f.debug_struct("Store")
            .field("records", &records)
            .field("observers", &*self.inner.observers.lock())
            .finish()
    }
}

// ============================================================================
// Store state
// ============================================================================

/// Everything guarded by the store lock
pub(crate) struct StoreState {
    pub(crate) schema: Arc<Schema>,
    pub(crate) config: StoreConfig,
    pub(crate) map: IdentityMap,
    pub(crate) graph: RelationshipGraph,
    pub(crate) arrays: RecordArrayManager,
    /// Records whose array membership or observers must be revisited
    pub(crate) touched: BTreeSet<ClientId>,
    /// Starting points for orphan detection
    pub(crate) orphan_candidates: BTreeSet<ClientId>,
    /// Senders waiting on an in-progress fetch, keyed by the fetched record
    pub(crate) pending_finds: FxHashMap<ClientId, Vec<FindWaiter>>,
}

impl StoreState {
    fn new(schema: Arc<Schema>, config: StoreConfig) -> Self {
        Self {
            graph: RelationshipGraph::new(Arc::clone(&schema)),
            schema,
            config,
            map: IdentityMap::new(),
            arrays: RecordArrayManager::new(),
            touched: BTreeSet::new(),
            orphan_candidates: BTreeSet::new(),
            pending_finds: FxHashMap::default(),
        }
    }

    pub(crate) fn check_live(&self, cid: ClientId, epoch: u64) -> Result<()> {
        if self.map.is_live(cid, epoch) {
            Ok(())
        } else {
            Err(Error::RecordDestroyed(cid))
        }
    }

    pub(crate) fn is_loaded(&self, cid: ClientId) -> bool {
        self.map.get(cid).is_some_and(|m| m.state().is_loaded())
    }

    /// Materialize `cid` and return a handle for the current epoch
    pub(crate) fn handle(&mut self, store: &Store, cid: ClientId) -> Result<Record> {
        let epoch = self.map.materialize(cid)?;
        let record_type = self.map.model(cid)?.record_type().to_string();
        Ok(Record::new(store.clone(), cid, record_type, epoch))
    }

    pub(crate) fn live_array(&mut self, record_type: &str) -> ArrayId {
        let view = StoreView::new(&self.schema, &self.map, &self.graph);
        self.arrays.live_array_for(&view, record_type)
    }

    pub(crate) fn snapshot(&self, cid: ClientId) -> Result<Snapshot> {
        let model = self.map.model(cid)?;
        Ok(StoreView::new(&self.schema, &self.map, &self.graph).snapshot_of(model))
    }

    /// Records sharing an edge with `cid` in either layer
    pub(crate) fn neighbours(&self, cid: ClientId) -> Vec<ClientId> {
        let mut out: Vec<ClientId> = self
            .graph
            .relationships_of(cid)
            .flat_map(|(_, rel)| rel.all_members())
            .collect();
        out.extend(self.graph.implicit_holders(cid).into_iter().map(|(holder, _)| holder));
        out
    }

    // =========================================================================
    // Batch completion
    // =========================================================================

    fn finish_batch(&mut self) -> Notifications {
        self.graph.flush(&self.map);
        for (owner, key) in self.graph.take_changes() {
            self.reconcile_relationship(owner, &key);
            self.touched.insert(owner);
        }
        if self.config.orphan_cleanup {
            self.collect_orphans();
        } else {
            self.orphan_candidates.clear();
        }

        let touched = std::mem::take(&mut self.touched);
        for cid in &touched {
            self.arrays.record_did_change(*cid);
        }
        self.arrays
            .update(&StoreView::new(&self.schema, &self.map, &self.graph));
        self.arrays.sync_back_references(&mut self.map);
        let arrays = self.arrays.flush();

        let records: Vec<RecordChange> = touched
            .into_iter()
            .map(|cid| RecordChange {
                client_id: cid,
                state: self.map.get(cid).map_or(RecordState::Empty, InternalModel::state),
            })
            .collect();
        if !arrays.is_empty() {
            trace!(target: "tessera::store", arrays = arrays.len(), records = records.len(), "batch finished");
        }
        Notifications { arrays, records }
    }

    /// Drop a relationship edit that a flush brought back to canonical
    ///
    /// The owner returns to `root.loaded.saved` once nothing else differs.
    fn reconcile_relationship(&mut self, owner: ClientId, key: &str) {
        if self.graph.relationship(owner, key).is_some_and(|rel| rel.is_dirty()) {
            return;
        }
        let Ok(model) = self.map.model_mut(owner) else {
            return;
        };
        if !model.dirty_relationships().contains(key) {
            return;
        }
        model.mark_relationship_clean(key);
        if model.state() == RecordState::UpdatedUncommitted && !model.has_local_changes() {
            if let Err(e) = model.send(RecordEvent::PropertyWasReset) {
                warn!(target: "tessera::store", record = %model.identity(), error = %e, "reset after flush failed");
            }
        }
    }

    /// Remove every candidate's connected component in which no record is
    /// in use
    ///
    /// A record is in use while it holds data, has a deferred unload, or is
    /// the target of a pending fetch.
    fn collect_orphans(&mut self) {
        let mut candidates = std::mem::take(&mut self.orphan_candidates);
        candidates.extend(
            self.touched
                .iter()
                .copied()
                .filter(|cid| self.map.get(*cid).is_some_and(|m| m.state().is_empty())),
        );

        let mut visited = BTreeSet::new();
        for start in candidates {
            if visited.contains(&start) || !self.map.contains(start) {
                continue;
            }
            let component = self.graph.connected_component(start);
            visited.extend(component.iter().copied());
            if component.iter().any(|cid| self.is_retained(*cid)) {
                continue;
            }
            for cid in &component {
                self.graph.remove_record(*cid);
                self.map.remove(*cid);
                self.touched.insert(*cid);
            }
            debug!(target: "tessera::store", %start, records = component.len(), "orphaned records removed");
        }
    }

    fn is_retained(&self, cid: ClientId) -> bool {
        self.map.get(cid).is_some_and(|m| {
            m.is_in_use() || m.is_dematerializing() || self.pending_finds.contains_key(&cid)
        })
    }
}

impl fmt::Debug for StoreState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreState")
            .field("records", &self.map.len())
            .field("arrays", &self.arrays.array_ids().len())
            .field("pending_finds", &self.pending_finds.len())
            .finish()
    }
}

// ============================================================================
// Read-only view
// ============================================================================

/// Snapshot source combining model data with current relationship state
pub(crate) struct StoreView<'a> {
    schema: &'a Schema,
    map: &'a IdentityMap,
    graph: &'a RelationshipGraph,
}

impl<'a> StoreView<'a> {
    pub(crate) fn new(schema: &'a Schema, map: &'a IdentityMap, graph: &'a RelationshipGraph) -> Self {
        Self { schema, map, graph }
    }

    /// Snapshot with attribute defaults and every known relationship
    pub(crate) fn snapshot_of(&self, model: &InternalModel) -> Snapshot {
        let mut snapshot = Snapshot::of(model);
        if let Ok(def) = self.schema.model(model.record_type()) {
            for name in def.attribute_names() {
                if snapshot.attributes.contains_key(name) {
                    continue;
                }
                if let Some(default) = def.attribute_default(name) {
                    snapshot.attributes.insert(name.clone(), default.clone());
                }
            }
        }
        for (key, rel) in self.graph.relationships_of(model.client_id()) {
            if rel.status() == RelationshipStatus::Unknown {
                continue;
            }
            let mut identities = rel
                .members(Layer::Current)
                .to_vec()
                .into_iter()
                .filter_map(|cid| self.map.get(cid).map(|m| m.identity().clone()));
            let value = match rel.kind() {
                RelationshipKind::BelongsTo => RelationshipSnapshot::BelongsTo(identities.next()),
                RelationshipKind::HasMany => RelationshipSnapshot::HasMany(identities.collect()),
            };
            snapshot.relationships.insert(key.to_string(), value);
        }
        snapshot
    }
}

impl RecordSource for StoreView<'_> {
    fn record_type(&self, cid: ClientId) -> Option<&str> {
        self.map.get(cid).map(InternalModel::record_type)
    }

    fn is_visible(&self, cid: ClientId) -> bool {
        self.map
            .get(cid)
            .is_some_and(|m| !m.is_hidden_from_record_arrays())
    }

    fn snapshot(&self, cid: ClientId) -> Option<Snapshot> {
        self.map.get(cid).map(|m| self.snapshot_of(m))
    }

    fn client_ids_of_type(&self, record_type: &str) -> Vec<ClientId> {
        self.map.client_ids_for(record_type)
    }
}

// ============================================================================
// Cancellation
// ============================================================================

/// Settles a request whose future is dropped before the response arrives
///
/// Without it a cancelled find would leave its record loading and a
/// cancelled save would leave it in flight.
pub(crate) struct SettleOnDrop<F: FnOnce()> {
    on_drop: Option<F>,
}

impl<F: FnOnce()> SettleOnDrop<F> {
    pub(crate) fn new(on_drop: F) -> Self {
        Self {
            on_drop: Some(on_drop),
        }
    }

    pub(crate) fn disarm(mut self) {
        self.on_drop = None;
    }
}

impl<F: FnOnce()> Drop for SettleOnDrop<F> {
    fn drop(&mut self) {
        if let Some(on_drop) = self.on_drop.take() {
            on_drop();
        }
    }
}
