//! IdentityMap: one InternalModel per `(type, id)`
//!
//! # Design
//!
//! - `models`: FxHashMap keyed by ClientId, O(1) lookups
//! - per-type index: `id -> ClientId` plus an insertion-ordered set used by
//!   live record arrays
//! - ClientIds and materialization epochs come from monotonic counters and
//!   are never reused
//!
//! A model may only be removed while it is `root.empty`. Removing it frees the
//! `(type, id)` slot; a later push for the same id gets a new ClientId.

use crate::model::InternalModel;
use indexmap::IndexSet;
use rustc_hash::FxHashMap;
use tessera_core::{ClientId, Error, ResourceIdentity, Result};
use tracing::trace;

#[derive(Debug, Default)]
struct TypeIndex {
    by_id: FxHashMap<String, ClientId>,
    order: IndexSet<ClientId>,
}

/// Registry of every InternalModel held by a store
#[derive(Debug, Default)]
pub struct IdentityMap {
    next_client_id: u64,
    next_epoch: u64,
    models: FxHashMap<ClientId, InternalModel>,
    types: FxHashMap<String, TypeIndex>,
}

impl IdentityMap {
    /// Create an empty map
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate(&mut self) -> ClientId {
        self.next_client_id += 1;
        ClientId::new(self.next_client_id)
    }

    /// Find the model for `(type, id)`, creating an empty one if absent
    ///
    /// Returns the ClientId and whether a model was created.
    pub fn get_or_create(&mut self, record_type: &str, id: &str) -> (ClientId, bool) {
        if let Some(cid) = self.lookup(record_type, id) {
            return (cid, false);
        }
        let cid = self.allocate();
        let model = InternalModel::new(ResourceIdentity::new(record_type, id, cid));
        self.models.insert(cid, model);
        let index = self.types.entry(record_type.to_string()).or_default();
        index.by_id.insert(id.to_string(), cid);
        index.order.insert(cid);
        trace!(target: "tessera::store", %cid, record_type, id, "identity created");
        (cid, true)
    }

    /// Create a model for a locally created record with no server id
    pub fn create_local(&mut self, record_type: &str) -> ClientId {
        let cid = self.allocate();
        self.models
            .insert(cid, InternalModel::new(ResourceIdentity::local(record_type, cid)));
        self.types
            .entry(record_type.to_string())
            .or_default()
            .order
            .insert(cid);
        trace!(target: "tessera::store", %cid, record_type, "local identity created");
        cid
    }

    /// ClientId for `(type, id)`, if known
    pub fn lookup(&self, record_type: &str, id: &str) -> Option<ClientId> {
        self.types.get(record_type)?.by_id.get(id).copied()
    }

    /// Whether a model exists for `cid`
    pub fn contains(&self, cid: ClientId) -> bool {
        self.models.contains_key(&cid)
    }

    /// Model for `cid`
    pub fn get(&self, cid: ClientId) -> Option<&InternalModel> {
        self.models.get(&cid)
    }

    /// Mutable model for `cid`
    pub fn get_mut(&mut self, cid: ClientId) -> Option<&mut InternalModel> {
        self.models.get_mut(&cid)
    }

    /// Model for `cid`, or `RecordDestroyed`
    pub fn model(&self, cid: ClientId) -> Result<&InternalModel> {
        self.models.get(&cid).ok_or(Error::RecordDestroyed(cid))
    }

    /// Mutable model for `cid`, or `RecordDestroyed`
    pub fn model_mut(&mut self, cid: ClientId) -> Result<&mut InternalModel> {
        self.models.get_mut(&cid).ok_or(Error::RecordDestroyed(cid))
    }

    /// ClientIds of one type in insertion order
    pub fn client_ids_for(&self, record_type: &str) -> Vec<ClientId> {
        self.types
            .get(record_type)
            .map(|t| t.order.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Models of one type in insertion order
    pub fn models_for<'a>(&'a self, record_type: &str) -> impl Iterator<Item = &'a InternalModel> + 'a {
        self.types
            .get(record_type)
            .into_iter()
            .flat_map(|t| t.order.iter())
            .filter_map(move |cid| self.models.get(cid))
    }

    /// Types with at least one model
    pub fn record_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .types
            .iter()
            .filter(|(_, t)| !t.order.is_empty())
            .map(|(name, _)| name.clone())
            .collect();
        types.sort();
        types
    }

    /// Give a local record its server id
    ///
    /// # Errors
    ///
    /// `IdInUse` if another model already owns `(type, id)`.
    pub fn assign_id(&mut self, cid: ClientId, id: &str) -> Result<()> {
        let model = self.models.get(&cid).ok_or(Error::RecordDestroyed(cid))?;
        let record_type = model.record_type().to_string();
        if model.id() == Some(id) {
            return Ok(());
        }
        if let Some(existing) = self.lookup(&record_type, id) {
            if existing != cid {
                return Err(Error::IdInUse {
                    record_type,
                    id: id.to_string(),
                });
            }
        }
        let index = self.types.entry(record_type).or_default();
        if let Some(old) = model.id() {
            index.by_id.remove(old);
        }
        index.by_id.insert(id.to_string(), cid);
        if let Some(model) = self.models.get_mut(&cid) {
            model.set_id(id.to_string());
        }
        Ok(())
    }

    /// Remove an empty model
    ///
    /// Models with data are kept; returns `None` in that case or if `cid`
    /// is unknown.
    pub fn remove(&mut self, cid: ClientId) -> Option<InternalModel> {
        if !self.models.get(&cid)?.state().is_empty() {
            return None;
        }
        let model = self.models.remove(&cid)?;
        if let Some(index) = self.types.get_mut(model.record_type()) {
            if let Some(id) = model.id() {
                index.by_id.remove(id);
            }
            index.order.shift_remove(&cid);
        }
        trace!(target: "tessera::store", record = %model.identity(), "identity removed");
        Some(model)
    }

    /// Assign a fresh materialization epoch to `cid`, or return the current one
    pub fn materialize(&mut self, cid: ClientId) -> Result<u64> {
        let next = self.next_epoch + 1;
        let model = self.models.get_mut(&cid).ok_or(Error::RecordDestroyed(cid))?;
        if let Some(epoch) = model.epoch() {
            return Ok(epoch);
        }
        model.materialize(next);
        self.next_epoch = next;
        Ok(next)
    }

    /// Whether the handle for `(cid, epoch)` is still the live projection
    pub fn is_live(&self, cid: ClientId, epoch: u64) -> bool {
        self.models
            .get(&cid)
            .is_some_and(|m| m.epoch() == Some(epoch))
    }

    /// All models, unordered
    pub fn iter(&self) -> impl Iterator<Item = &InternalModel> {
        self.models.values()
    }

    /// Number of models
    pub fn len(&self) -> usize {
        self.models.len()
    }

    /// No models
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}
