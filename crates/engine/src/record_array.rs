//! Public record array handles

use crate::observer::ObserverId;
use crate::record::Record;
use crate::store::Store;
use std::fmt;
use tessera_arrays::{ArrayChange, ArrayKind};
use tessera_core::{ArrayId, ClientId, Result, Value};

/// Handle to a live, filtered or query array
///
/// The array itself lives in the store and is kept up to date there; this
/// handle reads through. After [`destroy`](Self::destroy) (or
/// [`Store::destroy`]) every accessor returns `ArrayDestroyed`.
#[derive(Clone)]
pub struct RecordArray {
    store: Store,
    id: ArrayId,
}

impl RecordArray {
    pub(crate) fn new(store: Store, id: ArrayId) -> Self {
        Self { store, id }
    }

    /// Store-local array id
    pub fn id(&self) -> ArrayId {
        self.id
    }

    /// Number of members
    pub fn len(&self) -> Result<usize> {
        self.store
            .read(|state| state.arrays.members(self.id).map(<[ClientId]>::len))
    }

    /// Whether the array has no members
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Members in order
    pub fn client_ids(&self) -> Result<Vec<ClientId>> {
        self.store
            .read(|state| state.arrays.members(self.id).map(<[ClientId]>::to_vec))
    }

    /// Handles for every member, in order
    pub fn records(&self) -> Result<Vec<Record>> {
        self.store.with_state(|state| {
            let members = state.arrays.members(self.id)?.to_vec();
            members
                .into_iter()
                .map(|cid| state.handle(&self.store, cid))
                .collect()
        })
    }

    /// Member at `index`
    pub fn get(&self, index: usize) -> Result<Option<Record>> {
        self.store.with_state(|state| {
            match state.arrays.members(self.id)?.get(index).copied() {
                Some(cid) => state.handle(&self.store, cid).map(Some),
                None => Ok(None),
            }
        })
    }

    /// Live, filtered or adapter-populated
    pub fn kind(&self) -> Result<ArrayKind> {
        self.store.read(|state| state.arrays.kind(self.id))
    }

    /// Model name of the members
    pub fn record_type(&self) -> Result<String> {
        self.store
            .read(|state| state.arrays.record_type(self.id).map(str::to_string))
    }

    /// A request that will replace the members is pending
    pub fn is_updating(&self) -> Result<bool> {
        self.store.read(|state| state.arrays.is_updating(self.id))
    }

    /// The array has received its first response
    pub fn is_loaded(&self) -> Result<bool> {
        self.store.read(|state| state.arrays.is_loaded(self.id))
    }

    /// Query of an adapter-populated array
    pub fn query(&self) -> Result<Option<Value>> {
        self.store
            .read(|state| state.arrays.query(self.id).map(|q| q.cloned()))
    }

    /// `meta` of the last query response
    pub fn meta(&self) -> Result<Option<Value>> {
        self.store
            .read(|state| state.arrays.meta(self.id).map(|m| m.cloned()))
    }

    /// Refetch the members
    ///
    /// Live arrays refetch every record of their type and query arrays
    /// repeat their query. Filtered arrays are recomputed locally and need
    /// no update.
    pub async fn update(&self) -> Result<()> {
        self.store.update_array(self.id).await
    }

    /// Remove the array from the store
    pub fn destroy(&self) -> Result<()> {
        self.store.mutate(|state| state.arrays.destroy(self.id))?;
        self.store.forget_array_observers(self.id);
        Ok(())
    }

    /// Whether the array was destroyed
    pub fn is_destroyed(&self) -> bool {
        self.store
            .read(|state| Ok(!state.arrays.contains(self.id)))
            .unwrap_or(false)
    }

    /// Call `callback` once per batch that changes the members
    pub fn observe<F>(&self, callback: F) -> Result<ObserverId>
    where
        F: Fn(&ArrayChange) + Send + Sync + 'static,
    {
        self.store.observe_array(self, callback)
    }
}

impl PartialEq for RecordArray {
    fn eq(&self, other: &Self) -> bool {
        self.store.ptr_eq(&other.store) && self.id == other.id
    }
}

impl Eq for RecordArray {}

impl fmt::Debug for RecordArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordArray").field("id", &self.id).finish()
    }
}
