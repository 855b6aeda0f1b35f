//! Public record handles
//!
//! A [`Record`] is a projection of one internal model for one epoch. It
//! stays cheap to clone and never owns data: every accessor reads through
//! the store. Once the record is unloaded the handle is dead and every
//! fallible accessor returns [`Error::RecordDestroyed`]; a later fetch of
//! the same identity hands out a new handle.

use crate::observer::{ObserverId, RecordChange};
use crate::store::edit::RelationshipEdit;
use crate::store::{Store, StoreState};
use std::collections::BTreeMap;
use std::fmt;
use tessera_core::schema::RelationshipKind;
use tessera_core::{Attributes, ClientId, Error, ResourceIdentity, Result, Value};
use tessera_graph::{Layer, RelationshipStatus};
use tessera_storage::{AttributeChange, RecordErrors, RecordState, Snapshot};

/// Handle to one record in a [`Store`]
#[derive(Clone)]
pub struct Record {
    store: Store,
    client_id: ClientId,
    record_type: String,
    epoch: u64,
}

/// Membership of one relationship in both layers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationshipInfo {
    /// Cardinality
    pub kind: RelationshipKind,
    /// Whether members are fetched on access
    pub is_async: bool,
    /// Whether membership is known
    pub status: RelationshipStatus,
    /// Last server-confirmed members
    pub canonical: Vec<ResourceIdentity>,
    /// Members including local edits
    pub current: Vec<ResourceIdentity>,
}

impl Record {
    pub(crate) fn new(store: Store, client_id: ClientId, record_type: String, epoch: u64) -> Self {
        Self {
            store,
            client_id,
            record_type,
            epoch,
        }
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.epoch
    }

    fn read<T>(&self, f: impl FnOnce(&StoreState) -> Result<T>) -> Result<T> {
        self.store.read(|state| {
            state.check_live(self.client_id, self.epoch)?;
            f(state)
        })
    }

    fn edit<T>(&self, f: impl FnOnce(&mut StoreState) -> Result<T>) -> Result<T> {
        self.store.mutate(|state| {
            state.check_live(self.client_id, self.epoch)?;
            f(state)
        })
    }

    /// Resolve another handle into a ClientId of this store
    fn member_of_this_store(&self, member: &Record) -> Result<ClientId> {
        // A handle from another store is as unusable here as a dead one.
        if !member.store.ptr_eq(&self.store) {
            return Err(Error::RecordDestroyed(member.client_id));
        }
        self.store
            .read(|state| state.check_live(member.client_id, member.epoch))?;
        Ok(member.client_id)
    }

    // =========================================================================
    // Identity
    // =========================================================================

    /// Store-local identity
    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    /// Model name
    pub fn record_type(&self) -> &str {
        &self.record_type
    }

    /// Store this record belongs to
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Server id; `None` until a new record is saved
    pub fn id(&self) -> Result<Option<String>> {
        self.read(|state| Ok(state.map.model(self.client_id)?.id().map(str::to_string)))
    }

    /// Full identity
    pub fn identity(&self) -> Result<ResourceIdentity> {
        self.read(|state| Ok(state.map.model(self.client_id)?.identity().clone()))
    }

    /// Whether this handle outlived its record
    pub fn is_destroyed(&self) -> bool {
        self.store
            .read(|state| Ok(!state.map.is_live(self.client_id, self.epoch)))
            .unwrap_or(false)
    }

    // =========================================================================
    // Attributes
    // =========================================================================

    /// Effective value of an attribute, falling back to its default
    pub fn get(&self, key: &str) -> Result<Option<Value>> {
        self.read(|state| {
            let model = state.map.model(self.client_id)?;
            if let Some(value) = model.attribute(key) {
                return Ok(Some(value.clone()));
            }
            let def = state.schema.model(&self.record_type)?;
            Ok(def.attribute_default(key).cloned())
        })
    }

    /// Set an attribute locally
    pub fn set(&self, key: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        self.edit(|state| state.set_attribute(self.client_id, key, value))
    }

    /// Every effective attribute, defaults included
    pub fn attributes(&self) -> Result<Attributes> {
        Ok(self.snapshot()?.attributes)
    }

    /// Local attribute edits as `(original, current)`
    pub fn changed_attributes(&self) -> Result<BTreeMap<String, AttributeChange>> {
        self.read(|state| Ok(state.map.model(self.client_id)?.changed_attributes()))
    }

    /// Discard every local edit
    ///
    /// A record that was never saved is unloaded and this handle dies.
    pub fn rollback_attributes(&self) -> Result<()> {
        self.edit(|state| state.rollback(self.client_id))
    }

    // =========================================================================
    // State
    // =========================================================================

    /// Lifecycle state; `Empty` for a dead handle or when the store is
    /// locked by the calling thread
    pub fn state(&self) -> RecordState {
        self.store
            .read(|state| {
                if !state.map.is_live(self.client_id, self.epoch) {
                    return Ok(RecordState::Empty);
                }
                Ok(state
                    .map
                    .get(self.client_id)
                    .map_or(RecordState::Empty, |m| m.state()))
            })
            .unwrap_or(RecordState::Empty)
    }

    /// Never persisted
    pub fn is_new(&self) -> bool {
        self.state().is_new()
    }

    /// Has unsaved local changes
    pub fn is_dirty(&self) -> bool {
        self.state().is_dirty()
    }

    /// Deleted locally or on the server
    pub fn is_deleted(&self) -> bool {
        self.state().is_deleted()
    }

    /// A save is in flight
    pub fn is_saving(&self) -> bool {
        self.state().is_in_flight()
    }

    /// Not rejected by validation
    pub fn is_valid(&self) -> bool {
        self.state().is_valid()
    }

    /// Holds data
    pub fn is_loaded(&self) -> bool {
        self.state().is_loaded()
    }

    /// A first fetch is in progress
    pub fn is_loading(&self) -> bool {
        self.state().is_loading()
    }

    /// A reload is in progress
    pub fn is_reloading(&self) -> bool {
        self.store
            .read(|state| {
                Ok(state.map.is_live(self.client_id, self.epoch)
                    && state.map.get(self.client_id).is_some_and(|m| m.is_reloading()))
            })
            .unwrap_or(false)
    }

    /// Validation errors from the last save
    pub fn errors(&self) -> Result<RecordErrors> {
        self.read(|state| Ok(state.map.model(self.client_id)?.errors().clone()))
    }

    /// Drop every validation error, making an invalid record valid
    pub fn clear_errors(&self) -> Result<()> {
        self.edit(|state| state.clear_errors(self.client_id))
    }

    // =========================================================================
    // Relationships
    // =========================================================================

    /// Related record of a `belongsTo`, fetching it first if asynchronous
    pub async fn belongs_to(&self, key: &str) -> Result<Option<Record>> {
        self.resolve(key, RelationshipKind::BelongsTo).await?;
        self.peek_belongs_to(key)
    }

    /// Related records of a `hasMany`, fetching missing ones if asynchronous
    pub async fn has_many(&self, key: &str) -> Result<Vec<Record>> {
        self.resolve(key, RelationshipKind::HasMany).await?;
        self.peek_has_many(key)
    }

    async fn resolve(&self, key: &str, kind: RelationshipKind) -> Result<()> {
        let is_async = self.read(|state| self.check_kind(state, key, kind))?;
        if is_async {
            self.store.fetch_relationship(self.client_id, key).await?;
        }
        Ok(())
    }

    /// Related record of a `belongsTo` without fetching
    ///
    /// # Errors
    ///
    /// `SyncRelationshipNotLoaded` if the relationship is synchronous and
    /// its member has no data.
    pub fn peek_belongs_to(&self, key: &str) -> Result<Option<Record>> {
        Ok(self
            .peek(key, RelationshipKind::BelongsTo)?
            .into_iter()
            .next())
    }

    /// Related records of a `hasMany` without fetching
    ///
    /// Unloaded members of an asynchronous relationship are skipped.
    pub fn peek_has_many(&self, key: &str) -> Result<Vec<Record>> {
        self.peek(key, RelationshipKind::HasMany)
    }

    fn peek(&self, key: &str, kind: RelationshipKind) -> Result<Vec<Record>> {
        self.store.with_state(|state| {
            state.check_live(self.client_id, self.epoch)?;
            let is_async = self.check_kind(state, key, kind)?;
            let members = state.graph.members(self.client_id, key, Layer::Current);
            let mut out = Vec::with_capacity(members.len());
            for cid in members {
                if state.is_loaded(cid) {
                    out.push(state.handle(&self.store, cid)?);
                } else if !is_async {
                    let member = state
                        .map
                        .get(cid)
                        .map_or_else(|| cid.to_string(), |m| m.identity().to_string());
                    return Err(Error::SyncRelationshipNotLoaded {
                        record_type: self.record_type.clone(),
                        key: key.to_string(),
                        member,
                    });
                }
            }
            Ok(out)
        })
    }

    /// Returns whether the relationship is asynchronous
    fn check_kind(&self, state: &StoreState, key: &str, kind: RelationshipKind) -> Result<bool> {
        let meta = state.schema.relationship(&self.record_type, key)?;
        if meta.kind != kind {
            return Err(Error::TypeMismatch {
                record_type: self.record_type.clone(),
                key: key.to_string(),
                expected: meta.kind.as_str().to_string(),
                actual: kind.as_str().to_string(),
            });
        }
        Ok(meta.is_async)
    }

    /// Set or clear a `belongsTo`
    pub fn set_belongs_to(&self, key: &str, member: Option<&Record>) -> Result<()> {
        let member = member.map(|m| self.member_of_this_store(m)).transpose()?;
        self.edit(|state| state.edit_relationship(self.client_id, key, RelationshipEdit::Set(member)))
    }

    /// Add to a `hasMany`, at `index` or the end
    pub fn add_to_has_many(&self, key: &str, member: &Record, index: Option<usize>) -> Result<()> {
        let member = self.member_of_this_store(member)?;
        self.edit(|state| {
            state.edit_relationship(self.client_id, key, RelationshipEdit::Add(member, index))
        })
    }

    /// Remove from a `hasMany`
    pub fn remove_from_has_many(&self, key: &str, member: &Record) -> Result<()> {
        let member = self.member_of_this_store(member)?;
        self.edit(|state| state.edit_relationship(self.client_id, key, RelationshipEdit::Remove(member)))
    }

    /// Replace the members of a `hasMany`
    pub fn replace_has_many(&self, key: &str, members: &[Record]) -> Result<()> {
        let members = members
            .iter()
            .map(|m| self.member_of_this_store(m))
            .collect::<Result<Vec<_>>>()?;
        self.edit(|state| {
            state.edit_relationship(self.client_id, key, RelationshipEdit::Replace(members))
        })
    }

    /// Canonical and current membership of a relationship
    pub fn relationship_state(&self, key: &str) -> Result<RelationshipInfo> {
        self.read(|state| {
            let meta = state.schema.relationship(&self.record_type, key)?;
            let identities = |layer| -> Vec<ResourceIdentity> {
                state
                    .graph
                    .members(self.client_id, key, layer)
                    .into_iter()
                    .filter_map(|cid| state.map.get(cid).map(|m| m.identity().clone()))
                    .collect()
            };
            Ok(RelationshipInfo {
                kind: meta.kind,
                is_async: meta.is_async,
                status: state.graph.status(self.client_id, key),
                canonical: identities(Layer::Canonical),
                current: identities(Layer::Current),
            })
        })
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    /// Persist this record
    pub async fn save(&self) -> Result<()> {
        self.store.save_record(self).await
    }

    /// Mark deleted locally; `save` sends the delete
    ///
    /// A record that was never saved is unloaded at once.
    pub fn delete_record(&self) -> Result<()> {
        self.edit(|state| state.delete(self.client_id))
    }

    /// Delete and save in one step
    pub async fn destroy_record(&self) -> Result<()> {
        self.delete_record()?;
        if self.is_destroyed() {
            return Ok(());
        }
        self.save().await
    }

    /// Unload this record; the handle dies
    pub fn unload(&self) -> Result<()> {
        self.store.unload_record(self)
    }

    /// Fetch this record again
    pub async fn reload(&self) -> Result<Record> {
        self.store.reload_record(self).await
    }

    /// Owned view of the current data
    pub fn snapshot(&self) -> Result<Snapshot> {
        self.read(|state| state.snapshot(self.client_id))
    }

    /// Call `callback` after every batch that touches this record
    pub fn observe<F>(&self, callback: F) -> Result<ObserverId>
    where
        F: Fn(&RecordChange) + Send + Sync + 'static,
    {
        self.store.observe_record(self, callback)
    }
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.store.ptr_eq(&other.store)
            && self.client_id == other.client_id
            && self.epoch == other.epoch
    }
}

impl Eq for Record {}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("client_id", &self.client_id)
            .field("record_type", &self.record_type)
            .field("epoch", &self.epoch)
            .finish()
    }
}
