//! RecordArrayManager: owner of every record array in a store
//!
//! Membership updates happen in two phases:
//!
//! 1. compute: records reported through [`RecordArrayManager::record_did_change`]
//!    are re-evaluated against a read-only [`RecordSource`]; only arrays of
//!    the record's type are visited and only that record is evaluated
//! 2. apply: [`RecordArrayManager::sync_back_references`] writes the
//!    resulting back-references onto the InternalModels
//!
//! The membership of each array is captured before its first change in a
//! batch. [`RecordArrayManager::flush`] compares against that capture and
//! produces at most one [`ArrayChange`] per array.

use crate::array::{ArrayChange, ArrayKind, ArrayState, Contents, Predicate};
use crate::source::RecordSource;
use rustc_hash::FxHashMap;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use tessera_core::{ArrayId, ClientId, Error, Result};
use tessera_storage::IdentityMap;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy)]
enum BackReference {
    Add(ClientId, ArrayId),
    Remove(ClientId, ArrayId),
}

/// Registry of live, filtered and adapter-populated arrays
#[derive(Debug, Default)]
pub struct RecordArrayManager {
    next_id: u64,
    arrays: BTreeMap<ArrayId, ArrayState>,
    live: FxHashMap<String, ArrayId>,
    changed_records: BTreeSet<ClientId>,
    before: BTreeMap<ArrayId, Vec<ClientId>>,
    back_references: Vec<BackReference>,
}

impl RecordArrayManager {
    /// Create an empty manager
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate(&mut self) -> ArrayId {
        self.next_id += 1;
        ArrayId::new(self.next_id)
    }

    fn insert_array(&mut self, record_type: &str, contents: Contents, members: Vec<ClientId>) -> ArrayId {
        let id = self.allocate();
        for cid in &members {
            self.back_references.push(BackReference::Add(*cid, id));
        }
        self.arrays.insert(
            id,
            ArrayState {
                record_type: record_type.to_string(),
                contents,
                members,
                is_updating: false,
            },
        );
        id
    }

    fn state(&self, id: ArrayId) -> Result<&ArrayState> {
        self.arrays.get(&id).ok_or(Error::ArrayDestroyed(id.as_u64()))
    }

    fn capture(&mut self, id: ArrayId) {
        if let Some(state) = self.arrays.get(&id) {
            self.before.entry(id).or_insert_with(|| state.members.clone());
        }
    }

    // =========================================================================
    // Creation
    // =========================================================================

    /// The live array for a type, created on first access
    pub fn live_array_for(&mut self, source: &dyn RecordSource, record_type: &str) -> ArrayId {
        if let Some(id) = self.live.get(record_type) {
            return *id;
        }
        let members: Vec<ClientId> = source
            .client_ids_of_type(record_type)
            .into_iter()
            .filter(|cid| source.is_visible(*cid))
            .collect();
        let id = self.insert_array(record_type, Contents::Live, members);
        self.live.insert(record_type.to_string(), id);
        debug!(target: "tessera::arrays", %id, record_type, "live array created");
        id
    }

    /// The live array for a type, if it exists
    pub fn existing_live_array(&self, record_type: &str) -> Option<ArrayId> {
        self.live.get(record_type).copied()
    }

    /// Create an array of visible records matching `predicate`
    pub fn create_filtered(
        &mut self,
        source: &dyn RecordSource,
        record_type: &str,
        predicate: Predicate,
    ) -> ArrayId {
        let members: Vec<ClientId> = source
            .client_ids_of_type(record_type)
            .into_iter()
            .filter(|cid| source.is_visible(*cid))
            .filter(|cid| source.snapshot(*cid).is_some_and(|s| predicate(&s)))
            .collect();
        let id = self.insert_array(record_type, Contents::Filtered(predicate), members);
        debug!(target: "tessera::arrays", %id, record_type, "filtered array created");
        id
    }

    /// Create an empty array whose membership is set by query responses
    pub fn create_adapter_populated(&mut self, record_type: &str, query: Value) -> ArrayId {
        let id = self.insert_array(
            record_type,
            Contents::AdapterPopulated {
                query,
                meta: None,
                is_loaded: false,
            },
            Vec::new(),
        );
        if let Some(state) = self.arrays.get_mut(&id) {
            state.is_updating = true;
        }
        debug!(target: "tessera::arrays", %id, record_type, "adapter-populated array created");
        id
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Members in order
    pub fn members(&self, id: ArrayId) -> Result<&[ClientId]> {
        Ok(&self.state(id)?.members)
    }

    /// Model name of an array's records
    pub fn record_type(&self, id: ArrayId) -> Result<&str> {
        Ok(&self.state(id)?.record_type)
    }

    /// Flavour of an array
    pub fn kind(&self, id: ArrayId) -> Result<ArrayKind> {
        Ok(self.state(id)?.kind())
    }

    /// Whether an array still exists
    pub fn contains(&self, id: ArrayId) -> bool {
        self.arrays.contains_key(&id)
    }

    /// Query of an adapter-populated array
    pub fn query(&self, id: ArrayId) -> Result<Option<&Value>> {
        Ok(match &self.state(id)?.contents {
            Contents::AdapterPopulated { query, .. } => Some(query),
            _ => None,
        })
    }

    /// Response meta of an adapter-populated array
    pub fn meta(&self, id: ArrayId) -> Result<Option<&Value>> {
        Ok(match &self.state(id)?.contents {
            Contents::AdapterPopulated { meta, .. } => meta.as_ref(),
            _ => None,
        })
    }

    /// Whether an adapter-populated array received its first response
    pub fn is_loaded(&self, id: ArrayId) -> Result<bool> {
        Ok(match &self.state(id)?.contents {
            Contents::AdapterPopulated { is_loaded, .. } => *is_loaded,
            _ => true,
        })
    }

    /// Whether a fetch for this array is pending
    pub fn is_updating(&self, id: ArrayId) -> Result<bool> {
        Ok(self.state(id)?.is_updating)
    }

    /// Every existing array
    pub fn array_ids(&self) -> Vec<ArrayId> {
        self.arrays.keys().copied().collect()
    }

    // =========================================================================
    // Updates
    // =========================================================================

    /// Flag a pending fetch for an array
    pub fn set_updating(&mut self, id: ArrayId, value: bool) -> Result<()> {
        self.arrays
            .get_mut(&id)
            .ok_or(Error::ArrayDestroyed(id.as_u64()))?
            .is_updating = value;
        Ok(())
    }

    /// Replace membership of an adapter-populated array
    ///
    /// Used after a query response.
    pub fn set_members(&mut self, id: ArrayId, members: Vec<ClientId>, response_meta: Option<Value>) -> Result<()> {
        self.state(id)?;
        self.capture(id);
        let mut seen = BTreeSet::new();
        let members: Vec<ClientId> = members.into_iter().filter(|m| seen.insert(*m)).collect();

        let Some(state) = self.arrays.get_mut(&id) else {
            return Err(Error::ArrayDestroyed(id.as_u64()));
        };
        for old in state.members.iter().filter(|m| !members.contains(m)) {
            self.back_references.push(BackReference::Remove(*old, id));
        }
        for new in members.iter().filter(|m| !state.members.contains(m)) {
            self.back_references.push(BackReference::Add(*new, id));
        }
        state.members = members;
        state.is_updating = false;
        if let Contents::AdapterPopulated { meta, is_loaded, .. } = &mut state.contents {
            *meta = response_meta;
            *is_loaded = true;
        }
        trace!(target: "tessera::arrays", %id, len = state.members.len(), "members set");
        Ok(())
    }

    /// Queue a record for re-evaluation at the next [`update`](Self::update)
    pub fn record_did_change(&mut self, cid: ClientId) {
        self.changed_records.insert(cid);
    }

    /// Whether records are waiting for re-evaluation
    pub fn has_pending_changes(&self) -> bool {
        !self.changed_records.is_empty()
    }

    /// Re-evaluate every queued record against the arrays of its type
    pub fn update(&mut self, source: &dyn RecordSource) {
        let changed = std::mem::take(&mut self.changed_records);
        for cid in changed {
            let record_type = source.record_type(cid).map(str::to_string);
            let visible = source.is_visible(cid);
            let ids: Vec<ArrayId> = self
                .arrays
                .iter()
                .filter(|(_, a)| match &record_type {
                    Some(t) => a.record_type == *t,
                    None => a.members.contains(&cid),
                })
                .map(|(id, _)| *id)
                .collect();

            let mut snapshot = None;
            for id in ids {
                let Some(state) = self.arrays.get(&id) else {
                    continue;
                };
                let contains = state.members.contains(&cid);
                let belongs = match &state.contents {
                    Contents::Live => visible,
                    Contents::Filtered(predicate) => {
                        visible && {
                            if snapshot.is_none() {
                                snapshot = source.snapshot(cid);
                            }
                            snapshot.as_ref().is_some_and(|s| predicate(s))
                        }
                    }
                    Contents::AdapterPopulated { .. } => contains && visible,
                };
                if belongs == contains {
                    continue;
                }
                self.capture(id);
                if let Some(state) = self.arrays.get_mut(&id) {
                    if belongs {
                        state.members.push(cid);
                        self.back_references.push(BackReference::Add(cid, id));
                    } else {
                        state.members.retain(|m| *m != cid);
                        self.back_references.push(BackReference::Remove(cid, id));
                    }
                }
            }
        }
    }

    /// Write queued back-references onto InternalModels
    pub fn sync_back_references(&mut self, map: &mut IdentityMap) {
        for reference in self.back_references.drain(..) {
            match reference {
                BackReference::Add(cid, id) => {
                    if let Some(model) = map.get_mut(cid) {
                        model.add_record_array(id);
                    }
                }
                BackReference::Remove(cid, id) => {
                    if let Some(model) = map.get_mut(cid) {
                        model.remove_record_array(id);
                    }
                }
            }
        }
    }

    /// Close the batch, returning one change per array that changed
    ///
    /// Destroyed arrays produce no change.
    pub fn flush(&mut self) -> Vec<ArrayChange> {
        let before = std::mem::take(&mut self.before);
        let changes: Vec<ArrayChange> = before
            .into_iter()
            .filter_map(|(id, old)| {
                let state = self.arrays.get(&id)?;
                ArrayChange::between(id, &old, &state.members)
            })
            .collect();
        if !changes.is_empty() {
            trace!(target: "tessera::arrays", arrays = changes.len(), "array changes flushed");
        }
        changes
    }

    // =========================================================================
    // Destruction
    // =========================================================================

    /// Destroy an array and unregister it from its members
    pub fn destroy(&mut self, id: ArrayId) -> Result<()> {
        let state = self
            .arrays
            .remove(&id)
            .ok_or(Error::ArrayDestroyed(id.as_u64()))?;
        for cid in state.members {
            self.back_references.push(BackReference::Remove(cid, id));
        }
        if matches!(state.contents, Contents::Live) {
            self.live.remove(&state.record_type);
        }
        self.before.remove(&id);
        debug!(target: "tessera::arrays", %id, "array destroyed");
        Ok(())
    }

    /// Destroy every array
    pub fn destroy_all(&mut self) {
        for id in self.array_ids() {
            // ids come from the map itself
            let _ = self.destroy(id);
        }
        self.changed_records.clear();
    }
}
