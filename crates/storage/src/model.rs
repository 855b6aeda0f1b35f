//! InternalModel: the durable record wrapper
//!
//! An `InternalModel` exists for every record the store knows about, whether
//! or not it has data. It owns the lifecycle state and three attribute layers:
//!
//! - `canonical`: last values accepted from the server
//! - `in_flight`: local edits handed to an adapter by a pending save
//! - `local`: uncommitted local edits
//!
//! The effective value of an attribute is `local`, else `in_flight`, else
//! `canonical`. Relationship membership lives in the relationship graph; the
//! model only records which relationships were edited locally.
//!
//! The public record projection is represented by a materialization epoch.
//! A handle created for epoch `n` stays valid until the model is unloaded,
//! after which a fresh epoch is issued on next access.

use crate::errors::RecordErrors;
use crate::state::{RecordEvent, RecordState};
use std::collections::{BTreeMap, BTreeSet};
use tessera_core::{ArrayId, Attributes, ClientId, ResourceIdentity, Result, Value};
use tracing::debug;

/// Local change to one attribute: `(original, current)`
pub type AttributeChange = (Option<Value>, Value);

/// Durable, non-UI record wrapper
#[derive(Debug, Clone)]
pub struct InternalModel {
    identity: ResourceIdentity,
    state: RecordState,
    canonical: Attributes,
    in_flight: Attributes,
    local: Attributes,
    dirty_relationships: BTreeSet<String>,
    in_flight_relationships: BTreeSet<String>,
    errors: RecordErrors,
    epoch: Option<u64>,
    dematerializing: bool,
    reloading: bool,
    record_arrays: BTreeSet<ArrayId>,
}

impl InternalModel {
    /// Create an empty model for an identity
    pub fn new(identity: ResourceIdentity) -> Self {
        Self {
            identity,
            state: RecordState::Empty,
            canonical: Attributes::new(),
            in_flight: Attributes::new(),
            local: Attributes::new(),
            dirty_relationships: BTreeSet::new(),
            in_flight_relationships: BTreeSet::new(),
            errors: RecordErrors::new(),
            epoch: None,
            dematerializing: false,
            reloading: false,
            record_arrays: BTreeSet::new(),
        }
    }

    // =========================================================================
    // Identity
    // =========================================================================

    /// Full identity
    pub fn identity(&self) -> &ResourceIdentity {
        &self.identity
    }

    /// Surrogate key
    pub fn client_id(&self) -> ClientId {
        self.identity.client_id
    }

    /// Model name
    pub fn record_type(&self) -> &str {
        &self.identity.record_type
    }

    /// Server id, if persisted
    pub fn id(&self) -> Option<&str> {
        self.identity.id.as_deref()
    }

    pub(crate) fn set_id(&mut self, id: String) {
        self.identity.id = Some(id);
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Current lifecycle state
    pub fn state(&self) -> RecordState {
        self.state
    }

    /// Whether the record has never been persisted
    pub fn is_new(&self) -> bool {
        self.state.is_new()
    }

    /// Feed an event to the state machine
    ///
    /// # Errors
    ///
    /// `InvalidTransition` if the current state does not handle the event;
    /// the state is left unchanged.
    pub fn send(&mut self, event: RecordEvent) -> Result<RecordState> {
        let next = self.state.transition(event)?;
        if next != self.state {
            debug!(
                target: "tessera::lifecycle",
                record = %self.identity,
                from = self.state.path(),
                to = next.path(),
                event = event.as_str(),
                "transition"
            );
        }
        self.state = next;
        Ok(next)
    }

    /// Unload requested while a save was in flight
    pub fn is_dematerializing(&self) -> bool {
        self.dematerializing
    }

    /// Set or clear the deferred-unload flag
    pub fn set_dematerializing(&mut self, value: bool) {
        self.dematerializing = value;
    }

    /// A reload of an already loaded record is pending
    pub fn is_reloading(&self) -> bool {
        self.reloading
    }

    /// Set or clear the reloading flag
    pub fn set_reloading(&mut self, value: bool) {
        self.reloading = value;
    }

    /// Whether the model must stay out of every record array
    pub fn is_hidden_from_record_arrays(&self) -> bool {
        self.dematerializing
            || matches!(
                self.state,
                RecordState::Empty | RecordState::Loading | RecordState::DeletedSaved
            )
    }

    /// Whether anything about this record is live (not merely a stub)
    pub fn is_in_use(&self) -> bool {
        !self.state.is_empty()
    }

    // =========================================================================
    // Materialization
    // =========================================================================

    /// Epoch of the current public projection, if materialized
    pub fn epoch(&self) -> Option<u64> {
        self.epoch
    }

    /// Record that a projection with `epoch` now exists
    pub fn materialize(&mut self, epoch: u64) {
        self.epoch = Some(epoch);
    }

    /// Whether a projection exists
    pub fn is_materialized(&self) -> bool {
        self.epoch.is_some()
    }

    /// Back-references of record arrays containing this model
    pub fn record_arrays(&self) -> &BTreeSet<ArrayId> {
        &self.record_arrays
    }

    /// Add a record-array back-reference
    pub fn add_record_array(&mut self, array: ArrayId) {
        self.record_arrays.insert(array);
    }

    /// Remove a record-array back-reference
    pub fn remove_record_array(&mut self, array: ArrayId) {
        self.record_arrays.remove(&array);
    }

    // =========================================================================
    // Attributes
    // =========================================================================

    /// Effective value of an attribute
    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.local
            .get(key)
            .or_else(|| self.in_flight.get(key))
            .or_else(|| self.canonical.get(key))
    }

    /// All effective attribute values
    pub fn attributes(&self) -> Attributes {
        let mut out = self.canonical.clone();
        out.extend(self.in_flight.iter().map(|(k, v)| (k.clone(), v.clone())));
        out.extend(self.local.iter().map(|(k, v)| (k.clone(), v.clone())));
        out
    }

    /// Last server-confirmed value of an attribute
    pub fn canonical_attribute(&self, key: &str) -> Option<&Value> {
        self.canonical.get(key)
    }

    fn original_attribute(&self, key: &str) -> Option<&Value> {
        self.in_flight.get(key).or_else(|| self.canonical.get(key))
    }

    /// Set a local attribute value
    ///
    /// Setting a value equal to the original drops the local edit. Returns
    /// whether the effective value changed.
    pub fn set_attribute(&mut self, key: &str, value: Value) -> bool {
        if self.attribute(key) == Some(&value) {
            return false;
        }
        if self.original_attribute(key) == Some(&value) {
            self.local.remove(key);
        } else {
            self.local.insert(key.to_string(), value);
        }
        true
    }

    /// Local attribute edits as `(original, current)`
    pub fn changed_attributes(&self) -> BTreeMap<String, AttributeChange> {
        self.local
            .iter()
            .map(|(k, v)| (k.clone(), (self.original_attribute(k).cloned(), v.clone())))
            .collect()
    }

    /// Whether any attribute differs from its original value
    pub fn has_changed_attributes(&self) -> bool {
        !self.local.is_empty()
    }

    /// Whether any attribute or relationship was edited locally
    pub fn has_local_changes(&self) -> bool {
        !self.local.is_empty() || !self.dirty_relationships.is_empty()
    }

    /// Merge server attributes into canonical state
    ///
    /// Local edits equal to the new canonical value are dropped. Returns the
    /// keys whose effective value changed.
    pub fn push_canonical_attributes(&mut self, attributes: &Attributes) -> Vec<String> {
        let mut changed = Vec::new();
        for (key, value) in attributes {
            let before = self.attribute(key).cloned();
            self.canonical.insert(key.clone(), value.clone());
            if self.local.get(key) == Some(value) && !self.in_flight.contains_key(key) {
                self.local.remove(key);
            }
            if self.attribute(key) != before.as_ref() {
                changed.push(key.clone());
            }
        }
        changed
    }

    // =========================================================================
    // Relationship edit tracking
    // =========================================================================

    /// Note that a relationship was edited locally
    pub fn mark_relationship_dirty(&mut self, key: &str) {
        self.dirty_relationships.insert(key.to_string());
    }

    /// Forget a relationship edit whose membership is back to canonical
    pub fn mark_relationship_clean(&mut self, key: &str) {
        self.dirty_relationships.remove(key);
    }

    /// Relationships edited locally and not yet saved
    pub fn dirty_relationships(&self) -> &BTreeSet<String> {
        &self.dirty_relationships
    }

    // =========================================================================
    // Save lifecycle
    // =========================================================================

    /// Move local edits into the in-flight layer
    pub fn will_commit(&mut self) {
        let local = std::mem::take(&mut self.local);
        self.in_flight.extend(local);
        let dirty = std::mem::take(&mut self.dirty_relationships);
        self.in_flight_relationships.extend(dirty);
    }

    /// Accept the in-flight layer (and any response attributes) as canonical
    ///
    /// Returns the relationships that were saved.
    pub fn did_commit(&mut self, response: Option<&Attributes>) -> BTreeSet<String> {
        let in_flight = std::mem::take(&mut self.in_flight);
        self.canonical.extend(in_flight);
        if let Some(attrs) = response {
            self.push_canonical_attributes(attrs);
        }
        self.errors.clear();
        std::mem::take(&mut self.in_flight_relationships)
    }

    /// Return in-flight edits to the local layer after a failed save
    ///
    /// Edits made while the request was pending take precedence.
    pub fn commit_failed(&mut self) {
        let in_flight = std::mem::take(&mut self.in_flight);
        for (k, v) in in_flight {
            if self.canonical.get(&k) != Some(&v) {
                self.local.entry(k).or_insert(v);
            }
        }
        let rels = std::mem::take(&mut self.in_flight_relationships);
        self.dirty_relationships.extend(rels);
    }

    /// Discard local attribute edits and errors
    ///
    /// Returns the relationships that had local edits so the caller can
    /// reset them in the graph.
    pub fn rollback(&mut self) -> BTreeSet<String> {
        self.local.clear();
        self.errors.clear();
        std::mem::take(&mut self.dirty_relationships)
    }

    /// Drop all data; called on unload
    pub fn unload_data(&mut self) {
        self.canonical.clear();
        self.in_flight.clear();
        self.local.clear();
        self.dirty_relationships.clear();
        self.in_flight_relationships.clear();
        self.errors.clear();
        self.epoch = None;
        self.dematerializing = false;
        self.reloading = false;
    }

    // =========================================================================
    // Errors
    // =========================================================================

    /// Validation errors
    pub fn errors(&self) -> &RecordErrors {
        &self.errors
    }

    /// Mutable validation errors
    pub fn errors_mut(&mut self) -> &mut RecordErrors {
        &mut self.errors
    }
}
