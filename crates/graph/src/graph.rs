//! RelationshipGraph: symmetric relationship storage keyed by ClientId
//!
//! Edges are ClientIds; no relationship holds a reference into another.
//! Every structural change goes through two primitives, `add_edge` and
//! `remove_edge`, which update one layer on both sides of an edge. That
//! keeps each layer symmetric on its own:
//!
//! `B ∈ A.key[layer]  ⟺  A ∈ B.inverse[layer]`
//!
//! Relationships declared without an inverse are tracked through an implicit
//! back-index so the target can still find who points at it.
//!
//! # Canonical then current
//!
//! `push_canonical` only touches the canonical layer and queues the touched
//! relationships. `flush` then recomputes their current layer as canonical
//! plus locally added records that were never persisted. The engine flushes
//! once per batch.

use crate::relationship::{Layer, Relationship, RelationshipStatus};
use rustc_hash::FxHashMap;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use tessera_core::schema::{RelationshipKind, RelationshipMeta, Schema};
use tessera_core::{ClientId, Error, Result};
use tessera_storage::IdentityMap;
use tracing::{debug, trace};

type EdgeKey = (ClientId, String);

/// Relationship state for every record in a store
#[derive(Debug)]
pub struct RelationshipGraph {
    schema: Arc<Schema>,
    relationships: FxHashMap<ClientId, BTreeMap<String, Relationship>>,
    implicit: FxHashMap<ClientId, BTreeSet<EdgeKey>>,
    pending_flush: BTreeSet<EdgeKey>,
    changed: BTreeSet<EdgeKey>,
}

impl RelationshipGraph {
    /// Create an empty graph over a schema
    pub fn new(schema: Arc<Schema>) -> Self {
        Self {
            schema,
            relationships: FxHashMap::default(),
            implicit: FxHashMap::default(),
            pending_flush: BTreeSet::new(),
            changed: BTreeSet::new(),
        }
    }

    /// Schema the graph was built for
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Relationship state, if it has been touched
    pub fn relationship(&self, owner: ClientId, key: &str) -> Option<&Relationship> {
        self.relationships.get(&owner)?.get(key)
    }

    /// Members of one layer, empty if untouched
    pub fn members(&self, owner: ClientId, key: &str, layer: Layer) -> Vec<ClientId> {
        self.relationship(owner, key)
            .map(|r| r.members(layer).to_vec())
            .unwrap_or_default()
    }

    /// Knowledge status of a relationship
    pub fn status(&self, owner: ClientId, key: &str) -> RelationshipStatus {
        self.relationship(owner, key)
            .map_or(RelationshipStatus::Unknown, Relationship::status)
    }

    /// Touched relationships of one record
    pub fn relationships_of(&self, owner: ClientId) -> impl Iterator<Item = (&str, &Relationship)> {
        self.relationships
            .get(&owner)
            .into_iter()
            .flat_map(|rels| rels.iter().map(|(k, r)| (k.as_str(), r)))
    }

    /// Every touched relationship in the graph
    pub fn iter(&self) -> impl Iterator<Item = (ClientId, &str, &Relationship)> {
        self.relationships
            .iter()
            .flat_map(|(cid, rels)| rels.iter().map(move |(k, r)| (*cid, k.as_str(), r)))
    }

    /// Records holding an inverse-less edge to `target`
    pub fn implicit_holders(&self, target: ClientId) -> Vec<(ClientId, String)> {
        self.implicit
            .get(&target)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether canonical changes are waiting for `flush`
    pub fn has_pending_flush(&self) -> bool {
        !self.pending_flush.is_empty()
    }

    /// Drain the set of relationships whose current layer changed
    pub fn take_changes(&mut self) -> BTreeSet<(ClientId, String)> {
        std::mem::take(&mut self.changed)
    }

    // =========================================================================
    // Edge primitives
    // =========================================================================

    fn meta_for(&self, map: &IdentityMap, owner: ClientId, key: &str) -> Result<Arc<RelationshipMeta>> {
        let record_type = map.model(owner)?.record_type();
        self.schema.relationship(record_type, key).map(Arc::clone)
    }

    fn inverse_meta(&self, meta: &RelationshipMeta) -> Option<Arc<RelationshipMeta>> {
        let key = meta.inverse_key.as_deref()?;
        self.schema.relationship(&meta.related_type, key).ok().map(Arc::clone)
    }

    fn rel_mut(&mut self, owner: ClientId, meta: &Arc<RelationshipMeta>) -> &mut Relationship {
        self.relationships
            .entry(owner)
            .or_default()
            .entry(meta.key.clone())
            .or_insert_with(|| Relationship::new(Arc::clone(meta)))
    }

    fn note(&mut self, layer: Layer, owner: ClientId, key: &str) {
        let entry = (owner, key.to_string());
        match layer {
            Layer::Canonical => self.pending_flush.insert(entry),
            Layer::Current => self.changed.insert(entry),
        };
    }

    fn sync_implicit(&mut self, holder: ClientId, key: &str, target: ClientId) {
        let still_referenced = self
            .relationship(holder, key)
            .is_some_and(|r| r.references(target));
        let entry = (holder, key.to_string());
        if still_referenced {
            self.implicit.entry(target).or_default().insert(entry);
        } else if let Some(set) = self.implicit.get_mut(&target) {
            set.remove(&entry);
            if set.is_empty() {
                self.implicit.remove(&target);
            }
        }
    }

    /// Remove `target` from `holder.key` in one layer without touching the
    /// other side
    fn remove_one_side(&mut self, layer: Layer, holder: ClientId, meta: &Arc<RelationshipMeta>, target: ClientId) {
        let removed = self.rel_mut(holder, meta).members_mut(layer).remove(target);
        if removed {
            self.note(layer, holder, &meta.key);
        }
        if meta.inverse_key.is_none() {
            self.sync_implicit(holder, &meta.key, target);
        }
    }

    fn remove_edge(&mut self, layer: Layer, owner: ClientId, meta: &Arc<RelationshipMeta>, member: ClientId) {
        self.remove_one_side(layer, owner, meta, member);
        if let Some(inverse) = self.inverse_meta(meta) {
            self.remove_one_side(layer, member, &inverse, owner);
        }
    }

    fn add_edge(
        &mut self,
        layer: Layer,
        owner: ClientId,
        meta: &Arc<RelationshipMeta>,
        member: ClientId,
        index: Option<usize>,
    ) {
        let rel = self.rel_mut(owner, meta);
        let already = rel.members(layer).contains(member);
        let displaced = rel.members_mut(layer).insert(member, index);
        if !already {
            self.note(layer, owner, &meta.key);
        }

        match self.inverse_meta(meta) {
            Some(inverse) => {
                if let Some(previous) = displaced {
                    self.remove_one_side(layer, previous, &inverse, owner);
                }
                let rel = self.rel_mut(member, &inverse);
                let already = rel.members(layer).contains(owner);
                let displaced = rel.members_mut(layer).insert(owner, None);
                if !already {
                    self.note(layer, member, &inverse.key);
                }
                if let Some(previous_holder) = displaced {
                    self.remove_one_side(layer, previous_holder, meta, member);
                }
            }
            None => {
                if let Some(previous) = displaced {
                    self.sync_implicit(owner, &meta.key, previous);
                }
                self.sync_implicit(owner, &meta.key, member);
            }
        }
    }

    /// Make `layer` of `owner.key` equal `target`, edge by edge
    fn reset_layer(&mut self, layer: Layer, owner: ClientId, meta: &Arc<RelationshipMeta>, target: &[ClientId]) {
        let existing = self.members(owner, &meta.key, layer);
        for member in existing.iter().filter(|m| !target.contains(m)) {
            self.remove_edge(layer, owner, meta, *member);
        }
        for member in target.iter().filter(|m| !existing.contains(m)) {
            self.add_edge(layer, owner, meta, *member, None);
        }
        let rel = self.rel_mut(owner, meta);
        let now = rel.members(layer).to_vec();
        if now != target && same_members(&now, target) {
            rel.members_mut(layer).reorder(target);
            if layer == Layer::Current {
                self.note(layer, owner, &meta.key);
            }
        }
    }

    // =========================================================================
    // Canonical updates
    // =========================================================================

    /// Replace the canonical membership of `owner.key` with server data
    ///
    /// Removed and added members have the owner removed from or added to
    /// their inverse canonical membership. Server order is kept for `hasMany`.
    /// A `belongsTo` only keeps the first member given.
    pub fn push_canonical(
        &mut self,
        map: &IdentityMap,
        owner: ClientId,
        key: &str,
        members: Vec<ClientId>,
    ) -> Result<()> {
        let meta = self.meta_for(map, owner, key)?;
        let mut target = dedupe(members);
        if meta.kind == RelationshipKind::BelongsTo {
            target.truncate(1);
        }
        trace!(target: "tessera::graph", %owner, key, members = target.len(), "push canonical");
        self.reset_layer(Layer::Canonical, owner, &meta, &target);
        self.rel_mut(owner, &meta).mark_loaded();
        self.note(Layer::Canonical, owner, key);
        Ok(())
    }

    /// Recompute the current layer of every relationship touched by a
    /// canonical update since the last flush
    ///
    /// Current becomes canonical plus locally added members that have never
    /// been persisted. Server state wins over local edits to persisted
    /// members.
    pub fn flush(&mut self, map: &IdentityMap) {
        while let Some((owner, key)) = self.pending_flush.pop_first() {
            let Some(rel) = self.relationship(owner, &key) else {
                continue;
            };
            let meta = Arc::clone(rel.meta());
            let canonical = rel.members(Layer::Canonical).to_vec();
            let current = rel.members(Layer::Current).to_vec();
            let is_new = |cid: &ClientId| map.get(*cid).is_some_and(|m| m.is_new());

            let mut target = canonical.clone();
            match meta.kind {
                RelationshipKind::HasMany => {
                    target.extend(current.iter().filter(|m| !canonical.contains(m) && is_new(m)));
                }
                RelationshipKind::BelongsTo => {
                    if canonical.is_empty() {
                        target.extend(current.first().filter(|m| is_new(m)));
                    }
                }
            }
            if target != current {
                self.reset_layer(Layer::Current, owner, &meta, &target);
            }
        }
    }

    /// Mark a relationship as fully known again after its members loaded
    pub fn mark_loaded(&mut self, map: &IdentityMap, owner: ClientId, key: &str) -> Result<()> {
        let meta = self.meta_for(map, owner, key)?;
        self.rel_mut(owner, &meta).mark_loaded();
        Ok(())
    }

    // =========================================================================
    // Local edits
    // =========================================================================

    fn check_local(
        &self,
        map: &IdentityMap,
        owner: ClientId,
        key: &str,
        kind: RelationshipKind,
        members: &[ClientId],
    ) -> Result<Arc<RelationshipMeta>> {
        let meta = self.meta_for(map, owner, key)?;
        if meta.kind != kind {
            return Err(Error::TypeMismatch {
                record_type: meta.owner_type.clone(),
                key: key.to_string(),
                expected: meta.kind.as_str().to_string(),
                actual: kind.as_str().to_string(),
            });
        }
        for member in members {
            let actual = map.model(*member)?.record_type();
            if actual != meta.related_type {
                return Err(Error::TypeMismatch {
                    record_type: meta.owner_type.clone(),
                    key: key.to_string(),
                    expected: meta.related_type.clone(),
                    actual: actual.to_string(),
                });
            }
        }
        Ok(meta)
    }

    /// Add `member` to a `hasMany` at `index` (or the end)
    ///
    /// Returns whether membership changed.
    pub fn add_to_has_many(
        &mut self,
        map: &IdentityMap,
        owner: ClientId,
        key: &str,
        member: ClientId,
        index: Option<usize>,
    ) -> Result<bool> {
        let meta = self.check_local(map, owner, key, RelationshipKind::HasMany, &[member])?;
        self.rel_mut(owner, &meta).mark_loaded();
        if self.members(owner, key, Layer::Current).contains(&member) {
            return Ok(false);
        }
        self.add_edge(Layer::Current, owner, &meta, member, index);
        Ok(true)
    }

    /// Remove `member` from a `hasMany`
    pub fn remove_from_has_many(
        &mut self,
        map: &IdentityMap,
        owner: ClientId,
        key: &str,
        member: ClientId,
    ) -> Result<bool> {
        let meta = self.check_local(map, owner, key, RelationshipKind::HasMany, &[])?;
        if !self.members(owner, key, Layer::Current).contains(&member) {
            return Ok(false);
        }
        self.remove_edge(Layer::Current, owner, &meta, member);
        Ok(true)
    }

    /// Replace the current membership of a `hasMany`
    pub fn replace_has_many(
        &mut self,
        map: &IdentityMap,
        owner: ClientId,
        key: &str,
        members: Vec<ClientId>,
    ) -> Result<bool> {
        let target = dedupe(members);
        let meta = self.check_local(map, owner, key, RelationshipKind::HasMany, &target)?;
        self.rel_mut(owner, &meta).mark_loaded();
        if self.members(owner, key, Layer::Current) == target {
            return Ok(false);
        }
        self.reset_layer(Layer::Current, owner, &meta, &target);
        Ok(true)
    }

    /// Set or clear a `belongsTo`
    pub fn set_belongs_to(
        &mut self,
        map: &IdentityMap,
        owner: ClientId,
        key: &str,
        member: Option<ClientId>,
    ) -> Result<bool> {
        let given: Vec<ClientId> = member.into_iter().collect();
        let meta = self.check_local(map, owner, key, RelationshipKind::BelongsTo, &given)?;
        self.rel_mut(owner, &meta).mark_loaded();
        if self.members(owner, key, Layer::Current) == given {
            return Ok(false);
        }
        self.reset_layer(Layer::Current, owner, &meta, &given);
        Ok(true)
    }

    /// Accept the current layer of `owner.key` as canonical after a save
    pub fn commit(&mut self, owner: ClientId, key: &str) {
        let Some(rel) = self.relationship(owner, key) else {
            return;
        };
        let meta = Arc::clone(rel.meta());
        let current = rel.members(Layer::Current).to_vec();
        self.reset_layer(Layer::Canonical, owner, &meta, &current);
    }

    /// Discard local edits to `owner.key`
    pub fn rollback(&mut self, owner: ClientId, key: &str) {
        let Some(rel) = self.relationship(owner, key) else {
            return;
        };
        let meta = Arc::clone(rel.meta());
        let canonical = rel.members(Layer::Canonical).to_vec();
        self.reset_layer(Layer::Current, owner, &meta, &canonical);
    }

    // =========================================================================
    // Removal
    // =========================================================================

    /// Apply the unload rule for `record`
    ///
    /// For each member `m` related to `record`: when `m`'s side of the edge
    /// is synchronous, or `record` was never persisted, the edge is removed
    /// from both layers on both sides. Otherwise the edge survives and `m`'s
    /// relationship is marked stale so that resolving it fetches again.
    pub fn unload(&mut self, record: ClientId, is_new: bool) {
        let own: Vec<(Arc<RelationshipMeta>, Vec<ClientId>)> = self
            .relationships_of(record)
            .map(|(_, r)| (Arc::clone(r.meta()), r.all_members()))
            .collect();

        let mut pruned = 0usize;
        let mut stale = 0usize;
        for (meta, members) in own {
            match self.inverse_meta(&meta) {
                Some(inverse) => {
                    for member in members {
                        if !inverse.is_async || is_new {
                            for layer in Layer::BOTH {
                                self.remove_edge(layer, record, &meta, member);
                            }
                            pruned += 1;
                        } else {
                            self.rel_mut(member, &inverse).mark_stale();
                            self.note(Layer::Current, member, &inverse.key);
                            stale += 1;
                        }
                    }
                }
                None => {
                    for member in members {
                        for layer in Layer::BOTH {
                            self.remove_one_side(layer, record, &meta, member);
                        }
                    }
                    if let Some(rel) = self.relationships.get_mut(&record).and_then(|r| r.get_mut(&meta.key)) {
                        rel.clear();
                    }
                }
            }
        }

        for (holder, key) in self.implicit_holders(record) {
            let Some(meta) = self.relationship(holder, &key).map(|r| Arc::clone(r.meta())) else {
                continue;
            };
            if !meta.is_async || is_new {
                for layer in Layer::BOTH {
                    self.remove_one_side(layer, holder, &meta, record);
                }
                pruned += 1;
            } else {
                self.rel_mut(holder, &meta).mark_stale();
                self.note(Layer::Current, holder, &key);
                stale += 1;
            }
        }
        debug!(target: "tessera::graph", %record, pruned, stale, "record dematerialized");
    }

    /// Remove `record` from every relationship in both layers
    ///
    /// Used once a deletion is confirmed or the server reports the record
    /// does not exist; asynchronous relationships drop it too.
    pub fn remove_from_all(&mut self, record: ClientId) {
        let own: Vec<(Arc<RelationshipMeta>, Vec<ClientId>)> = self
            .relationships_of(record)
            .map(|(_, r)| (Arc::clone(r.meta()), r.all_members()))
            .collect();
        for (meta, members) in own {
            for member in members {
                for layer in Layer::BOTH {
                    self.remove_edge(layer, record, &meta, member);
                }
            }
        }
        for (holder, key) in self.implicit_holders(record) {
            if let Some(meta) = self.relationship(holder, &key).map(|r| Arc::clone(r.meta())) {
                for layer in Layer::BOTH {
                    self.remove_one_side(layer, holder, &meta, record);
                }
            }
        }
        debug!(target: "tessera::graph", %record, "removed from all relationships");
    }

    /// Records reachable from `start` over any edge in either layer
    ///
    /// Includes `start`.
    pub fn connected_component(&self, start: ClientId) -> Vec<ClientId> {
        let mut seen = BTreeSet::from([start]);
        let mut order = vec![start];
        let mut queue = VecDeque::from([start]);
        while let Some(cid) = queue.pop_front() {
            let mut neighbours: Vec<ClientId> = self
                .relationships_of(cid)
                .flat_map(|(_, r)| r.all_members())
                .collect();
            neighbours.extend(self.implicit_holders(cid).into_iter().map(|(holder, _)| holder));
            for next in neighbours {
                if seen.insert(next) {
                    order.push(next);
                    queue.push_back(next);
                }
            }
        }
        order
    }

    /// Drop all state held for `record`
    ///
    /// Callers remove whole connected components, so no other record keeps
    /// an edge to `record` afterwards.
    pub fn remove_record(&mut self, record: ClientId) {
        if let Some(rels) = self.relationships.remove(&record) {
            for (key, rel) in rels {
                if rel.inverse_key().is_none() {
                    for member in rel.all_members() {
                        if let Some(set) = self.implicit.get_mut(&member) {
                            set.remove(&(record, key.clone()));
                        }
                    }
                }
            }
        }
        self.implicit.remove(&record);
        self.pending_flush.retain(|(cid, _)| *cid != record);
        self.changed.retain(|(cid, _)| *cid != record);
    }
}

fn dedupe(members: Vec<ClientId>) -> Vec<ClientId> {
    let mut seen = BTreeSet::new();
    members.into_iter().filter(|m| seen.insert(*m)).collect()
}

fn same_members(a: &[ClientId], b: &[ClientId]) -> bool {
    a.len() == b.len() && a.iter().all(|m| b.contains(m))
}
