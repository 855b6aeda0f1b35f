//! Local edits: attributes, relationships, rollback and delete

use super::StoreState;
use tessera_core::{ClientId, Result, Value};
use tessera_storage::RecordEvent;
use tracing::debug;

/// A local change to one relationship
#[derive(Debug, Clone)]
pub(crate) enum RelationshipEdit {
    /// Set or clear a `belongsTo`
    Set(Option<ClientId>),
    /// Insert into a `hasMany`, at the end when no index is given
    Add(ClientId, Option<usize>),
    /// Remove from a `hasMany`
    Remove(ClientId),
    /// Replace the whole `hasMany`
    Replace(Vec<ClientId>),
}

impl StoreState {
    /// Set an attribute and move the record between clean and dirty
    pub(crate) fn set_attribute(&mut self, cid: ClientId, key: &str, value: Value) -> Result<()> {
        let model = self.map.model_mut(cid)?;
        model.state().transition(RecordEvent::BecomeDirty)?;
        if !model.set_attribute(key, value) {
            return Ok(());
        }
        model.errors_mut().remove(key);
        self.after_edit(cid)
    }

    /// Apply a relationship edit to the current layer
    pub(crate) fn edit_relationship(
        &mut self,
        cid: ClientId,
        key: &str,
        edit: RelationshipEdit,
    ) -> Result<()> {
        self.map.model(cid)?.state().transition(RecordEvent::BecomeDirty)?;
        let changed = match edit {
            RelationshipEdit::Set(member) => self.graph.set_belongs_to(&self.map, cid, key, member)?,
            RelationshipEdit::Add(member, index) => {
                self.graph.add_to_has_many(&self.map, cid, key, member, index)?
            }
            RelationshipEdit::Remove(member) => {
                self.graph.remove_from_has_many(&self.map, cid, key, member)?
            }
            RelationshipEdit::Replace(members) => {
                self.graph.replace_has_many(&self.map, cid, key, members)?
            }
        };
        if !changed {
            return Ok(());
        }
        let dirty = self.graph.relationship(cid, key).is_some_and(|rel| rel.is_dirty());
        let model = self.map.model_mut(cid)?;
        if dirty {
            model.mark_relationship_dirty(key);
        } else {
            model.mark_relationship_clean(key);
        }
        model.errors_mut().remove(key);
        self.after_edit(cid)
    }

    /// Re-derive dirtiness after an edit
    ///
    /// An invalid record whose last error was cleared by the edit becomes
    /// valid again.
    fn after_edit(&mut self, cid: ClientId) -> Result<()> {
        let model = self.map.model_mut(cid)?;
        if model.has_local_changes() {
            model.send(RecordEvent::BecomeDirty)?;
        } else {
            model.send(RecordEvent::PropertyWasReset)?;
        }
        if !model.state().is_valid() && model.errors().is_empty() {
            model.send(RecordEvent::BecameValid)?;
            if !model.has_local_changes() {
                model.send(RecordEvent::PropertyWasReset)?;
            }
        }
        self.touched.insert(cid);
        Ok(())
    }

    /// Discard local edits
    ///
    /// A record that was never saved is unloaded instead.
    pub(crate) fn rollback(&mut self, cid: ClientId) -> Result<()> {
        let model = self.map.model_mut(cid)?;
        let was_new = model.is_new();
        if model.send(RecordEvent::RolledBack)?.is_empty() {
            self.dematerialize(cid, was_new);
            return Ok(());
        }
        let relationships = model.rollback();
        for key in &relationships {
            self.graph.rollback(cid, key);
        }
        debug!(target: "tessera::store", %cid, relationships = relationships.len(), "record rolled back");
        self.touched.insert(cid);
        Ok(())
    }

    /// Mark a record deleted locally
    ///
    /// Deleting a record that was never saved unloads it at once.
    pub(crate) fn delete(&mut self, cid: ClientId) -> Result<()> {
        let model = self.map.model_mut(cid)?;
        let was_new = model.is_new();
        if model.send(RecordEvent::DeleteRecord)?.is_empty() {
            self.dematerialize(cid, was_new);
        } else {
            self.touched.insert(cid);
        }
        Ok(())
    }

    /// Clear every validation error
    pub(crate) fn clear_errors(&mut self, cid: ClientId) -> Result<()> {
        let model = self.map.model_mut(cid)?;
        model.errors_mut().clear();
        if !model.state().is_valid() {
            model.send(RecordEvent::BecameValid)?;
            if !model.has_local_changes() && !model.state().is_deleted() {
                model.send(RecordEvent::PropertyWasReset)?;
            }
        }
        self.touched.insert(cid);
        Ok(())
    }
}
