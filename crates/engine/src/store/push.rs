//! Push: merging normalized documents into the store
//!
//! A document is validated as a whole before anything is merged, so a
//! rejected push leaves the store untouched. Included resources are merged
//! first, then primary data. Relationship payloads only replace canonical
//! membership; current membership is recomputed when the batch finishes.

use super::{Store, StoreState};
use crate::record::Record;
use tessera_core::schema::RelationshipKind;
use tessera_core::{ClientId, Document, Error, Linkage, Resource, Result};
use tessera_storage::{RecordEvent, RecordState};
use tracing::{debug, trace, warn};

impl Store {
    /// Merge a document; returns handles for the primary records
    ///
    /// # Errors
    ///
    /// `UnknownModel` for a resource of an undeclared type and
    /// `TypeMismatch` for linkage that does not match its relationship.
    /// Unknown relationship keys are skipped with a warning.
    pub fn push(&self, document: &Document) -> Result<Vec<Record>> {
        self.mutate(|state| {
            let primary = state.push_document(document)?;
            primary
                .into_iter()
                .map(|cid| state.handle(self, cid))
                .collect()
        })
    }

    /// Merge a single resource
    pub fn push_resource(&self, resource: &Resource) -> Result<Record> {
        self.mutate(|state| {
            state.validate_resource(resource)?;
            let cid = state.push_resource(resource)?;
            state.handle(self, cid)
        })
    }
}

impl StoreState {
    /// Merge a document, returning the primary ClientIds in order
    pub(crate) fn push_document(&mut self, document: &Document) -> Result<Vec<ClientId>> {
        let primary = document.primary();
        for resource in document.included.iter().chain(primary.iter().copied()) {
            self.validate_resource(resource)?;
        }
        for resource in &document.included {
            self.push_resource(resource)?;
        }
        let cids = primary
            .into_iter()
            .map(|resource| self.push_resource(resource))
            .collect::<Result<Vec<_>>>()?;
        trace!(
            target: "tessera::store",
            primary = cids.len(),
            included = document.included.len(),
            "document pushed"
        );
        Ok(cids)
    }

    pub(crate) fn validate_resource(&self, resource: &Resource) -> Result<()> {
        self.schema.model(&resource.record_type)?;
        for (key, payload) in &resource.relationships {
            let Ok(meta) = self.schema.relationship(&resource.record_type, key) else {
                continue;
            };
            let Some(linkage) = &payload.data else {
                continue;
            };
            let shape = match linkage {
                Linkage::Many(_) => RelationshipKind::HasMany,
                Linkage::One(_) => RelationshipKind::BelongsTo,
            };
            // `null` is accepted as an empty hasMany
            let empty_to_many = meta.kind == RelationshipKind::HasMany
                && matches!(linkage, Linkage::One(None));
            if shape != meta.kind && !empty_to_many {
                return Err(Error::TypeMismatch {
                    record_type: resource.record_type.clone(),
                    key: key.clone(),
                    expected: meta.kind.as_str().to_string(),
                    actual: shape.as_str().to_string(),
                });
            }
            for identifier in linkage.identifiers() {
                if identifier.record_type != meta.related_type {
                    return Err(Error::TypeMismatch {
                        record_type: resource.record_type.clone(),
                        key: key.clone(),
                        expected: meta.related_type.clone(),
                        actual: identifier.record_type.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Merge one validated resource
    pub(crate) fn push_resource(&mut self, resource: &Resource) -> Result<ClientId> {
        let (cid, created) = self.map.get_or_create(&resource.record_type, &resource.id);
        let model = self.map.model_mut(cid)?;
        if model.is_dematerializing() {
            model.set_dematerializing(false);
            debug!(target: "tessera::store", record = %model.identity(), "pending unload cancelled by push");
        }
        let changed = model.push_canonical_attributes(&resource.attributes);
        model.send(RecordEvent::PushedData)?;
        if model.state() == RecordState::UpdatedUncommitted && !model.has_local_changes() {
            model.send(RecordEvent::PropertyWasReset)?;
        }
        trace!(target: "tessera::store", %cid, created, changed = changed.len(), "resource merged");
        self.touched.insert(cid);

        for (key, payload) in &resource.relationships {
            if self.schema.relationship(&resource.record_type, key).is_err() {
                warn!(
                    target: "tessera::store",
                    record_type = %resource.record_type,
                    key = %key,
                    "ignoring unknown relationship in payload"
                );
                continue;
            }
            let Some(linkage) = &payload.data else {
                continue;
            };
            let members: Vec<ClientId> = linkage
                .identifiers()
                .into_iter()
                .map(|identifier| self.map.get_or_create(&identifier.record_type, &identifier.id).0)
                .collect();
            self.graph.push_canonical(&self.map, cid, key, members)?;
        }
        Ok(cid)
    }
}
