//! Unloading records
//!
//! Unloading dematerializes: data, handles and array memberships go away,
//! the relationship graph applies its unload rule, and the record becomes a
//! candidate for orphan removal at the end of the batch. A record with a
//! save in flight is only flagged; it is unloaded once the save settles.

use super::{Store, StoreState};
use crate::record::Record;
use tessera_core::{ClientId, Result};
use tessera_storage::RecordEvent;
use tracing::debug;

impl Store {
    /// Unload one record
    pub fn unload_record(&self, record: &Record) -> Result<()> {
        self.mutate(|state| {
            state.check_live(record.client_id(), record.epoch())?;
            state.unload_or_defer(record.client_id())
        })
    }

    /// Unload every record of `record_type`, or of every type
    pub fn unload_all(&self, record_type: Option<&str>) -> Result<()> {
        if let Some(record_type) = record_type {
            self.schema().model(record_type)?;
        }
        self.mutate(|state| state.unload_types(record_type))
    }
}

impl StoreState {
    pub(crate) fn unload_types(&mut self, record_type: Option<&str>) -> Result<()> {
        let types = match record_type {
            Some(record_type) => vec![record_type.to_string()],
            None => self.map.record_types(),
        };
        for record_type in types {
            for cid in self.map.client_ids_for(&record_type) {
                let empty = self.map.get(cid).is_some_and(|m| m.state().is_empty());
                if empty {
                    self.orphan_candidates.insert(cid);
                } else {
                    self.unload_or_defer(cid)?;
                }
            }
        }
        Ok(())
    }

    pub(crate) fn unload_or_defer(&mut self, cid: ClientId) -> Result<()> {
        let model = self.map.model_mut(cid)?;
        if model.state().is_in_flight() {
            model.set_dematerializing(true);
            debug!(target: "tessera::store", record = %model.identity(), "unload deferred until save settles");
            self.touched.insert(cid);
            return Ok(());
        }
        self.unload_now(cid)
    }

    pub(crate) fn unload_now(&mut self, cid: ClientId) -> Result<()> {
        let model = self.map.model_mut(cid)?;
        let is_new = model.is_new() || model.id().is_none();
        model.send(RecordEvent::Unload)?;
        self.dematerialize(cid, is_new);
        Ok(())
    }

    /// Drop a record's data after its state reached `root.empty`
    pub(crate) fn dematerialize(&mut self, cid: ClientId, is_new: bool) {
        self.orphan_candidates.insert(cid);
        let neighbours = self.neighbours(cid);
        self.orphan_candidates.extend(neighbours);
        self.graph.unload(cid, is_new);
        if let Some(model) = self.map.get_mut(cid) {
            model.unload_data();
        }
        self.touched.insert(cid);
        debug!(target: "tessera::store", %cid, is_new, "record unloaded");
    }
}
