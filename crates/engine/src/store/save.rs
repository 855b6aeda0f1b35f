//! Saving: create, update and delete requests
//!
//! A save moves local edits into the in-flight layer and snapshots the
//! record for the adapter. Edits made while the request is pending stay
//! local. On success the in-flight layer becomes canonical and the response
//! is pushed over it; on failure in-flight edits return to the local layer.

use super::{SettleOnDrop, Store, StoreState};
use crate::adapter::{AdapterError, AdapterResult};
use crate::record::Record;
use tessera_core::{ClientId, Document, Error, Result};
use tessera_storage::{RecordErrors, RecordEvent, RecordState, Snapshot};
use tracing::{debug, info, warn};

/// Which adapter call a save turns into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SaveOperation {
    Create,
    Update,
    Delete,
}

impl SaveOperation {
    fn as_str(self) -> &'static str {
        match self {
            SaveOperation::Create => "create",
            SaveOperation::Update => "update",
            SaveOperation::Delete => "delete",
        }
    }
}

impl Store {
    /// Persist a record
    ///
    /// # Errors
    ///
    /// `SaveInFlight` if a save of this record is pending, `Invalid` when
    /// the server rejects it with validation errors, and the adapter's error
    /// otherwise.
    pub async fn save_record(&self, record: &Record) -> Result<()> {
        let cid = record.client_id();
        let Some((op, snapshot)) = self.mutate(|state| {
            state.check_live(cid, record.epoch())?;
            state.begin_save(cid)
        })?
        else {
            return Ok(());
        };

        let guard = SettleOnDrop::new(|| {
            let cancelled = Err(AdapterError::generic("request cancelled"));
            let _ = self.mutate(|state| state.settle_save(cid, op, cancelled));
        });
        debug!(
            target: "tessera::adapter",
            record = %snapshot.identity,
            operation = op.as_str(),
            "save"
        );
        let adapter = self.adapter();
        let response = match op {
            SaveOperation::Create => adapter.create_record(&snapshot).await,
            SaveOperation::Update => adapter.update_record(&snapshot).await,
            SaveOperation::Delete => adapter.delete_record(&snapshot).await,
        };
        guard.disarm();
        self.mutate(|state| state.settle_save(cid, op, response))
    }
}

impl StoreState {
    /// Start a save; `None` if there is nothing to send
    fn begin_save(&mut self, cid: ClientId) -> Result<Option<(SaveOperation, Snapshot)>> {
        let model = self.map.model_mut(cid)?;
        let state = model.state();
        if state.is_in_flight() {
            return Err(Error::SaveInFlight(cid));
        }
        if state == RecordState::DeletedSaved {
            return Ok(None);
        }
        let op = if state.is_deleted() {
            SaveOperation::Delete
        } else if state.is_new() {
            SaveOperation::Create
        } else {
            SaveOperation::Update
        };
        model.send(RecordEvent::WillCommit)?;
        model.will_commit();
        self.touched.insert(cid);
        Ok(Some((op, self.snapshot(cid)?)))
    }

    fn settle_save(
        &mut self,
        cid: ClientId,
        op: SaveOperation,
        response: AdapterResult<Option<Document>>,
    ) -> Result<()> {
        let result = match response {
            Ok(document) => self.save_succeeded(cid, op, document),
            Err(err) => Err(self.save_failed(cid, err)),
        };

        self.touched.insert(cid);
        let deferred = self
            .map
            .get(cid)
            .is_some_and(|m| m.is_dematerializing() && !m.state().is_in_flight());
        if deferred {
            self.unload_now(cid)?;
        }
        result
    }

    fn save_succeeded(
        &mut self,
        cid: ClientId,
        op: SaveOperation,
        document: Option<Document>,
    ) -> Result<()> {
        if op == SaveOperation::Create {
            let record_type = self.map.model(cid)?.record_type().to_string();
            let id = document.as_ref().and_then(|doc| {
                doc.primary()
                    .into_iter()
                    .find(|r| r.record_type == record_type)
                    .map(|r| r.id.clone())
            });
            let assigned = match id {
                Some(id) => self.map.assign_id(cid, &id),
                None => Err(Error::Adapter(format!(
                    "create response for {} carried no id",
                    record_type
                ))),
            };
            if let Err(err) = assigned {
                warn!(target: "tessera::store", %cid, error = %err, "create response rejected");
                let model = self.map.model_mut(cid)?;
                model.commit_failed();
                model.send(RecordEvent::BecameError)?;
                return Err(err);
            }
        }

        let model = self.map.model_mut(cid)?;
        let saved_relationships = model.did_commit(None);
        for key in &saved_relationships {
            self.graph.commit(cid, key);
        }
        let pushed = match &document {
            Some(document) => self.push_document(document).map(|_| ()),
            None => Ok(()),
        };

        let model = self.map.model_mut(cid)?;
        let dirty = model.has_local_changes();
        let state = model.send(RecordEvent::DidCommit { dirty })?;
        info!(
            target: "tessera::store",
            record = %model.identity(),
            operation = op.as_str(),
            state = state.path(),
            "save completed"
        );

        if op == SaveOperation::Delete {
            let neighbours = self.neighbours(cid);
            self.graph.remove_from_all(cid);
            self.orphan_candidates.extend(neighbours);
            if self.config.unload_after_delete {
                self.unload_now(cid)?;
            }
        }
        pushed
    }

    /// Return in-flight edits to the local layer and classify the failure
    fn save_failed(&mut self, cid: ClientId, err: AdapterError) -> Error {
        let Some(model) = self.map.get_mut(cid) else {
            return Error::RecordDestroyed(cid);
        };
        let record_type = model.record_type().to_string();
        let id = model.id().map(str::to_string);
        model.commit_failed();
        let event = match &err {
            AdapterError::Invalid(errors) => {
                *model.errors_mut() = RecordErrors::from_validation(errors);
                RecordEvent::BecameInvalid
            }
            AdapterError::NotFound | AdapterError::Generic(_) => RecordEvent::BecameError,
        };
        if let Err(transition) = model.send(event) {
            return transition;
        }
        warn!(
            target: "tessera::store",
            record = %model.identity(),
            state = model.state().path(),
            error = %err,
            "save failed"
        );
        err.into_error(&record_type, id.as_deref())
    }
}
