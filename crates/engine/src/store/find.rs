//! Fetching: find, reload, relationship resolution and queries
//!
//! Concurrent finds of one record share a single request. The first caller
//! registers the record in `pending_finds` and performs the request; later
//! callers wait on a oneshot channel that is completed when it settles.
//!
//! A failed find never leaves its record loading. If the record was being
//! loaded for the first time it returns to `root.empty` and is unloaded; a
//! not-found response also removes it from every relationship.

use super::{SettleOnDrop, Store, StoreState};
use crate::adapter::{AdapterError, AdapterResult};
use crate::record::Record;
use crate::record_array::RecordArray;
use serde_json::Value;
use tessera_arrays::ArrayKind;
use tessera_core::{ArrayId, ClientId, Document, Error, ErrorKind, Result};
use tessera_graph::Layer;
use tessera_storage::RecordEvent;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

pub(crate) enum FindPlan {
    /// Already loaded; no request needed
    Loaded(ClientId),
    /// Another caller is fetching this record
    Wait(ClientId, oneshot::Receiver<Result<()>>),
    /// This caller performs the request
    Fetch(ClientId),
}

fn cancelled() -> AdapterError {
    AdapterError::generic("request cancelled")
}

impl Store {
    /// Find a record by id, fetching it unless it is already loaded
    pub async fn find_record(&self, record_type: &str, id: &str) -> Result<Record> {
        let plan = self.mutate(|state| state.plan_find(record_type, id, false))?;
        let cid = self.run_find(plan, record_type, id).await?;
        self.handle(cid)
    }

    /// Fetch a loaded record again
    ///
    /// A failed reload keeps the data already held.
    pub async fn reload_record(&self, record: &Record) -> Result<Record> {
        let (record_type, id) = self.read(|state| {
            state.check_live(record.client_id(), record.epoch())?;
            let model = state.map.model(record.client_id())?;
            let id = model
                .id()
                .ok_or_else(|| Error::transition(model.state().path(), RecordEvent::LoadingData.as_str()))?;
            Ok::<_, Error>((model.record_type().to_string(), id.to_string()))
        })?;
        let plan = self.mutate(|state| state.plan_find(&record_type, &id, true))?;
        let cid = self.run_find(plan, &record_type, &id).await?;
        self.handle(cid)
    }

    async fn run_find(&self, plan: FindPlan, record_type: &str, id: &str) -> Result<ClientId> {
        match plan {
            FindPlan::Loaded(cid) => Ok(cid),
            FindPlan::Wait(cid, waiter) => {
                waiter.await.map_err(|_| {
                    Error::Adapter(format!("find of {}:{} was abandoned", record_type, id))
                })??;
                Ok(cid)
            }
            FindPlan::Fetch(cid) => {
                let guard = SettleOnDrop::new(|| {
                    let _ = self.mutate(|state| state.settle_find(cid, record_type, id, Err(cancelled())));
                });
                debug!(target: "tessera::adapter", record_type, id, "find_record");
                let response = self.adapter().find_record(record_type, id).await;
                guard.disarm();
                self.mutate(|state| state.settle_find(cid, record_type, id, response))?;
                info!(target: "tessera::store", record_type, id, "record found");
                Ok(cid)
            }
        }
    }

    /// Fetch several records of one type with a single `find_many`
    async fn find_many(&self, record_type: &str, ids: &[String]) -> Result<()> {
        let plans = self.mutate(|state| {
            ids.iter()
                .map(|id| state.plan_find(record_type, id, false))
                .collect::<Result<Vec<_>>>()
        })?;

        let mut fetch = Vec::new();
        let mut waiting = Vec::new();
        for (id, plan) in ids.iter().zip(plans) {
            match plan {
                FindPlan::Loaded(_) => {}
                FindPlan::Fetch(cid) => fetch.push((cid, id.clone())),
                FindPlan::Wait(cid, waiter) => waiting.push((cid, id.as_str(), waiter)),
            }
        }

        let mut first_error = None;
        if !fetch.is_empty() {
            let fetch_ids: Vec<String> = fetch.iter().map(|(_, id)| id.clone()).collect();
            let guard = SettleOnDrop::new(|| {
                let _ = self.mutate(|state| state.settle_many(record_type, &fetch, Err(cancelled())));
            });
            debug!(target: "tessera::adapter", record_type, ids = fetch_ids.len(), "find_many");
            let response = self.adapter().find_many(record_type, &fetch_ids).await;
            guard.disarm();
            if let Err(err) = self.mutate(|state| state.settle_many(record_type, &fetch, response)) {
                first_error = Some(err);
            }
        }
        for (cid, id, waiter) in waiting {
            if let Err(err) = self.run_find(FindPlan::Wait(cid, waiter), record_type, id).await {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Load every unloaded member of an async relationship
    ///
    /// Each missing member is fetched once, or in `find_many` chunks when
    /// `coalesce_find_requests` is set. Members the server reports as not
    /// found are dropped from the relationship; other failures are returned
    /// after every member was attempted.
    pub(crate) async fn fetch_relationship(&self, owner: ClientId, key: &str) -> Result<()> {
        let (related_type, missing, coalesce, batch) = self.read(|state| {
            let model = state.map.model(owner)?;
            let meta = state.schema.relationship(model.record_type(), key)?;
            let missing: Vec<String> = state
                .graph
                .members(owner, key, Layer::Current)
                .into_iter()
                .filter_map(|cid| state.map.get(cid))
                .filter(|m| !m.state().is_loaded())
                .filter_map(|m| m.id().map(str::to_string))
                .collect();
            Ok::<_, Error>((
                meta.related_type.clone(),
                missing,
                state.config.coalesce_find_requests,
                state.config.max_find_many_batch,
            ))
        })?;

        let mut first_error = None;
        let mut note = |result: Result<()>| {
            if let Err(err) = result {
                if err.kind() != ErrorKind::NotFound {
                    first_error.get_or_insert(err);
                }
            }
        };
        if coalesce && missing.len() > 1 {
            for chunk in missing.chunks(batch) {
                note(self.find_many(&related_type, chunk).await);
            }
        } else {
            for id in &missing {
                let plan = self.mutate(|state| state.plan_find(&related_type, id, false));
                match plan {
                    Ok(plan) => note(self.run_find(plan, &related_type, id).await.map(|_| ())),
                    Err(err) => note(Err(err)),
                }
            }
        }

        if let Some(err) = first_error {
            return Err(err);
        }
        self.mutate(|state| state.graph.mark_loaded(&state.map, owner, key))
    }

    // =========================================================================
    // Collections
    // =========================================================================

    /// Fetch every record of a type and return the live array
    pub async fn find_all(&self, record_type: &str) -> Result<RecordArray> {
        let id = self.mutate(|state| {
            state.schema.model(record_type)?;
            let id = state.live_array(record_type);
            state.arrays.set_updating(id, true)?;
            Ok(id)
        })?;
        debug!(target: "tessera::adapter", record_type, "find_all");
        let response = self.adapter().find_all(record_type).await;
        self.mutate(|state| {
            if state.arrays.contains(id) {
                state.arrays.set_updating(id, false)?;
            }
            let document = response.map_err(|e| e.into_error(record_type, None))?;
            state.push_document(&document).map(|_| ())
        })?;
        info!(target: "tessera::store", record_type, "find_all completed");
        Ok(RecordArray::new(self.clone(), id))
    }

    /// Run a query and return its result array
    pub async fn query(&self, record_type: &str, query: Value) -> Result<RecordArray> {
        let id = self.mutate(|state| {
            state.schema.model(record_type)?;
            Ok(state.arrays.create_adapter_populated(record_type, query.clone()))
        })?;
        match self.run_query(id, record_type, &query).await {
            Ok(()) => Ok(RecordArray::new(self.clone(), id)),
            Err(err) => {
                let _ = self.mutate(|state| state.arrays.destroy(id));
                Err(err)
            }
        }
    }

    async fn run_query(&self, id: ArrayId, record_type: &str, query: &Value) -> Result<()> {
        debug!(target: "tessera::adapter", record_type, %query, "query");
        let response = self.adapter().query(record_type, query).await;
        self.mutate(|state| {
            let result = state.apply_query(id, record_type, response);
            if result.is_err() && state.arrays.contains(id) {
                state.arrays.set_updating(id, false)?;
            }
            result
        })?;
        info!(target: "tessera::store", record_type, %id, "query completed");
        Ok(())
    }

    /// Re-run the request behind an array
    ///
    /// Adapter-populated arrays repeat their query and have their membership
    /// replaced once; live arrays refetch every record of their type.
    pub(crate) async fn update_array(&self, id: ArrayId) -> Result<()> {
        let (kind, record_type, query) = self.mutate(|state| {
            let kind = state.arrays.kind(id)?;
            let record_type = state.arrays.record_type(id)?.to_string();
            let query = state.arrays.query(id)?.cloned();
            if kind == ArrayKind::AdapterPopulated {
                state.arrays.set_updating(id, true)?;
            }
            Ok((kind, record_type, query))
        })?;
        match (kind, query) {
            (ArrayKind::AdapterPopulated, Some(query)) => {
                self.run_query(id, &record_type, &query).await
            }
            (ArrayKind::Live, _) => self.find_all(&record_type).await.map(|_| ()),
            _ => Ok(()),
        }
    }
}

impl StoreState {
    /// Decide how a find for `(type, id)` proceeds and register it
    pub(crate) fn plan_find(&mut self, record_type: &str, id: &str, reload: bool) -> Result<FindPlan> {
        self.schema.model(record_type)?;
        let (cid, _) = self.map.get_or_create(record_type, id);
        if let Some(waiters) = self.pending_finds.get_mut(&cid) {
            let (tx, rx) = oneshot::channel();
            waiters.push(tx);
            return Ok(FindPlan::Wait(cid, rx));
        }

        let model = self.map.model_mut(cid)?;
        if model.is_dematerializing() {
            model.set_dematerializing(false);
            debug!(target: "tessera::store", record = %model.identity(), "pending unload cancelled by find");
            self.touched.insert(cid);
        }
        let model = self.map.model_mut(cid)?;
        if model.state().is_loaded() && !reload {
            return Ok(FindPlan::Loaded(cid));
        }
        model.send(RecordEvent::LoadingData)?;
        model.set_reloading(reload);
        self.pending_finds.insert(cid, Vec::new());
        self.touched.insert(cid);
        Ok(FindPlan::Fetch(cid))
    }

    pub(crate) fn settle_find(
        &mut self,
        cid: ClientId,
        record_type: &str,
        id: &str,
        response: AdapterResult<Document>,
    ) -> Result<()> {
        let outcome = match response {
            Ok(document) => self.push_document(&document).map(|_| ()),
            Err(err) => Err(err.into_error(record_type, Some(id))),
        };
        let outcome = outcome.and_then(|()| self.require_loaded(cid, record_type, id));
        self.complete_find(cid, outcome)
    }

    fn settle_many(
        &mut self,
        record_type: &str,
        fetched: &[(ClientId, String)],
        response: AdapterResult<Document>,
    ) -> Result<()> {
        let pushed = match response {
            Ok(document) => self.push_document(&document).map(|_| ()),
            Err(err) => Err(err.into_error(record_type, None)),
        };
        let mut first_error = pushed.clone().err();
        for (cid, id) in fetched {
            let outcome = pushed
                .clone()
                .and_then(|()| self.require_loaded(*cid, record_type, id));
            if let Err(err) = self.complete_find(*cid, outcome) {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn require_loaded(&self, cid: ClientId, record_type: &str, id: &str) -> Result<()> {
        if self.is_loaded(cid) {
            Ok(())
        } else {
            Err(Error::NotFound {
                record_type: record_type.to_string(),
                id: id.to_string(),
            })
        }
    }

    /// Release waiters and apply the failure rules
    fn complete_find(&mut self, cid: ClientId, outcome: Result<()>) -> Result<()> {
        let waiters = self.pending_finds.remove(&cid).unwrap_or_default();
        if let Some(model) = self.map.get_mut(cid) {
            model.set_reloading(false);
        }
        if let Err(err) = &outcome {
            warn!(target: "tessera::store", %cid, error = %err, "find failed");
            self.find_failed(cid, err);
        }
        for waiter in waiters {
            // A dropped receiver has nobody to tell.
            let _ = waiter.send(outcome.clone());
        }
        outcome
    }

    fn find_failed(&mut self, cid: ClientId, err: &Error) {
        let Some(model) = self.map.get_mut(cid) else {
            return;
        };
        if !model.state().is_loading() {
            return;
        }
        let not_found = err.kind() == ErrorKind::NotFound;
        let event = if not_found {
            RecordEvent::NotFound
        } else {
            RecordEvent::LoadingFailed
        };
        if let Err(transition) = model.send(event) {
            warn!(target: "tessera::lifecycle", %cid, error = %transition, "failed find could not be applied");
            return;
        }
        model.unload_data();
        self.touched.insert(cid);
        self.orphan_candidates.insert(cid);
        if not_found {
            let neighbours = self.neighbours(cid);
            self.graph.remove_from_all(cid);
            self.orphan_candidates.extend(neighbours);
        }
    }

    fn apply_query(
        &mut self,
        id: ArrayId,
        record_type: &str,
        response: AdapterResult<Document>,
    ) -> Result<()> {
        let document = response.map_err(|e| e.into_error(record_type, None))?;
        let members = self.push_document(&document)?;
        self.arrays.set_members(id, members, document.meta.clone())
    }
}
