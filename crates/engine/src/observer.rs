//! Change observers
//!
//! Observers are registered per array or per record and called once per
//! batch, after the store lock is released. A callback may therefore read
//! from or write to the store; writes start a new batch.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tessera_arrays::ArrayChange;
use tessera_core::{ArrayId, ClientId};
use tessera_storage::RecordState;

/// Handle returned by `observe_*`, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObserverId(u64);

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "observer#{}", self.0)
    }
}

/// A record was touched by a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordChange {
    /// Record that changed
    pub client_id: ClientId,
    /// State at the end of the batch; `Empty` once unloaded
    pub state: RecordState,
}

pub(crate) type ArrayCallback = Arc<dyn Fn(&ArrayChange) + Send + Sync>;
pub(crate) type RecordCallback = Arc<dyn Fn(&RecordChange) + Send + Sync>;

/// Everything a finished batch has to report
#[derive(Debug, Default)]
pub(crate) struct Notifications {
    pub(crate) arrays: Vec<ArrayChange>,
    pub(crate) records: Vec<RecordChange>,
}

impl Notifications {
    pub(crate) fn is_empty(&self) -> bool {
        self.arrays.is_empty() && self.records.is_empty()
    }
}

#[derive(Default)]
pub(crate) struct Observers {
    next_id: u64,
    arrays: BTreeMap<ObserverId, (ArrayId, ArrayCallback)>,
    records: BTreeMap<ObserverId, (ClientId, RecordCallback)>,
}

impl Observers {
    fn allocate(&mut self) -> ObserverId {
        self.next_id += 1;
        ObserverId(self.next_id)
    }

    pub(crate) fn observe_array(&mut self, array: ArrayId, callback: ArrayCallback) -> ObserverId {
        let id = self.allocate();
        self.arrays.insert(id, (array, callback));
        id
    }

    pub(crate) fn observe_record(&mut self, record: ClientId, callback: RecordCallback) -> ObserverId {
        let id = self.allocate();
        self.records.insert(id, (record, callback));
        id
    }

    pub(crate) fn remove(&mut self, id: ObserverId) -> bool {
        self.arrays.remove(&id).is_some() || self.records.remove(&id).is_some()
    }

    pub(crate) fn remove_array(&mut self, array: ArrayId) {
        self.arrays.retain(|_, (target, _)| *target != array);
    }

    pub(crate) fn clear(&mut self) {
        self.arrays.clear();
        self.records.clear();
    }

    /// Pair each callback with the changes it should see, in registration order
    pub(crate) fn route(
        &self,
        notifications: &Notifications,
    ) -> (Vec<(ArrayCallback, ArrayChange)>, Vec<(RecordCallback, RecordChange)>) {
        let mut arrays = Vec::new();
        for change in &notifications.arrays {
            for (target, callback) in self.arrays.values() {
                if *target == change.array {
                    arrays.push((Arc::clone(callback), change.clone()));
                }
            }
        }
        let mut records = Vec::new();
        for change in &notifications.records {
            for (target, callback) in self.records.values() {
                if *target == change.client_id {
                    records.push((Arc::clone(callback), *change));
                }
            }
        }
        (arrays, records)
    }
}

impl fmt::Debug for Observers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observers")
            .field("arrays", &self.arrays.len())
            .field("records", &self.records.len())
            .finish()
    }
}
