//! Read access to records for array evaluation

use tessera_core::ClientId;
use tessera_storage::{IdentityMap, Snapshot};

/// What the array manager needs to know about records
///
/// Implementations are read-only so that membership is always computed from
/// a stable view before any back-reference is written.
pub trait RecordSource {
    /// Model name of a record, `None` if it no longer exists
    fn record_type(&self, cid: ClientId) -> Option<&str>;

    /// Whether the record may appear in arrays at all
    fn is_visible(&self, cid: ClientId) -> bool;

    /// Point-in-time view handed to filter predicates
    fn snapshot(&self, cid: ClientId) -> Option<Snapshot>;

    /// ClientIds of one type in insertion order
    fn client_ids_of_type(&self, record_type: &str) -> Vec<ClientId>;
}

impl RecordSource for IdentityMap {
    fn record_type(&self, cid: ClientId) -> Option<&str> {
        self.get(cid).map(|m| m.record_type())
    }

    fn is_visible(&self, cid: ClientId) -> bool {
        self.get(cid)
            .is_some_and(|m| !m.is_hidden_from_record_arrays())
    }

    fn snapshot(&self, cid: ClientId) -> Option<Snapshot> {
        self.get(cid).map(Snapshot::of)
    }

    fn client_ids_of_type(&self, record_type: &str) -> Vec<ClientId> {
        IdentityMap::client_ids_for(self, record_type)
    }
}
