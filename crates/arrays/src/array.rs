//! Record array kinds and change notifications

use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tessera_core::{ArrayId, ClientId};
use tessera_storage::Snapshot;

/// Filter predicate evaluated against one record's snapshot
pub type Predicate = Arc<dyn Fn(&Snapshot) -> bool + Send + Sync>;

/// Flavour of a record array
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArrayKind {
    /// Every visible record of a type
    Live,
    /// Visible records of a type matching a predicate
    Filtered,
    /// Records returned by one query
    AdapterPopulated,
}

/// One contiguous change to an array's membership
///
/// At most one is produced per array per batch. `removed` members starting
/// at `index` were replaced by `added` members.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrayChange {
    /// Array that changed
    pub array: ArrayId,
    /// First changed position
    pub index: usize,
    /// Number of members removed at `index`
    pub removed: usize,
    /// Number of members inserted at `index`
    pub added: usize,
    /// Length after the change
    pub len: usize,
}

impl ArrayChange {
    /// Compute the single range that turns `before` into `after`
    ///
    /// Returns `None` when both are equal.
    pub fn between(array: ArrayId, before: &[ClientId], after: &[ClientId]) -> Option<Self> {
        if before == after {
            return None;
        }
        let prefix = before
            .iter()
            .zip(after.iter())
            .take_while(|(a, b)| a == b)
            .count();
        let max_suffix = before.len().min(after.len()) - prefix;
        let suffix = before
            .iter()
            .rev()
            .zip(after.iter().rev())
            .take(max_suffix)
            .take_while(|(a, b)| a == b)
            .count();
        Some(Self {
            array,
            index: prefix,
            removed: before.len() - prefix - suffix,
            added: after.len() - prefix - suffix,
            len: after.len(),
        })
    }
}

pub(crate) enum Contents {
    Live,
    Filtered(Predicate),
    AdapterPopulated {
        query: Value,
        meta: Option<Value>,
        is_loaded: bool,
    },
}

impl fmt::Debug for Contents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Contents::Live => write!(f, "Live"),
            Contents::Filtered(_) => write!(f, "Filtered(..)"),
            Contents::AdapterPopulated { query, is_loaded, .. } => f
                .debug_struct("AdapterPopulated")
                .field("query", query)
                .field("is_loaded", is_loaded)
                .finish(),
        }
    }
}

#[derive(Debug)]
pub(crate) struct ArrayState {
    pub(crate) record_type: String,
    pub(crate) contents: Contents,
    pub(crate) members: Vec<ClientId>,
    pub(crate) is_updating: bool,
}

impl ArrayState {
    pub(crate) fn kind(&self) -> ArrayKind {
        match self.contents {
            Contents::Live => ArrayKind::Live,
            Contents::Filtered(_) => ArrayKind::Filtered,
            Contents::AdapterPopulated { .. } => ArrayKind::AdapterPopulated,
        }
    }
}
