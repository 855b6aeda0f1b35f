//! Per-record relationship state
//!
//! One [`Relationship`] exists per `(owner, key)` pair that has been touched.
//! It holds two independent layers of membership:
//!
//! - canonical: the last membership confirmed by the server
//! - current: canonical plus local edits
//!
//! Each layer is a [`Members`] value: either the single slot of a
//! `belongsTo` or the ordered list of a `hasMany`.

use std::sync::Arc;
use tessera_core::schema::{RelationshipKind, RelationshipMeta};
use tessera_core::ClientId;

/// Which membership layer an operation targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Layer {
    /// Server-confirmed membership
    Canonical,
    /// Membership including local edits
    Current,
}

impl Layer {
    /// Both layers, canonical first
    pub const BOTH: [Layer; 2] = [Layer::Canonical, Layer::Current];
}

/// Whether the graph knows a relationship's membership
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationshipStatus {
    /// No payload has been received and no local edit was made
    Unknown,
    /// Membership is known
    Loaded,
    /// Membership is known but a member was unloaded and must be refetched
    Stale,
}

/// Membership of one layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Members {
    /// Zero or one member
    BelongsTo(Option<ClientId>),
    /// Ordered, duplicate-free members
    HasMany(Vec<ClientId>),
}

impl Members {
    /// Empty membership for a relationship kind
    pub fn empty(kind: RelationshipKind) -> Self {
        match kind {
            RelationshipKind::BelongsTo => Members::BelongsTo(None),
            RelationshipKind::HasMany => Members::HasMany(Vec::new()),
        }
    }

    /// Whether `cid` is a member
    pub fn contains(&self, cid: ClientId) -> bool {
        match self {
            Members::BelongsTo(slot) => *slot == Some(cid),
            Members::HasMany(list) => list.contains(&cid),
        }
    }

    /// Members in order
    pub fn to_vec(&self) -> Vec<ClientId> {
        match self {
            Members::BelongsTo(slot) => slot.iter().copied().collect(),
            Members::HasMany(list) => list.clone(),
        }
    }

    /// Number of members
    pub fn len(&self) -> usize {
        match self {
            Members::BelongsTo(slot) => usize::from(slot.is_some()),
            Members::HasMany(list) => list.len(),
        }
    }

    /// No members
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert a member
    ///
    /// A `belongsTo` replaces its slot and returns the displaced member. A
    /// `hasMany` inserts at `index` (clamped) or appends; inserting an
    /// existing member is a no-op.
    pub fn insert(&mut self, cid: ClientId, index: Option<usize>) -> Option<ClientId> {
        match self {
            Members::BelongsTo(slot) => slot.replace(cid).filter(|old| *old != cid),
            Members::HasMany(list) => {
                if !list.contains(&cid) {
                    let at = index.map_or(list.len(), |i| i.min(list.len()));
                    list.insert(at, cid);
                }
                None
            }
        }
    }

    /// Remove a member, returning whether it was present
    pub fn remove(&mut self, cid: ClientId) -> bool {
        match self {
            Members::BelongsTo(slot) if *slot == Some(cid) => {
                *slot = None;
                true
            }
            Members::BelongsTo(_) => false,
            Members::HasMany(list) => {
                let before = list.len();
                list.retain(|m| *m != cid);
                list.len() != before
            }
        }
    }

    /// Reorder to match `order`
    ///
    /// Only called when `order` holds exactly the current members.
    pub fn reorder(&mut self, order: &[ClientId]) {
        if let Members::HasMany(list) = self {
            *list = order.to_vec();
        }
    }

    /// Remove every member
    pub fn clear(&mut self) {
        match self {
            Members::BelongsTo(slot) => *slot = None,
            Members::HasMany(list) => list.clear(),
        }
    }
}

/// State of one `(owner, key)` relationship
#[derive(Debug, Clone)]
pub struct Relationship {
    meta: Arc<RelationshipMeta>,
    canonical: Members,
    current: Members,
    has_data: bool,
    has_dematerialized_inverse: bool,
}

impl Relationship {
    /// Create an empty relationship
    pub fn new(meta: Arc<RelationshipMeta>) -> Self {
        Self {
            canonical: Members::empty(meta.kind),
            current: Members::empty(meta.kind),
            meta,
            has_data: false,
            has_dematerialized_inverse: false,
        }
    }

    /// Resolved metadata
    pub fn meta(&self) -> &Arc<RelationshipMeta> {
        &self.meta
    }

    /// Cardinality
    pub fn kind(&self) -> RelationshipKind {
        self.meta.kind
    }

    /// Members may be fetched lazily
    pub fn is_async(&self) -> bool {
        self.meta.is_async
    }

    /// Key of the inverse relationship
    pub fn inverse_key(&self) -> Option<&str> {
        self.meta.inverse_key.as_deref()
    }

    /// Membership of one layer
    pub fn members(&self, layer: Layer) -> &Members {
        match layer {
            Layer::Canonical => &self.canonical,
            Layer::Current => &self.current,
        }
    }

    pub(crate) fn members_mut(&mut self, layer: Layer) -> &mut Members {
        match layer {
            Layer::Canonical => &mut self.canonical,
            Layer::Current => &mut self.current,
        }
    }

    /// Whether `cid` is a member of either layer
    pub fn references(&self, cid: ClientId) -> bool {
        self.canonical.contains(cid) || self.current.contains(cid)
    }

    /// Union of both layers, current order first
    pub fn all_members(&self) -> Vec<ClientId> {
        let mut out = self.current.to_vec();
        for cid in self.canonical.to_vec() {
            if !out.contains(&cid) {
                out.push(cid);
            }
        }
        out
    }

    /// Whether the two layers differ
    pub fn is_dirty(&self) -> bool {
        self.canonical != self.current
    }

    /// Knowledge status
    pub fn status(&self) -> RelationshipStatus {
        if self.has_dematerialized_inverse {
            RelationshipStatus::Stale
        } else if self.has_data {
            RelationshipStatus::Loaded
        } else {
            RelationshipStatus::Unknown
        }
    }

    pub(crate) fn mark_loaded(&mut self) {
        self.has_data = true;
        self.has_dematerialized_inverse = false;
    }

    pub(crate) fn mark_stale(&mut self) {
        self.has_dematerialized_inverse = true;
    }

    pub(crate) fn clear(&mut self) {
        self.canonical.clear();
        self.current.clear();
        self.has_data = false;
        self.has_dematerialized_inverse = false;
    }
}
