//! Record identity types
//!
//! This module defines how records are addressed:
//! - ClientId: store-local surrogate key, unique for the lifetime of a store
//! - ResourceIdentity: `(type, id, client_id)` triple for a known record
//! - ResourceIdentifier: the wire-level `{ type, id }` pair found in documents
//!
//! ## Invariants
//!
//! - `(type, id)` is unique among records held by one identity map
//! - a `ClientId` is never reused, even after the record it named is removed
//! - `id == None` means the record was created locally and never persisted

use serde::{Deserialize, Serialize};
use std::fmt;

/// Store-local surrogate key for a record
///
/// Allocated monotonically by the identity map. Relationship edges and
/// record-array memberships are expressed as `ClientId`s so that no component
/// holds a live reference into another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClientId(u64);

impl ClientId {
    /// Wrap a raw counter value
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw counter value
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// Full identity of a record known to the store
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceIdentity {
    /// Model name (e.g. `"post"`)
    #[serde(rename = "type")]
    pub record_type: String,
    /// Server id, `None` until the record has been persisted
    pub id: Option<String>,
    /// Surrogate key assigned by the store
    #[serde(rename = "lid")]
    pub client_id: ClientId,
}

impl ResourceIdentity {
    /// Create an identity for a record with a server id
    pub fn new(record_type: impl Into<String>, id: impl Into<String>, client_id: ClientId) -> Self {
        Self {
            record_type: record_type.into(),
            id: Some(id.into()),
            client_id,
        }
    }

    /// Create an identity for a locally created record
    pub fn local(record_type: impl Into<String>, client_id: ClientId) -> Self {
        Self {
            record_type: record_type.into(),
            id: None,
            client_id,
        }
    }

    /// Whether the record has never been persisted
    pub fn is_local(&self) -> bool {
        self.id.is_none()
    }

    /// Wire-level identifier, if the record has a server id
    pub fn identifier(&self) -> Option<ResourceIdentifier> {
        self.id
            .as_ref()
            .map(|id| ResourceIdentifier::new(self.record_type.clone(), id.clone()))
    }
}

impl fmt::Display for ResourceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.id {
            Some(id) => write!(f, "{}:{}", self.record_type, id),
            None => write!(f, "{}:{}", self.record_type, self.client_id),
        }
    }
}

/// Handle of a record array owned by a record-array manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArrayId(u64);

impl ArrayId {
    /// Wrap a raw counter value
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw counter value
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ArrayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "array#{}", self.0)
    }
}

/// `{ type, id }` pair used in documents and relationship linkage
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceIdentifier {
    /// Model name
    #[serde(rename = "type")]
    pub record_type: String,
    /// Server id
    pub id: String,
}

impl ResourceIdentifier {
    /// Create a new identifier
    pub fn new(record_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            record_type: record_type.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for ResourceIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.record_type, self.id)
    }
}
