//! Snapshot: immutable point-in-time view of one record
//!
//! Snapshots are handed to adapters and to filtered-array predicates. They
//! hold owned data only, so a predicate can never reach back into the store.

use crate::model::{AttributeChange, InternalModel};
use crate::state::RecordState;
use serde::Serialize;
use std::collections::BTreeMap;
use tessera_core::{Attributes, ResourceIdentity, Value};

/// Current membership of one relationship
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum RelationshipSnapshot {
    /// `belongsTo` target
    BelongsTo(Option<ResourceIdentity>),
    /// `hasMany` members in order
    HasMany(Vec<ResourceIdentity>),
}

impl RelationshipSnapshot {
    /// Members as a list
    pub fn members(&self) -> Vec<&ResourceIdentity> {
        match self {
            RelationshipSnapshot::BelongsTo(member) => member.iter().collect(),
            RelationshipSnapshot::HasMany(members) => members.iter().collect(),
        }
    }
}

/// Immutable view of one record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    /// Identity at snapshot time
    pub identity: ResourceIdentity,
    /// Lifecycle state
    #[serde(skip)]
    pub state: RecordState,
    /// Effective attribute values
    pub attributes: Attributes,
    /// Local attribute edits as `(original, current)`
    #[serde(skip)]
    pub changed_attributes: BTreeMap<String, AttributeChange>,
    /// Current relationship membership
    pub relationships: BTreeMap<String, RelationshipSnapshot>,
}

impl Snapshot {
    /// Capture a model; relationships are filled in by the caller
    pub fn of(model: &InternalModel) -> Self {
        Self {
            identity: model.identity().clone(),
            state: model.state(),
            attributes: model.attributes(),
            changed_attributes: model.changed_attributes(),
            relationships: BTreeMap::new(),
        }
    }

    /// Model name
    pub fn record_type(&self) -> &str {
        &self.identity.record_type
    }

    /// Server id
    pub fn id(&self) -> Option<&str> {
        self.identity.id.as_deref()
    }

    /// Effective attribute value
    pub fn attr(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    /// Current relationship membership
    pub fn relationship(&self, key: &str) -> Option<&RelationshipSnapshot> {
        self.relationships.get(key)
    }

    /// Wire-level body: `{ type, id, attributes, relationships }`
    pub fn to_json(&self) -> Value {
        let relationships: serde_json::Map<String, Value> = self
            .relationships
            .iter()
            .map(|(key, rel)| {
                let data = match rel {
                    RelationshipSnapshot::BelongsTo(member) => member
                        .as_ref()
                        .map_or(Value::Null, identity_json),
                    RelationshipSnapshot::HasMany(members) => {
                        Value::Array(members.iter().map(identity_json).collect())
                    }
                };
                (key.clone(), serde_json::json!({ "data": data }))
            })
            .collect();
        serde_json::json!({
            "type": self.identity.record_type,
            "id": self.identity.id,
            "attributes": self.attributes,
            "relationships": relationships,
        })
    }
}

fn identity_json(identity: &ResourceIdentity) -> Value {
    match &identity.id {
        Some(id) => serde_json::json!({ "type": identity.record_type, "id": id }),
        None => serde_json::json!({ "type": identity.record_type, "lid": identity.client_id }),
    }
}
