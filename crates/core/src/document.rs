//! Normalized resource documents
//!
//! These are the only shapes the store accepts from serializers and adapters.
//! Attribute values are plain JSON values; attribute transforms happen before
//! a document reaches the store.
//!
//! ```
//! use tessera_core::Document;
//!
//! let doc: Document = serde_json::from_value(serde_json::json!({
//!     "data": { "type": "post", "id": "1", "attributes": { "title": "A" } }
//! })).unwrap();
//! assert_eq!(doc.primary().len(), 1);
//! ```

use crate::identity::ResourceIdentifier;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Attribute map, keyed by attribute name
pub type Attributes = BTreeMap<String, Value>;

/// Top-level document handed to `push`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Primary data: one resource, many resources, or null
    #[serde(default)]
    pub data: Option<PrimaryData>,
    /// Side-loaded resources, merged but never primary
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub included: Vec<Resource>,
    /// Free-form metadata (pagination, totals)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

impl Document {
    /// Document with a single primary resource
    pub fn single(resource: Resource) -> Self {
        Self {
            data: Some(PrimaryData::One(resource)),
            ..Self::default()
        }
    }

    /// Document with a list of primary resources
    pub fn many(resources: Vec<Resource>) -> Self {
        Self {
            data: Some(PrimaryData::Many(resources)),
            ..Self::default()
        }
    }

    /// Document with `data: null`
    pub fn empty() -> Self {
        Self::default()
    }

    /// Attach side-loaded resources
    pub fn with_included(mut self, included: Vec<Resource>) -> Self {
        self.included = included;
        self
    }

    /// Attach metadata
    pub fn with_meta(mut self, meta: Value) -> Self {
        self.meta = Some(meta);
        self
    }

    /// Primary resources as a slice-like list
    pub fn primary(&self) -> Vec<&Resource> {
        match &self.data {
            Some(PrimaryData::One(r)) => vec![r],
            Some(PrimaryData::Many(rs)) => rs.iter().collect(),
            None => Vec::new(),
        }
    }

    /// Whether the document carries no primary data at all
    pub fn is_empty(&self) -> bool {
        match &self.data {
            None => true,
            Some(PrimaryData::Many(rs)) => rs.is_empty(),
            Some(PrimaryData::One(_)) => false,
        }
    }
}

/// Primary data of a document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PrimaryData {
    /// A list of resources
    Many(Vec<Resource>),
    /// A single resource
    One(Resource),
}

/// A single normalized resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// Model name
    #[serde(rename = "type")]
    pub record_type: String,
    /// Server id
    pub id: String,
    /// Attribute values (merged into canonical state)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: Attributes,
    /// Relationship payloads, keyed by relationship name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub relationships: BTreeMap<String, RelationshipPayload>,
}

impl Resource {
    /// Create a resource with no attributes or relationships
    pub fn new(record_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            record_type: record_type.into(),
            id: id.into(),
            attributes: Attributes::new(),
            relationships: BTreeMap::new(),
        }
    }

    /// Add an attribute value
    pub fn attr(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Add to-one linkage (`None` for an explicit null)
    pub fn belongs_to(mut self, key: impl Into<String>, target: Option<ResourceIdentifier>) -> Self {
        self.relationships
            .insert(key.into(), RelationshipPayload::one(target));
        self
    }

    /// Add to-many linkage
    pub fn has_many(mut self, key: impl Into<String>, targets: Vec<ResourceIdentifier>) -> Self {
        self.relationships
            .insert(key.into(), RelationshipPayload::many(targets));
        self
    }

    /// Wire identifier of this resource
    pub fn identifier(&self) -> ResourceIdentifier {
        ResourceIdentifier::new(self.record_type.clone(), self.id.clone())
    }
}

/// Payload of one relationship inside a resource
///
/// `data` absent means "nothing known" and leaves the relationship untouched;
/// `data: null` or `data: []` means "known to be empty".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelationshipPayload {
    /// Resource linkage
    #[serde(
        default,
        deserialize_with = "deserialize_present",
        skip_serializing_if = "Option::is_none"
    )]
    pub data: Option<Linkage>,
    /// Free-form metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

impl RelationshipPayload {
    /// To-one payload
    pub fn one(target: Option<ResourceIdentifier>) -> Self {
        Self {
            data: Some(Linkage::One(target)),
            meta: None,
        }
    }

    /// To-many payload
    pub fn many(targets: Vec<ResourceIdentifier>) -> Self {
        Self {
            data: Some(Linkage::Many(targets)),
            meta: None,
        }
    }
}

/// Resource linkage of a relationship payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Linkage {
    /// To-many linkage
    Many(Vec<ResourceIdentifier>),
    /// To-one linkage, `None` for null
    One(Option<ResourceIdentifier>),
}

impl Linkage {
    /// All identifiers in linkage order
    pub fn identifiers(&self) -> Vec<&ResourceIdentifier> {
        match self {
            Linkage::Many(ids) => ids.iter().collect(),
            Linkage::One(Some(id)) => vec![id],
            Linkage::One(None) => Vec::new(),
        }
    }
}

// Distinguishes an explicit `null` from an absent field.
fn deserialize_present<'de, D>(deserializer: D) -> Result<Option<Linkage>, D::Error>
where
    D: Deserializer<'de>,
{
    Linkage::deserialize(deserializer).map(Some)
}

// ============================================================================
// Validation payloads
// ============================================================================

/// One structured validation failure reported by an adapter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    /// Short summary
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Human-readable explanation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Location of the offending field
    pub source: ErrorSource,
}

/// Pointer to the offending member of a document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorSource {
    /// JSON pointer, e.g. `/data/attributes/name`
    pub pointer: String,
}

/// Field name used for errors that point at the whole record
pub const BASE_ERROR_FIELD: &str = "base";

impl ValidationError {
    /// Build an error pointing at an attribute
    pub fn for_attribute(name: &str, detail: impl Into<String>) -> Self {
        Self {
            title: None,
            detail: Some(detail.into()),
            source: ErrorSource {
                pointer: format!("/data/attributes/{}", name),
            },
        }
    }

    /// Build an error pointing at a relationship
    pub fn for_relationship(name: &str, detail: impl Into<String>) -> Self {
        Self {
            title: None,
            detail: Some(detail.into()),
            source: ErrorSource {
                pointer: format!("/data/relationships/{}", name),
            },
        }
    }

    /// Field this error belongs to
    ///
    /// `/data/attributes/<name>` and `/data/relationships/<name>` map to
    /// `<name>`; anything else maps to [`BASE_ERROR_FIELD`].
    pub fn field(&self) -> String {
        let pointer = self.source.pointer.trim_end_matches('/');
        for prefix in ["/data/attributes/", "/data/relationships/"] {
            if let Some(rest) = pointer.strip_prefix(prefix) {
                if let Some(name) = rest.split('/').next().filter(|s| !s.is_empty()) {
                    return name.to_string();
                }
            }
        }
        BASE_ERROR_FIELD.to_string()
    }

    /// Message shown for this error (`detail`, falling back to `title`)
    pub fn message(&self) -> String {
        self.detail
            .clone()
            .or_else(|| self.title.clone())
            .unwrap_or_else(|| "is invalid".to_string())
    }
}
