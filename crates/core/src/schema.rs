//! Model schema and relationship metadata
//!
//! A [`Schema`] is built once per store from [`ModelDef`]s. Building resolves
//! every relationship's inverse exactly once, so graph code never has to
//! guess at runtime.
//!
//! ## Inverse resolution
//!
//! For relationship `owner.key -> related`:
//! - `InverseSpec::None` has no inverse and is never a candidate for others
//! - `InverseSpec::Named(k)` must name a relationship on `related` pointing
//!   back at `owner`
//! - `InverseSpec::Auto` considers every relationship on `related` pointing
//!   back at `owner` that is not `None` and does not name a different key;
//!   one that names `key` explicitly wins. More than one remaining candidate
//!   is a configuration error.
//!
//! ```
//! use tessera_core::schema::{ModelDef, RelationshipOptions, Schema};
//!
//! let schema = Schema::builder()
//!     .model(ModelDef::new("post").attr("title").has_many("comments", "comment", RelationshipOptions::default()))
//!     .model(ModelDef::new("comment").belongs_to("post", "post", RelationshipOptions::default()))
//!     .build()
//!     .unwrap();
//! let meta = schema.relationship("post", "comments").unwrap();
//! assert_eq!(meta.inverse_key.as_deref(), Some("post"));
//! ```

use crate::error::{Error, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

// ============================================================================
// Definitions
// ============================================================================

/// Cardinality of a relationship
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationshipKind {
    /// To-one
    BelongsTo,
    /// To-many, ordered
    HasMany,
}

impl RelationshipKind {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipKind::BelongsTo => "belongsTo",
            RelationshipKind::HasMany => "hasMany",
        }
    }
}

impl std::fmt::Display for RelationshipKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How the inverse of a relationship is determined
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum InverseSpec {
    /// Find the single matching relationship on the related type
    #[default]
    Auto,
    /// Use the named relationship on the related type
    Named(String),
    /// No inverse
    None,
}

/// Options attached to a relationship definition
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RelationshipOptions {
    /// Members may be fetched lazily
    pub is_async: bool,
    /// Inverse selection
    pub inverse: InverseSpec,
}

impl RelationshipOptions {
    /// Synchronous relationship with automatic inverse
    pub fn sync() -> Self {
        Self::default()
    }

    /// Asynchronous relationship with automatic inverse
    pub fn async_() -> Self {
        Self {
            is_async: true,
            inverse: InverseSpec::Auto,
        }
    }

    /// Name the inverse explicitly
    pub fn inverse(mut self, key: impl Into<String>) -> Self {
        self.inverse = InverseSpec::Named(key.into());
        self
    }

    /// Declare that this relationship has no inverse
    pub fn no_inverse(mut self) -> Self {
        self.inverse = InverseSpec::None;
        self
    }
}

/// Declared attribute
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeDef {
    /// Attribute name
    pub name: String,
    /// Value reported when neither local nor canonical state has one
    pub default: Option<Value>,
}

/// Declared relationship
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationshipDef {
    /// Relationship name on the owner type
    pub key: String,
    /// Cardinality
    pub kind: RelationshipKind,
    /// Model name of the related records
    pub related_type: String,
    /// Options
    pub options: RelationshipOptions,
}

/// Declared model
#[derive(Debug, Clone, PartialEq)]
pub struct ModelDef {
    /// Model name
    pub name: String,
    /// Attributes in declaration order
    pub attributes: Vec<AttributeDef>,
    /// Relationships in declaration order
    pub relationships: Vec<RelationshipDef>,
}

impl ModelDef {
    /// Start a model definition
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            relationships: Vec::new(),
        }
    }

    /// Declare an attribute
    pub fn attr(mut self, name: impl Into<String>) -> Self {
        self.attributes.push(AttributeDef {
            name: name.into(),
            default: None,
        });
        self
    }

    /// Declare an attribute with a default value
    pub fn attr_with_default(mut self, name: impl Into<String>, default: impl Into<Value>) -> Self {
        self.attributes.push(AttributeDef {
            name: name.into(),
            default: Some(default.into()),
        });
        self
    }

    /// Declare a to-one relationship
    pub fn belongs_to(
        mut self,
        key: impl Into<String>,
        related_type: impl Into<String>,
        options: RelationshipOptions,
    ) -> Self {
        self.relationships.push(RelationshipDef {
            key: key.into(),
            kind: RelationshipKind::BelongsTo,
            related_type: related_type.into(),
            options,
        });
        self
    }

    /// Declare a to-many relationship
    pub fn has_many(
        mut self,
        key: impl Into<String>,
        related_type: impl Into<String>,
        options: RelationshipOptions,
    ) -> Self {
        self.relationships.push(RelationshipDef {
            key: key.into(),
            kind: RelationshipKind::HasMany,
            related_type: related_type.into(),
            options,
        });
        self
    }
}

// ============================================================================
// Resolved schema
// ============================================================================

/// Relationship metadata with its inverse resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationshipMeta {
    /// Model that declares this relationship
    pub owner_type: String,
    /// Relationship name
    pub key: String,
    /// Cardinality
    pub kind: RelationshipKind,
    /// Model name of the related records
    pub related_type: String,
    /// Members may be fetched lazily
    pub is_async: bool,
    /// Relationship name on the related type, if any
    pub inverse_key: Option<String>,
    /// Cardinality of the inverse
    pub inverse_kind: Option<RelationshipKind>,
    /// Whether the inverse is asynchronous
    pub inverse_is_async: bool,
}

impl RelationshipMeta {
    /// Whether the inverse exists and is synchronous
    pub fn inverse_is_sync(&self) -> bool {
        self.inverse_key.is_some() && !self.inverse_is_async
    }
}

/// Attributes and relationships of one model
#[derive(Debug, Clone)]
pub struct ModelSchema {
    name: String,
    attributes: BTreeMap<String, AttributeDef>,
    attribute_order: Vec<String>,
    relationships: BTreeMap<String, Arc<RelationshipMeta>>,
    relationship_order: Vec<String>,
}

impl ModelSchema {
    /// Model name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Attribute names in declaration order
    pub fn attribute_names(&self) -> &[String] {
        &self.attribute_order
    }

    /// Whether `key` is a declared attribute
    pub fn has_attribute(&self, key: &str) -> bool {
        self.attributes.contains_key(key)
    }

    /// Default value of an attribute
    pub fn attribute_default(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key).and_then(|a| a.default.as_ref())
    }

    /// Relationship metadata by key
    pub fn relationship(&self, key: &str) -> Option<&Arc<RelationshipMeta>> {
        self.relationships.get(key)
    }

    /// All relationships in declaration order
    pub fn relationships(&self) -> impl Iterator<Item = &Arc<RelationshipMeta>> {
        self.relationship_order
            .iter()
            .filter_map(move |k| self.relationships.get(k))
    }
}

/// Resolved schema for every model known to a store
#[derive(Debug, Clone, Default)]
pub struct Schema {
    models: BTreeMap<String, ModelSchema>,
}

impl Schema {
    /// Start building a schema
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    /// Whether a model is defined
    pub fn has_model(&self, name: &str) -> bool {
        self.models.contains_key(name)
    }

    /// Model names in sorted order
    pub fn model_names(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }

    /// Look up a model
    pub fn model(&self, name: &str) -> Result<&ModelSchema> {
        self.models
            .get(name)
            .ok_or_else(|| Error::UnknownModel(name.to_string()))
    }

    /// Look up a relationship
    pub fn relationship(&self, record_type: &str, key: &str) -> Result<&Arc<RelationshipMeta>> {
        self.model(record_type)?
            .relationship(key)
            .ok_or_else(|| Error::UnknownRelationship {
                record_type: record_type.to_string(),
                key: key.to_string(),
            })
    }
}

/// Collects model definitions and resolves them into a [`Schema`]
#[derive(Debug, Clone, Default)]
pub struct SchemaBuilder {
    models: Vec<ModelDef>,
}

impl SchemaBuilder {
    /// Add a model definition
    pub fn model(mut self, def: ModelDef) -> Self {
        self.models.push(def);
        self
    }

    /// Validate the definitions and resolve all inverses
    ///
    /// # Errors
    ///
    /// - `Config` for duplicate model names or duplicate field names
    /// - `UnknownModel` when a relationship targets an undefined model
    /// - `AmbiguousInverse` when automatic resolution finds several candidates
    /// - `InverseMismatch` when a named inverse does not point back
    pub fn build(self) -> Result<Schema> {
        let mut defs: BTreeMap<String, ModelDef> = BTreeMap::new();
        for def in self.models {
            if defs.contains_key(&def.name) {
                return Err(Error::Config(format!("model '{}' defined twice", def.name)));
            }
            defs.insert(def.name.clone(), def);
        }

        for def in defs.values() {
            let mut seen = std::collections::BTreeSet::new();
            for name in def
                .attributes
                .iter()
                .map(|a| &a.name)
                .chain(def.relationships.iter().map(|r| &r.key))
            {
                if !seen.insert(name.as_str()) {
                    return Err(Error::Config(format!(
                        "field '{}' declared twice on model '{}'",
                        name, def.name
                    )));
                }
            }
            for rel in &def.relationships {
                if !defs.contains_key(&rel.related_type) {
                    return Err(Error::UnknownModel(rel.related_type.clone()));
                }
            }
        }

        let mut resolved: BTreeMap<(String, String), Option<String>> = BTreeMap::new();
        for def in defs.values() {
            for rel in &def.relationships {
                let inverse = resolve_inverse(&defs, def, rel)?;
                resolved.insert((def.name.clone(), rel.key.clone()), inverse);
            }
        }

        // Both sides must agree on the pairing.
        for ((owner, key), inverse) in &resolved {
            if let Some(inverse_key) = inverse {
                let related = &find_rel(&defs, owner, key)?.related_type;
                let back = resolved
                    .get(&(related.clone(), inverse_key.clone()))
                    .cloned()
                    .flatten();
                if back.as_deref() != Some(key.as_str()) {
                    return Err(Error::InverseMismatch {
                        record_type: owner.clone(),
                        key: key.clone(),
                        reason: format!(
                            "'{}.{}' resolves its inverse to {:?}",
                            related, inverse_key, back
                        ),
                    });
                }
            }
        }

        let mut models = BTreeMap::new();
        for def in defs.values() {
            let mut relationships = BTreeMap::new();
            for rel in &def.relationships {
                let inverse_key = resolved
                    .get(&(def.name.clone(), rel.key.clone()))
                    .cloned()
                    .flatten();
                let inverse_def = inverse_key
                    .as_ref()
                    .map(|k| find_rel(&defs, &rel.related_type, k))
                    .transpose()?;
                relationships.insert(
                    rel.key.clone(),
                    Arc::new(RelationshipMeta {
                        owner_type: def.name.clone(),
                        key: rel.key.clone(),
                        kind: rel.kind,
                        related_type: rel.related_type.clone(),
                        is_async: rel.options.is_async,
                        inverse_kind: inverse_def.map(|d| d.kind),
                        inverse_is_async: inverse_def.map(|d| d.options.is_async).unwrap_or(false),
                        inverse_key,
                    }),
                );
            }
            models.insert(
                def.name.clone(),
                ModelSchema {
                    name: def.name.clone(),
                    attributes: def
                        .attributes
                        .iter()
                        .map(|a| (a.name.clone(), a.clone()))
                        .collect(),
                    attribute_order: def.attributes.iter().map(|a| a.name.clone()).collect(),
                    relationships,
                    relationship_order: def.relationships.iter().map(|r| r.key.clone()).collect(),
                },
            );
        }

        Ok(Schema { models })
    }
}

fn find_rel<'a>(
    defs: &'a BTreeMap<String, ModelDef>,
    owner: &str,
    key: &str,
) -> Result<&'a RelationshipDef> {
    defs.get(owner)
        .and_then(|def| def.relationships.iter().find(|r| r.key == key))
        .ok_or_else(|| Error::UnknownRelationship {
            record_type: owner.to_string(),
            key: key.to_string(),
        })
}

fn resolve_inverse(
    defs: &BTreeMap<String, ModelDef>,
    owner: &ModelDef,
    rel: &RelationshipDef,
) -> Result<Option<String>> {
    let related = defs
        .get(&rel.related_type)
        .ok_or_else(|| Error::UnknownModel(rel.related_type.clone()))?;

    match &rel.options.inverse {
        InverseSpec::None => Ok(None),
        InverseSpec::Named(name) => {
            let target = related
                .relationships
                .iter()
                .find(|r| &r.key == name)
                .ok_or_else(|| Error::InverseMismatch {
                    record_type: owner.name.clone(),
                    key: rel.key.clone(),
                    reason: format!("'{}' has no relationship '{}'", related.name, name),
                })?;
            if target.related_type != owner.name {
                return Err(Error::InverseMismatch {
                    record_type: owner.name.clone(),
                    key: rel.key.clone(),
                    reason: format!(
                        "'{}.{}' points at '{}'",
                        related.name, name, target.related_type
                    ),
                });
            }
            match &target.options.inverse {
                InverseSpec::None => Err(Error::InverseMismatch {
                    record_type: owner.name.clone(),
                    key: rel.key.clone(),
                    reason: format!("'{}.{}' declares no inverse", related.name, name),
                }),
                InverseSpec::Named(back) if back != &rel.key => Err(Error::InverseMismatch {
                    record_type: owner.name.clone(),
                    key: rel.key.clone(),
                    reason: format!("'{}.{}' names '{}' as its inverse", related.name, name, back),
                }),
                _ => Ok(Some(name.clone())),
            }
        }
        InverseSpec::Auto => {
            let candidates: Vec<&RelationshipDef> = related
                .relationships
                .iter()
                .filter(|r| r.related_type == owner.name)
                .filter(|r| match &r.options.inverse {
                    InverseSpec::Auto => true,
                    InverseSpec::Named(back) => back == &rel.key,
                    InverseSpec::None => false,
                })
                .collect();

            let tagged: Vec<&RelationshipDef> = candidates
                .iter()
                .copied()
                .filter(|r| r.options.inverse == InverseSpec::Named(rel.key.clone()))
                .collect();

            let chosen = match (tagged.len(), candidates.len()) {
                (1, _) => tagged[0],
                (0, 0) => return Ok(None),
                (0, 1) => candidates[0],
                _ => {
                    return Err(Error::AmbiguousInverse {
                        record_type: owner.name.clone(),
                        key: rel.key.clone(),
                        candidates: candidates.iter().map(|r| r.key.clone()).collect(),
                    })
                }
            };
            Ok(Some(chosen.key.clone()))
        }
    }
}
