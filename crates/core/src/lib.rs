//! Core types for tessera
//!
//! This crate defines the foundational types used throughout the system:
//! - ClientId / ResourceIdentity: how records are addressed
//! - Document / Resource: normalized payloads accepted by `push`
//! - Schema: model definitions with inverses resolved once at build time
//! - Error: error type hierarchy with the four-way [`ErrorKind`] taxonomy

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod document;
pub mod error;
pub mod identity;
pub mod schema;

pub use document::{
    Attributes, Document, ErrorSource, Linkage, PrimaryData, RelationshipPayload, Resource,
    ValidationError, BASE_ERROR_FIELD,
};
pub use error::{Error, ErrorKind, Result};
pub use identity::{ArrayId, ClientId, ResourceIdentifier, ResourceIdentity};
pub use schema::{
    AttributeDef, InverseSpec, ModelDef, ModelSchema, RelationshipDef, RelationshipKind,
    RelationshipMeta, RelationshipOptions, Schema, SchemaBuilder,
};

/// Attribute and payload values
pub use serde_json::Value;
