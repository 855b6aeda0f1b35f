//! Record store for tessera
//!
//! This crate ties the lower layers together behind [`Store`]:
//! - push: merge normalized documents into the identity map and graph
//! - find / reload / query: fetch through an [`Adapter`], de-duplicated
//! - save: create, update and delete with in-flight tracking
//! - unload: dematerialize records and drop orphaned subgraphs
//!
//! Public handles ([`Record`], [`RecordArray`]) read through the store and
//! never own data. Every mutation runs as one batch; observers are told
//! about it once, after the store lock is released.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod adapter;
pub mod observer;
pub mod record;
pub mod record_array;
pub mod store;

pub use adapter::{Adapter, AdapterError, AdapterResult, NullAdapter};
pub use observer::{ObserverId, RecordChange};
pub use record::{Record, RelationshipInfo};
pub use record_array::RecordArray;
pub use store::{Store, StoreBuilder, StoreConfig, CONFIG_FILE_NAME};

pub use tessera_core::{
    ArrayId, Attributes, ClientId, Document, Error, ErrorKind, InverseSpec, Linkage, ModelDef,
    PrimaryData, RelationshipKind, RelationshipOptions, RelationshipPayload, Resource,
    ResourceIdentifier, ResourceIdentity, Result, Schema, ValidationError, Value,
};
pub use tessera_arrays::{ArrayChange, ArrayKind};
pub use tessera_graph::RelationshipStatus;
pub use tessera_storage::{AttributeChange, RecordErrors, RecordState, Snapshot};
