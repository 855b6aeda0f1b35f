//! Record storage for tessera
//!
//! This crate holds the per-record layer of the store:
//! - RecordState: lifecycle state machine driven by RecordEvent
//! - InternalModel: canonical / in-flight / local attribute layers
//! - IdentityMap: one model per `(type, id)`, ordered per type
//! - Snapshot: owned point-in-time view handed to adapters and predicates
//! - RecordErrors: per-field validation messages
//!
//! Relationship membership lives in `tessera-graph`; array membership lives
//! in `tessera-arrays`. Neither is reachable from here.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod errors;
pub mod identity_map;
pub mod model;
pub mod snapshot;
pub mod state;

pub use errors::RecordErrors;
pub use identity_map::IdentityMap;
pub use model::{AttributeChange, InternalModel};
pub use snapshot::{RelationshipSnapshot, Snapshot};
pub use state::{RecordEvent, RecordState};
