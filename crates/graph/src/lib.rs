//! Relationship consistency graph for tessera
//!
//! - [`Relationship`]: canonical and current membership of one `(owner, key)`
//! - [`RelationshipGraph`]: every relationship in a store, kept symmetric
//!   with its inverse in each layer independently
//!
//! See [`graph`] for the edge primitives and the unload rule.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod graph;
pub mod relationship;

pub use graph::RelationshipGraph;
pub use relationship::{Layer, Members, Relationship, RelationshipStatus};
