//! Record arrays for tessera
//!
//! - Live: one per type, every visible record of that type
//! - Filtered: visible records of a type matching a snapshot predicate
//! - AdapterPopulated: the ordered result of one query
//!
//! Arrays hold ClientIds, never record handles, so they survive unload and
//! rematerialization. All changes within a batch are reported as one
//! contiguous [`ArrayChange`] per array.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod array;
pub mod manager;
pub mod source;

pub use array::{ArrayChange, ArrayKind, Predicate};
pub use manager::RecordArrayManager;
pub use source::RecordSource;
