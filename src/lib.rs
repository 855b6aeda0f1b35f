//! Tessera - client-side normalized record graph
//!
//! Tessera keeps one canonical copy of every server record, keeps both sides
//! of every relationship in agreement, tracks each record through its
//! lifecycle, and maintains reactive arrays over the records it holds.
//!
//! # Quick Start
//!
//! ```ignore
//! use tessera::{Document, ModelDef, RelationshipOptions, Resource, Schema, Store};
//!
//! let schema = Schema::builder()
//!     .model(ModelDef::new("post").attr("title").has_many("comments", "comment", RelationshipOptions::sync()))
//!     .model(ModelDef::new("comment").attr("body").belongs_to("post", "post", RelationshipOptions::sync()))
//!     .build()?;
//! let store = Store::builder().schema(schema).adapter(my_adapter).build()?;
//!
//! store.push(&Document::single(Resource::new("post", "1").attr("title", "A")))?;
//! let post = store.find_record("post", "1").await?;
//! assert_eq!(post.get("title")?, Some("A".into()));
//! ```
//!
//! # Architecture
//!
//! All state sits behind [`Store`]. Servers are reached only through an
//! [`Adapter`]; user code and adapters exchange normalized [`Document`]s.
//! The lower layers (identity map, relationship graph, record arrays) are
//! not exposed beyond the types re-exported here.

pub use tessera_engine::*;
