//! Store Integration Tests
//!
//! End-to-end behaviour of the record store over a scripted adapter.
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test --test store
//!
//! # One area only
//! cargo test --test store unload::
//!
//! # With logs
//! RUST_LOG=tessera=debug cargo test --test store -- --nocapture
//! ```

#[path = "../common/mod.rs"]
mod common;

mod arrays;
mod find;
mod identity;
mod lifecycle;
mod relationships;
mod unload;
