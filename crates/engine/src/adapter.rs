//! Adapter: the store's only way to reach a server
//!
//! Every request the store makes goes through one [`Adapter`]. Responses are
//! normalized [`Document`]s, which the store pushes exactly like user data.
//! Failures are classified by [`AdapterError`]:
//!
//! - `NotFound`: the record does not exist; the store evicts it
//! - `Invalid`: per-field validation errors; the record becomes invalid
//! - `Generic`: anything else; the record returns to its uncommitted state

use async_trait::async_trait;
use serde_json::Value;
use tessera_core::{Document, Error, ValidationError};
use tessera_storage::Snapshot;
use thiserror::Error;

/// Result of an adapter request
pub type AdapterResult<T> = std::result::Result<T, AdapterError>;

/// Failure reported by an adapter
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AdapterError {
    /// The requested record does not exist
    #[error("record not found")]
    NotFound,

    /// The server rejected the record with validation errors
    #[error("record is invalid ({} error(s))", .0.len())]
    Invalid(Vec<ValidationError>),

    /// Any other failure
    #[error("{0}")]
    Generic(String),
}

impl AdapterError {
    /// A generic failure
    pub fn generic(message: impl Into<String>) -> Self {
        AdapterError::Generic(message.into())
    }

    /// Convert into a store error for a request about `record_type:id`
    pub fn into_error(self, record_type: &str, id: Option<&str>) -> Error {
        match self {
            AdapterError::NotFound => Error::NotFound {
                record_type: record_type.to_string(),
                id: id.unwrap_or_default().to_string(),
            },
            AdapterError::Invalid(errors) => Error::Invalid {
                record_type: record_type.to_string(),
                errors,
            },
            AdapterError::Generic(message) => Error::Adapter(message),
        }
    }
}

/// Server access used by the store
///
/// Only `find_record` and the three save operations are required.
/// `find_many` falls back to one `find_record` per id; `find_all` and
/// `query` fail unless overridden.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Fetch one record
    async fn find_record(&self, record_type: &str, id: &str) -> AdapterResult<Document>;

    /// Fetch several records of one type
    ///
    /// Called by the store when `coalesce_find_requests` is enabled. Ids
    /// missing from the response are treated as not found.
    async fn find_many(&self, record_type: &str, ids: &[String]) -> AdapterResult<Document> {
        let mut primary = Vec::with_capacity(ids.len());
        let mut included = Vec::new();
        for id in ids {
            let doc = self.find_record(record_type, id).await?;
            primary.extend(doc.primary().into_iter().cloned());
            included.extend(doc.included);
        }
        Ok(Document::many(primary).with_included(included))
    }

    /// Fetch every record of a type
    async fn find_all(&self, record_type: &str) -> AdapterResult<Document> {
        Err(AdapterError::Generic(format!(
            "find_all is not supported for '{}'",
            record_type
        )))
    }

    /// Run a query; the primary data becomes the result array, in order
    async fn query(&self, record_type: &str, query: &Value) -> AdapterResult<Document> {
        let _ = query;
        Err(AdapterError::Generic(format!(
            "query is not supported for '{}'",
            record_type
        )))
    }

    /// Persist a new record
    ///
    /// The response, if any, must carry the record's server id as its
    /// primary data.
    async fn create_record(&self, snapshot: &Snapshot) -> AdapterResult<Option<Document>>;

    /// Persist local changes of an existing record
    async fn update_record(&self, snapshot: &Snapshot) -> AdapterResult<Option<Document>>;

    /// Delete a record on the server
    async fn delete_record(&self, snapshot: &Snapshot) -> AdapterResult<Option<Document>>;
}

/// Adapter for stores fed only through `push`
///
/// Every request fails with a generic error.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullAdapter;

#[async_trait]
impl Adapter for NullAdapter {
    async fn find_record(&self, record_type: &str, id: &str) -> AdapterResult<Document> {
        Err(AdapterError::Generic(format!(
            "no adapter configured to find {}:{}",
            record_type, id
        )))
    }

    async fn create_record(&self, snapshot: &Snapshot) -> AdapterResult<Option<Document>> {
        Err(unsupported("create", snapshot))
    }

    async fn update_record(&self, snapshot: &Snapshot) -> AdapterResult<Option<Document>> {
        Err(unsupported("update", snapshot))
    }

    async fn delete_record(&self, snapshot: &Snapshot) -> AdapterResult<Option<Document>> {
        Err(unsupported("delete", snapshot))
    }
}

fn unsupported(verb: &str, snapshot: &Snapshot) -> AdapterError {
    AdapterError::Generic(format!(
        "no adapter configured to {} {}",
        verb, snapshot.identity
    ))
}
