//! Error types for tessera
//!
//! This module defines all error types used throughout the system.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.
//!
//! Errors fall into four kinds (see [`ErrorKind`]):
//! - `NotFound`: a fetch resolved without usable primary data
//! - `Invalid`: structured per-field validation failure
//! - `Generic`: any other adapter failure, always retryable
//! - `Consistency`: programmer-facing invariant violation, never recovered

use crate::document::ValidationError;
use crate::identity::ClientId;
use thiserror::Error;

/// Result type alias for tessera operations
pub type Result<T> = std::result::Result<T, Error>;

/// Classification of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Record does not exist on the server
    NotFound,
    /// Validation failure, absorbed into per-record errors
    Invalid,
    /// Retryable failure
    Generic,
    /// Schema or usage defect
    Consistency,
}

/// Error types for tessera
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// Fetch resolved with no usable primary data
    #[error("Record not found: {record_type}:{id}")]
    NotFound {
        /// Model name
        record_type: String,
        /// Requested id
        id: String,
    },

    /// Save rejected with per-field validation errors
    #[error("Record {record_type} is invalid ({} error(s))", .errors.len())]
    Invalid {
        /// Model name
        record_type: String,
        /// Validation errors as reported by the adapter
        errors: Vec<ValidationError>,
    },

    /// Any other adapter failure
    #[error("Adapter error: {0}")]
    Adapter(String),

    /// Lifecycle event not handled by the current state
    #[error("Invalid transition: '{event}' in state '{state}'")]
    InvalidTransition {
        /// State path at the time of the event
        state: String,
        /// Event name
        event: String,
    },

    /// Model name not present in the schema
    #[error("Unknown model: {0}")]
    UnknownModel(String),

    /// Relationship name not present on a model
    #[error("Unknown relationship: {record_type}.{key}")]
    UnknownRelationship {
        /// Model name
        record_type: String,
        /// Relationship name
        key: String,
    },

    /// Several relationships qualify as the inverse
    #[error("Ambiguous inverse for {record_type}.{key}: candidates {candidates:?}")]
    AmbiguousInverse {
        /// Model name
        record_type: String,
        /// Relationship name
        key: String,
        /// Candidate inverse keys on the related model
        candidates: Vec<String>,
    },

    /// Declared inverse does not pair up
    #[error("Inverse mismatch for {record_type}.{key}: {reason}")]
    InverseMismatch {
        /// Model name
        record_type: String,
        /// Relationship name
        key: String,
        /// What is wrong
        reason: String,
    },

    /// Related record has the wrong model
    #[error("Type mismatch on {record_type}.{key}: expected {expected}, got {actual}")]
    TypeMismatch {
        /// Owner model name
        record_type: String,
        /// Relationship name
        key: String,
        /// Declared related model
        expected: String,
        /// Model of the record supplied
        actual: String,
    },

    /// Handle used after its record was unloaded or discarded
    #[error("Record {0} has been unloaded or destroyed")]
    RecordDestroyed(ClientId),

    /// `save()` called while a save of the same record is pending
    #[error("Record {0} already has a save in flight")]
    SaveInFlight(ClientId),

    /// Server id already belongs to another record
    #[error("Id already in use: {record_type}:{id}")]
    IdInUse {
        /// Model name
        record_type: String,
        /// Conflicting id
        id: String,
    },

    /// Synchronous relationship refers to a record that is not loaded
    #[error("Synchronous relationship {record_type}.{key} refers to unloaded record {member}")]
    SyncRelationshipNotLoaded {
        /// Owner model name
        record_type: String,
        /// Relationship name
        key: String,
        /// The missing member
        member: String,
    },

    /// Record array handle used after destruction
    #[error("Record array {0} has been destroyed")]
    ArrayDestroyed(u64),

    /// Invalid schema or store configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Store called from code that runs while it is locked, such as a
    /// filter predicate
    #[error("Store re-entered while locked")]
    Reentrant,
}

impl Error {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::Invalid { .. } => ErrorKind::Invalid,
            Error::Adapter(_) => ErrorKind::Generic,
            _ => ErrorKind::Consistency,
        }
    }

    /// Whether this error indicates a defect rather than a runtime condition
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Consistency
    }

    /// Whether retrying the operation may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Generic | ErrorKind::Invalid)
    }

    /// Shorthand for an `InvalidTransition`
    pub fn transition(state: impl Into<String>, event: impl Into<String>) -> Self {
        Error::InvalidTransition {
            state: state.into(),
            event: event.into(),
        }
    }
}
