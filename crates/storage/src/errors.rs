//! Per-record validation errors

use serde::Serialize;
use std::collections::BTreeMap;
use tessera_core::ValidationError;

/// Validation messages keyed by field name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecordErrors {
    by_field: BTreeMap<String, Vec<String>>,
}

impl RecordErrors {
    /// Create an empty collection
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from an adapter's validation payload
    pub fn from_validation(errors: &[ValidationError]) -> Self {
        let mut out = Self::new();
        for e in errors {
            out.add(e.field(), e.message());
        }
        out
    }

    /// Add a message for a field
    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.by_field
            .entry(field.into())
            .or_default()
            .push(message.into());
    }

    /// Remove all messages for a field, returning whether any existed
    pub fn remove(&mut self, field: &str) -> bool {
        self.by_field.remove(field).is_some()
    }

    /// Remove every message
    pub fn clear(&mut self) {
        self.by_field.clear();
    }

    /// No messages at all
    pub fn is_empty(&self) -> bool {
        self.by_field.is_empty()
    }

    /// Total number of messages
    pub fn len(&self) -> usize {
        self.by_field.values().map(Vec::len).sum()
    }

    /// Whether a field has messages
    pub fn has(&self, field: &str) -> bool {
        self.by_field.contains_key(field)
    }

    /// Messages for a field
    pub fn messages_for(&self, field: &str) -> &[String] {
        self.by_field.get(field).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Fields with messages, sorted
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.by_field.keys().map(String::as_str)
    }
}
