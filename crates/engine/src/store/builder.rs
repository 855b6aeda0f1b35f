//! Store builder for fluent configuration

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tessera_core::{Error, Result, Schema};

use super::{Store, StoreConfig};
use crate::adapter::{Adapter, NullAdapter};

// ============================================================================
// Store Builder Pattern
// ============================================================================

/// Builder for Store configuration
///
/// A schema is required. Without an adapter the store can only be fed
/// through `push`; every request fails with a generic error.
///
/// ```ignore
/// use tessera::Store;
///
/// let store = Store::builder()
///     .schema(schema)
///     .adapter(MyAdapter::new())
///     .coalesce_find_requests(true)
///     .build()?;
/// ```
pub struct StoreBuilder {
    schema: Option<Arc<Schema>>,
    adapter: Option<Arc<dyn Adapter>>,
    config: StoreConfig,
}

impl StoreBuilder {
    /// Create a builder with default configuration
    pub fn new() -> Self {
        Self {
            schema: None,
            adapter: None,
            config: StoreConfig::default(),
        }
    }

    /// Set the schema
    pub fn schema(mut self, schema: impl Into<Arc<Schema>>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Set the adapter
    pub fn adapter<A: Adapter + 'static>(mut self, adapter: A) -> Self {
        self.adapter = Some(Arc::new(adapter));
        self
    }

    /// Set an adapter that is shared with other owners
    pub fn shared_adapter(mut self, adapter: Arc<dyn Adapter>) -> Self {
        self.adapter = Some(adapter);
        self
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn config_file(mut self, path: impl AsRef<Path>) -> Result<Self> {
        self.config = StoreConfig::from_file(path.as_ref())?;
        Ok(self)
    }

    /// Resolve several missing `hasMany` members with one `find_many`
    pub fn coalesce_find_requests(mut self, enabled: bool) -> Self {
        self.config.coalesce_find_requests = enabled;
        self
    }

    /// Build the store
    ///
    /// # Errors
    ///
    /// `Config` if no schema was given or the configuration is invalid.
    pub fn build(self) -> Result<Store> {
        let schema = self
            .schema
            .ok_or_else(|| Error::Config("a schema is required".to_string()))?;
        self.config.validate()?;
        let adapter = self
            .adapter
            .unwrap_or_else(|| Arc::new(NullAdapter) as Arc<dyn Adapter>);
        Ok(Store::from_parts(schema, adapter, self.config))
    }
}

impl Default for StoreBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StoreBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreBuilder")
            .field("has_schema", &self.schema.is_some())
            .field("has_adapter", &self.adapter.is_some())
            .field("config", &self.config)
            .finish()
    }
}
