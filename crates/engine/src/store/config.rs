//! Store configuration via `tessera.toml`
//!
//! Every field has a default, so an empty file (or no file) is valid.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tessera_core::{Error, Result};

/// Conventional config file name
pub const CONFIG_FILE_NAME: &str = "tessera.toml";

/// Store configuration
///
/// # Example
///
/// ```toml
/// coalesce_find_requests = true
/// max_find_many_batch = 50
/// unload_after_delete = true
/// orphan_cleanup = true
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Fetch several missing async `hasMany` members with one `find_many`
    #[serde(default)]
    pub coalesce_find_requests: bool,
    /// Chunk size for coalesced fetches
    #[serde(default = "default_max_find_many_batch")]
    pub max_find_many_batch: usize,
    /// Unload a record once its deletion is confirmed
    #[serde(default = "default_true")]
    pub unload_after_delete: bool,
    /// Remove disconnected, unused records at the end of each batch
    #[serde(default = "default_true")]
    pub orphan_cleanup: bool,
}

fn default_max_find_many_batch() -> usize {
    25
}

fn default_true() -> bool {
    true
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            coalesce_find_requests: false,
            max_find_many_batch: default_max_find_many_batch(),
            unload_after_delete: true,
            orphan_cleanup: true,
        }
    }
}

impl StoreConfig {
    /// Check field values
    ///
    /// # Errors
    ///
    /// `Config` if `max_find_many_batch` is zero.
    pub fn validate(&self) -> Result<()> {
        if self.max_find_many_batch == 0 {
            return Err(Error::Config(
                "max_find_many_batch must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: StoreConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse store config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a config file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content)
    }

    /// Serialize this config to TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# Tessera store configuration
#
# Fetch several missing async hasMany members with a single find_many call
# instead of one find_record per member (default: false)
coalesce_find_requests = false

# Maximum ids per coalesced find_many call (default: 25, must be >= 1)
max_find_many_batch = 25

# Unload a record once the server confirms its deletion (default: true)
unload_after_delete = true

# Remove records left unreachable after an unload (default: true)
orphan_cleanup = true
"#
    }
}
