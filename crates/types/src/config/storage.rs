//! Persistence engine configuration: scans, flushing, and compaction.

use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Minimum number of files merged per compaction.
const MIN_FAN_IN: usize = 2;

/// Persistence engine configuration.
///
/// # Validation Rules
///
/// - `scan_chunk_size` must be >= 1
/// - nested sections must be valid
///
/// # Example
///
/// ```no_run
/// # use tabula_types::config::StoreConfig;
/// let config = StoreConfig::builder()
///     .scan_chunk_size(512)
///     .build()
///     .expect("valid store config");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StoreConfig {
    /// Entries fetched per lock acquisition while streaming a range scan.
    #[serde(default = "default_scan_chunk_size")]
    pub scan_chunk_size: usize,
    /// When pending mutations are written to layer-0 files.
    #[serde(default)]
    pub flush: FlushConfig,
    /// Size-tiered compaction settings.
    #[serde(default)]
    pub compaction: CompactionConfig,
}

#[bon::bon]
impl StoreConfig {
    /// Creates a new store configuration with validation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if `scan_chunk_size` is zero or a
    /// nested section is invalid.
    #[builder]
    pub fn new(
        #[builder(default = default_scan_chunk_size())] scan_chunk_size: usize,
        #[builder(default)] flush: FlushConfig,
        #[builder(default)] compaction: CompactionConfig,
    ) -> Result<Self, ConfigError> {
        let config = Self { scan_chunk_size, flush, compaction };
        config.validate()?;
        Ok(config)
    }
}

impl StoreConfig {
    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if any value is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scan_chunk_size == 0 {
            return Err(ConfigError::Validation {
                message: "scan_chunk_size must be >= 1".to_string(),
            });
        }
        self.flush.validate()?;
        self.compaction.validate()
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            scan_chunk_size: default_scan_chunk_size(),
            flush: FlushConfig::default(),
            compaction: CompactionConfig::default(),
        }
    }
}

fn default_scan_chunk_size() -> usize {
    256
}

// =========================================================================
// FlushConfig
// =========================================================================

fn default_max_pending_ops() -> usize {
    1 // flush on every write batch
}

fn default_sync_files() -> bool {
    true
}

/// Flush configuration.
///
/// Mutations are buffered until `max_pending_ops` batch operations are
/// pending, then written as one WAL batch plus one layer-0 file per tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct FlushConfig {
    /// Pending batch operations that trigger a flush. Must be >= 1.
    #[serde(default = "default_max_pending_ops")]
    pub max_pending_ops: usize,
    /// Call `fsync` on layer and WAL files before renaming them into place.
    #[serde(default = "default_sync_files")]
    pub sync_files: bool,
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self { max_pending_ops: default_max_pending_ops(), sync_files: default_sync_files() }
    }
}

#[bon::bon]
impl FlushConfig {
    /// Creates a new flush configuration with validation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if `max_pending_ops` is zero.
    #[builder]
    pub fn new(
        #[builder(default = default_max_pending_ops())] max_pending_ops: usize,
        #[builder(default = default_sync_files())] sync_files: bool,
    ) -> Result<Self, ConfigError> {
        let config = Self { max_pending_ops, sync_files };
        config.validate()?;
        Ok(config)
    }
}

impl FlushConfig {
    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if `max_pending_ops` is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_pending_ops == 0 {
            return Err(ConfigError::Validation {
                message: "max_pending_ops must be >= 1".to_string(),
            });
        }
        Ok(())
    }
}

// =========================================================================
// CompactionConfig
// =========================================================================

fn default_fan_in() -> usize {
    3
}

fn default_merge_delay() -> Duration {
    Duration::from_millis(100)
}

fn default_max_layer() -> u32 {
    16
}

/// Size-tiered compaction configuration.
///
/// A `(tenant, layer)` holding at least `fan_in` files has its oldest
/// `fan_in` files merged into one file at the next layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CompactionConfig {
    /// Files per layer that trigger a merge. Must be >= 2. Default: 3.
    #[serde(default = "default_fan_in")]
    pub fan_in: usize,
    /// Delay between scheduling a merge and running it.
    #[serde(default = "default_merge_delay")]
    #[serde(with = "super::humantime_serde")]
    #[schemars(with = "String")]
    pub merge_delay: Duration,
    /// Highest layer a merge may produce. Files at this layer are never merged.
    #[serde(default = "default_max_layer")]
    pub max_layer: u32,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            fan_in: default_fan_in(),
            merge_delay: default_merge_delay(),
            max_layer: default_max_layer(),
        }
    }
}

#[bon::bon]
impl CompactionConfig {
    /// Creates a new compaction configuration with validation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if:
    /// - `fan_in` < 2
    /// - `max_layer` is zero
    #[builder]
    pub fn new(
        #[builder(default = default_fan_in())] fan_in: usize,
        #[builder(default = default_merge_delay())] merge_delay: Duration,
        #[builder(default = default_max_layer())] max_layer: u32,
    ) -> Result<Self, ConfigError> {
        let config = Self { fan_in, merge_delay, max_layer };
        config.validate()?;
        Ok(config)
    }
}

impl CompactionConfig {
    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if any value is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fan_in < MIN_FAN_IN {
            return Err(ConfigError::Validation {
                message: format!("fan_in must be >= {}, got {}", MIN_FAN_IN, self.fan_in),
            });
        }
        if self.max_layer == 0 {
            return Err(ConfigError::Validation {
                message: "max_layer must be >= 1".to_string(),
            });
        }
        Ok(())
    }
}
