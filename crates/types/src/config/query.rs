//! Query and join limits.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::ConfigError;

fn default_max_join_build_rows() -> usize {
    1_000_000
}

/// Query engine configuration.
///
/// The join materializes its right side in memory; `max_join_build_rows`
/// caps that build phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct QueryConfig {
    /// Maximum right-side rows a join may hold in its hash table. Must be >= 1.
    #[serde(default = "default_max_join_build_rows")]
    pub max_join_build_rows: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self { max_join_build_rows: default_max_join_build_rows() }
    }
}

#[bon::bon]
impl QueryConfig {
    /// Creates a new query configuration with validation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if `max_join_build_rows` is zero.
    #[builder]
    pub fn new(
        #[builder(default = default_max_join_build_rows())] max_join_build_rows: usize,
    ) -> Result<Self, ConfigError> {
        let config = Self { max_join_build_rows };
        config.validate()?;
        Ok(config)
    }
}

impl QueryConfig {
    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if `max_join_build_rows` is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_join_build_rows == 0 {
            return Err(ConfigError::Validation {
                message: "max_join_build_rows must be >= 1".to_string(),
            });
        }
        Ok(())
    }
}
