//! Runtime Configuration
//!
//! Tunables for a [`Runtime`](crate::Runtime). Every field has a default, so
//! a configuration document only needs to name the values it changes:
//!
//! ```rust
//! use ripple_core::RuntimeConfig;
//!
//! let config = RuntimeConfig::from_json(r#"{ "max_height": 512 }"#).unwrap();
//! assert_eq!(config.max_height, 512);
//! assert_eq!(config.initial_heap_capacity, 2000);
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Configuration for a reactive runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Number of height buckets allocated up front by the dirty scheduler.
    /// The scheduler grows past this on demand.
    pub initial_heap_capacity: usize,

    /// Upper bound on any node's height. Exceeding it is reported as
    /// [`Error::HeightLimit`] instead of growing the scheduler without bound.
    pub max_height: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            initial_heap_capacity: 2000,
            max_height: 100_000,
        }
    }
}

impl RuntimeConfig {
    /// Parse a configuration from JSON and validate it.
    pub fn from_json(source: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for inconsistent values.
    pub fn validate(&self) -> Result<()> {
        if self.max_height == 0 {
            return Err(Error::Config("max_height must be at least 1".into()));
        }
        if self.initial_heap_capacity > self.max_height + 1 {
            return Err(Error::Config(format!(
                "initial_heap_capacity ({}) exceeds max_height + 1 ({})",
                self.initial_heap_capacity,
                self.max_height + 1
            )));
        }
        Ok(())
    }
}
