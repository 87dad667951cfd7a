//! Store configuration.
//!
//! Configuration is plain data: it can be built in code, or deserialized from
//! JSON. Missing fields fall back to their defaults.
//!
//! ```json
//! { "reentrancy": "fixpoint", "max_passes": 8 }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// What happens when an atom is written from inside its own notification pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReentrancyPolicy {
    /// Fail the nested write with `StoreError::ReentrantWrite`.
    #[default]
    Reject,

    /// Accept the nested write and re-run the pass with the latest value,
    /// until no further write happens or `max_passes` is reached.
    Fixpoint,
}

/// Tunables for a [`Store`](crate::reactive::Store).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub reentrancy: ReentrancyPolicy,

    /// Upper bound on notification passes for a single write under
    /// [`ReentrancyPolicy::Fixpoint`].
    pub max_passes: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            reentrancy: ReentrancyPolicy::Reject,
            max_passes: 16,
        }
    }
}

impl StoreConfig {
    /// Parse and validate a JSON config.
    pub fn from_json_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let input = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&input)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_passes == 0 {
            return Err(ConfigError::Invalid("max_passes must be at least 1".into()));
        }
        Ok(())
    }
}
