//! Engine Configuration
//!
//! Tunables that bound the work a single host call performs and choose how
//! joins merge branch data. Loaded from YAML or built in code.
//!
//! # Example YAML Format
//!
//! ```yaml
//! max_engine_steps: 5000
//! max_catch_up: 100
//! join_merge: first_writer_wins
//! ```

use std::fs;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::spec::MergePolicy;

/// Default bound on tasks executed by one `do_engine_steps` call.
pub const DEFAULT_MAX_ENGINE_STEPS: usize = 10_000;

/// Default bound on cyclic occurrences surfaced per timer per refresh.
pub const DEFAULT_MAX_CATCH_UP: u32 = 1_000;

/// Engine-wide settings. Not part of snapshots.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Tasks one `do_engine_steps` call may execute before returning
    #[serde(default = "default_max_engine_steps")]
    pub max_engine_steps: usize,

    /// Due occurrences of one cyclic timer surfaced per refresh
    #[serde(default = "default_max_catch_up")]
    pub max_catch_up: u32,

    /// How parallel joins and sub-process results combine branch data
    #[serde(default)]
    pub join_merge: MergePolicy,
}

fn default_max_engine_steps() -> usize {
    DEFAULT_MAX_ENGINE_STEPS
}

fn default_max_catch_up() -> u32 {
    DEFAULT_MAX_CATCH_UP
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_engine_steps: DEFAULT_MAX_ENGINE_STEPS,
            max_catch_up: DEFAULT_MAX_CATCH_UP,
            join_merge: MergePolicy::default(),
        }
    }
}

impl EngineConfig {
    /// Parses and validates a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        debug!("Parsing engine config ({} bytes)", yaml.len());
        let config: EngineConfig = if yaml.trim().is_empty() {
            EngineConfig::default()
        } else {
            serde_yaml::from_str(yaml)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Loads a YAML config file.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        info!("Loading engine config from: {}", path);
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_string(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    /// Rejects budgets that would stop the engine from making progress.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_engine_steps == 0 {
            return Err(ConfigError::Invalid(
                "max_engine_steps must be at least 1".to_string(),
            ));
        }
        if self.max_catch_up == 0 {
            return Err(ConfigError::Invalid(
                "max_catch_up must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
