// SPDX-License-Identifier: MIT OR Apache-2.0
//! Engine configuration, stored as RON.

use crate::graph::GraphSettings;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Conventional configuration file name
pub const CONFIG_FILE_NAME: &str = "procworld.ron";

/// Error when loading or saving the configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read or written
    #[error("Config IO error: {0}")]
    Io(#[from] std::io::Error),

    /// File is not valid RON for the config
    #[error("Invalid config: {0}")]
    Parse(#[from] ron::error::SpannedError),

    /// Config could not be encoded
    #[error("Config encoding failed: {0}")]
    Write(#[from] ron::Error),
}

/// Settings of the evaluation engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Recursion bound of the compute order evaluator
    #[serde(default = "default_max_dependency_depth")]
    pub max_dependency_depth: usize,
    /// Settings given to new graphs
    #[serde(default)]
    pub default_graph_settings: GraphSettings,
    /// Extra `tracing` filter directives for hosts
    #[serde(default)]
    pub log_directives: Vec<String>,
}

fn default_max_dependency_depth() -> usize {
    crate::order::DEFAULT_MAX_DEPTH
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_dependency_depth: default_max_dependency_depth(),
            default_graph_settings: GraphSettings::default(),
            log_directives: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Parse a config from RON text
    pub fn from_ron(content: &str) -> Result<Self, ConfigError> {
        Ok(ron::from_str(content)?)
    }

    /// Encode the config as pretty RON
    pub fn to_ron(&self) -> Result<String, ConfigError> {
        let config = ron::ser::PrettyConfig::default().struct_names(true);
        Ok(ron::ser::to_string_pretty(self, config)?)
    }

    /// Load the config from a file, defaults when the file does not exist
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_ron(&content)
    }

    /// Save the config to a file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        std::fs::write(path, self.to_ron()?)?;
        Ok(())
    }
}
