//! Engine configuration
//!
//! Settings are layered: built-in defaults, then `AGENTFLOW_*` environment
//! variables, then an optional YAML file passed explicitly by the caller.

use crate::common::env_loader::EnvLoader;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Prefix for configuration environment variables
pub const ENV_PREFIX: &str = "AGENTFLOW";

/// Default limit on transitions taken by a single run
pub const DEFAULT_MAX_TRANSITIONS: usize = 1000;

/// Default limit on recorded history entries per run
pub const DEFAULT_MAX_HISTORY: usize = 10_000;

/// Default capacity of the compiled expression cache
pub const DEFAULT_EXPRESSION_CACHE_SIZE: usize = 500;

/// Errors that can occur during configuration loading
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read a configuration file from disk
    #[error("Failed to read configuration file {path}: {source}")]
    FileRead {
        /// Path that could not be read
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse YAML content
    #[error("Invalid YAML syntax in {path}:\n{source}\n\nHint: Check for proper indentation and YAML formatting")]
    YamlParse {
        /// Path of the offending file
        path: PathBuf,
        /// Underlying YAML error
        #[source]
        source: serde_yaml::Error,
    },

    /// Invalid configuration value for a specific field
    #[error("Invalid configuration value for '{field}': {value}\n{hint}")]
    InvalidValue {
        /// Field name
        field: String,
        /// Rejected value
        value: String,
        /// How to fix it
        hint: String,
    },
}

/// Runtime limits and tuning for the execution engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Per-node execution timeout in milliseconds, `None` for unbounded
    pub node_timeout_ms: Option<u64>,
    /// Maximum transitions one run may take before it is aborted
    pub max_transitions: usize,
    /// Maximum history entries kept on a run record
    pub max_history: usize,
    /// Capacity of the compiled expression cache
    pub expression_cache_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            node_timeout_ms: None,
            max_transitions: DEFAULT_MAX_TRANSITIONS,
            max_history: DEFAULT_MAX_HISTORY,
            expression_cache_size: DEFAULT_EXPRESSION_CACHE_SIZE,
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by environment variables
    pub fn new() -> Self {
        let mut config = Self::default();
        config.apply_env_vars();
        config
    }

    /// Load from a YAML file; environment variables are applied first and the
    /// file takes precedence over them
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        let file: EngineConfigFile =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::YamlParse {
                path: path.to_path_buf(),
                source,
            })?;

        let mut config = Self::new();
        file.apply_to(&mut config);
        config.validate()?;
        tracing::debug!("Loaded engine configuration from {}", path.display());
        Ok(config)
    }

    /// Node timeout as a duration
    pub fn node_timeout(&self) -> Option<Duration> {
        self.node_timeout_ms.map(Duration::from_millis)
    }

    /// Set the node timeout
    pub fn with_node_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.node_timeout_ms = timeout.map(|d| d.as_millis() as u64);
        self
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_transitions == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_transitions".to_string(),
                value: "0".to_string(),
                hint: "At least one transition must be allowed".to_string(),
            });
        }
        if self.expression_cache_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "expression_cache_size".to_string(),
                value: "0".to_string(),
                hint: "The expression cache needs a capacity of at least 1".to_string(),
            });
        }
        Ok(())
    }

    fn apply_env_vars(&mut self) {
        let loader = EnvLoader::new(ENV_PREFIX);
        self.node_timeout_ms = loader
            .load_duration_ms("NODE_TIMEOUT_MS", self.node_timeout())
            .map(|d| d.as_millis() as u64);
        self.max_transitions = loader.load_parsed("MAX_TRANSITIONS", self.max_transitions);
        self.max_history = loader.load_parsed("MAX_HISTORY", self.max_history);
        self.expression_cache_size =
            loader.load_parsed("EXPRESSION_CACHE_SIZE", self.expression_cache_size);
    }
}

/// Partial configuration as written in a YAML file
#[derive(Debug, Default, Deserialize)]
struct EngineConfigFile {
    node_timeout_ms: Option<u64>,
    max_transitions: Option<usize>,
    max_history: Option<usize>,
    expression_cache_size: Option<usize>,
}

impl EngineConfigFile {
    fn apply_to(self, config: &mut EngineConfig) {
        if let Some(ms) = self.node_timeout_ms {
            config.node_timeout_ms = if ms == 0 { None } else { Some(ms) };
        }
        if let Some(value) = self.max_transitions {
            config.max_transitions = value;
        }
        if let Some(value) = self.max_history {
            config.max_history = value;
        }
        if let Some(value) = self.expression_cache_size {
            config.expression_cache_size = value;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    fn clear_env() {
        for suffix in [
            "NODE_TIMEOUT_MS",
            "MAX_TRANSITIONS",
            "MAX_HISTORY",
            "EXPRESSION_CACHE_SIZE",
        ] {
            std::env::remove_var(format!("{ENV_PREFIX}_{suffix}"));
        }
    }

    #[test]
    #[serial]
    fn test_defaults() {
        clear_env();
        let config = EngineConfig::new();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.node_timeout(), None);
        assert_eq!(config.max_transitions, DEFAULT_MAX_TRANSITIONS);
    }

    #[test]
    #[serial]
    fn test_env_overrides_defaults() {
        clear_env();
        std::env::set_var("AGENTFLOW_MAX_TRANSITIONS", "25");
        std::env::set_var("AGENTFLOW_NODE_TIMEOUT_MS", "250");
        let config = EngineConfig::new();
        assert_eq!(config.max_transitions, 25);
        assert_eq!(config.node_timeout(), Some(Duration::from_millis(250)));
        clear_env();
    }

    #[test]
    #[serial]
    fn test_yaml_overrides_env() {
        clear_env();
        std::env::set_var("AGENTFLOW_MAX_HISTORY", "50");
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_history: 10\nnode_timeout_ms: 1000").unwrap();

        let config = EngineConfig::load(file.path()).unwrap();
        assert_eq!(config.max_history, 10);
        assert_eq!(config.node_timeout(), Some(Duration::from_secs(1)));
        clear_env();
    }

    #[test]
    #[serial]
    fn test_invalid_yaml_value_is_rejected() {
        clear_env();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_transitions: 0").unwrap();

        let err = EngineConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "max_transitions"));
    }

    #[test]
    fn test_missing_file() {
        let err = EngineConfig::load(Path::new("/definitely/not/here.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::FileRead { .. }));
    }
}
