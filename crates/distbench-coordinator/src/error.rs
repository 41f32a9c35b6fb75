//! Typed errors for configuration, execution and aggregation
//!
//! Configuration and aggregation errors are fatal for their pass. Execution
//! errors are reported and the suite carries on.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Malformed or missing configuration, or a plan that cannot be mapped onto
/// the instance pool
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read a configuration file
    #[error("Failed to read config file '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// File is not valid YAML, or does not fit the run plan schema
    #[error("Failed to parse config file '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// Top level of a configuration file is not a key/value mapping
    #[error("Config file '{}' is not a key/value mapping", path.display())]
    NotAMapping { path: PathBuf },

    /// Global configuration does not list any sub-configurations
    #[error("Global config '{}' has no sub_configs list", path.display())]
    MissingSubConfigs { path: PathBuf },

    /// A merged plan failed validation
    #[error("Invalid run plan for test '{test_id}': {report}")]
    Invalid { test_id: String, report: String },

    /// OOM search requested without a usable range
    #[error("Test '{test_id}' sets oom_test but needs oom_low < oom_high")]
    InvalidOomRange { test_id: String },

    /// No workers configured
    #[error("Test '{test_id}' has an empty worker list; at least one worker is required")]
    EmptyWorkers { test_id: String },

    /// Role index past the end of the instance pool
    #[error("{role} index {index} is out of range for a pool of {pool_size} instances")]
    IndexOutOfRange {
        role: &'static str,
        index: usize,
        pool_size: usize,
    },

    /// Same instance listed twice for one role class
    #[error("{role} index {index} is listed more than once")]
    DuplicateIndex { role: &'static str, index: usize },

    /// Instances for this cloud type must come from an external provisioner
    #[error("Cloud type '{cloud_type}' needs a provisioned pool; list the instances under 'hosts'")]
    UnprovisionedPool { cloud_type: String },
}

impl ConfigError {
    /// Create an IO error with path context
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Create a parse error with path context
    pub fn parse(path: impl AsRef<Path>, source: serde_yaml::Error) -> Self {
        Self::Parse {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

/// A dispatched remote command misbehaved
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// Command exited with a status outside the allowed set
    #[error("Command on {instance} exited with {code:?}: {command}")]
    UnexpectedExit {
        instance: String,
        command: String,
        code: Option<i32>,
    },

    /// Command could not be started
    #[error("Failed to spawn command on {instance}: {source}")]
    Spawn {
        instance: String,
        #[source]
        source: std::io::Error,
    },

    /// Dispatch task panicked or was aborted before finishing
    #[error("Dispatch of {role} did not complete: {reason}")]
    Join { role: String, reason: String },
}

/// Result tree could not be aggregated
#[derive(Debug, Error)]
pub enum AggregationError {
    /// A worker log has no persisted configuration next to it
    #[error("Missing run config for log '{}': expected '{}'", log.display(), config.display())]
    MissingConfig { log: PathBuf, config: PathBuf },

    /// Persisted configuration could not be parsed
    #[error("Failed to parse run config '{}': {source}", path.display())]
    InvalidConfig {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// Summary line carried a token that is not a number
    #[error("Invalid throughput value '{value}' in '{}'", log.display())]
    InvalidThroughput { log: PathBuf, value: String },

    #[error("Failed to read '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to scan results directory: {0}")]
    Walk(#[from] walkdir::Error),
}

impl AggregationError {
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}
