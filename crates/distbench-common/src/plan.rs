//! The typed run plan
//!
//! A `RunPlan` is the fully merged configuration of one concrete benchmark
//! execution. It is built by overlaying a global configuration onto a
//! sub-configuration (see the coordinator's config module), persisted next to
//! every run's logs, and re-read by the aggregator.
//!
//! Keys the struct does not name are kept in `extra` so the persisted
//! snapshot is exactly what was configured.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

use crate::IndexList;
use crate::defaults::{
    default_instance_count, default_process_pattern, default_repeat, default_script,
};

/// Where the instances of a suite come from
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum CloudType {
    #[default]
    Aws,
    Gce,
    Ssh,
    Local,
}

impl CloudType {
    /// Cloud images run the benchmark as a system user and need sudo
    pub fn requires_sudo(self) -> bool {
        matches!(self, Self::Aws | Self::Gce)
    }
}

/// Whether a run read a real dataset or generated synthetic input
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DataSource {
    Real,
    Synthetic,
}

/// Fully merged configuration for one benchmark execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, garde::Validate)]
pub struct RunPlan {
    /// Grouping key; every run with this id is aggregated together
    #[garde(length(min = 1))]
    pub test_id: String,

    /// Display name (falls back to the test id)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(skip)]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(skip)]
    pub model: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(range(min = 1))]
    pub batch_size: Option<u32>,

    /// Worker offsets into the instance pool
    #[garde(skip)]
    pub workers: IndexList,

    /// Parameter-server offsets into the instance pool
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(skip)]
    pub ps_servers: Option<IndexList>,

    #[serde(default)]
    #[garde(skip)]
    pub cloud_type: CloudType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(skip)]
    pub platform: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(skip)]
    pub platform_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(skip)]
    pub instance_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(skip)]
    pub accel_type: Option<String>,

    /// Accelerators per instance
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(skip)]
    pub gpus: Option<u32>,

    /// Dataset location; absent means synthetic input
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(skip)]
    pub data_dir: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(skip)]
    pub result_source: Option<String>,

    #[serde(default)]
    #[garde(skip)]
    pub oom_test: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(range(min = 1))]
    pub oom_low: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(range(min = 1))]
    pub oom_high: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(skip)]
    pub test_suite_start_time: Option<String>,

    /// Unix seconds at which the run was launched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(skip)]
    pub timestamp: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(skip)]
    pub workspace: Option<PathBuf>,

    /// Copy index inside a repeated run group
    #[serde(default)]
    #[garde(skip)]
    pub copy: u32,

    #[serde(default = "default_repeat")]
    #[garde(range(min = 1))]
    pub repeat: u32,

    /// Pre-existing hosts making up the instance pool
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[garde(skip)]
    pub hosts: Vec<String>,

    #[serde(default = "default_instance_count")]
    #[garde(range(min = 1))]
    pub instance_count: usize,

    /// NFS endpoints rotated across instances when mounting data
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[garde(skip)]
    pub efs: Vec<String>,

    /// Framework package to install before the suite
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(skip)]
    pub tf_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(skip)]
    pub virtual_env_path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(skip)]
    pub instance_on_finish: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(skip)]
    pub global_on_finish: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[garde(skip)]
    pub sub_configs: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[garde(skip)]
    pub config_path: Option<PathBuf>,

    /// Benchmark entry point, run from the bench home directory
    #[serde(default = "default_script")]
    #[garde(length(min = 1))]
    pub script: String,

    /// `pkill -f` pattern used to clear stray benchmark processes
    #[serde(default = "default_process_pattern")]
    #[garde(length(min = 1))]
    pub process_pattern: String,

    /// Extra `--key=value` flags passed to the benchmark
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    #[garde(skip)]
    pub args: BTreeMap<String, Value>,

    /// Run list of the sub-configuration; each entry becomes a run group
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[garde(skip)]
    pub run_configs: Vec<Mapping>,

    /// Every other configured key, preserved verbatim
    #[serde(flatten)]
    #[garde(skip)]
    pub extra: BTreeMap<String, Value>,
}

impl RunPlan {
    /// Build a plan from a merged YAML mapping
    pub fn from_mapping(mapping: Mapping) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_value(Value::Mapping(mapping))
    }

    /// Convert back into a YAML mapping (used for run-list overlays)
    pub fn to_mapping(&self) -> Result<Mapping, serde_yaml::Error> {
        match serde_yaml::to_value(self)? {
            Value::Mapping(m) => Ok(m),
            _ => Ok(Mapping::new()),
        }
    }

    /// Load a persisted plan
    pub fn from_yaml_str(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    pub fn to_yaml_string(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.test_id)
    }

    /// Directory name shared by every run of this test in one suite
    pub fn suite_dir_name(&self) -> String {
        suite_dir_name(
            self.test_suite_start_time.as_deref().unwrap_or("unstamped"),
            &self.test_id,
        )
    }

    /// `<workspace>/results/<start>_<test_id>`
    pub fn suite_dir(&self, workspace: &Path) -> PathBuf {
        suite_dir(
            workspace,
            self.test_suite_start_time.as_deref().unwrap_or("unstamped"),
            &self.test_id,
        )
    }

    /// Number of servers is the number of workers
    pub fn server_count(&self) -> usize {
        self.workers.len()
    }

    /// Total accelerators, when the per-instance count is declared
    pub fn accelerator_count(&self) -> Option<u64> {
        self.gpus
            .map(|g| self.server_count() as u64 * u64::from(g))
    }

    pub fn data_source(&self) -> DataSource {
        if self.data_dir.is_some() {
            DataSource::Real
        } else {
            DataSource::Synthetic
        }
    }

    pub fn ps_count(&self) -> Option<usize> {
        self.ps_servers.as_ref().map(IndexList::len)
    }

    pub fn ps_indices(&self) -> &[usize] {
        self.ps_servers.as_ref().map_or(&[], IndexList::as_slice)
    }

    /// OOM search bounds, when this plan asks for a search
    pub fn oom_bounds(&self) -> Option<(u32, u32)> {
        if !self.oom_test {
            return None;
        }
        Some((self.oom_low?, self.oom_high?))
    }
}

pub fn suite_dir_name(start: &str, test_id: &str) -> String {
    format!("{start}_{test_id}")
}

/// Suite directory of `test_id` for a suite started at `start`
pub fn suite_dir(workspace: &Path, start: &str, test_id: &str) -> PathBuf {
    workspace.join("results").join(suite_dir_name(start, test_id))
}
