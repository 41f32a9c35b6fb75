//! Configuration resolution
//!
//! Global configurations list sub-configurations relative to their own
//! directory. Every (global, sub) pair resolves to one `RunPlan`: the
//! sub-configuration's fields, overwritten field by field with the global
//! configuration's fields, except the sub-configuration's run list.
//!
//! Runtime options that come from the command line live in `SuiteSettings`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use distbench_common::defaults::{DEFAULT_SETTLE_SECS, DEFAULT_USERNAME};
use distbench_common::{RunPlan, timestamp_string};
use garde::Validate;
use serde_yaml::{Mapping, Value};
use tracing::{debug, info};

use crate::error::ConfigError;

/// Key of the run list a sub-configuration owns
pub const RUN_LIST_KEY: &str = "run_configs";

/// Key listing the sub-configurations of a global configuration
pub const SUB_CONFIGS_KEY: &str = "sub_configs";

/// Key recording which file a mapping was loaded from
pub const CONFIG_PATH_KEY: &str = "config_path";

/// A loaded global configuration
#[derive(Debug, Clone)]
pub struct GlobalConfig {
    path: PathBuf,
    sub_configs: Vec<String>,
    fields: Mapping,
}

impl GlobalConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let fields = load_mapping(path)?;
        let sub_configs = match fields.get(SUB_CONFIGS_KEY) {
            Some(Value::Sequence(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => {
                return Err(ConfigError::MissingSubConfigs {
                    path: path.to_path_buf(),
                });
            }
        };

        Ok(Self {
            path: path.to_path_buf(),
            sub_configs,
            fields,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory sub-configuration paths are relative to
    pub fn base_dir(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("."))
    }

    pub fn sub_configs(&self) -> &[String] {
        &self.sub_configs
    }

    pub fn fields(&self) -> &Mapping {
        &self.fields
    }

    /// Close behaviour applied after the final plan of an invocation
    pub fn global_on_finish(&self) -> Option<&str> {
        self.fields.get("global_on_finish").and_then(Value::as_str)
    }
}

/// Read a YAML file that must hold a key/value mapping and tag it with its
/// path
pub fn load_mapping(path: &Path) -> Result<Mapping, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::io(path, e))?;
    let value: Value = serde_yaml::from_str(&content).map_err(|e| ConfigError::parse(path, e))?;
    let Value::Mapping(mut mapping) = value else {
        return Err(ConfigError::NotAMapping {
            path: path.to_path_buf(),
        });
    };
    mapping.insert(
        Value::from(CONFIG_PATH_KEY),
        Value::from(path.display().to_string()),
    );
    Ok(mapping)
}

/// Copy every field of `top` onto `base`, except the keys in `protected`.
///
/// Overrides are per field: a key `top` does not define keeps its value in
/// `base`.
pub fn overlay(base: &mut Mapping, top: &Mapping, protected: &[&str]) {
    for (key, value) in top {
        if key.as_str().is_some_and(|k| protected.contains(&k)) {
            continue;
        }
        base.insert(key.clone(), value.clone());
    }
}

/// Resolve global configuration files into one run plan per
/// (global, sub-configuration) pair.
///
/// Any missing or malformed file aborts the whole resolution.
pub fn resolve(global_paths: &[PathBuf]) -> Result<Vec<RunPlan>, ConfigError> {
    let globals = global_paths
        .iter()
        .map(|p| GlobalConfig::load(p))
        .collect::<Result<Vec<_>, _>>()?;

    let mut plans = Vec::new();
    for (i, global) in globals.iter().enumerate() {
        let last_global = i + 1 == globals.len();

        for (j, sub_path) in global.sub_configs().iter().enumerate() {
            let last_sub = j + 1 == global.sub_configs().len();
            let path = global.base_dir().join(sub_path);
            let mut merged = load_mapping(&path)?;
            overlay(&mut merged, global.fields(), &[RUN_LIST_KEY]);

            if last_global && last_sub {
                if let Some(close) = global.global_on_finish() {
                    merged.insert(Value::from("instance_on_finish"), Value::from(close));
                }
            }

            let mut plan = RunPlan::from_mapping(merged).map_err(|e| ConfigError::parse(&path, e))?;
            if plan.test_suite_start_time.is_none() {
                plan.test_suite_start_time = Some(timestamp_string());
            }
            validate_plan(&plan)?;

            debug!(
                global = %global.path().display(),
                sub = %path.display(),
                test_id = %plan.test_id,
                "Resolved run plan"
            );
            plans.push(plan);
        }
    }

    info!(count = plans.len(), "Resolved run plans");
    Ok(plans)
}

/// Check a merged plan before anything is run
pub fn validate_plan(plan: &RunPlan) -> Result<(), ConfigError> {
    plan.validate().map_err(|report| ConfigError::Invalid {
        test_id: plan.test_id.clone(),
        report: report.to_string(),
    })?;

    if plan.workers.is_empty() {
        return Err(ConfigError::EmptyWorkers {
            test_id: plan.test_id.clone(),
        });
    }

    if plan.oom_test {
        match plan.oom_bounds() {
            Some((low, high)) if low < high => {}
            _ => {
                return Err(ConfigError::InvalidOomRange {
                    test_id: plan.test_id.clone(),
                });
            }
        }
    }

    Ok(())
}

/// Repeated runs of one test, aggregated together
#[derive(Debug, Clone)]
pub struct RunGroup {
    pub test_id: String,
    pub runs: Vec<RunPlan>,
}

/// Expand a plan's run list into run groups.
///
/// Each run list entry overlays the plan (entry fields win) and is repeated
/// `repeat` times with copy indices `0..repeat`. A plan without a run list is
/// a single group.
pub fn expand_runs(plan: &RunPlan) -> Result<Vec<RunGroup>, ConfigError> {
    let bases = if plan.run_configs.is_empty() {
        vec![plan.clone()]
    } else {
        let mut base_mapping = plan
            .to_mapping()
            .map_err(|e| ConfigError::parse(plan_path(plan), e))?;
        base_mapping.remove(RUN_LIST_KEY);

        plan.run_configs
            .iter()
            .map(|entry| {
                let mut merged = base_mapping.clone();
                overlay(&mut merged, entry, &[RUN_LIST_KEY]);
                let expanded = RunPlan::from_mapping(merged)
                    .map_err(|e| ConfigError::parse(plan_path(plan), e))?;
                validate_plan(&expanded)?;
                Ok(expanded)
            })
            .collect::<Result<Vec<_>, ConfigError>>()?
    };

    Ok(bases
        .into_iter()
        .map(|base| RunGroup {
            test_id: base.test_id.clone(),
            runs: (0..base.repeat)
                .map(|copy| {
                    let mut run = base.clone();
                    run.copy = copy;
                    run.run_configs.clear();
                    run
                })
                .collect(),
        })
        .collect())
}

fn plan_path(plan: &RunPlan) -> PathBuf {
    plan.config_path.clone().unwrap_or_default()
}

/// Runtime options for a suite, taken from the command line
#[derive(Debug, Clone)]
pub struct SuiteSettings {
    /// Local workspace holding logs and results
    pub workspace: PathBuf,
    /// Directory on each instance the benchmark is run from
    pub bench_home: PathBuf,
    /// Private key used by the ssh transport
    pub ssh_key: Option<PathBuf>,
    /// Remote username
    pub username: String,
    /// Framework package to install; overrides the plan's `tf_url`
    pub tf_url: Option<String>,
    /// Mount shared data volumes during setup
    pub mount: bool,
    /// Force sudo on or off; defaults to what the cloud type needs
    pub sudo: Option<bool>,
    /// Pause after cleanup so remote services can shut down
    pub settle_delay: Duration,
}

impl SuiteSettings {
    pub fn new(workspace: impl Into<PathBuf>, bench_home: impl Into<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
            bench_home: bench_home.into(),
            ssh_key: None,
            username: DEFAULT_USERNAME.to_string(),
            tf_url: None,
            mount: true,
            sudo: None,
            settle_delay: Duration::from_secs(DEFAULT_SETTLE_SECS),
        }
    }

    pub fn results_root(&self) -> PathBuf {
        self.workspace.join("results")
    }

    /// Whether remote commands for this plan run under sudo
    pub fn use_sudo(&self, plan: &RunPlan) -> bool {
        self.sudo
            .unwrap_or_else(|| plan.cloud_type.requires_sudo())
    }

    /// Framework URL to install, the command line winning over the plan
    pub fn tf_url<'a>(&'a self, plan: &'a RunPlan) -> Option<&'a str> {
        self.tf_url.as_deref().or(plan.tf_url.as_deref())
    }
}
