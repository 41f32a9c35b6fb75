//! Result aggregation
//!
//! Scans a results tree for primary worker logs, pairs each with the run
//! configuration persisted next to it, groups the observations by test id,
//! and summarises each group.

pub mod report;

pub use report::{print_results_summary, report_columns, report_row};

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use distbench_common::defaults::{CONFIG_FILE_NAME, NOT_APPLICABLE, PRIMARY_LOG_NAME, THROUGHPUT_MARKER};
use distbench_common::plan::DataSource;
use distbench_common::{ResultRow, ResultType, RunPlan, SystemInfo, TestInfo, ThroughputStats};
use serde::Serialize;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::AggregationError;

/// One throughput observation from a worker log
#[derive(Debug, Clone, Serialize)]
pub struct ParsedResult {
    /// Raw throughput token, as printed
    pub imgs_sec: String,
    pub log_file: PathBuf,
    /// Number of workers
    pub servers: usize,
    /// Total accelerators, when the per-instance count is known
    pub gpu: Option<u64>,
    pub data_type: DataSource,
    /// Number of parameter servers, or `N/A`
    pub ps_servers: String,
    /// Configuration the run was launched with
    pub config: RunPlan,
}

impl ParsedResult {
    pub fn from_plan(imgs_sec: String, log_file: PathBuf, config: RunPlan) -> Self {
        Self {
            imgs_sec,
            log_file,
            servers: config.server_count(),
            gpu: config.accelerator_count(),
            data_type: config.data_source(),
            ps_servers: config
                .ps_count()
                .map_or_else(|| NOT_APPLICABLE.to_string(), |n| n.to_string()),
            config,
        }
    }

    /// Directory holding the log and its configuration
    pub fn log_dir(&self) -> &Path {
        self.log_file.parent().unwrap_or_else(|| Path::new("."))
    }
}

/// Summary of every observation sharing one test id
#[derive(Debug, Clone)]
pub struct AggregatedResult {
    pub test_id: String,
    pub stats: ThroughputStats,
    /// Contributing observations in scan order; never empty
    pub members: Vec<ParsedResult>,
}

/// Derived fields recorded as a row's extras
#[derive(Serialize)]
struct AggregateExtras<'a> {
    test_id: &'a str,
    #[serde(flatten)]
    stats: ThroughputStats,
    #[serde(flatten)]
    representative: &'a ParsedResult,
}

impl AggregatedResult {
    /// First-inserted member, which stands for the group in reports
    pub fn representative(&self) -> &ParsedResult {
        &self.members[0]
    }

    pub fn plan(&self) -> &RunPlan {
        &self.representative().config
    }

    /// Build the sink row of this group
    pub fn to_row(&self, user: &str, now: DateTime<Utc>) -> Result<ResultRow, serde_json::Error> {
        let plan = self.plan();
        let extras = AggregateExtras {
            test_id: &self.test_id,
            stats: self.stats,
            representative: self.representative(),
        };
        ResultRow::new(
            &self.test_id,
            plan.display_name(),
            self.stats.mean,
            ResultType::ExpPerSec,
            &result_source(plan),
            user,
            now,
            &system_info(plan),
            &test_info(plan),
            &extras,
        )
    }
}

/// Where the row says its result came from
pub fn result_source(plan: &RunPlan) -> String {
    plan.result_source
        .clone()
        .unwrap_or_else(|| plan.cloud_type.to_string())
}

/// System description of the machines a plan ran on
pub fn system_info(plan: &RunPlan) -> SystemInfo {
    SystemInfo {
        platform: Some(
            plan.platform
                .clone()
                .unwrap_or_else(|| plan.cloud_type.to_string()),
        ),
        platform_type: Some(
            plan.platform_type
                .clone()
                .or_else(|| plan.instance_type.clone())
                .unwrap_or_else(|| "unknown".to_string()),
        ),
        accel_type: Some(
            plan.accel_type
                .clone()
                .unwrap_or_else(|| "unknown".to_string()),
        ),
        cpu_cores: None,
        cpu_type: None,
    }
}

pub fn test_info(plan: &RunPlan) -> TestInfo {
    TestInfo {
        batch_size: plan.batch_size,
        model: plan.model.clone(),
        accel_cnt: plan.accelerator_count(),
        ..TestInfo::default()
    }
}

/// Extract the throughput token from a worker log.
///
/// Only the first line starting with the summary marker is considered. Its
/// third space-separated field, with trailing whitespace removed, is the
/// token.
pub fn parse_throughput(log: &str) -> Option<&str> {
    let line = log.lines().find(|l| l.starts_with(THROUGHPUT_MARKER))?;
    Some(line.split(' ').nth(2).unwrap_or("").trim_end())
}

/// Find every primary worker log under `root`, in file-name order
pub fn scan(root: &Path) -> Result<Vec<PathBuf>, AggregationError> {
    if !root.exists() {
        return Ok(Vec::new());
    }

    let mut logs = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry?;
        if entry.file_type().is_file() && entry.file_name() == PRIMARY_LOG_NAME {
            logs.push(entry.into_path());
        }
    }
    Ok(logs)
}

/// Parse one primary worker log and its sibling configuration.
///
/// Returns `Ok(None)` when the log has no summary line.
pub fn parse_result_file(log: &Path) -> Result<Option<ParsedResult>, AggregationError> {
    let bytes = std::fs::read(log).map_err(|e| AggregationError::io(log, e))?;
    let content = String::from_utf8_lossy(&bytes);
    let Some(imgs_sec) = parse_throughput(&content) else {
        debug!(log = %log.display(), "No throughput summary in log");
        return Ok(None);
    };

    let config_path = log.with_file_name(CONFIG_FILE_NAME);
    if !config_path.is_file() {
        return Err(AggregationError::MissingConfig {
            log: log.to_path_buf(),
            config: config_path,
        });
    }
    let yaml = std::fs::read_to_string(&config_path)
        .map_err(|e| AggregationError::io(&config_path, e))?;
    let config = RunPlan::from_yaml_str(&yaml).map_err(|source| AggregationError::InvalidConfig {
        path: config_path.clone(),
        source,
    })?;

    Ok(Some(ParsedResult::from_plan(
        imgs_sec.to_string(),
        log.to_path_buf(),
        config,
    )))
}

/// Group observations by test id and summarise each group.
///
/// Groups appear in the order their first member was seen.
pub fn aggregate_results(
    results: Vec<ParsedResult>,
) -> Result<Vec<AggregatedResult>, AggregationError> {
    let mut order: Vec<(String, Vec<ParsedResult>)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for result in results {
        let test_id = result.config.test_id.clone();
        match index.get(&test_id) {
            Some(&i) => order[i].1.push(result),
            None => {
                index.insert(test_id.clone(), order.len());
                order.push((test_id, vec![result]));
            }
        }
    }

    order
        .into_iter()
        .map(|(test_id, members)| {
            let values = members
                .iter()
                .map(|m| {
                    m.imgs_sec
                        .parse::<f64>()
                        .map_err(|_| AggregationError::InvalidThroughput {
                            log: m.log_file.clone(),
                            value: m.imgs_sec.clone(),
                        })
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(AggregatedResult {
                test_id,
                stats: ThroughputStats::from_values(&values),
                members,
            })
        })
        .collect()
}

/// Aggregate every result under `root`
pub fn aggregate(root: &Path) -> Result<Vec<AggregatedResult>, AggregationError> {
    let mut parsed = Vec::new();
    for log in scan(root)? {
        if let Some(result) = parse_result_file(&log)? {
            parsed.push(result);
        }
    }

    let aggregated = aggregate_results(parsed)?;
    info!(
        root = %root.display(),
        groups = aggregated.len(),
        "Aggregated results"
    );
    Ok(aggregated)
}
