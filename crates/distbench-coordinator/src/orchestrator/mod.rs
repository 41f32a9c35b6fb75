//! Suite orchestration
//!
//! For every resolved run plan the orchestrator builds the instance pool,
//! prepares each instance, runs every group of the plan's run list (as OOM
//! searches or plain executions), and aggregates each group's results into
//! the result sink.

pub mod oom;
pub mod run;
pub mod setup;

// Re-export core types
pub use oom::{OomOutcome, OomSearchState};
pub use run::{ExecutionRecord, RunExecutor};
pub use setup::VolumeRotation;

use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use distbench_common::result_info::current_user;
use distbench_common::plan::suite_dir;
use distbench_common::{CloudType, RunPlan, timestamp_string};
use tracing::{debug, info, warn};

use crate::config::{RunGroup, SuiteSettings, expand_runs};
use crate::error::ConfigError;
use crate::executor::{Instance, RemoteExecutor};
use crate::results::{self, AggregatedResult, print_results_summary};
use crate::sink::ResultSink;

/// OOM search result of one test
#[derive(Debug, Clone)]
pub struct OomRecord {
    pub test_id: String,
    pub outcome: OomOutcome,
}

/// Everything a suite produced
#[derive(Debug, Default)]
pub struct SuiteReport {
    pub results: Vec<AggregatedResult>,
    pub oom: Vec<OomRecord>,
}

impl SuiteReport {
    fn extend(&mut self, other: SuiteReport) {
        self.results.extend(other.results);
        self.oom.extend(other.oom);
    }
}

/// Build the instance pool a plan runs on.
///
/// Listed `hosts` are used as-is, and run on this machine for local plans.
/// Without them only local plans can run, on `instance_count` local
/// instances; other cloud types need instances provisioned up front.
pub fn build_pool(plan: &RunPlan) -> Result<Vec<Instance>, ConfigError> {
    let local = plan.cloud_type == CloudType::Local;
    if !plan.hosts.is_empty() {
        return Ok(plan
            .hosts
            .iter()
            .map(|host| Instance {
                local,
                ..Instance::new(host.clone(), host.clone())
            })
            .collect());
    }

    match plan.cloud_type {
        CloudType::Local => Ok((0..plan.instance_count).map(Instance::local).collect()),
        other => Err(ConfigError::UnprovisionedPool {
            cloud_type: other.to_string(),
        }),
    }
}

/// Pick a suite start time, based on `base`, whose suite directories under
/// `workspace` are all unused.
///
/// Taken names get a `-N` suffix, so suites sharing a start time and test id
/// never aggregate each other's runs.
pub fn unique_start_time(base: &str, groups: &[RunGroup], workspace: &Path) -> String {
    let taken = |start: &str| {
        groups
            .iter()
            .any(|g| suite_dir(workspace, start, &g.test_id).exists())
    };

    let mut start = base.to_string();
    let mut attempt = 0u32;
    while taken(&start) {
        attempt += 1;
        start = format!("{base}-{attempt}");
    }
    start
}

/// Sequences setup, execution, cleanup and aggregation over run plans
pub struct SuiteOrchestrator<'a, E, S> {
    executor: &'a E,
    sink: &'a S,
    settings: SuiteSettings,
    rotation: VolumeRotation,
}

impl<'a, E: RemoteExecutor, S: ResultSink> SuiteOrchestrator<'a, E, S> {
    pub fn new(executor: &'a E, sink: &'a S, settings: SuiteSettings) -> Self {
        Self {
            executor,
            sink,
            settings,
            rotation: VolumeRotation::new(),
        }
    }

    pub fn settings(&self) -> &SuiteSettings {
        &self.settings
    }

    /// Run every plan in order
    pub async fn run(&mut self, plans: Vec<RunPlan>) -> Result<SuiteReport> {
        let mut report = SuiteReport::default();
        for plan in plans {
            let test_id = plan.test_id.clone();
            let plan_report = self
                .run_plan(plan)
                .await
                .with_context(|| format!("Test suite '{test_id}' failed"))?;
            report.extend(plan_report);
        }
        Ok(report)
    }

    /// Run one resolved plan: setup, every run group, aggregation
    pub async fn run_plan(&mut self, mut plan: RunPlan) -> Result<SuiteReport> {
        let pool = build_pool(&plan)?;
        let mut groups = expand_runs(&plan)?;

        let base = plan
            .test_suite_start_time
            .clone()
            .unwrap_or_else(timestamp_string);
        let start = unique_start_time(&base, &groups, &self.settings.workspace);
        if start != base {
            warn!(test_id = %plan.test_id, base = %base, start = %start, "Suite directory taken, using a new start time");
        }
        for run in groups.iter_mut().flat_map(|g| g.runs.iter_mut()) {
            run.test_suite_start_time = Some(start.clone());
        }
        plan.test_suite_start_time = Some(start);
        self.rotation.reset();

        info!(
            test_id = %plan.test_id,
            cloud_type = %plan.cloud_type,
            instances = pool.len(),
            start = plan.test_suite_start_time.as_deref().unwrap_or_default(),
            "Starting test suite"
        );

        for instance in &pool {
            setup::prepare_instance(
                self.executor,
                instance,
                &plan,
                &self.settings,
                &mut self.rotation,
            )
            .await;
        }

        let runner = RunExecutor::new(self.executor, &self.settings);
        let user = current_user();
        let mut report = SuiteReport::default();

        for group in groups {
            for run in &group.runs {
                if let Some((low, high)) = run.oom_bounds() {
                    let outcome = oom::search(&runner, run, &pool, low, high).await?;
                    info!(
                        test_id = %run.test_id,
                        lowest_oom = outcome.lowest_oom,
                        iterations = outcome.iterations,
                        "OOM search finished"
                    );
                    if outcome.observed_oom {
                        let row = outcome
                            .to_row(run, &user, Utc::now())
                            .context("Failed to build OOM result row")?;
                        self.sink.upload(&[row]).await?;
                    } else {
                        warn!(test_id = %run.test_id, high, "No batch size ran out of memory");
                    }
                    report.oom.push(OomRecord {
                        test_id: run.test_id.clone(),
                        outcome,
                    });
                } else {
                    runner.run_once(run, &pool).await?;
                }
            }

            let Some(first) = group.runs.first() else {
                continue;
            };
            let suite_dir = first.suite_dir(&self.settings.workspace);
            let aggregated = results::aggregate(&suite_dir)
                .with_context(|| format!("Failed to aggregate {}", suite_dir.display()))?;
            print_results_summary(&aggregated);

            let now = Utc::now();
            let rows = aggregated
                .iter()
                .map(|agg| agg.to_row(&user, now))
                .collect::<Result<Vec<_>, _>>()
                .context("Failed to build result rows")?;
            self.sink.upload(&rows).await?;
            report.results.extend(aggregated);
        }

        if let Some(close) = &plan.instance_on_finish {
            debug!(test_id = %plan.test_id, close = %close, "Instance close behaviour left to the provisioner");
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_from_hosts() {
        let plan = RunPlan::from_yaml_str(
            "test_id: t\nworkers: 0\ncloud_type: ssh\nhosts: [10.0.0.1, 10.0.0.2]\n",
        )
        .unwrap();
        let pool = build_pool(&plan).unwrap();
        assert_eq!(pool.len(), 2);
        assert_eq!(pool[1].hostname, "10.0.0.2");
        assert!(pool.iter().all(|i| !i.local));
    }

    #[test]
    fn test_local_pool_with_hosts_stays_local() {
        let plan = RunPlan::from_yaml_str(
            "test_id: t\nworkers: 0\ncloud_type: local\nhosts: [127.0.0.1]\n",
        )
        .unwrap();
        let pool = build_pool(&plan).unwrap();
        assert_eq!(pool[0].hostname, "127.0.0.1");
        assert!(pool[0].local);
    }

    #[test]
    fn test_unique_start_time_skips_used_suites() {
        let dir = tempfile::tempdir().unwrap();
        let plan = RunPlan::from_yaml_str("test_id: t\nworkers: 0\ncloud_type: local\n").unwrap();
        let groups = expand_runs(&plan).unwrap();

        assert_eq!(unique_start_time("20240101T000000", &groups, dir.path()), "20240101T000000");

        std::fs::create_dir_all(dir.path().join("results/20240101T000000_t")).unwrap();
        std::fs::create_dir_all(dir.path().join("results/20240101T000000-1_t")).unwrap();
        assert_eq!(
            unique_start_time("20240101T000000", &groups, dir.path()),
            "20240101T000000-2"
        );
    }

    #[test]
    fn test_local_pool_uses_instance_count() {
        let plan =
            RunPlan::from_yaml_str("test_id: t\nworkers: 0\ncloud_type: local\ninstance_count: 3\n")
                .unwrap();
        let pool = build_pool(&plan).unwrap();
        assert_eq!(pool.len(), 3);
        assert!(pool.iter().all(|i| i.hostname == "localhost" && i.local));
    }

    #[test]
    fn test_cloud_pool_needs_hosts() {
        let plan = RunPlan::from_yaml_str("test_id: t\nworkers: 0\ncloud_type: aws\n").unwrap();
        assert!(matches!(
            build_pool(&plan),
            Err(ConfigError::UnprovisionedPool { cloud_type }) if cloud_type == "aws"
        ));
    }
}
