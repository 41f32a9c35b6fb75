//! One distributed benchmark execution
//!
//! Parameter servers and workers are started concurrently on their mapped
//! instances. Only the workers are joined: parameter servers keep serving
//! until cleanup closes their sessions.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use distbench_common::defaults::{CONFIG_FILE_NAME, PRIMARY_LOG_NAME};
use distbench_common::{RunPlan, timestamp_secs, timestamp_string};
use futures::future::join_all;
use serde_yaml::Value;
use tracing::{debug, info, warn};

use super::setup;
use crate::config::SuiteSettings;
use crate::error::ExecutionError;
use crate::executor::{CommandOutcome, Instance, OutputFilter, OutputSinks, RemoteExecutor};
use crate::roles::{self, RoleAssignment};

/// Role class of a benchmark process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobName {
    Ps,
    Worker,
}

impl JobName {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ps => "ps",
            Self::Worker => "worker",
        }
    }

    /// Name used in console output
    fn display_role(self) -> &'static str {
        match self {
            Self::Ps => "ps_server",
            Self::Worker => "worker",
        }
    }
}

/// What one execution left behind
#[derive(Debug, Clone)]
pub struct ExecutionRecord {
    pub result_dir: PathBuf,
    pub config_path: PathBuf,
    /// Captured stdout of the primary worker
    pub primary_log: PathBuf,
    pub worker_logs: Vec<PathBuf>,
    pub ps_logs: Vec<PathBuf>,
    /// Outcome per worker, `None` when the dispatch did not complete
    pub worker_outcomes: Vec<Option<CommandOutcome>>,
}

/// Build the shell command of one role process
pub fn build_command(
    plan: &RunPlan,
    settings: &SuiteSettings,
    job: JobName,
    task_index: usize,
    assignment: &RoleAssignment,
) -> String {
    let mut cmd = String::new();
    if let Some(venv) = &plan.virtual_env_path {
        let _ = write!(cmd, "source {venv}/bin/activate; ");
    }
    let _ = write!(cmd, "cd {}; {}", settings.bench_home.display(), plan.script);

    if assignment.is_distributed() {
        let _ = write!(
            cmd,
            " --job_name={} --task_index={task_index} --ps_hosts={} --worker_hosts={}",
            job.as_str(),
            assignment.ps_hosts(),
            assignment.worker_hosts()
        );
    }
    if let Some(model) = &plan.model {
        let _ = write!(cmd, " --model={model}");
    }
    if let Some(batch_size) = plan.batch_size {
        let _ = write!(cmd, " --batch_size={batch_size}");
    }
    if let Some(gpus) = plan.gpus {
        let _ = write!(cmd, " --num_gpus={gpus}");
    }
    if let Some(data_dir) = &plan.data_dir {
        let _ = write!(cmd, " --data_dir={data_dir}");
    }
    for (key, value) in &plan.args {
        let _ = write!(cmd, " --{key}={}", flag_value(value));
    }
    cmd
}

fn flag_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Null => String::new(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}

/// Create a fresh timestamped directory under `suite_dir`, adding a `-N`
/// suffix when the name is taken
pub async fn create_result_dir(suite_dir: &Path) -> Result<PathBuf> {
    tokio::fs::create_dir_all(suite_dir)
        .await
        .with_context(|| format!("Failed to create {}", suite_dir.display()))?;

    let base = timestamp_string();
    let mut candidate = suite_dir.join(&base);
    let mut attempt = 0u32;
    loop {
        match tokio::fs::create_dir(&candidate).await {
            Ok(()) => return Ok(candidate),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                attempt += 1;
                candidate = suite_dir.join(format!("{base}-{attempt}"));
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to create {}", candidate.display()));
            }
        }
    }
}

/// Runs single benchmark executions against an instance pool
pub struct RunExecutor<'a, E> {
    executor: &'a E,
    settings: &'a SuiteSettings,
}

impl<'a, E: RemoteExecutor> RunExecutor<'a, E> {
    pub fn new(executor: &'a E, settings: &'a SuiteSettings) -> Self {
        Self { executor, settings }
    }

    pub fn settings(&self) -> &SuiteSettings {
        self.settings
    }

    /// Run the plan once and wait for every worker
    pub async fn execute(&self, plan: &RunPlan, pool: &[Instance]) -> Result<ExecutionRecord> {
        let assignment = roles::assign(plan, pool)?;

        let suite_dir = plan.suite_dir(&self.settings.workspace);
        let result_dir = create_result_dir(&suite_dir).await?;

        let mut snapshot = plan.clone();
        snapshot.timestamp = Some(timestamp_secs());
        snapshot.workspace = Some(self.settings.workspace.clone());
        let config_path = result_dir.join(CONFIG_FILE_NAME);
        let yaml = snapshot
            .to_yaml_string()
            .context("Failed to serialize run config")?;
        tokio::fs::write(&config_path, yaml)
            .await
            .with_context(|| format!("Failed to write {}", config_path.display()))?;
        debug!(path = %config_path.display(), "Persisted run config");

        let mut ps_logs = Vec::with_capacity(assignment.ps.len());
        for ps in &assignment.ps {
            let sinks = sinks_for(&result_dir, "ps", ps.task_index);
            ps_logs.push(sinks.stdout.clone());
            let cmd = build_command(&snapshot, self.settings, JobName::Ps, ps.task_index, &assignment);
            log_dispatch(&snapshot, JobName::Ps, &cmd);
            // Parameter servers are never joined; cleanup closes them
            drop(
                self.executor
                    .dispatch(&pool[ps.instance], &cmd, sinks, OutputFilter::ErrorsOnly),
            );
        }

        let mut worker_logs = Vec::with_capacity(assignment.workers.len());
        let mut handles = Vec::with_capacity(assignment.workers.len());
        for worker in &assignment.workers {
            let sinks = sinks_for(&result_dir, "worker", worker.task_index);
            worker_logs.push(sinks.stdout.clone());
            let filter = if worker.task_index == 0 {
                OutputFilter::Full
            } else {
                OutputFilter::ErrorsOnly
            };
            let cmd = build_command(
                &snapshot,
                self.settings,
                JobName::Worker,
                worker.task_index,
                &assignment,
            );
            log_dispatch(&snapshot, JobName::Worker, &cmd);
            let instance = &pool[worker.instance];
            let handle = self.executor.dispatch(instance, &cmd, sinks, filter);
            handles.push((instance.id.clone(), cmd, handle));
        }

        let joined = join_all(
            handles
                .into_iter()
                .map(|(instance, cmd, handle)| async move { (instance, cmd, handle.join().await) }),
        )
        .await;

        let mut worker_outcomes = Vec::with_capacity(joined.len());
        for (instance, command, result) in joined {
            match result {
                Ok(outcome) => {
                    if !outcome.success() {
                        let err = ExecutionError::UnexpectedExit {
                            instance,
                            command,
                            code: outcome.exit_code,
                        };
                        warn!(test_id = %snapshot.test_id, error = %err, "Worker failed");
                    }
                    worker_outcomes.push(Some(outcome));
                }
                Err(e) => {
                    warn!(test_id = %snapshot.test_id, instance = %instance, error = %e, "Worker dispatch failed");
                    worker_outcomes.push(None);
                }
            }
        }

        info!(
            test_id = %snapshot.test_id,
            result_dir = %result_dir.display(),
            "Benchmark run finished"
        );

        Ok(ExecutionRecord {
            primary_log: result_dir.join(PRIMARY_LOG_NAME),
            result_dir,
            config_path,
            worker_logs,
            ps_logs,
            worker_outcomes,
        })
    }

    /// Kill stray processes, close sessions, and let services settle
    pub async fn cleanup(&self, plan: &RunPlan, pool: &[Instance]) {
        setup::cleanup_instances(self.executor, pool, plan, self.settings).await;
        if !self.settings.settle_delay.is_zero() {
            info!(
                secs = self.settings.settle_delay.as_secs_f64(),
                "Waiting for services to shut down"
            );
            tokio::time::sleep(self.settings.settle_delay).await;
        }
    }

    /// Execute once, then clean up whatever the execution returned
    pub async fn run_once(&self, plan: &RunPlan, pool: &[Instance]) -> Result<ExecutionRecord> {
        let result = self.execute(plan, pool).await;
        self.cleanup(plan, pool).await;
        result
    }
}

fn sinks_for(result_dir: &Path, role: &str, index: usize) -> OutputSinks {
    OutputSinks::new(
        format!("{role}_{index}"),
        result_dir.join(format!("{role}_{index}_stdout.log")),
        result_dir.join(format!("{role}_{index}_stderr.log")),
    )
}

fn log_dispatch(plan: &RunPlan, job: JobName, cmd: &str) {
    info!(
        "[{}] {} | Run benchmark({}): {cmd}",
        plan.copy,
        job.display_role(),
        plan.test_id
    );
}
