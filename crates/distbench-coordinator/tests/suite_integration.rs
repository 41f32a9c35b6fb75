//! Suite orchestration against a scripted executor
//!
//! The executor fakes the benchmark: workers write a throughput summary, or
//! the OOM marker once the batch size reaches a threshold, and parameter
//! servers never exit on their own.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use distbench_common::{ResultRow, ResultType, RunPlan};
use distbench_coordinator::config::SuiteSettings;
use distbench_coordinator::error::ExecutionError;
use distbench_coordinator::executor::{
    CommandOutcome, DispatchHandle, Instance, OutputFilter, OutputSinks, RemoteExecutor,
};
use distbench_coordinator::orchestrator::SuiteOrchestrator;
use distbench_coordinator::sink::{JsonLinesSink, ResultSink};
use distbench_test_utils::TestWorkspace;
use tokio::task::AbortHandle;

const THROUGHPUTS: [f64; 3] = [380.0, 391.0, 405.0];

#[derive(Default)]
struct ScriptedExecutor {
    oom_threshold: Option<u32>,
    dispatched: Mutex<Vec<(String, OutputFilter, String)>>,
    setup_commands: Mutex<Vec<String>>,
    parked: Mutex<Vec<AbortHandle>>,
    primary_runs: AtomicUsize,
    cleanups: AtomicUsize,
}

impl ScriptedExecutor {
    fn with_oom_threshold(threshold: u32) -> Self {
        Self {
            oom_threshold: Some(threshold),
            ..Self::default()
        }
    }

    fn dispatched_labels(&self) -> Vec<String> {
        self.dispatched
            .lock()
            .unwrap()
            .iter()
            .map(|(label, _, _)| label.clone())
            .collect()
    }
}

fn batch_size(command: &str) -> Option<u32> {
    command
        .split_whitespace()
        .find_map(|arg| arg.strip_prefix("--batch_size="))
        .and_then(|v| v.parse().ok())
}

impl RemoteExecutor for ScriptedExecutor {
    fn dispatch(
        &self,
        _instance: &Instance,
        command: &str,
        sinks: OutputSinks,
        filter: OutputFilter,
    ) -> DispatchHandle {
        self.dispatched
            .lock()
            .unwrap()
            .push((sinks.label.clone(), filter, command.to_string()));

        if sinks.label.starts_with("ps") {
            let handle = DispatchHandle::spawn(sinks.label.clone(), async {
                std::future::pending::<()>().await;
                Ok(CommandOutcome { exit_code: Some(0) })
            });
            self.parked.lock().unwrap().push(handle.abort_handle());
            return handle;
        }

        let oom = match (self.oom_threshold, batch_size(command)) {
            (Some(threshold), Some(batch)) => batch >= threshold,
            _ => false,
        };
        let body = if oom {
            "ResourceExhaustedError: OOM when allocating tensor with shape[64]\n".to_string()
        } else if sinks.label == "worker_0" {
            let n = self.primary_runs.fetch_add(1, Ordering::SeqCst);
            format!(
                "step 100\ntotal images/sec: {:.1}\n",
                THROUGHPUTS[n % THROUGHPUTS.len()]
            )
        } else {
            "step 100\n".to_string()
        };

        DispatchHandle::spawn(sinks.label.clone(), async move {
            tokio::fs::write(&sinks.stdout, body).await.unwrap();
            tokio::fs::write(&sinks.stderr, "").await.unwrap();
            Ok(CommandOutcome { exit_code: Some(0) })
        })
    }

    async fn run_and_wait(
        &self,
        _instance: &Instance,
        command: &str,
        _ok_exit_codes: &[i32],
    ) -> Result<CommandOutcome, ExecutionError> {
        self.setup_commands.lock().unwrap().push(command.to_string());
        Ok(CommandOutcome { exit_code: Some(0) })
    }

    async fn cleanup(&self, _instance: &Instance) {
        for handle in self.parked.lock().unwrap().drain(..) {
            handle.abort();
        }
        self.cleanups.fetch_add(1, Ordering::SeqCst);
    }
}

/// Sink keeping rows in memory
#[derive(Default, Clone)]
struct MemorySink {
    rows: Arc<Mutex<Vec<ResultRow>>>,
}

impl ResultSink for MemorySink {
    async fn upload(&self, rows: &[ResultRow]) -> anyhow::Result<()> {
        self.rows.lock().unwrap().extend_from_slice(rows);
        Ok(())
    }
}

fn settings(ws: &TestWorkspace) -> SuiteSettings {
    let mut settings = SuiteSettings::new(ws.path(), "/opt/bench");
    settings.settle_delay = Duration::ZERO;
    settings.mount = false;
    settings
}

fn plan(yaml: &str) -> RunPlan {
    RunPlan::from_yaml_str(yaml).unwrap()
}

#[tokio::test]
async fn test_repeated_runs_aggregate_into_one_row() {
    let ws = TestWorkspace::new();
    let executor = ScriptedExecutor::default();
    let sink = MemorySink::default();
    let plan = plan(
        "test_id: resnet50_dist\nmodel: resnet50\nbatch_size: 64\ncloud_type: local\n\
         instance_count: 2\nworkers: '0-1'\nps_servers: [1]\ngpus: 4\nrepeat: 3\n\
         test_suite_start_time: '20240101T000000'\n",
    );

    let mut orchestrator = SuiteOrchestrator::new(&executor, &sink, settings(&ws));
    // Parameter servers never exit; the run must not wait for them
    let report = tokio::time::timeout(Duration::from_secs(30), orchestrator.run(vec![plan]))
        .await
        .expect("suite waited on a parameter server")
        .unwrap();

    assert_eq!(report.results.len(), 1);
    let agg = &report.results[0];
    assert_eq!(agg.test_id, "resnet50_dist");
    assert_eq!(agg.stats.samples, 3);
    assert!((agg.stats.mean - 392.0).abs() < 1e-9);
    assert_eq!(agg.stats.min, 380.0);
    assert_eq!(agg.stats.max, 405.0);
    assert_eq!(agg.representative().gpu, Some(8));

    let rows = sink.rows.lock().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].result_type, ResultType::ExpPerSec);
    assert!((rows[0].result - 392.0).abs() < 1e-9);

    let labels = executor.dispatched_labels();
    assert_eq!(labels.iter().filter(|l| *l == "ps_0").count(), 3);
    assert_eq!(labels.iter().filter(|l| *l == "worker_1").count(), 3);

    let dispatched = executor.dispatched.lock().unwrap();
    for (label, filter, command) in dispatched.iter() {
        let expected = if label == "worker_0" {
            OutputFilter::Full
        } else {
            OutputFilter::ErrorsOnly
        };
        assert_eq!(*filter, expected, "{label}");
        assert!(command.contains("--worker_hosts=localhost:50001,localhost:50001"));
        assert!(command.contains("--ps_hosts=localhost:50000"));
    }

    // One cleanup per instance after each of the three runs
    assert_eq!(executor.cleanups.load(Ordering::SeqCst), 6);

    let suite_dir = ws.results_root().join("20240101T000000_resnet50_dist");
    let run_dirs = std::fs::read_dir(&suite_dir).unwrap().count();
    assert_eq!(run_dirs, 3);
}

#[tokio::test]
async fn test_oom_search_reports_threshold() {
    let ws = TestWorkspace::new();
    let executor = ScriptedExecutor::with_oom_threshold(300);
    let sink = JsonLinesSink::new(ws.path().join("rows.jsonl"));
    let plan = plan(
        "test_id: resnet50_oom\nmodel: resnet50\ncloud_type: local\nworkers: 0\n\
         oom_test: true\noom_low: 16\noom_high: 1024\n",
    );

    let mut orchestrator = SuiteOrchestrator::new(&executor, &sink, settings(&ws));
    let report = orchestrator.run(vec![plan]).await.unwrap();

    assert_eq!(report.oom.len(), 1);
    let outcome = report.oom[0].outcome;
    assert_eq!(outcome.lowest_oom, 300);
    assert!(outcome.observed_oom);
    assert_eq!(outcome.iterations, 11);
    assert_eq!(executor.cleanups.load(Ordering::SeqCst), 11);

    let rows: Vec<ResultRow> = std::fs::read_to_string(sink.path())
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    let oom_rows: Vec<_> = rows
        .iter()
        .filter(|r| r.result_type == ResultType::OomBatchSize)
        .collect();
    assert_eq!(oom_rows.len(), 1);
    assert_eq!(oom_rows[0].result, 300.0);
    assert_eq!(oom_rows[0].test_id, "resnet50_oom");

    // Every attempt got its own result directory
    let suite_dirs: Vec<_> = std::fs::read_dir(ws.results_root())
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(suite_dirs.len(), 1);
    assert_eq!(std::fs::read_dir(&suite_dirs[0]).unwrap().count(), 11);
}

#[tokio::test]
async fn test_setup_kills_and_installs_before_running() {
    let ws = TestWorkspace::new();
    let executor = ScriptedExecutor::default();
    let sink = MemorySink::default();
    let plan = plan(
        "test_id: t\nmodel: resnet50\nbatch_size: 32\ncloud_type: local\nworkers: 0\n\
         tf_url: https://example.com/tensorflow.whl\n",
    );

    let mut settings = settings(&ws);
    settings.username = "bench".to_string();
    let mut orchestrator = SuiteOrchestrator::new(&executor, &sink, settings);
    orchestrator.run(vec![plan]).await.unwrap();

    let setup = executor.setup_commands.lock().unwrap();
    assert_eq!(setup[0], "pkill -f \"python tf_cnn\" -u bench");
    assert_eq!(
        setup[1],
        "pip install --quiet --upgrade https://example.com/tensorflow.whl"
    );
    // Cleanup after the run kills processes again
    assert_eq!(setup.last().unwrap(), "pkill -f \"python tf_cnn\" -u bench");
}

#[tokio::test]
async fn test_out_of_range_worker_fails_suite() {
    let ws = TestWorkspace::new();
    let executor = ScriptedExecutor::default();
    let sink = MemorySink::default();
    let plan = plan("test_id: t\ncloud_type: local\ninstance_count: 1\nworkers: '0-1'\n");

    let mut orchestrator = SuiteOrchestrator::new(&executor, &sink, settings(&ws));
    let err = orchestrator.run(vec![plan]).await.unwrap_err();
    assert!(format!("{err:#}").contains("out of range"));
    assert!(executor.dispatched_labels().is_empty());
    // Cleanup still ran after the failed attempt
    assert_eq!(executor.cleanups.load(Ordering::SeqCst), 1);
}
