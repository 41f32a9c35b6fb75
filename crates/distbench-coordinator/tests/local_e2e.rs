//! End-to-end suite on the local machine
//!
//! Resolves real config files and runs the "benchmark" through `sh`, with a
//! script that only prints a throughput summary.

use std::time::Duration;

use distbench_common::ResultRow;
use distbench_common::result_info::current_user;
use distbench_coordinator::config::{self, SuiteSettings};
use distbench_coordinator::executor::{ProcessExecutor, Transport};
use distbench_coordinator::orchestrator::SuiteOrchestrator;
use distbench_coordinator::results;
use distbench_coordinator::sink::JsonLinesSink;
use distbench_test_utils::TestWorkspace;

#[tokio::test]
async fn test_local_suite_end_to_end() {
    let ws = TestWorkspace::new();
    std::fs::create_dir_all(ws.path().join("bench")).unwrap();

    ws.write(
        "configs/subs/echo.yaml",
        "test_id: echo_bench\n\
         model: resnet50\n\
         batch_size: 32\n\
         workers: 0\n\
         cloud_type: local\n\
         script: \"echo 'total images/sec: 391.0'; true\"\n\
         process_pattern: distbench-e2e-no-such-process\n\
         run_configs:\n  - repeat: 2\n",
    );
    let global = ws.write(
        "configs/global.yaml",
        "sub_configs: [subs/echo.yaml]\nresult_source: e2e\n",
    );

    let plans = config::resolve(&[global]).unwrap();
    assert_eq!(plans.len(), 1);

    let mut settings = SuiteSettings::new(ws.path().join("workspace"), ws.path().join("bench"));
    settings.settle_delay = Duration::ZERO;
    settings.mount = false;
    settings.username = current_user();

    let executor = ProcessExecutor::local();
    let sink = JsonLinesSink::new(ws.path().join("rows.jsonl"));
    let mut orchestrator = SuiteOrchestrator::new(&executor, &sink, settings);
    let report = orchestrator.run(plans).await.unwrap();

    assert_eq!(report.results.len(), 1);
    let agg = &report.results[0];
    assert_eq!(agg.test_id, "echo_bench");
    assert_eq!(agg.stats.samples, 2);
    assert_eq!(agg.stats.mean, 391.0);

    let rows: Vec<ResultRow> = std::fs::read_to_string(sink.path())
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].result_source, "e2e");

    // The persisted tree aggregates the same way on its own
    let again = results::aggregate(&ws.path().join("workspace/results")).unwrap();
    assert_eq!(again.len(), 1);
    assert_eq!(again[0].stats, agg.stats);
    let config = &again[0].representative().config;
    assert!(config.timestamp.is_some());
    assert_eq!(config.batch_size, Some(32));
}

#[tokio::test]
async fn test_same_sub_config_from_two_globals_keeps_suites_apart() {
    let ws = TestWorkspace::new();
    std::fs::create_dir_all(ws.path().join("bench")).unwrap();

    ws.write(
        "configs/subs/echo.yaml",
        "test_id: echo_bench\n\
         model: resnet50\n\
         batch_size: 32\n\
         workers: 0\n\
         cloud_type: local\n\
         script: \"echo 'total images/sec: 391.0'; true\"\n\
         process_pattern: distbench-e2e-no-such-process\n",
    );
    let first = ws.write("configs/first.yaml", "sub_configs: [subs/echo.yaml]\n");
    let second = ws.write("configs/second.yaml", "sub_configs: [subs/echo.yaml]\n");

    let plans = config::resolve(&[first, second]).unwrap();
    assert_eq!(plans.len(), 2);

    let mut settings = SuiteSettings::new(ws.path().join("workspace"), ws.path().join("bench"));
    settings.settle_delay = Duration::ZERO;
    settings.mount = false;
    settings.username = current_user();

    let executor = ProcessExecutor::local();
    let sink = JsonLinesSink::new(ws.path().join("rows.jsonl"));
    let mut orchestrator = SuiteOrchestrator::new(&executor, &sink, settings);
    let report = orchestrator.run(plans).await.unwrap();

    let samples: Vec<_> = report.results.iter().map(|r| r.stats.samples).collect();
    assert_eq!(samples, vec![1, 1]);

    let suites = std::fs::read_dir(ws.path().join("workspace/results"))
        .unwrap()
        .count();
    assert_eq!(suites, 2);
}

#[tokio::test]
async fn test_local_plan_runs_locally_beside_ssh_plans() {
    let ws = TestWorkspace::new();
    std::fs::create_dir_all(ws.path().join("bench")).unwrap();

    ws.write(
        "configs/subs/echo.yaml",
        "test_id: echo_bench\n\
         model: resnet50\n\
         workers: 0\n\
         cloud_type: local\n\
         script: \"echo 'total images/sec: 250.0'; true\"\n\
         process_pattern: distbench-e2e-no-such-process\n",
    );
    let global = ws.write("configs/global.yaml", "sub_configs: [subs/echo.yaml]\n");
    let plans = config::resolve(&[global]).unwrap();

    let mut settings = SuiteSettings::new(ws.path().join("workspace"), ws.path().join("bench"));
    settings.settle_delay = Duration::ZERO;
    settings.mount = false;
    settings.username = current_user();

    // The executor an invocation with remote plans gets; no ssh server is needed
    let executor = ProcessExecutor::new(Transport::Ssh {
        username: "distbench-no-such-user".to_string(),
        key: None,
    });
    let sink = JsonLinesSink::new(ws.path().join("rows.jsonl"));
    let mut orchestrator = SuiteOrchestrator::new(&executor, &sink, settings);
    let report = orchestrator.run(plans).await.unwrap();

    assert_eq!(report.results.len(), 1);
    assert_eq!(report.results[0].stats.mean, 250.0);
}
