//! distbench: distributed throughput benchmark driver
//!
//! Runs benchmark suites described by YAML configuration across local or
//! ssh-reachable machines and aggregates the results.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use distbench_common::defaults::{DEFAULT_SETTLE_SECS, DEFAULT_USERNAME};
use distbench_common::result_info::current_user;
use distbench_common::RunPlan;
use distbench_coordinator::config::{self, SuiteSettings};
use distbench_coordinator::executor::{ProcessExecutor, Transport};
use distbench_coordinator::orchestrator::SuiteOrchestrator;
use distbench_coordinator::results::{self, print_results_summary, report_columns, report_row};
use distbench_coordinator::sink::{JsonLinesSink, LogSink, ResultSink};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "distbench")]
#[command(about = "Distributed ML throughput benchmarks")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

/// Arguments for the run command
#[derive(clap::Args, Debug)]
struct RunArgs {
    /// Global configuration files, run in order
    #[arg(short, long = "config", required = true)]
    configs: Vec<PathBuf>,

    /// Local workspace for logs and results
    #[arg(short, long, default_value = "workspace", env = "DISTBENCH_WORKSPACE")]
    workspace: PathBuf,

    /// Directory on each instance the benchmark script is run from
    #[arg(long, default_value = "benchmarks/scripts/tf_cnn_benchmarks")]
    bench_home: PathBuf,

    /// Private key for ssh connections
    #[arg(long, env = "DISTBENCH_SSH_KEY")]
    ssh_key: Option<PathBuf>,

    /// Remote username
    #[arg(long, default_value = DEFAULT_USERNAME)]
    username: String,

    /// Framework package to install on every instance (overrides tf_url)
    #[arg(long)]
    tf_url: Option<String>,

    /// Skip mounting data volumes
    #[arg(long)]
    no_mount: bool,

    /// Run remote commands under sudo (default: only on aws and gce)
    #[arg(long)]
    sudo: Option<bool>,

    /// Seconds to wait after cleanup before the next run
    #[arg(long, default_value_t = DEFAULT_SETTLE_SECS)]
    settle_secs: u64,

    /// Append result rows as JSON lines to this file (default: log them)
    #[arg(short, long)]
    output: Option<PathBuf>,
}

impl From<&RunArgs> for SuiteSettings {
    fn from(args: &RunArgs) -> Self {
        Self {
            workspace: args.workspace.clone(),
            bench_home: args.bench_home.clone(),
            ssh_key: args.ssh_key.clone(),
            username: args.username.clone(),
            tf_url: args.tf_url.clone(),
            mount: !args.no_mount,
            sudo: args.sudo,
            settle_delay: Duration::from_secs(args.settle_secs),
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the benchmark suites of one or more global configs
    Run(Box<RunArgs>),

    /// Aggregate an existing results tree
    Results {
        /// Root of the results tree (e.g. workspace/results)
        root: PathBuf,

        /// Print the flat report instead of the summary table
        #[arg(long)]
        report: bool,

        /// Append result rows as JSON lines to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        print_error(&e);
        std::process::exit(1);
    }
}

/// Print the error and its causes, pointing at the remote output log level
fn print_error(e: &anyhow::Error) {
    use std::io::Write;

    let mut stderr = std::io::stderr();
    let _ = writeln!(stderr, "\n\x1b[1;31mError:\x1b[0m {e}");
    for cause in e.chain().skip(1) {
        let _ = writeln!(stderr, "  \x1b[33mCaused by:\x1b[0m {cause}");
    }

    if std::env::var("RUST_LOG").is_err() {
        let _ = writeln!(
            stderr,
            "\n\x1b[2mSet RUST_LOG=distbench::remote=debug to see every line of remote output\x1b[0m"
        );
    }
    if std::env::var("RUST_BACKTRACE").is_ok() {
        let backtrace = e.backtrace();
        if backtrace.status() == std::backtrace::BacktraceStatus::Captured {
            let _ = writeln!(stderr, "\n\x1b[2mBacktrace:\x1b[0m\n{backtrace}");
        }
    }
}

async fn run() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    match args.command {
        Command::Run(run_args) => {
            let plans = config::resolve(&run_args.configs)?;
            let settings = SuiteSettings::from(&*run_args);
            // Local instances always run through `sh`, whatever the transport
            let executor = ProcessExecutor::new(Transport::Ssh {
                username: settings.username.clone(),
                key: settings.ssh_key.clone(),
            });

            info!(
                configs = ?run_args.configs,
                plans = plans.len(),
                workspace = %settings.workspace.display(),
                transport = ?executor.transport(),
                "Starting benchmark suites"
            );

            match &run_args.output {
                Some(path) => {
                    run_suites(&executor, &JsonLinesSink::new(path), settings, plans).await?;
                }
                None => run_suites(&executor, &LogSink, settings, plans).await?,
            }
        }

        Command::Results {
            root,
            report,
            output,
        } => {
            let aggregated = results::aggregate(&root)
                .with_context(|| format!("Failed to aggregate {}", root.display()))?;

            if report {
                println!("{}", report_columns().join("\t"));
                for agg in &aggregated {
                    println!("{}", report_row(agg).join("\t"));
                }
            } else {
                print_results_summary(&aggregated);
            }

            if let Some(path) = output {
                let user = current_user();
                let now = chrono::Utc::now();
                let rows = aggregated
                    .iter()
                    .map(|agg| agg.to_row(&user, now))
                    .collect::<Result<Vec<_>, _>>()?;
                JsonLinesSink::new(path).upload(&rows).await?;
            }
        }
    }

    Ok(())
}

async fn run_suites<S: ResultSink>(
    executor: &ProcessExecutor,
    sink: &S,
    settings: SuiteSettings,
    plans: Vec<RunPlan>,
) -> Result<()> {
    let mut orchestrator = SuiteOrchestrator::new(executor, sink, settings);
    let report = orchestrator.run(plans).await?;
    info!(
        results = report.results.len(),
        oom_searches = report.oom.len(),
        "All suites finished"
    );
    Ok(())
}
