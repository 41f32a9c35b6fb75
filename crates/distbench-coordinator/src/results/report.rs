//! Report projection and summary display

use comfy_table::{Cell, ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use distbench_common::defaults::NOT_APPLICABLE;
use serde_json::Value;

use super::AggregatedResult;

/// Columns of the flat results report, in order
const REPORT_COLUMNS: &[&str] = &[
    "timestamp",
    "cuda",
    "cudnn",
    "accel_type",
    "cloud_type",
    "test_script_version",
    "framework",
    "framework_version",
    "framework_hash",
    "model",
    "data_type",
    "batch_size",
    "gpu",
    "mean",
    "std",
    "max",
    "min",
    "samples",
    "ps_server",
    "variable_update",
    "all_reduce_spec",
    "workspace",
    "hardware_type",
    "notable_args",
    "servers",
    "ps_servers",
    "log_dir",
    "test_script",
    "tf_url",
];

pub fn report_columns() -> &'static [&'static str] {
    REPORT_COLUMNS
}

/// Project an aggregated result onto the report columns.
///
/// Each column takes the aggregated or derived value when there is one,
/// then the configured value of the representative run, then `N/A`.
pub fn report_row(agg: &AggregatedResult) -> Vec<String> {
    let rep = agg.representative();
    let config = serde_json::to_value(&rep.config).unwrap_or(Value::Null);

    REPORT_COLUMNS
        .iter()
        .map(|&column| {
            let derived = match column {
                "mean" => Some(agg.stats.mean.to_string()),
                "std" => Some(agg.stats.std.to_string()),
                "max" => Some(agg.stats.max.to_string()),
                "min" => Some(agg.stats.min.to_string()),
                "samples" => Some(agg.stats.samples.to_string()),
                "servers" => Some(rep.servers.to_string()),
                "gpu" => rep.gpu.map(|g| g.to_string()),
                "data_type" => Some(rep.data_type.to_string()),
                "ps_servers" => Some(rep.ps_servers.clone()),
                "log_dir" => Some(rep.log_dir().display().to_string()),
                "test_script" => Some(rep.config.script.clone()),
                _ => None,
            };
            derived
                .or_else(|| config.get(column).and_then(value_string))
                .unwrap_or_else(|| NOT_APPLICABLE.to_string())
        })
        .collect()
}

fn value_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Print a summary table of aggregated results to stdout
pub fn print_results_summary(results: &[AggregatedResult]) {
    if results.is_empty() {
        return;
    }

    println!("\n=== Benchmark Results ===\n");

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Test"),
            Cell::new("Model"),
            Cell::new("Batch"),
            Cell::new("GPUs"),
            Cell::new("Samples"),
            Cell::new("Mean (img/s)"),
            Cell::new("Std"),
            Cell::new("Min"),
            Cell::new("Max"),
        ]);

    for agg in results {
        let plan = agg.plan();
        table.add_row(vec![
            Cell::new(&agg.test_id),
            Cell::new(plan.model.as_deref().unwrap_or("-")),
            Cell::new(plan.batch_size.map_or_else(|| "-".to_string(), |b| b.to_string())),
            Cell::new(
                agg.representative()
                    .gpu
                    .map_or_else(|| "-".to_string(), |g| g.to_string()),
            ),
            Cell::new(agg.stats.samples),
            Cell::new(format!("{:.2}", agg.stats.mean)),
            Cell::new(format!("{:.2}", agg.stats.std)),
            Cell::new(format!("{:.2}", agg.stats.min)),
            Cell::new(format!("{:.2}", agg.stats.max)),
        ]);
    }

    println!("{table}");
}
