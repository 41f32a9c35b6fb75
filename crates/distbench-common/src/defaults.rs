//! Default configuration values shared across distbench components
//!
//! These constants keep the coordinator, the aggregator and the fixtures in
//! agreement about ports, file names and log markers.

/// Port every parameter server listens on
pub const PS_PORT: u16 = 50000;

/// Port every worker listens on
pub const WORKER_PORT: u16 = 50001;

/// Line prefix of the throughput summary printed by the benchmark
pub const THROUGHPUT_MARKER: &str = "total images/sec";

/// Substring the benchmark prints when it runs out of accelerator memory
pub const OOM_MARKER: &str = "OOM when allocating tensor";

/// Persisted run configuration inside every result directory
pub const CONFIG_FILE_NAME: &str = "config.yaml";

/// Captured stdout of the primary worker
pub const PRIMARY_LOG_NAME: &str = "worker_0_stdout.log";

/// Mount point for shared data volumes on remote instances
pub const DATA_MOUNT_DIR: &str = "/home/ubuntu/efs";

/// Default benchmark entry point, run from the bench home directory
pub const DEFAULT_SCRIPT: &str = "python tf_cnn_benchmarks.py";

/// Default `pkill -f` pattern matching stray benchmark processes
pub const DEFAULT_PROCESS_PATTERN: &str = "python tf_cnn";

/// Default remote username
pub const DEFAULT_USERNAME: &str = "ubuntu";

/// Seconds to wait after cleanup before the next run starts
pub const DEFAULT_SETTLE_SECS: u64 = 5;

/// Exit codes of `pkill` that do not indicate a failure
pub const KILL_OK_EXIT_CODES: &[i32] = &[0, 1, -1];

/// Value used in reports when a field is not applicable
pub const NOT_APPLICABLE: &str = "N/A";

// Serde default functions for struct field defaults

/// Returns the default benchmark script
pub fn default_script() -> String {
    DEFAULT_SCRIPT.to_string()
}

/// Returns the default process pattern
pub fn default_process_pattern() -> String {
    DEFAULT_PROCESS_PATTERN.to_string()
}

/// Returns the default repeat count of a run group
pub fn default_repeat() -> u32 {
    1
}

/// Returns the default number of local instances
pub fn default_instance_count() -> usize {
    1
}
