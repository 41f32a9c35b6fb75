//! distbench-common - Shared types and utilities
//!
//! This crate provides the types shared by the coordinator library, its
//! binary and the test utilities, without any process or I/O machinery.
//!
//! ## Modules
//!
//! - [`defaults`]: Ports, markers, file names and serde default functions
//! - [`index_list`]: Instance offset lists (`"0-3"`, `[0, 1]`, `2`)
//! - [`plan`]: The typed, fully merged `RunPlan`
//! - [`result_info`]: Result-row schema handed to result sinks
//! - [`stats`]: Throughput statistics (count/mean/std/min/max)

pub mod defaults;
pub mod index_list;
pub mod plan;
pub mod result_info;
pub mod stats;

// Re-export commonly used types
pub use index_list::{IndexList, IndexListError};
pub use plan::{CloudType, RunPlan};
pub use result_info::{ResultRow, ResultType, SystemInfo, TestInfo};
pub use stats::ThroughputStats;

/// Format used for suite start times and result directory names.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S";

/// Current local time formatted with [`TIMESTAMP_FORMAT`].
pub fn timestamp_string() -> String {
    chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Get the current timestamp in seconds since UNIX epoch.
#[inline]
pub fn timestamp_secs() -> i64 {
    chrono::Utc::now().timestamp()
}
