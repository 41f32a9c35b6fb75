//! Result-row schema handed to result sinks
//!
//! A `ResultRow` is the flat record an upload collaborator stores: identity,
//! one numeric result, and three JSON blobs (system info, test info and
//! every extra derived field).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default test source recorded on every row
pub const DEFAULT_TEST_SOURCE: &str = "tf_cnn_bench";

/// Default framework recorded in test info
pub const DEFAULT_FRAMEWORK: &str = "tensorflow";

/// Kind of number stored in `ResultRow::result`
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ResultType {
    /// Examples (images) processed per second
    ExpPerSec,
    /// Smallest batch size observed to run out of memory
    OomBatchSize,
    TotalTime,
    GlobalStepPerSec,
}

/// Information about the system the test was executed on
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemInfo {
    /// Higher level platform, e.g. aws, gce, or workstation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    /// Type of platform, e.g. DGX-1 or p3.8xlarge
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform_type: Option<String>,
    /// Type of accelerator, e.g. K80 or P100
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accel_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_cores: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_type: Option<String>,
}

/// Information about the test itself
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestInfo {
    pub framework: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Number of accelerators utilised
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accel_cnt: Option<u64>,
}

impl Default for TestInfo {
    fn default() -> Self {
        Self {
            framework: DEFAULT_FRAMEWORK.to_string(),
            batch_size: None,
            model: None,
            accel_cnt: None,
        }
    }
}

/// One row handed to the upload collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRow {
    pub test_id: String,
    pub test_name: String,
    pub test_source: String,
    pub result_source: String,
    pub result: f64,
    pub result_type: ResultType,
    pub user: String,
    pub timestamp: DateTime<Utc>,
    /// `SystemInfo` serialised as JSON
    pub system_info: String,
    /// `TestInfo` serialised as JSON
    pub test_info: String,
    /// Every extra derived field serialised as JSON
    pub extras: String,
}

impl ResultRow {
    /// Assemble a row, serialising the info blobs to JSON
    #[allow(clippy::too_many_arguments)]
    pub fn new<E: Serialize>(
        test_id: &str,
        test_name: &str,
        result: f64,
        result_type: ResultType,
        result_source: &str,
        user: &str,
        timestamp: DateTime<Utc>,
        system_info: &SystemInfo,
        test_info: &TestInfo,
        extras: &E,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            test_id: test_id.to_string(),
            test_name: test_name.to_string(),
            test_source: DEFAULT_TEST_SOURCE.to_string(),
            result_source: result_source.to_string(),
            result,
            result_type,
            user: user.to_string(),
            timestamp,
            system_info: serde_json::to_string(system_info)?,
            test_info: serde_json::to_string(test_info)?,
            extras: serde_json::to_string(extras)?,
        })
    }
}

/// Best guess at the user running the suite
pub fn current_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_info_blobs_omit_absent_fields() {
        let system = SystemInfo {
            platform: Some("aws".to_string()),
            ..Default::default()
        };
        let test = TestInfo {
            batch_size: Some(64),
            ..Default::default()
        };
        let row = ResultRow::new(
            "t1",
            "resnet",
            391.0,
            ResultType::ExpPerSec,
            "aws",
            "alice",
            Utc::now(),
            &system,
            &test,
            &serde_json::json!({"samples": 3}),
        )
        .unwrap();

        assert_eq!(row.system_info, r#"{"platform":"aws"}"#);
        assert_eq!(row.test_info, r#"{"framework":"tensorflow","batch_size":64}"#);
        assert_eq!(row.extras, r#"{"samples":3}"#);
        assert_eq!(row.test_source, DEFAULT_TEST_SOURCE);
    }

    #[test]
    fn test_result_type_strings() {
        assert_eq!(ResultType::ExpPerSec.to_string(), "exp_per_sec");
        assert_eq!(ResultType::OomBatchSize.as_ref(), "oom_batch_size");
        let json = serde_json::to_string(&ResultType::GlobalStepPerSec).unwrap();
        assert_eq!(json, r#""global_step_per_sec""#);
    }
}
