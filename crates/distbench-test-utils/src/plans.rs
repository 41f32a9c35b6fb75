//! Run plan fixtures

use distbench_common::RunPlan;

/// YAML of a minimal local plan with one worker and no parameter servers
pub fn plan_yaml(test_id: &str, batch_size: u32) -> String {
    format!(
        "test_id: {test_id}\n\
         model: resnet50\n\
         batch_size: {batch_size}\n\
         workers: 0\n\
         cloud_type: local\n\
         gpus: 1\n\
         test_suite_start_time: '20240101T000000'\n"
    )
}

/// Parsed form of [`plan_yaml`] with batch size 32
pub fn sample_plan(test_id: &str) -> RunPlan {
    RunPlan::from_yaml_str(&plan_yaml(test_id, 32)).expect("Fixture plan must parse")
}
