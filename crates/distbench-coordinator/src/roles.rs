//! Role mapping
//!
//! Maps a plan's worker and parameter-server offsets onto the instance pool.
//! Offsets are unique within a role class; the classes may share instances.

use distbench_common::defaults::{PS_PORT, WORKER_PORT};
use distbench_common::{IndexList, RunPlan};

use crate::error::ConfigError;
use crate::executor::Instance;

/// One logical role bound to an instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleHost {
    /// Task index within the role class
    pub task_index: usize,
    /// Offset into the instance pool
    pub instance: usize,
    /// `host:port` address of the role
    pub address: String,
}

/// Host assignments for every role of one run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleAssignment {
    pub workers: Vec<RoleHost>,
    pub ps: Vec<RoleHost>,
}

impl RoleAssignment {
    /// Comma-joined worker addresses, in task order
    pub fn worker_hosts(&self) -> String {
        join_addresses(&self.workers)
    }

    /// Comma-joined parameter-server addresses, in task order
    pub fn ps_hosts(&self) -> String {
        join_addresses(&self.ps)
    }

    /// Single worker without parameter servers runs non-distributed
    pub fn is_distributed(&self) -> bool {
        self.workers.len() > 1 || !self.ps.is_empty()
    }
}

fn join_addresses(roles: &[RoleHost]) -> String {
    roles
        .iter()
        .map(|r| r.address.as_str())
        .collect::<Vec<_>>()
        .join(",")
}

/// Resolve the role host mapping of a plan against the instance pool
pub fn assign(plan: &RunPlan, pool: &[Instance]) -> Result<RoleAssignment, ConfigError> {
    if plan.workers.is_empty() {
        return Err(ConfigError::EmptyWorkers {
            test_id: plan.test_id.clone(),
        });
    }

    let workers = map_role("worker", &plan.workers, pool, WORKER_PORT)?;
    let ps = match &plan.ps_servers {
        Some(list) => map_role("ps", list, pool, PS_PORT)?,
        None => Vec::new(),
    };

    Ok(RoleAssignment { workers, ps })
}

fn map_role(
    role: &'static str,
    indices: &IndexList,
    pool: &[Instance],
    port: u16,
) -> Result<Vec<RoleHost>, ConfigError> {
    if let Some(index) = indices.first_duplicate() {
        return Err(ConfigError::DuplicateIndex { role, index });
    }

    indices
        .iter()
        .enumerate()
        .map(|(task_index, index)| {
            let instance = pool.get(index).ok_or(ConfigError::IndexOutOfRange {
                role,
                index,
                pool_size: pool.len(),
            })?;
            Ok(RoleHost {
                task_index,
                instance: index,
                address: format!("{}:{}", instance.hostname, port),
            })
        })
        .collect()
}
