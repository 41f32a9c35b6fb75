//! Out-of-memory batch size search
//!
//! Bisects the batch size between a low bound that fits and a high bound
//! that may not, running the benchmark once per step and checking the
//! primary worker log for the OOM marker.

use std::path::Path;

use anyhow::Result;
use chrono::{DateTime, Utc};
use distbench_common::defaults::OOM_MARKER;
use distbench_common::{ResultRow, ResultType, RunPlan};
use serde::Serialize;
use tracing::{info, warn};

use super::run::RunExecutor;
use crate::executor::{Instance, RemoteExecutor};
use crate::results::{result_source, system_info, test_info};

/// Bisection state over integer batch sizes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OomSearchState {
    pub low: u32,
    pub high: u32,
    /// Batch size of the next (or running) attempt
    pub current: u32,
    /// Smallest batch size seen to run out of memory, `high` until one does
    pub lowest_oom: u32,
}

impl OomSearchState {
    pub fn new(low: u32, high: u32) -> Self {
        Self {
            low,
            high,
            current: high,
            lowest_oom: high,
        }
    }

    /// Record the outcome of the attempt at `current`.
    ///
    /// Returns the next batch size to try, or `None` once the step would
    /// repeat the current value. Inverted bounds end the search right away.
    pub fn step(&mut self, oom: bool) -> Option<u32> {
        let next = if oom {
            self.high = self.current;
            self.lowest_oom = self.lowest_oom.min(self.current);
            self.high - self.high.saturating_sub(self.low) / 2
        } else {
            self.low = self.current;
            self.low + self.high.saturating_sub(self.low) / 2
        };

        if next == self.current {
            None
        } else {
            self.current = next;
            Some(next)
        }
    }
}

/// Result of a finished search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OomOutcome {
    pub lowest_oom: u32,
    /// Whether any attempt actually ran out of memory
    pub observed_oom: bool,
    pub iterations: u32,
}

impl OomOutcome {
    /// Sink row reporting the threshold found for `plan`
    pub fn to_row(
        &self,
        plan: &RunPlan,
        user: &str,
        now: DateTime<Utc>,
    ) -> Result<ResultRow, serde_json::Error> {
        let mut info = test_info(plan);
        info.batch_size = Some(self.lowest_oom);
        ResultRow::new(
            &plan.test_id,
            plan.display_name(),
            f64::from(self.lowest_oom),
            ResultType::OomBatchSize,
            &result_source(plan),
            user,
            now,
            &system_info(plan),
            &info,
            self,
        )
    }
}

/// Check whether a worker log reports an out-of-memory failure.
///
/// A missing or unreadable log counts as no OOM.
pub async fn check_oom(log: &Path) -> bool {
    match tokio::fs::read(log).await {
        Ok(bytes) => String::from_utf8_lossy(&bytes).contains(OOM_MARKER),
        Err(e) => {
            warn!(log = %log.display(), error = %e, "Could not read worker log");
            false
        }
    }
}

/// Search for the smallest batch size that runs out of memory.
///
/// Every attempt is followed by cleanup.
pub async fn search<E: RemoteExecutor>(
    runner: &RunExecutor<'_, E>,
    template: &RunPlan,
    pool: &[Instance],
    low: u32,
    high: u32,
) -> Result<OomOutcome> {
    let mut state = OomSearchState::new(low, high);
    let mut plan = template.clone();
    let mut iterations = 0;
    let mut observed_oom = false;

    loop {
        info!(
            test_id = %plan.test_id,
            low = state.low,
            high = state.high,
            batch_size = state.current,
            "OOM search step"
        );
        plan.batch_size = Some(state.current);
        let record = runner.run_once(&plan, pool).await?;
        iterations += 1;

        let oom = check_oom(&record.primary_log).await;
        observed_oom |= oom;
        let next = state.step(oom);
        info!(test_id = %plan.test_id, oom, lowest_oom = state.lowest_oom, "OOM search result");
        if next.is_none() {
            break;
        }
    }

    Ok(OomOutcome {
        lowest_oom: state.lowest_oom,
        observed_oom,
        iterations,
    })
}
