//! distbench-coordinator - Distributed throughput benchmark coordinator
//!
//! This crate resolves layered benchmark configuration into run plans, maps
//! parameter-server and worker roles onto an instance pool, drives the runs
//! (including the OOM batch-size search) through a remote executor, and
//! aggregates the resulting worker logs into result rows.

pub mod config;
pub mod error;
pub mod executor;
pub mod orchestrator;
pub mod results;
pub mod roles;
pub mod sink;
