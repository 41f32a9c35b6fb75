//! Shared test utilities for distbench
//!
//! This crate provides fixtures used by the unit and integration tests of
//! the coordinator without pulling the coordinator itself in.
//!
//! ## Modules
//!
//! - [`files`]: Temp workspaces, config files and result trees on disk
//! - [`plans`]: Ready-made run plans and their YAML

pub mod files;
pub mod plans;

// Re-export commonly used items
pub use files::{TestWorkspace, write_file, write_run};
pub use plans::{plan_yaml, sample_plan};
