//! File fixtures
//!
//! Writes configuration files and result directories the way a finished
//! suite leaves them on disk.

use std::path::{Path, PathBuf};

use distbench_common::defaults::{CONFIG_FILE_NAME, PRIMARY_LOG_NAME};
use tempfile::TempDir;

/// Write `contents` to `dir/rel`, creating parent directories.
///
/// Returns the full path of the written file.
///
/// # Example
///
/// ```
/// use distbench_test_utils::write_file;
///
/// let dir = tempfile::tempdir().unwrap();
/// let path = write_file(dir.path(), "subs/a.yaml", "test_id: a\n");
/// assert!(path.ends_with("subs/a.yaml"));
/// ```
pub fn write_file(dir: &Path, rel: &str, contents: &str) -> PathBuf {
    let path = dir.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("Failed to create fixture directory");
    }
    std::fs::write(&path, contents).expect("Failed to write fixture file");
    path
}

/// Write one finished run under `root/<suite>/<run>/`: its persisted
/// config and primary worker log.
///
/// Returns the run directory.
pub fn write_run(root: &Path, suite: &str, run: &str, config_yaml: &str, log: &str) -> PathBuf {
    let dir = root.join(suite).join(run);
    write_file(&dir, CONFIG_FILE_NAME, config_yaml);
    write_file(&dir, PRIMARY_LOG_NAME, log);
    dir
}

/// Temporary workspace directory, removed on drop
pub struct TestWorkspace {
    dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("Failed to create temp workspace"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// `<workspace>/results`
    pub fn results_root(&self) -> PathBuf {
        self.dir.path().join("results")
    }

    /// Write a file relative to the workspace
    pub fn write(&self, rel: &str, contents: &str) -> PathBuf {
        write_file(self.dir.path(), rel, contents)
    }
}

impl Default for TestWorkspace {
    fn default() -> Self {
        Self::new()
    }
}
