//! Remote command execution
//!
//! The orchestration code only sees the `RemoteExecutor` trait: dispatch a
//! command asynchronously with its output captured into files, run a command
//! to completion, and clean up an instance's outstanding sessions.
//! `ProcessExecutor` implements it over local shells or the system `ssh`
//! client.

pub mod command;
pub mod process;

pub use command::{CommandOutcome, OutputFilter, OutputSinks, is_error_line};
pub use process::{ProcessExecutor, Transport};

use std::future::Future;

use tokio::task::{AbortHandle, JoinHandle};

use crate::error::ExecutionError;

/// A machine commands can be dispatched to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Instance {
    /// Stable identifier (provider instance id, or a generated name)
    pub id: String,
    /// Address other roles use to reach this instance
    pub hostname: String,
    /// Commands run on this machine rather than over the remote transport
    pub local: bool,
}

impl Instance {
    pub fn new(id: impl Into<String>, hostname: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            hostname: hostname.into(),
            local: false,
        }
    }

    /// Instance backed by the local machine
    pub fn local(index: usize) -> Self {
        Self {
            local: true,
            ..Self::new(format!("local-{index}"), "localhost")
        }
    }
}

impl std::fmt::Display for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.id, self.hostname)
    }
}

/// Joinable handle of a dispatched command
#[derive(Debug)]
pub struct DispatchHandle {
    label: String,
    handle: JoinHandle<Result<CommandOutcome, ExecutionError>>,
}

impl DispatchHandle {
    /// Spawn `task` on the runtime and track it under `label`
    pub fn spawn<F>(label: impl Into<String>, task: F) -> Self
    where
        F: Future<Output = Result<CommandOutcome, ExecutionError>> + Send + 'static,
    {
        Self {
            label: label.into(),
            handle: tokio::spawn(task),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Handle that stops the dispatch without joining it
    pub fn abort_handle(&self) -> AbortHandle {
        self.handle.abort_handle()
    }

    /// Wait for the command to finish
    pub async fn join(self) -> Result<CommandOutcome, ExecutionError> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) => Err(ExecutionError::Join {
                role: self.label,
                reason: e.to_string(),
            }),
        }
    }
}

/// Transport-agnostic remote execution capability
pub trait RemoteExecutor: Send + Sync {
    /// Start `command` on `instance` without waiting for it.
    ///
    /// Output is written to `sinks` as filtered by `filter`. Must be called
    /// from within a tokio runtime.
    fn dispatch(
        &self,
        instance: &Instance,
        command: &str,
        sinks: OutputSinks,
        filter: OutputFilter,
    ) -> DispatchHandle;

    /// Run `command` to completion. An exit code outside `ok_exit_codes`
    /// yields `ExecutionError::UnexpectedExit`.
    fn run_and_wait(
        &self,
        instance: &Instance,
        command: &str,
        ok_exit_codes: &[i32],
    ) -> impl Future<Output = Result<CommandOutcome, ExecutionError>> + Send;

    /// Close every session still open on `instance`
    fn cleanup(&self, instance: &Instance) -> impl Future<Output = ()> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_instance() {
        let instance = Instance::local(2);
        assert_eq!(instance.id, "local-2");
        assert_eq!(instance.hostname, "localhost");
        assert_eq!(instance.to_string(), "local-2 (localhost)");
    }

    #[tokio::test]
    async fn test_dispatch_handle_join() {
        let handle = DispatchHandle::spawn("worker_0", async {
            Ok(CommandOutcome { exit_code: Some(0) })
        });
        assert_eq!(handle.label(), "worker_0");
        let outcome = handle.join().await.unwrap();
        assert!(outcome.success());
    }

    #[tokio::test]
    async fn test_aborted_dispatch_reports_join_error() {
        let handle = DispatchHandle::spawn("ps_0", async {
            std::future::pending::<()>().await;
            Ok(CommandOutcome { exit_code: Some(0) })
        });
        handle.abort_handle().abort();
        let err = handle.join().await.unwrap_err();
        assert!(matches!(err, ExecutionError::Join { role, .. } if role == "ps_0"));
    }
}
