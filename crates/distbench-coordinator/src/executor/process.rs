//! Process-backed executor over local shells or `ssh`

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use tokio::process::Command;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use super::command::{CommandOutcome, OutputFilter, OutputSinks, run_streaming};
use super::{DispatchHandle, Instance, RemoteExecutor};
use crate::error::ExecutionError;

/// How commands reach an instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transport {
    /// `sh -c` on this machine, whatever the instance hostname
    Local,
    /// System `ssh` client in batch mode
    Ssh {
        username: String,
        key: Option<PathBuf>,
    },
}

impl Transport {
    fn command(&self, instance: &Instance, remote_cmd: &str) -> Command {
        match self {
            Self::Local => {
                let mut cmd = Command::new("sh");
                cmd.arg("-c").arg(remote_cmd);
                cmd
            }
            Self::Ssh { username, key } => {
                let mut cmd = Command::new("ssh");
                cmd.args(["-o", "BatchMode=yes", "-o", "StrictHostKeyChecking=no"]);
                if let Some(key) = key {
                    cmd.arg("-i").arg(key);
                }
                cmd.arg(format!("{username}@{}", instance.hostname))
                    .arg("--")
                    .arg(remote_cmd);
                cmd
            }
        }
    }
}

/// `RemoteExecutor` spawning one OS process per command.
///
/// Local instances always run through `sh`; `transport` only applies to the
/// others.
#[derive(Debug)]
pub struct ProcessExecutor {
    transport: Transport,
    sessions: Mutex<HashMap<String, Vec<AbortHandle>>>,
}

impl ProcessExecutor {
    pub fn new(transport: Transport) -> Self {
        Self {
            transport,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn local() -> Self {
        Self::new(Transport::Local)
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Number of dispatched commands on `instance` that are still running
    pub fn open_sessions(&self, instance: &Instance) -> usize {
        let sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        sessions
            .get(&instance.id)
            .map_or(0, |handles| handles.iter().filter(|h| !h.is_finished()).count())
    }

    fn command(&self, instance: &Instance, remote_cmd: &str) -> Command {
        if instance.local {
            Transport::Local.command(instance, remote_cmd)
        } else {
            self.transport.command(instance, remote_cmd)
        }
    }

    fn track(&self, instance: &Instance, handle: AbortHandle) {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        let handles = sessions.entry(instance.id.clone()).or_default();
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }
}

impl RemoteExecutor for ProcessExecutor {
    fn dispatch(
        &self,
        instance: &Instance,
        command: &str,
        sinks: OutputSinks,
        filter: OutputFilter,
    ) -> DispatchHandle {
        let cmd = self.command(instance, command);
        let instance_id = instance.id.clone();
        let label = sinks.label.clone();

        let handle = DispatchHandle::spawn(label.clone(), async move {
            run_streaming(cmd, &instance_id, &label, Some((sinks, filter))).await
        });
        self.track(instance, handle.abort_handle());
        handle
    }

    async fn run_and_wait(
        &self,
        instance: &Instance,
        command: &str,
        ok_exit_codes: &[i32],
    ) -> Result<CommandOutcome, ExecutionError> {
        let cmd = self.command(instance, command);
        let outcome = run_streaming(cmd, &instance.id, "setup", None).await?;
        if outcome.is_ok(ok_exit_codes) {
            Ok(outcome)
        } else {
            Err(ExecutionError::UnexpectedExit {
                instance: instance.id.clone(),
                command: command.to_string(),
                code: outcome.exit_code,
            })
        }
    }

    async fn cleanup(&self, instance: &Instance) {
        let handles = {
            let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
            sessions.remove(&instance.id).unwrap_or_default()
        };

        let open: Vec<_> = handles.into_iter().filter(|h| !h.is_finished()).collect();
        if open.is_empty() {
            return;
        }
        warn!(instance = %instance.id, sessions = open.len(), "Closing outstanding sessions");
        for handle in open {
            handle.abort();
        }
        debug!(instance = %instance.id, "Sessions closed");
    }
}
