//! Command execution with streaming, filtered output capture
//!
//! Stdout and stderr are read line by line as the command runs. Each line is
//! echoed to the console through tracing and, when the filter keeps it,
//! appended to the matching capture file.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::ExecutionError;

/// Time to wait for output capture to drain after the command exits
const STREAM_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Substrings (lowercase) marking a line as an error
const ERROR_PATTERNS: &[&str] = &["error", "exception", "traceback", "fatal", "oom when"];

/// Check if a line of command output reports an error
pub fn is_error_line(line: &str) -> bool {
    let lower = line.to_ascii_lowercase();
    ERROR_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Which lines of a command's output are captured
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFilter {
    /// Every line, verbatim
    Full,
    /// Only lines reporting errors
    ErrorsOnly,
}

impl OutputFilter {
    pub fn keeps(self, line: &str) -> bool {
        match self {
            Self::Full => true,
            Self::ErrorsOnly => is_error_line(line),
        }
    }
}

/// Capture files of one dispatched command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputSinks {
    /// Role label used in console output, e.g. `worker_0`
    pub label: String,
    pub stdout: PathBuf,
    pub stderr: PathBuf,
}

impl OutputSinks {
    pub fn new(label: impl Into<String>, stdout: PathBuf, stderr: PathBuf) -> Self {
        Self {
            label: label.into(),
            stdout,
            stderr,
        }
    }
}

/// How a command ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandOutcome {
    /// Exit code; `None` when the process was killed by a signal
    pub exit_code: Option<i32>,
}

impl CommandOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Whether the exit code is in `ok_exit_codes` (a missing code counts as
    /// `-1`)
    pub fn is_ok(&self, ok_exit_codes: &[i32]) -> bool {
        ok_exit_codes.contains(&self.exit_code.unwrap_or(-1))
    }
}

/// Run a command to completion, streaming its output.
///
/// With `capture` set, kept lines are written to the sink files. There is no
/// timeout on the command itself: a hung command hangs the caller.
///
/// # Returns
/// * `Ok(outcome)` once the command exited, whatever its status
/// * `Err` if the command could not be spawned or waited on
pub async fn run_streaming(
    mut cmd: Command,
    instance: &str,
    label: &str,
    capture: Option<(OutputSinks, OutputFilter)>,
) -> Result<CommandOutcome, ExecutionError> {
    info!(instance, role = label, "Running command");

    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| ExecutionError::Spawn {
            instance: instance.to_string(),
            source,
        })?;

    let (stdout_path, stderr_path, filter) = match capture {
        Some((sinks, filter)) => (Some(sinks.stdout), Some(sinks.stderr), filter),
        None => (None, None, OutputFilter::Full),
    };

    let stdout_handle = child
        .stdout
        .take()
        .map(|out| spawn_capture(out, stdout_path, filter, label.to_string()));
    let stderr_handle = child
        .stderr
        .take()
        .map(|err| spawn_capture(err, stderr_path, filter, label.to_string()));

    let status = child.wait().await.map_err(|source| ExecutionError::Spawn {
        instance: instance.to_string(),
        source,
    })?;

    // Wait for capture to drain with timeout
    for handle in [stdout_handle, stderr_handle].into_iter().flatten() {
        if tokio::time::timeout(STREAM_FLUSH_TIMEOUT, handle).await.is_err() {
            warn!(instance, role = label, "Timed out flushing command output");
        }
    }

    let outcome = CommandOutcome {
        exit_code: status.code(),
    };
    debug!(instance, role = label, exit_code = ?outcome.exit_code, "Command finished");
    Ok(outcome)
}

/// Read `reader` line by line into `path`, echoing to the console.
///
/// Lines are handled as bytes: invalid UTF-8 is only replaced in the echo.
fn spawn_capture<R>(
    reader: R,
    path: Option<PathBuf>,
    filter: OutputFilter,
    label: String,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut file = match path {
            Some(path) => match File::create(&path).await {
                Ok(f) => Some(f),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to create capture file");
                    None
                }
            },
            None => None,
        };

        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => {
                    warn!(role = %label, error = %e, "Failed to read command output");
                    break;
                }
            }

            let text = String::from_utf8_lossy(&buf);
            let line = text.trim_end_matches(['\n', '\r']);
            if is_error_line(line) {
                warn!(target: "distbench::remote", role = %label, "{line}");
            } else if filter == OutputFilter::Full {
                debug!(target: "distbench::remote", role = %label, "{line}");
            }

            if !filter.keeps(line) {
                continue;
            }
            // Raw bytes, so the file matches the command's output exactly
            if let Some(f) = file.as_mut() {
                if let Err(e) = f.write_all(&buf).await {
                    warn!(role = %label, error = %e, "Failed to write captured output");
                    file = None;
                }
            }
        }

        if let Some(mut f) = file {
            if let Err(e) = f.flush().await {
                warn!(role = %label, error = %e, "Failed to flush captured output");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shell(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn test_error_lines() {
        assert!(is_error_line("ERROR: something broke"));
        assert!(is_error_line("Traceback (most recent call last):"));
        assert!(is_error_line("ResourceExhaustedError: OOM when allocating tensor"));
        assert!(!is_error_line("total images/sec: 391.0"));
        assert!(OutputFilter::Full.keeps("step 10"));
        assert!(!OutputFilter::ErrorsOnly.keeps("step 10"));
    }

    #[test]
    fn test_outcome_ok_codes() {
        let killed = CommandOutcome { exit_code: None };
        assert!(killed.is_ok(&[0, 1, -1]));
        assert!(!killed.success());
        assert!(CommandOutcome { exit_code: Some(1) }.is_ok(&[0, 1]));
        assert!(!CommandOutcome { exit_code: Some(2) }.is_ok(&[0, 1]));
    }

    #[tokio::test]
    async fn test_full_capture_is_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let sinks = OutputSinks::new(
            "worker_0",
            dir.path().join("out.log"),
            dir.path().join("err.log"),
        );

        let outcome = run_streaming(
            shell("echo one; echo two; echo oops >&2"),
            "local-0",
            "worker_0",
            Some((sinks.clone(), OutputFilter::Full)),
        )
        .await
        .unwrap();

        assert!(outcome.success());
        assert_eq!(std::fs::read_to_string(&sinks.stdout).unwrap(), "one\ntwo\n");
        assert_eq!(std::fs::read_to_string(&sinks.stderr).unwrap(), "oops\n");
    }

    #[tokio::test]
    async fn test_capture_survives_invalid_utf8() {
        let dir = tempfile::tempdir().unwrap();
        let sinks = OutputSinks::new(
            "worker_0",
            dir.path().join("out.log"),
            dir.path().join("err.log"),
        );

        run_streaming(
            shell("printf 'step 1 \\377\\n'; echo 'total images/sec: 391.0'; printf 'no newline'"),
            "local-0",
            "worker_0",
            Some((sinks.clone(), OutputFilter::Full)),
        )
        .await
        .unwrap();

        let captured = std::fs::read(&sinks.stdout).unwrap();
        assert_eq!(
            captured,
            b"step 1 \xff\ntotal images/sec: 391.0\nno newline".to_vec()
        );
    }

    #[tokio::test]
    async fn test_errors_only_capture() {
        let dir = tempfile::tempdir().unwrap();
        let sinks = OutputSinks::new(
            "worker_1",
            dir.path().join("out.log"),
            dir.path().join("err.log"),
        );

        let outcome = run_streaming(
            shell("echo step 1; echo 'Error: lost connection'; exit 3"),
            "local-0",
            "worker_1",
            Some((sinks.clone(), OutputFilter::ErrorsOnly)),
        )
        .await
        .unwrap();

        assert_eq!(outcome.exit_code, Some(3));
        assert_eq!(
            std::fs::read_to_string(&sinks.stdout).unwrap(),
            "Error: lost connection\n"
        );
        assert_eq!(std::fs::read_to_string(&sinks.stderr).unwrap(), "");
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let result = run_streaming(
            Command::new("this-command-does-not-exist-12345"),
            "local-0",
            "setup",
            None,
        )
        .await;
        assert!(matches!(result, Err(ExecutionError::Spawn { .. })));
    }
}
