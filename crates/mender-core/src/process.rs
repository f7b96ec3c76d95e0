//! Subprocess runner backed by `tokio::process`.

use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use mender_contracts::execution::{ExecutionResult, PreparedCommand};

use crate::traits::{ProcessRunner, RunLimits};

/// How long to wait for output pipes to drain after the process is gone.
/// Grandchildren that inherited the pipes can keep them open indefinitely.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Runs commands through `sh -c` with stdin closed.
///
/// An elevated command carries its own `sudo` prefix; the runner does not
/// add privileges.
#[derive(Debug, Clone)]
pub struct ShellRunner {
    shell: String,
}

impl ShellRunner {
    pub fn new() -> Self {
        Self { shell: "sh".to_string() }
    }

    pub fn with_shell(shell: impl Into<String>) -> Self {
        Self { shell: shell.into() }
    }
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProcessRunner for ShellRunner {
    async fn run(&self, prepared: &PreparedCommand, limits: RunLimits<'_>) -> ExecutionResult {
        let started_at = Utc::now();
        let start = Instant::now();

        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(&prepared.command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(command = %prepared.command, error = %e, "failed to spawn");
                return ExecutionResult {
                    command: prepared.command.clone(),
                    exit_status: None,
                    stdout: String::new(),
                    stderr: format!("failed to spawn '{}': {}", self.shell, e),
                    duration: start.elapsed(),
                    elevated: prepared.elevated,
                    timed_out: false,
                    started_at,
                };
            }
        };

        let stdout_task = child.stdout.take().map(|s| tokio::spawn(read_all(s)));
        let stderr_task = child.stderr.take().map(|s| tokio::spawn(read_all(s)));

        let (exit_status, timed_out) = tokio::select! {
            status = child.wait() => (status.ok().and_then(|s| s.code()), false),
            _ = tokio::time::sleep(limits.timeout) => {
                warn!(command = %prepared.command, timeout_s = limits.timeout.as_secs(), "command timed out");
                kill(&mut child).await;
                (None, true)
            }
            _ = limits.deadline.expired() => {
                debug!(command = %prepared.command, grace_ms = limits.grace_period.as_millis() as u64, "deadline fired, waiting out grace period");
                match tokio::time::timeout(limits.grace_period, child.wait()).await {
                    Ok(status) => (status.ok().and_then(|s| s.code()), false),
                    Err(_) => {
                        warn!(command = %prepared.command, "grace period over, killing command");
                        kill(&mut child).await;
                        (None, true)
                    }
                }
            }
        };

        ExecutionResult {
            command: prepared.command.clone(),
            exit_status,
            stdout: drain(stdout_task).await,
            stderr: drain(stderr_task).await,
            duration: start.elapsed(),
            elevated: prepared.elevated,
            timed_out,
            started_at,
        }
    }
}

/// Read a pipe to the end. A read error keeps what arrived and appends a
/// marker so the output is not mistaken for complete.
pub(crate) async fn read_all<R: AsyncRead + Unpin>(mut reader: R) -> String {
    let mut buf = Vec::new();
    let failure = reader.read_to_end(&mut buf).await.err();
    let mut output = String::from_utf8_lossy(&buf).into_owned();
    if let Some(e) = failure {
        warn!(error = %e, bytes = buf.len(), "reading command output failed");
        if !output.is_empty() && !output.ends_with('\n') {
            output.push('\n');
        }
        output.push_str(&format!("[output truncated: {e}]"));
    }
    output
}

async fn drain(task: Option<JoinHandle<String>>) -> String {
    let Some(task) = task else {
        return String::new();
    };
    let abort = task.abort_handle();
    match tokio::time::timeout(DRAIN_TIMEOUT, task).await {
        Ok(Ok(output)) => output,
        Ok(Err(_)) => String::new(),
        Err(_) => {
            abort.abort();
            String::new()
        }
    }
}

async fn kill(child: &mut Child) {
    if let Err(e) = child.kill().await {
        warn!(error = %e, "failed to kill child process");
    }
}
