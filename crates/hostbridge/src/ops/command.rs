//! Command execution with a hard deadline.

use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::Instant;

use super::{OpError, OpResult};

/// Captured result of a command that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    /// True when the exit code was zero.
    pub success: bool,
    pub returncode: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Run `command` with `args` (no shell), killing it once `timeout` elapses.
///
/// A nonzero exit is returned as output with `success = false`. Timeouts and
/// spawn failures are errors, and no partial output is returned for them.
pub async fn run_command(
    command: &str,
    args: &[String],
    working_dir: Option<&Path>,
    timeout: Duration,
) -> OpResult<CommandOutput> {
    if command.trim().is_empty() {
        return Err(OpError::InvalidInput("command must not be empty".to_string()));
    }

    let mut cmd = Command::new(command);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    // Own process group, so a timeout also reaches background descendants.
    #[cfg(unix)]
    cmd.process_group(0);

    if let Some(dir) = working_dir {
        if !dir.is_dir() {
            return Err(OpError::NotFound(dir.display().to_string()));
        }
        cmd.current_dir(dir);
    }

    debug!("Running {} {:?} (timeout {:?})", command, args, timeout);

    let mut child = cmd.spawn().map_err(|e| OpError::Spawn {
        command: command.to_string(),
        message: e.to_string(),
    })?;
    let pid = child.id();

    let stdout_reader = child.stdout.take().map(spawn_reader);
    let stderr_reader = child.stderr.take().map(spawn_reader);
    let readers: Vec<AbortHandle> = [&stdout_reader, &stderr_reader]
        .into_iter()
        .flatten()
        .map(JoinHandle::abort_handle)
        .collect();

    // One deadline covers the exit and the end of both output streams; a
    // descendant holding the pipes open must not outlive the timeout.
    let deadline = Instant::now() + timeout;
    let finished = tokio::time::timeout_at(deadline, async {
        let status = child.wait().await?;
        let stdout = collect(stdout_reader).await;
        let stderr = collect(stderr_reader).await;
        Ok::<_, std::io::Error>((status, stdout, stderr))
    })
    .await;

    let (status, stdout, stderr) = match finished {
        Ok(result) => result?,
        Err(_) => {
            warn!(
                "Command {} exceeded {}s, killing PID {:?}",
                command,
                timeout.as_secs(),
                pid
            );
            kill_process_group(pid);
            if let Err(e) = child.kill().await {
                debug!("Kill of timed out command {} returned {:?}", command, e);
            }
            for reader in readers {
                reader.abort();
            }
            return Err(OpError::Timeout {
                secs: timeout.as_secs(),
            });
        }
    };

    Ok(CommandOutput {
        success: status.success(),
        returncode: exit_code(status),
        stdout,
        stderr,
    })
}

#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Some(pid) = pid.and_then(|pid| i32::try_from(pid).ok()) else {
        return;
    };
    if let Err(e) = killpg(Pid::from_raw(pid), Signal::SIGKILL) {
        debug!("killpg({}) failed: {}", pid, e);
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}

fn spawn_reader<R>(mut stream: R) -> JoinHandle<Vec<u8>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Err(e) = stream.read_to_end(&mut buf).await {
            debug!("Error reading command output: {:?}", e);
        }
        buf
    })
}

async fn collect(reader: Option<JoinHandle<Vec<u8>>>) -> String {
    match reader {
        Some(handle) => match handle.await {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(_) => String::new(),
        },
        None => String::new(),
    }
}

/// Exit code, or the negated signal number for signal-terminated processes.
pub(crate) fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return -signal;
        }
    }
    -1
}
