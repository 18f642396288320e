//! Process tracking for programs started on behalf of remote clients.
//!
//! Only processes spawned through [`ProcessTracker::start`] are tracked, so a
//! PID reused by the OS after exit can never be signalled by mistake.

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use crate::ops::exit_code;

/// Default grace period between SIGTERM and SIGKILL.
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(5);

/// Errors from process tracking.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("No program with PID {0} is being tracked")]
    NotTracked(u32),

    #[error("invalid program: {0}")]
    InvalidInput(String),

    #[error("failed to start '{program}': {message}")]
    Spawn { program: String, message: String },
}

/// Snapshot of a tracked process.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessInfo {
    pub pid: u32,
    pub program: String,
    pub args: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub running: bool,
}

/// How a stop request ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StopOutcome {
    pub pid: u32,
    /// True when the grace period ran out and the process was killed.
    pub forced: bool,
    pub exit_code: Option<i32>,
}

#[derive(Debug)]
struct ChildSlot {
    child: Child,
    /// Set once a stop completed; later stoppers holding the same entry bail.
    stopped: bool,
}

/// A process started by the tracker.
#[derive(Debug)]
struct TrackedProcess {
    pid: u32,
    program: String,
    args: Vec<String>,
    started_at: DateTime<Utc>,
    slot: Mutex<ChildSlot>,
}

impl TrackedProcess {
    fn info(&self, running: bool) -> ProcessInfo {
        ProcessInfo {
            pid: self.pid,
            program: self.program.clone(),
            args: self.args.clone(),
            started_at: self.started_at,
            running,
        }
    }
}

/// Tracks spawned programs and stops them gracefully.
///
/// Cloning shares the same process table.
#[derive(Debug, Clone)]
pub struct ProcessTracker {
    processes: Arc<Mutex<HashMap<u32, Arc<TrackedProcess>>>>,
    grace: Duration,
}

impl Default for ProcessTracker {
    fn default() -> Self {
        Self::new(DEFAULT_STOP_GRACE)
    }
}

impl ProcessTracker {
    /// Create a tracker with the given SIGTERM grace period.
    pub fn new(grace: Duration) -> Self {
        Self {
            processes: Arc::new(Mutex::new(HashMap::new())),
            grace,
        }
    }

    /// Start `program` with `args` and begin tracking it. Returns the PID.
    pub async fn start(&self, program: &str, args: &[String]) -> Result<u32, ProcessError> {
        if program.trim().is_empty() {
            return Err(ProcessError::InvalidInput(
                "program_path must not be empty".to_string(),
            ));
        }

        debug!("Starting {} {:?}", program, args);

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ProcessError::Spawn {
                program: program.to_string(),
                message: e.to_string(),
            })?;

        let pid = child.id().ok_or_else(|| ProcessError::Spawn {
            program: program.to_string(),
            message: "process exited before its PID could be read".to_string(),
        })?;

        let tracked = Arc::new(TrackedProcess {
            pid,
            program: program.to_string(),
            args: args.to_vec(),
            started_at: Utc::now(),
            slot: Mutex::new(ChildSlot {
                child,
                stopped: false,
            }),
        });

        self.processes.lock().await.insert(pid, tracked);

        info!("Started {} with PID {}", program, pid);
        Ok(pid)
    }

    /// Stop a tracked process: SIGTERM, wait out the grace period, then kill.
    ///
    /// The PID stays tracked until the process is confirmed gone.
    pub async fn stop(&self, pid: u32) -> Result<StopOutcome, ProcessError> {
        let tracked = self
            .processes
            .lock()
            .await
            .get(&pid)
            .cloned()
            .ok_or(ProcessError::NotTracked(pid))?;

        let outcome = {
            let mut slot = tracked.slot.lock().await;
            if slot.stopped {
                return Err(ProcessError::NotTracked(pid));
            }
            let outcome = terminate(pid, &mut slot.child, self.grace).await;
            slot.stopped = true;
            outcome
        };

        let mut processes = self.processes.lock().await;
        if processes
            .get(&pid)
            .is_some_and(|current| Arc::ptr_eq(current, &tracked))
        {
            processes.remove(&pid);
        }

        info!(
            "Stopped {} (PID {}, forced: {}, exit code: {:?})",
            tracked.program, pid, outcome.forced, outcome.exit_code
        );
        Ok(outcome)
    }

    /// Snapshot of all tracked processes, ordered by PID.
    pub async fn list(&self) -> Vec<ProcessInfo> {
        let entries: Vec<Arc<TrackedProcess>> =
            self.processes.lock().await.values().cloned().collect();

        let mut infos: Vec<ProcessInfo> = entries
            .iter()
            .map(|tracked| {
                // A locked slot means a stop is in flight; report it as running.
                let running = match tracked.slot.try_lock() {
                    Ok(mut slot) => !slot.stopped && matches!(slot.child.try_wait(), Ok(None)),
                    Err(_) => true,
                };
                tracked.info(running)
            })
            .collect();

        infos.sort_by_key(|info| info.pid);
        infos
    }

    /// Number of tracked processes.
    pub async fn len(&self) -> usize {
        self.processes.lock().await.len()
    }

    /// Whether nothing is tracked.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Stop every tracked process concurrently. Used on service shutdown.
    pub async fn shutdown(&self) -> Vec<StopOutcome> {
        let pids: Vec<u32> = self.processes.lock().await.keys().copied().collect();
        if pids.is_empty() {
            return Vec::new();
        }

        info!("Stopping {} tracked processes", pids.len());

        let results = futures::future::join_all(pids.iter().map(|&pid| self.stop(pid))).await;

        results
            .into_iter()
            .filter_map(|result| match result {
                Ok(outcome) => Some(outcome),
                Err(e) => {
                    debug!("Skipping process during shutdown: {}", e);
                    None
                }
            })
            .collect()
    }
}

/// Graceful-then-forced termination of a single child.
async fn terminate(pid: u32, child: &mut Child, grace: Duration) -> StopOutcome {
    // Already exited on its own: reap and report.
    if let Ok(Some(status)) = child.try_wait() {
        debug!("PID {} had already exited", pid);
        return StopOutcome {
            pid,
            forced: false,
            exit_code: Some(exit_code(status)),
        };
    }

    send_sigterm(pid, child);

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => StopOutcome {
            pid,
            forced: false,
            exit_code: Some(exit_code(status)),
        },
        Ok(Err(e)) => {
            warn!("Error waiting for PID {}: {:?}", pid, e);
            StopOutcome {
                pid,
                forced: false,
                exit_code: None,
            }
        }
        Err(_) => {
            warn!(
                "PID {} did not exit within {:?}, sending SIGKILL",
                pid, grace
            );
            if let Err(e) = child.kill().await {
                warn!("Failed to kill PID {}: {:?}", pid, e);
            }
            let exit_code = match child.try_wait() {
                Ok(Some(status)) => Some(exit_code(status)),
                _ => None,
            };
            StopOutcome {
                pid,
                forced: true,
                exit_code,
            }
        }
    }
}

#[cfg(unix)]
fn send_sigterm(pid: u32, _child: &mut Child) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        debug!("SIGTERM to PID {} failed: {}", pid, e);
    }
}

#[cfg(not(unix))]
fn send_sigterm(pid: u32, child: &mut Child) {
    if let Err(e) = child.start_kill() {
        debug!("Terminate of PID {} failed: {}", pid, e);
    }
}
