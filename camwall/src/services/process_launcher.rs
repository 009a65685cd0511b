//! Real worker process launcher
//!
//! Spawns media workers as tokio child processes. Each child runs in its
//! own process group so terminal signals reach only the wall, and its
//! stderr is drained into a short tail kept for exit reports.

use async_trait::async_trait;
use shared::{camera_debug, camera_error, camera_info};
use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use uuid::Uuid;

use crate::error::{DisplayError, DisplayResult};
use crate::traits::{Worker, WorkerLauncher};
use crate::types::{ExitInfo, PipelineSpec, StopOutcome};

const DEFAULT_TAIL_LINES: usize = 20;

type StderrTail = Arc<Mutex<VecDeque<String>>>;

/// Launcher for real external processes
#[derive(Debug, Clone)]
pub struct RealWorkerLauncher {
    tail_lines: usize,
}

impl Default for RealWorkerLauncher {
    fn default() -> Self {
        Self::new()
    }
}

impl RealWorkerLauncher {
    pub fn new() -> Self {
        Self {
            tail_lines: DEFAULT_TAIL_LINES,
        }
    }

    /// Configure how many stderr lines are kept (fluent API)
    pub fn with_tail_lines(mut self, tail_lines: usize) -> Self {
        self.tail_lines = tail_lines.max(1);
        self
    }

    fn command(spec: &PipelineSpec) -> Command {
        let mut cmd = Command::new(&spec.invocation.program);
        cmd.args(&spec.invocation.args);
        for key in &spec.invocation.env_remove {
            cmd.env_remove(key);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        cmd.process_group(0);

        cmd
    }
}

impl WorkerLauncher for RealWorkerLauncher {
    fn launch(&self, spec: &PipelineSpec) -> DisplayResult<Box<dyn Worker>> {
        let mut child = Self::command(spec).spawn().map_err(|e| {
            let reason = if e.kind() == std::io::ErrorKind::NotFound {
                format!("{} not found", spec.invocation.program)
            } else {
                format!("cannot spawn {}: {}", spec.invocation.program, e)
            };
            DisplayError::launch(&spec.source, reason)
        })?;

        let tail: StderrTail = Arc::new(Mutex::new(VecDeque::with_capacity(self.tail_lines)));
        if let Some(stderr) = child.stderr.take() {
            spawn_stderr_consumer(stderr, spec.source.clone(), tail.clone(), self.tail_lines);
        }

        let worker = ChildWorker {
            id: Uuid::new_v4(),
            source: spec.source.clone(),
            child,
            tail,
        };
        camera_info!(
            worker.source,
            pid = ?worker.pid(),
            role = ?spec.role,
            "🚀 Worker started: {}",
            spec.invocation.program
        );
        Ok(Box::new(worker))
    }
}

/// Drain worker stderr so the child never blocks on a full pipe
fn spawn_stderr_consumer(stderr: ChildStderr, source: String, tail: StderrTail, keep: usize) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line.trim().is_empty() {
                continue;
            }
            camera_debug!(source, "worker: {}", line);
            if let Ok(mut tail) = tail.lock() {
                if tail.len() == keep {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
        }
    });
}

/// A spawned child process
pub struct ChildWorker {
    id: Uuid,
    source: String,
    child: Child,
    tail: StderrTail,
}

impl ChildWorker {
    fn last_stderr_line(&self) -> Option<String> {
        self.tail.lock().ok().and_then(|tail| tail.back().cloned())
    }

    #[cfg(unix)]
    fn send_sigterm(&self) -> bool {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        match self.child.id() {
            Some(pid) => kill(Pid::from_raw(pid as i32), Signal::SIGTERM).is_ok(),
            None => false,
        }
    }

    #[cfg(not(unix))]
    fn send_sigterm(&self) -> bool {
        false
    }
}

#[async_trait]
impl Worker for ChildWorker {
    fn id(&self) -> Uuid {
        self.id
    }

    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    async fn wait(&mut self) -> DisplayResult<ExitInfo> {
        let status = self.child.wait().await?;

        #[cfg(unix)]
        let signal = std::os::unix::process::ExitStatusExt::signal(&status);
        #[cfg(not(unix))]
        let signal = None;

        Ok(ExitInfo {
            code: status.code(),
            signal,
            detail: self.last_stderr_line(),
        })
    }

    async fn terminate(&mut self, grace: Duration) -> StopOutcome {
        match self.child.try_wait() {
            Ok(Some(_)) => return StopOutcome::Clean,
            Ok(None) => {}
            Err(e) => {
                camera_error!(self.source, error = %e, "❌ Cannot query worker state");
            }
        }

        if self.send_sigterm() {
            if let Ok(Ok(_)) = tokio::time::timeout(grace, self.child.wait()).await {
                camera_debug!(self.source, "🛑 Worker exited after SIGTERM");
                return StopOutcome::Clean;
            }
        }

        if let Err(e) = self.child.kill().await {
            camera_error!(self.source, error = %e, "❌ Failed to kill worker");
        }
        camera_debug!(self.source, "🛑 Worker killed after {:?} grace", grace);
        StopOutcome::Forced
    }
}
