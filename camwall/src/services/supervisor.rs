//! Per-unit supervision task
//!
//! Each supervised unit (one camera slot, or the compositor) runs in its own
//! tokio task. The task owns its worker processes outright; nothing else
//! holds a reference to them. It receives commands over an mpsc channel and
//! publishes its state through a watch channel, so units never share locks
//! and one unit's backoff never delays another.

use shared::{camera_debug, camera_error, camera_info, camera_warn, DisplaySettings, ProcessStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{AbortHandle, JoinHandle};

use crate::core::lifecycle::{transition, BackoffPolicy, LifecycleEvent, RestartDecision, RestartTracker};
use crate::error::{DisplayError, DisplayResult};
use crate::traits::{Clock, PipelineFactory, Worker, WorkerLauncher};
use crate::types::{ExitInfo, StopOutcome, SupervisedSnapshot, UnitPlan};

const COMMAND_BUFFER: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorSettings {
    pub startup_grace: Duration,
    pub stable_after: Duration,
    pub stop_grace: Duration,
    pub restart_retries: u32,
    pub failure_window: Duration,
    pub backoff: BackoffPolicy,
}

impl SupervisorSettings {
    pub fn from_settings(settings: &DisplaySettings) -> Self {
        Self {
            startup_grace: Duration::from_secs(settings.startup_grace),
            stable_after: Duration::from_secs(settings.stable_after),
            stop_grace: Duration::from_secs(settings.stop_grace),
            restart_retries: settings.restart_retries,
            failure_window: Duration::from_secs(settings.failure_window),
            backoff: BackoffPolicy::from_settings(settings),
        }
    }
}

#[derive(Debug)]
pub enum SupervisorCommand {
    /// Stop all workers; the outcome is sent once they are reaped
    Stop(oneshot::Sender<StopOutcome>),
    ShowPlaceholder,
    Recover,
}

/// Owner's side of one supervision task
pub struct SupervisorHandle {
    plan: UnitPlan,
    commands: mpsc::Sender<SupervisorCommand>,
    snapshot: watch::Receiver<SupervisedSnapshot>,
    task: JoinHandle<()>,
}

impl SupervisorHandle {
    pub fn spawn(
        plan: UnitPlan,
        settings: SupervisorSettings,
        launcher: Arc<dyn WorkerLauncher>,
        factory: Arc<dyn PipelineFactory>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (status_tx, status_rx) = watch::channel(SupervisedSnapshot::starting());

        let supervision = SupervisionLoop {
            name: plan.name().to_string(),
            plan: plan.clone(),
            settings,
            launcher,
            factory,
            clock,
            commands: command_rx,
            status: status_tx,
            tracker: RestartTracker::new(settings.restart_retries, settings.failure_window, settings.backoff),
            state: ProcessStatus::Starting,
            live: None,
            placeholder: None,
        };
        let task = tokio::spawn(supervision.run());

        Self {
            plan,
            commands: command_tx,
            snapshot: status_rx,
            task,
        }
    }

    pub fn name(&self) -> &str {
        self.plan.name()
    }

    pub fn plan(&self) -> &UnitPlan {
        &self.plan
    }

    pub fn snapshot(&self) -> SupervisedSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SupervisedSnapshot> {
        self.snapshot.clone()
    }

    pub fn commands(&self) -> mpsc::Sender<SupervisorCommand> {
        self.commands.clone()
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.task.abort_handle()
    }

    /// Stop the unit and wait until its task has finished
    pub async fn stop(self) -> StopOutcome {
        let (ack_tx, ack_rx) = oneshot::channel();
        let outcome = if self.commands.send(SupervisorCommand::Stop(ack_tx)).await.is_ok() {
            // A dropped ack means the task died and its workers were killed on drop
            ack_rx.await.unwrap_or(StopOutcome::Forced)
        } else {
            StopOutcome::Forced
        };
        let _ = self.task.await;
        outcome
    }
}

enum Phase {
    Launch,
    Backoff(Duration),
    Exhausted,
}

enum Flow {
    Continue,
    Recover,
    Stopped,
}

struct SupervisionLoop {
    name: String,
    plan: UnitPlan,
    settings: SupervisorSettings,
    launcher: Arc<dyn WorkerLauncher>,
    factory: Arc<dyn PipelineFactory>,
    clock: Arc<dyn Clock>,
    commands: mpsc::Receiver<SupervisorCommand>,
    status: watch::Sender<SupervisedSnapshot>,
    tracker: RestartTracker,
    state: ProcessStatus,
    live: Option<Box<dyn Worker>>,
    placeholder: Option<Box<dyn Worker>>,
}

/// Resolves when `worker` exits; never resolves when there is none
async fn wait_worker(worker: &mut Option<Box<dyn Worker>>) -> DisplayResult<ExitInfo> {
    match worker {
        Some(worker) => worker.wait().await,
        None => std::future::pending().await,
    }
}

impl SupervisionLoop {
    async fn run(mut self) {
        camera_debug!(self.name, "🔧 Supervision started");

        let mut phase = Phase::Launch;
        loop {
            let next = match phase {
                Phase::Launch => self.launch_and_watch().await,
                Phase::Backoff(delay) => self.backoff(delay).await,
                Phase::Exhausted => self.exhausted().await,
            };
            match next {
                Some(next) => phase = next,
                None => break,
            }
        }

        camera_debug!(self.name, "🔧 Supervision ended");
    }

    async fn launch_and_watch(&mut self) -> Option<Phase> {
        if self.state == ProcessStatus::Failed {
            self.apply(LifecycleEvent::RestartDue);
            self.tracker.note_restart();
        }
        self.clear_placeholder().await;
        self.publish();

        // Probing can take a while; keep answering commands meanwhile
        let factory = self.factory.clone();
        let plan = self.plan.clone();
        let build = factory.live_spec(&plan);
        tokio::pin!(build);
        let spec = loop {
            tokio::select! {
                spec = &mut build => break spec,
                cmd = self.commands.recv() => {
                    if let Flow::Stopped = self.handle_command(cmd).await {
                        return None;
                    }
                }
            }
        };

        let spec = match spec {
            Ok(spec) => spec,
            Err(e) => return Some(self.on_failure(LifecycleEvent::LaunchFailed, e.to_string())),
        };

        let worker = match self.launcher.launch(&spec) {
            Ok(worker) => worker,
            Err(e) => return Some(self.on_failure(LifecycleEvent::LaunchFailed, e.to_string())),
        };

        let started_at = self.clock.now();
        let (pid, worker_id) = (worker.pid(), worker.id());
        self.live = Some(worker);
        self.status.send_modify(|s| {
            s.started_at = Some(started_at);
            s.pid = pid;
            s.worker_id = Some(worker_id);
            s.mode = spec.mode;
        });

        let grace = tokio::time::sleep(self.settings.startup_grace);
        tokio::pin!(grace);
        loop {
            tokio::select! {
                exit = wait_worker(&mut self.live) => return Some(self.on_exit(exit)),
                _ = &mut grace => break,
                cmd = self.commands.recv() => {
                    if let Flow::Stopped = self.handle_command(cmd).await {
                        return None;
                    }
                }
            }
        }

        self.apply(LifecycleEvent::StartupConfirmed);
        self.tracker.record_running();
        self.publish();
        match spec.mode {
            Some(mode) => {
                camera_info!(self.name, pid = ?pid, "✅ Running ({})", mode);
            }
            None => {
                camera_info!(self.name, pid = ?pid, "✅ Running");
            }
        }

        let stable = tokio::time::sleep(self.settings.stable_after);
        tokio::pin!(stable);
        let mut stabilized = false;
        loop {
            tokio::select! {
                exit = wait_worker(&mut self.live) => return Some(self.on_exit(exit)),
                _ = &mut stable, if !stabilized => {
                    stabilized = true;
                    if self.tracker.consecutive_failures() > 0 {
                        camera_debug!(self.name, "Running stable, failure count reset");
                    }
                    self.tracker.record_stable();
                    self.publish();
                }
                cmd = self.commands.recv() => {
                    if let Flow::Stopped = self.handle_command(cmd).await {
                        return None;
                    }
                }
            }
        }
    }

    async fn backoff(&mut self, delay: Duration) -> Option<Phase> {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return Some(Phase::Launch),
                exit = wait_worker(&mut self.placeholder) => self.on_placeholder_exit(exit),
                cmd = self.commands.recv() => {
                    if let Flow::Stopped = self.handle_command(cmd).await {
                        return None;
                    }
                }
            }
        }
    }

    async fn exhausted(&mut self) -> Option<Phase> {
        loop {
            tokio::select! {
                exit = wait_worker(&mut self.placeholder) => self.on_placeholder_exit(exit),
                cmd = self.commands.recv() => match self.handle_command(cmd).await {
                    Flow::Stopped => return None,
                    Flow::Recover => {
                        if self.tracker.grant_recovery() {
                            camera_info!(self.name, "🔄 Recovery attempt granted");
                            self.publish();
                            return Some(Phase::Launch);
                        }
                    }
                    Flow::Continue => {}
                },
            }
        }
    }

    async fn handle_command(&mut self, cmd: Option<SupervisorCommand>) -> Flow {
        match cmd {
            // Every handle is gone; nobody can stop us later
            None => {
                self.shutdown().await;
                Flow::Stopped
            }
            Some(SupervisorCommand::Stop(ack)) => {
                let outcome = self.shutdown().await;
                let _ = ack.send(outcome);
                Flow::Stopped
            }
            Some(SupervisorCommand::ShowPlaceholder) => {
                self.show_placeholder();
                Flow::Continue
            }
            Some(SupervisorCommand::Recover) => Flow::Recover,
        }
    }

    fn on_exit(&mut self, exit: DisplayResult<ExitInfo>) -> Phase {
        self.live = None;
        let reason = match exit {
            Ok(info) => DisplayError::RuntimeExit {
                source_name: self.name.clone(),
                exit: info.to_string(),
            }
            .to_string(),
            Err(e) => e.to_string(),
        };
        self.on_failure(LifecycleEvent::Exited, reason)
    }

    fn on_failure(&mut self, event: LifecycleEvent, reason: String) -> Phase {
        self.apply(event);
        let decision = self.tracker.record_failure(self.clock.now());
        self.status.send_modify(|s| {
            s.last_exit = Some(reason.clone());
            s.started_at = None;
            s.pid = None;
            s.worker_id = None;
        });
        self.publish();

        let failures = self.tracker.consecutive_failures();
        match decision {
            RestartDecision::Retry { delay } => {
                camera_warn!(
                    self.name,
                    failures,
                    "⚠️ {}; restarting in {:?}",
                    reason,
                    delay
                );
                Phase::Backoff(delay)
            }
            RestartDecision::Exhausted => {
                camera_error!(
                    self.name,
                    failures,
                    "❌ {}; retry budget exhausted, waiting for recovery",
                    reason
                );
                Phase::Exhausted
            }
        }
    }

    fn show_placeholder(&mut self) {
        if self.state != ProcessStatus::Failed || self.placeholder.is_some() {
            return;
        }
        let Some(spec) = self.factory.placeholder_spec(&self.plan) else {
            return;
        };
        match self.launcher.launch(&spec) {
            Ok(worker) => {
                camera_info!(self.name, "🖼️ Showing placeholder");
                self.placeholder = Some(worker);
                self.publish();
            }
            Err(e) => {
                camera_warn!(self.name, error = %e, "⚠️ Placeholder failed to start");
            }
        }
    }

    fn on_placeholder_exit(&mut self, exit: DisplayResult<ExitInfo>) {
        self.placeholder = None;
        match exit {
            Ok(info) => {
                camera_warn!(self.name, "⚠️ Placeholder exited: {}", info);
            }
            Err(e) => {
                camera_warn!(self.name, error = %e, "⚠️ Placeholder lost");
            }
        }
        self.publish();
    }

    async fn clear_placeholder(&mut self) {
        if let Some(mut placeholder) = self.placeholder.take() {
            placeholder.terminate(self.settings.stop_grace).await;
            camera_debug!(self.name, "Placeholder removed");
        }
    }

    async fn shutdown(&mut self) -> StopOutcome {
        let grace = self.settings.stop_grace;
        let mut outcome = StopOutcome::Clean;

        if let Some(mut placeholder) = self.placeholder.take() {
            outcome = outcome.combine(placeholder.terminate(grace).await);
        }
        if let Some(mut live) = self.live.take() {
            outcome = outcome.combine(live.terminate(grace).await);
        }

        self.apply(LifecycleEvent::StopRequested);
        self.status.send_modify(|s| {
            s.started_at = None;
            s.pid = None;
        });
        self.publish();

        if outcome == StopOutcome::Forced {
            camera_warn!(self.name, "🛑 Stopped (forced)");
        } else {
            camera_info!(self.name, "🛑 Stopped");
        }
        outcome
    }

    fn apply(&mut self, event: LifecycleEvent) {
        match transition(self.state, event) {
            Some(next) => self.state = next,
            None => {
                camera_debug!(self.name, state = %self.state, event = ?event, "Ignoring invalid transition");
            }
        }
    }

    /// Copy the loop's view into the published snapshot
    fn publish(&self) {
        let state = self.state;
        let failures = self.tracker.consecutive_failures();
        let restarts = self.tracker.restart_count();
        let exhausted_since = self.tracker.exhausted_since();
        let placeholder_active = self.placeholder.is_some();

        self.status.send_modify(|s| {
            s.state = state;
            s.consecutive_failures = failures;
            s.restart_count = restarts;
            s.exhausted_since = exhausted_since;
            s.placeholder_active = placeholder_active;
        });
    }
}
