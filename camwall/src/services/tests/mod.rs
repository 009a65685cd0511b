//! Service-level tests
//!
//! Supervision, registry, health and rotation tests run against scripted
//! fake workers on paused tokio time, so minutes of backoff take no wall time.


// Common test utilities for services
#[cfg(test)]
pub mod common {
    use async_trait::async_trait;
    use shared::{DisplaySettings, PipelineMode, SourceDescriptor};
    use std::collections::{HashMap, VecDeque};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::sync::watch;
    use tokio::time::Instant;
    use uuid::Uuid;

    use crate::core::layout::LayoutEngine;
    use crate::core::lifecycle::BackoffPolicy;
    use crate::core::pipeline::{PipelineBuilder, PipelineOptions};
    use crate::error::{DisplayError, DisplayResult};
    use crate::services::registry::SupervisorRegistry;
    use crate::services::supervisor::{SupervisorHandle, SupervisorSettings};
    use crate::traits::{PipelineFactory, TokioClock, Worker, WorkerLauncher};
    use crate::types::{ExitInfo, OutputTarget, Placement, PipelineSpec, StopOutcome, SupervisedSnapshot, UnitPlan, WorkerRole};

    /// Upper bound for waiting on a state change in paused time
    pub const WAIT_LIMIT: Duration = Duration::from_secs(3600);

    /// What the next live worker of a source does
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Script {
        /// Exit with `code` after `after`
        Exit { after: Duration, code: i32 },
        /// Run until terminated
        Run,
        /// Run and ignore SIGTERM, so stopping it is forced
        Stubborn,
        /// Fail to spawn
        Refuse,
    }

    impl Script {
        pub fn crash() -> Self {
            Script::Exit {
                after: Duration::from_millis(200),
                code: 1,
            }
        }
    }

    #[derive(Debug, Clone)]
    struct ActiveWorker {
        id: Uuid,
        source: String,
        output: OutputTarget,
    }

    #[derive(Default)]
    struct FakeState {
        scripts: HashMap<String, VecDeque<Script>>,
        fallback: HashMap<String, Script>,
        launches: Vec<(String, WorkerRole)>,
        terminations: Vec<(String, WorkerRole)>,
        active: Vec<ActiveWorker>,
        collisions: Vec<String>,
        next_pid: u32,
    }

    /// Launcher whose workers follow per-source scripts
    #[derive(Clone, Default)]
    pub struct FakeLauncher {
        state: Arc<Mutex<FakeState>>,
    }

    impl FakeLauncher {
        pub fn new() -> Self {
            Self::default()
        }

        /// Queue scripts for the next launches of `source`
        pub fn script(&self, source: &str, scripts: impl IntoIterator<Item = Script>) -> &Self {
            let mut state = self.state.lock().unwrap();
            state.scripts.entry(source.to_string()).or_default().extend(scripts);
            self
        }

        /// Behaviour once the queued scripts are used up (default: run)
        pub fn always(&self, source: &str, script: Script) -> &Self {
            self.state.lock().unwrap().fallback.insert(source.to_string(), script);
            self
        }

        pub fn launches(&self, source: &str, role: WorkerRole) -> usize {
            let state = self.state.lock().unwrap();
            state.launches.iter().filter(|(s, r)| s == source && *r == role).count()
        }

        pub fn live_launches(&self, source: &str) -> usize {
            self.launches(source, WorkerRole::Live)
        }

        pub fn terminations(&self) -> Vec<(String, WorkerRole)> {
            self.state.lock().unwrap().terminations.clone()
        }

        pub fn terminated(&self, source: &str) -> bool {
            self.terminations().iter().any(|(s, _)| s == source)
        }

        /// Sources launched into an output some other worker still held
        pub fn collisions(&self) -> Vec<String> {
            self.state.lock().unwrap().collisions.clone()
        }

        pub fn active_count(&self) -> usize {
            self.state.lock().unwrap().active.len()
        }
    }

    impl WorkerLauncher for FakeLauncher {
        fn launch(&self, spec: &PipelineSpec) -> DisplayResult<Box<dyn Worker>> {
            let mut state = self.state.lock().unwrap();
            let script = match spec.role {
                WorkerRole::Placeholder => Script::Run,
                _ => {
                    let queued = state.scripts.get_mut(&spec.source).and_then(VecDeque::pop_front);
                    queued.unwrap_or_else(|| state.fallback.get(&spec.source).copied().unwrap_or(Script::Run))
                }
            };
            state.launches.push((spec.source.clone(), spec.role));

            if script == Script::Refuse {
                return Err(DisplayError::launch(&spec.source, "spawn refused"));
            }

            if state.active.iter().any(|w| w.output == spec.output) {
                state.collisions.push(spec.source.clone());
            }

            let id = Uuid::new_v4();
            state.next_pid += 1;
            let pid = 1000 + state.next_pid;
            state.active.push(ActiveWorker {
                id,
                source: spec.source.clone(),
                output: spec.output.clone(),
            });

            let deadline = match script {
                Script::Exit { after, .. } => Some(Instant::now() + after),
                _ => None,
            };

            Ok(Box::new(FakeWorker {
                id,
                pid,
                source: spec.source.clone(),
                role: spec.role,
                script,
                deadline,
                state: self.state.clone(),
            }))
        }
    }

    pub struct FakeWorker {
        id: Uuid,
        pid: u32,
        source: String,
        role: WorkerRole,
        script: Script,
        deadline: Option<Instant>,
        state: Arc<Mutex<FakeState>>,
    }

    impl FakeWorker {
        fn retire(&self) {
            self.state.lock().unwrap().active.retain(|w| w.id != self.id);
        }
    }

    impl Drop for FakeWorker {
        fn drop(&mut self) {
            if let Ok(mut state) = self.state.lock() {
                state.active.retain(|w| w.id != self.id);
            }
        }
    }

    #[async_trait]
    impl Worker for FakeWorker {
        fn id(&self) -> Uuid {
            self.id
        }

        fn pid(&self) -> Option<u32> {
            Some(self.pid)
        }

        async fn wait(&mut self) -> DisplayResult<ExitInfo> {
            match (self.script, self.deadline) {
                (Script::Exit { code, .. }, Some(deadline)) => {
                    tokio::time::sleep_until(deadline).await;
                    self.retire();
                    Ok(ExitInfo::code(code))
                }
                _ => std::future::pending().await,
            }
        }

        async fn terminate(&mut self, grace: Duration) -> StopOutcome {
            {
                let mut state = self.state.lock().unwrap();
                let still_active = state.active.iter().any(|w| w.id == self.id);
                if !still_active {
                    return StopOutcome::Clean;
                }
                state.terminations.push((self.source.clone(), self.role));
            }
            let outcome = if self.script == Script::Stubborn {
                tokio::time::sleep(grace).await;
                StopOutcome::Forced
            } else {
                StopOutcome::Clean
            };
            self.retire();
            outcome
        }
    }

    /// Builds specs without probing; every source is a copy pipeline
    pub struct StaticFactory {
        builder: PipelineBuilder,
    }

    impl StaticFactory {
        pub fn new() -> Self {
            Self {
                builder: PipelineBuilder::new(PipelineOptions::from_settings(&DisplaySettings::default(), None)),
            }
        }
    }

    #[async_trait]
    impl PipelineFactory for StaticFactory {
        async fn live_spec(&self, plan: &UnitPlan) -> DisplayResult<PipelineSpec> {
            match plan {
                UnitPlan::Source { descriptor, placement } => {
                    Ok(self.builder.build(descriptor, placement, PipelineMode::Copy))
                }
                UnitPlan::Compositor { spec } => Ok(spec.clone()),
            }
        }

        fn placeholder_spec(&self, plan: &UnitPlan) -> Option<PipelineSpec> {
            match plan {
                UnitPlan::Source { descriptor, placement } => Some(self.builder.build_placeholder(descriptor, placement)),
                UnitPlan::Compositor { .. } => None,
            }
        }
    }

    pub fn settings() -> SupervisorSettings {
        SupervisorSettings {
            startup_grace: Duration::from_secs(1),
            stable_after: Duration::from_secs(10),
            stop_grace: Duration::from_secs(1),
            restart_retries: 3,
            failure_window: Duration::from_secs(60),
            backoff: BackoffPolicy::Fixed(Duration::from_secs(2)),
        }
    }

    pub fn engine() -> LayoutEngine {
        LayoutEngine::new(1920, 1080, 2, 2, false)
    }

    pub fn source_plan(name: &str, slot: usize) -> UnitPlan {
        UnitPlan::source(
            SourceDescriptor::new(name, format!("rtsp://10.0.0.{}/stream", slot + 10)),
            Placement {
                source: name.to_string(),
                rect: engine().cell_rect(slot),
                slot,
            },
        )
    }

    pub fn spawn(plan: UnitPlan, settings: SupervisorSettings, launcher: &FakeLauncher) -> SupervisorHandle {
        SupervisorHandle::spawn(
            plan,
            settings,
            Arc::new(launcher.clone()),
            Arc::new(StaticFactory::new()),
            Arc::new(TokioClock),
        )
    }

    pub fn registry(settings: SupervisorSettings, launcher: &FakeLauncher) -> Arc<SupervisorRegistry> {
        Arc::new(SupervisorRegistry::new(
            settings,
            Arc::new(launcher.clone()),
            Arc::new(StaticFactory::new()),
            Arc::new(TokioClock),
        ))
    }

    /// Wait until the published snapshot satisfies `condition`
    pub async fn wait_for<F>(rx: &mut watch::Receiver<SupervisedSnapshot>, condition: F) -> SupervisedSnapshot
    where
        F: FnMut(&SupervisedSnapshot) -> bool,
    {
        let snapshot = tokio::time::timeout(WAIT_LIMIT, rx.wait_for(condition))
            .await
            .expect("condition not reached in time")
            .expect("supervision task ended");
        snapshot.clone()
    }

    /// Poll the registry until `name` satisfies `condition`
    pub async fn wait_for_unit<F>(registry: &SupervisorRegistry, name: &str, mut condition: F) -> SupervisedSnapshot
    where
        F: FnMut(&SupervisedSnapshot) -> bool,
    {
        let deadline = Instant::now() + WAIT_LIMIT;
        loop {
            if let Some(snapshot) = registry.snapshot(name).await {
                if condition(&snapshot) {
                    return snapshot;
                }
            }
            assert!(Instant::now() < deadline, "{name} did not reach the expected state");
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}
