//! Top-level coordinator for the video wall
//!
//! `DisplayWall` computes the layout, starts one supervision unit per visible
//! source (plus the compositor in composed mode), and runs the health
//! monitor, rotation scheduler and status reporter beside them. It owns the
//! registry; every other task only borrows it through an `Arc`.

use shared::{camera_info, logging, AppConfig, DisplaySettings, OutputMode, SourceDescriptor, StatusSnapshot};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::health::{HealthPolicy, HealthTracker};
use crate::core::layout::{LayoutEngine, LayoutPlan};
use crate::core::pipeline::{PipelineBuilder, PipelineOptions};
use crate::error::{DisplayError, DisplayResult};
use crate::services::codec_probe::{CodecProbe, FfprobeInspector};
use crate::services::health_monitor::{HealthMap, HealthMonitor};
use crate::services::hw_detect::detect_hw_encoder;
use crate::services::pipeline_factory::ProbingPipelineFactory;
use crate::services::process_launcher::RealWorkerLauncher;
use crate::services::registry::SupervisorRegistry;
use crate::services::rotation_scheduler::{LayoutSender, RotationScheduler};
use crate::services::status_reporter::{StatusReporter, StatusView};
use crate::services::supervisor::SupervisorSettings;
use crate::traits::{Clock, CodecInspector, TokioClock, WorkerLauncher};
use crate::types::{PlacementTable, StopOutcome, UnitPlan, COMPOSITOR_UNIT};

/// Compute the layout for `config` without starting anything
pub fn plan_layout(config: &AppConfig) -> DisplayResult<LayoutPlan> {
    let descriptors = unit_descriptors(config)?;
    LayoutEngine::from_settings(&config.display).compute_placements(&descriptors)
}

/// Descriptors keyed into the registry; none may take the compositor's name
fn unit_descriptors(config: &AppConfig) -> DisplayResult<Vec<SourceDescriptor>> {
    let descriptors = config.descriptors()?;
    if descriptors.iter().any(|d| d.name == COMPOSITOR_UNIT) {
        return Err(DisplayError::config(
            "cameras.name",
            format!("'{COMPOSITOR_UNIT}' is reserved for the compositor"),
        ));
    }
    Ok(descriptors)
}

/// What a reload changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReloadReport {
    /// Display settings changed, so every unit was restarted
    pub full_restart: bool,
    pub stopped: Vec<String>,
    pub started: Vec<String>,
    pub compositor_rebuilt: bool,
}

/// Background tasks sharing one cancellation token
struct TaskGroup {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl TaskGroup {
    fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            handles: Vec::new(),
        }
    }

    fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn push(&mut self, handle: JoinHandle<()>) {
        self.handles.push(handle);
    }

    async fn stop(&mut self) {
        self.cancel.cancel();
        for handle in self.handles.drain(..) {
            if let Err(e) = handle.await {
                if e.is_panic() {
                    warn!(error = %e, "⚠️ Background task panicked");
                }
            }
        }
        self.cancel = CancellationToken::new();
    }
}

/// Injected collaborators, kept so the wall can rebuild itself on reload
#[derive(Clone)]
struct Collaborators {
    launcher: Arc<dyn WorkerLauncher>,
    inspector: Arc<dyn CodecInspector>,
    clock: Arc<dyn Clock>,
    hw_encoder: Option<String>,
}

pub struct DisplayWall {
    config: AppConfig,
    deps: Collaborators,
    builder: PipelineBuilder,
    registry: Arc<SupervisorRegistry>,
    layout: LayoutSender,
    layout_rx: watch::Receiver<Arc<PlacementTable>>,
    hidden: Vec<String>,
    health: watch::Receiver<HealthMap>,
    monitor_tasks: TaskGroup,
    layout_tasks: TaskGroup,
}

impl DisplayWall {
    /// Start the wall with real worker processes
    pub async fn start(config: AppConfig) -> DisplayResult<Self> {
        let display = &config.display;

        if display.output_mode == OutputMode::Composed
            && tokio::fs::metadata(&display.framebuffer_device).await.is_err()
        {
            return Err(DisplayError::ResourceExhausted {
                reason: format!("framebuffer device {} is not available", display.framebuffer_device),
            });
        }

        let hw_encoder = if display.hardware_accel {
            detect_hw_encoder(&display.ffmpeg_bin).await
        } else {
            None
        };

        let launcher: Arc<dyn WorkerLauncher> = Arc::new(RealWorkerLauncher::new());
        let inspector: Arc<dyn CodecInspector> =
            Arc::new(FfprobeInspector::new(&display.ffprobe_bin).with_udp_transport(display.use_udp_transport));

        Self::start_with(config, launcher, inspector, Arc::new(TokioClock), hw_encoder).await
    }

    /// Start the wall with injected collaborators
    pub async fn start_with(
        config: AppConfig,
        launcher: Arc<dyn WorkerLauncher>,
        inspector: Arc<dyn CodecInspector>,
        clock: Arc<dyn Clock>,
        hw_encoder: Option<String>,
    ) -> DisplayResult<Self> {
        let deps = Collaborators {
            launcher,
            inspector,
            clock,
            hw_encoder,
        };
        Self::build(config, deps).await
    }

    async fn build(config: AppConfig, deps: Collaborators) -> DisplayResult<Self> {
        let descriptors = unit_descriptors(&config)?;
        let plan = LayoutEngine::from_settings(&config.display).compute_placements(&descriptors)?;
        report_layout(&plan);

        let settings = &config.display;
        let builder = PipelineBuilder::new(PipelineOptions::from_settings(settings, deps.hw_encoder.clone()));
        let probe = CodecProbe::new(deps.inspector.clone(), Duration::from_secs(settings.probe_timeout));
        let factory = Arc::new(ProbingPipelineFactory::new(probe, builder.clone()));

        let registry = Arc::new(SupervisorRegistry::new(
            SupervisorSettings::from_settings(settings),
            deps.launcher.clone(),
            factory,
            deps.clock.clone(),
        ));

        logging::log_startup(&format!(
            "video wall: {} source(s) on a {}x{} grid, {:?} output",
            plan.table.placements.len(),
            settings.grid_cols,
            settings.grid_rows,
            settings.output_mode
        ));

        if let Some(spec) = builder.build_compositor(&plan.table.placements) {
            registry.start(UnitPlan::Compositor { spec }).await;
        }
        for plan in source_plans(&plan.table, &descriptors) {
            registry.start(plan).await;
        }

        let (layout, layout_rx) = watch::channel(Arc::new(plan.table.clone()));
        let layout = Arc::new(layout);

        let (monitor, health) = HealthMonitor::new(
            registry.clone(),
            HealthTracker::new(HealthPolicy::from_settings(settings)),
            deps.clock.clone(),
            Duration::from_secs(settings.health_poll_interval),
        );
        let mut monitor_tasks = TaskGroup::new();
        monitor_tasks.push(tokio::spawn(monitor.run(monitor_tasks.token())));

        let mut wall = Self {
            config,
            deps,
            builder,
            registry,
            layout,
            layout_rx,
            hidden: plan.hidden.clone(),
            health,
            monitor_tasks,
            layout_tasks: TaskGroup::new(),
        };
        wall.spawn_layout_tasks(&plan, &descriptors);
        Ok(wall)
    }

    /// Start the rotation scheduler (if any) and the status reporter
    fn spawn_layout_tasks(&mut self, plan: &LayoutPlan, descriptors: &[SourceDescriptor]) {
        let settings = &self.config.display;
        let token = self.layout_tasks.token();

        if let Some(schedule) = plan.rotation.clone() {
            let scheduler = RotationScheduler::new(
                self.registry.clone(),
                schedule,
                descriptors.iter().cloned(),
                self.layout.clone(),
                Duration::from_secs(settings.rotation_interval),
            );
            self.layout_tasks.push(tokio::spawn(scheduler.run(token.clone())));
        }

        let reporter = StatusReporter::new(self.status_view(descriptors), Duration::from_secs(settings.status_interval))
            .with_status_file(settings.status_file.as_ref().map(PathBuf::from));
        self.layout_tasks.push(tokio::spawn(reporter.run(token)));
    }

    fn status_view(&self, descriptors: &[SourceDescriptor]) -> StatusView {
        let enabled = descriptors
            .iter()
            .filter(|d| d.enabled)
            .map(|d| d.name.clone())
            .collect();
        StatusView::new(
            self.registry.clone(),
            self.health.clone(),
            self.layout_rx.clone(),
            enabled,
            self.hidden.clone(),
            self.deps.clock.clone(),
        )
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<SupervisorRegistry> {
        &self.registry
    }

    /// Current placement table
    pub fn layout(&self) -> Arc<PlacementTable> {
        self.layout_rx.borrow().clone()
    }

    pub fn subscribe_layout(&self) -> watch::Receiver<Arc<PlacementTable>> {
        self.layout_rx.clone()
    }

    /// Sources that never get a slot (overflow without rotation)
    pub fn hidden(&self) -> &[String] {
        &self.hidden
    }

    pub async fn status(&self) -> StatusSnapshot {
        let descriptors = self.config.descriptors().unwrap_or_default();
        self.status_view(&descriptors).snapshot().await
    }

    /// Apply a new configuration. Units whose descriptor or placement did
    /// not change keep running untouched.
    pub async fn reload(&mut self, config: AppConfig) -> DisplayResult<ReloadReport> {
        if requires_full_restart(&self.config.display, &config.display) {
            info!("🔄 Display settings changed, restarting every unit");
            let descriptors = unit_descriptors(&config)?;
            LayoutEngine::from_settings(&config.display).compute_placements(&descriptors)?;

            let previous = self.registry.names().await;
            self.stop_all().await;
            let deps = self.deps.clone();
            *self = Self::build(config, deps).await?;

            return Ok(ReloadReport {
                full_restart: true,
                stopped: previous,
                started: self.registry.names().await,
                compositor_rebuilt: self.registry.plan(COMPOSITOR_UNIT).await.is_some(),
            });
        }

        let descriptors = unit_descriptors(&config)?;
        let plan = LayoutEngine::from_settings(&config.display).compute_placements(&descriptors)?;
        report_layout(&plan);

        // Rotation resumes from the new initial layout
        self.layout_tasks.stop().await;

        let desired: HashMap<String, UnitPlan> = source_plans(&plan.table, &descriptors)
            .into_iter()
            .map(|p| (p.name().to_string(), p))
            .collect();

        let mut report = ReloadReport::default();
        for view in self.registry.views().await {
            if view.name == COMPOSITOR_UNIT {
                continue;
            }
            if desired.get(&view.name) != Some(&view.plan) {
                self.registry.stop(&view.name).await;
                camera_info!(view.name, "🛑 Removed by reload");
                report.stopped.push(view.name);
            }
        }

        let running = self.registry.names().await;
        let mut to_start: Vec<&UnitPlan> = desired.values().filter(|p| !running.iter().any(|n| n == p.name())).collect();
        to_start.sort_by_key(|p| p.slot());
        for plan in to_start {
            self.registry.start(plan.clone()).await;
            report.started.push(plan.name().to_string());
        }

        if let Some(spec) = self.builder.build_compositor(&plan.table.placements) {
            let compositor = UnitPlan::Compositor { spec };
            if self.registry.plan(COMPOSITOR_UNIT).await.as_ref() != Some(&compositor) {
                self.registry.start(compositor).await;
                report.compositor_rebuilt = true;
            }
        }

        self.layout.send_replace(Arc::new(plan.table.clone()));
        self.hidden = plan.hidden.clone();
        self.config = config;
        self.spawn_layout_tasks(&plan, &descriptors);

        logging::log_success(&format!(
            "Reload applied: {} stopped, {} started{}",
            report.stopped.len(),
            report.started.len(),
            if report.compositor_rebuilt { ", compositor rebuilt" } else { "" }
        ));
        Ok(report)
    }

    async fn stop_all(&mut self) -> StopOutcome {
        self.layout_tasks.stop().await;
        self.monitor_tasks.stop().await;
        let grace = Duration::from_secs(self.config.display.shutdown_grace);
        self.registry.stop_all(grace).await
    }

    /// Stop everything. `Forced` if any worker had to be killed or the
    /// shutdown grace ran out.
    pub async fn shutdown(mut self) -> StopOutcome {
        let outcome = self.stop_all().await;
        match outcome {
            StopOutcome::Clean => logging::log_success("All workers stopped cleanly"),
            StopOutcome::Forced => warn!("⚠️ Some workers had to be killed during shutdown"),
        }
        outcome
    }
}

/// Unit plans for every source placement in `table`
fn source_plans(table: &PlacementTable, descriptors: &[SourceDescriptor]) -> Vec<UnitPlan> {
    table
        .placements
        .iter()
        .filter_map(|placement| {
            descriptors
                .iter()
                .find(|d| d.name == placement.source)
                .map(|d| UnitPlan::source(d.clone(), placement.clone()))
        })
        .collect()
}

fn report_layout(plan: &LayoutPlan) {
    for placement in &plan.table.placements {
        debug!(camera = %placement.source, slot = placement.slot, rect = %placement.rect, "Placed");
    }
    if let Some(overflow) = plan.overflow() {
        warn!("⚠️ {}", overflow);
    }
    if let Some(rotation) = &plan.rotation {
        info!(
            slots = ?rotation.rotating_slots(),
            waiting = ?rotation.waiting(),
            "🔁 {} sources share {} rotating slot(s)",
            rotation.pool().len(),
            rotation.rotating_slots().len()
        );
    }
}

/// Settings whose change cannot be applied unit by unit
fn requires_full_restart(old: &DisplaySettings, new: &DisplaySettings) -> bool {
    let normalize = |settings: &DisplaySettings| DisplaySettings {
        log_level: String::new(),
        status_interval: 0,
        status_file: None,
        rotation_interval: 0,
        ..settings.clone()
    };
    normalize(old) != normalize(new)
}
