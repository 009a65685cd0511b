//! Status snapshots, periodic summary logging and the optional status file

use chrono::Utc;
use shared::{HealthState, PipelineMode, SourceStatus, StatusSnapshot};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::health::HealthTracker;
use crate::error::DisplayResult;
use crate::services::health_monitor::HealthMap;
use crate::services::registry::{SupervisorRegistry, UnitView};
use crate::traits::Clock;
use crate::types::{PlacementTable, UnitPlan};

/// Read-only view over the running wall
#[derive(Clone)]
pub struct StatusView {
    registry: Arc<SupervisorRegistry>,
    health: watch::Receiver<HealthMap>,
    layout: watch::Receiver<Arc<PlacementTable>>,
    /// Enabled source names in declared order
    enabled: Arc<Vec<String>>,
    /// Overflow with no rotation slot to share
    hidden: Arc<Vec<String>>,
    clock: Arc<dyn Clock>,
}

impl StatusView {
    pub fn new(
        registry: Arc<SupervisorRegistry>,
        health: watch::Receiver<HealthMap>,
        layout: watch::Receiver<Arc<PlacementTable>>,
        enabled: Vec<String>,
        hidden: Vec<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry,
            health,
            layout,
            enabled: Arc::new(enabled),
            hidden: Arc::new(hidden),
            clock,
        }
    }

    pub async fn snapshot(&self) -> StatusSnapshot {
        let views = self.registry.views().await;
        let health = self.health.borrow().clone();
        let layout = self.layout.borrow().clone();

        let mut sources = BTreeMap::new();
        let mut compositor = None;
        for view in &views {
            let status = self.source_status(view, &health);
            match view.plan {
                UnitPlan::Source { .. } => {
                    sources.insert(view.name.clone(), status);
                }
                UnitPlan::Compositor { .. } => compositor = Some(status),
            }
        }

        StatusSnapshot {
            generated_at: Utc::now(),
            sources,
            compositor,
            hidden: self.hidden.to_vec(),
            waiting: waiting_sources(&self.enabled, &self.hidden, &layout),
        }
    }

    fn source_status(&self, view: &UnitView, health: &HealthMap) -> SourceStatus {
        let snapshot = &view.snapshot;
        let now = self.clock.now();
        SourceStatus {
            // Units newer than the last health poll are classified directly
            health: health
                .get(&view.name)
                .copied()
                .unwrap_or_else(|| HealthTracker::classify(snapshot)),
            state: snapshot.state,
            mode: snapshot.mode,
            uptime_secs: snapshot
                .started_at
                .map(|started| now.saturating_duration_since(started).as_secs()),
            restart_count: snapshot.restart_count,
            consecutive_failures: snapshot.consecutive_failures,
            slot: view.plan.slot(),
            placeholder: snapshot.placeholder_active,
            last_exit: snapshot.last_exit.clone(),
        }
    }
}

/// Enabled sources off screen only until rotation brings them back
fn waiting_sources(enabled: &[String], hidden: &[String], layout: &PlacementTable) -> Vec<String> {
    enabled
        .iter()
        .filter(|name| !hidden.contains(name) && layout.get(name.as_str()).is_none())
        .cloned()
        .collect()
}

/// One-line summary of a snapshot for the log
pub fn summarize(snapshot: &StatusSnapshot) -> String {
    let copy = snapshot
        .sources
        .values()
        .filter(|s| s.mode == Some(PipelineMode::Copy))
        .count();
    let transcode = snapshot
        .sources
        .values()
        .filter(|s| s.mode == Some(PipelineMode::Transcode))
        .count();
    let restarts: u32 = snapshot.sources.values().map(|s| s.restart_count).sum();

    format!(
        "{} healthy, {} degraded, {} unavailable, {} hidden, {} waiting | {} copy, {} transcode | {} restarts",
        snapshot.count_by_health(HealthState::Healthy),
        snapshot.count_by_health(HealthState::Degraded),
        snapshot.count_by_health(HealthState::Unavailable),
        snapshot.hidden.len(),
        snapshot.waiting.len(),
        copy,
        transcode,
        restarts
    )
}

/// Periodically logs the wall status and optionally writes it to a file
pub struct StatusReporter {
    view: StatusView,
    interval: Duration,
    status_file: Option<PathBuf>,
}

impl StatusReporter {
    pub fn new(view: StatusView, interval: Duration) -> Self {
        Self {
            view,
            interval,
            status_file: None,
        }
    }

    /// Also write each snapshot as JSON to `path` (fluent API)
    pub fn with_status_file(mut self, path: Option<PathBuf>) -> Self {
        self.status_file = path;
        self
    }

    pub async fn report_once(&self) -> DisplayResult<StatusSnapshot> {
        let snapshot = self.view.snapshot().await;
        info!("📊 Status: {}", summarize(&snapshot));

        if let Some(path) = &self.status_file {
            write_status_file(path, &snapshot).await?;
            debug!(path = %path.display(), "Status file written");
        }
        Ok(snapshot)
    }

    pub async fn run(self, cancel: CancellationToken) {
        let start = tokio::time::Instant::now() + self.interval;
        let mut ticker = tokio::time::interval_at(start, self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.report_once().await {
                        warn!(error = %e, "⚠️ Status report failed");
                    }
                }
            }
        }
    }
}

/// Write through a temporary file so readers never see a partial document
pub async fn write_status_file(path: &Path, snapshot: &StatusSnapshot) -> DisplayResult<()> {
    let json = serde_json::to_vec_pretty(snapshot)?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
        }
    }

    let tmp = path.with_extension("json.tmp");
    let mut file = fs::File::create(&tmp).await?;
    file.write_all(&json).await?;
    file.flush().await?;
    drop(file);

    fs::rename(&tmp, path).await?;
    Ok(())
}
