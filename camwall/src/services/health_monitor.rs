//! Periodic health evaluation
//!
//! Reads every unit's published snapshot, classifies it, and forwards
//! placeholder and recovery decisions back to the units. The resulting
//! health map is published through a watch channel for status reporting.

use shared::{camera_info, camera_warn, HealthState};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::core::health::{HealthAction, HealthTracker};
use crate::services::registry::SupervisorRegistry;
use crate::traits::Clock;

pub type HealthMap = Arc<HashMap<String, HealthState>>;

pub struct HealthMonitor {
    registry: Arc<SupervisorRegistry>,
    tracker: HealthTracker,
    clock: Arc<dyn Clock>,
    interval: Duration,
    health: watch::Sender<HealthMap>,
}

impl HealthMonitor {
    pub fn new(
        registry: Arc<SupervisorRegistry>,
        tracker: HealthTracker,
        clock: Arc<dyn Clock>,
        interval: Duration,
    ) -> (Self, watch::Receiver<HealthMap>) {
        let (health, receiver) = watch::channel(HealthMap::default());
        let monitor = Self {
            registry,
            tracker,
            clock,
            interval,
            health,
        };
        (monitor, receiver)
    }

    /// Evaluate every unit once and dispatch the resulting actions
    pub async fn poll_once(&mut self) -> Vec<(String, HealthAction)> {
        let now = self.clock.now();
        let views = self.registry.views().await;
        let previous = self.health.borrow().clone();

        let mut health = HashMap::with_capacity(views.len());
        let mut dispatched = Vec::new();

        for view in &views {
            let verdict = self.tracker.evaluate(&view.name, &view.snapshot, now);

            if let Some(before) = previous.get(&view.name) {
                if *before != verdict.health {
                    if verdict.health == HealthState::Healthy {
                        camera_info!(view.name, "💚 Health {} -> {}", before, verdict.health);
                    } else {
                        camera_warn!(view.name, "🩺 Health {} -> {}", before, verdict.health);
                    }
                }
            }

            for action in verdict.actions {
                if self.registry.dispatch(&view.name, action).await {
                    debug!(camera = %view.name, action = ?action, "Health action dispatched");
                    dispatched.push((view.name.clone(), action));
                }
            }
            health.insert(view.name.clone(), verdict.health);
        }

        let names: Vec<String> = views.into_iter().map(|v| v.name).collect();
        self.tracker.retain(&names);
        self.health.send_replace(Arc::new(health));
        dispatched
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.poll_once().await;
                }
            }
        }
        debug!("Health monitor stopped");
    }
}
