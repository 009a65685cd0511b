//! Table of running supervision units
//!
//! The lock only guards inserting and removing handles. Stopping a unit
//! happens after its handle has left the table, so a slow stop never blocks
//! other units, the health monitor or the rotation scheduler.

use futures_util::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use crate::core::health::HealthAction;
use crate::services::supervisor::{SupervisorCommand, SupervisorHandle, SupervisorSettings};
use crate::traits::{Clock, PipelineFactory, WorkerLauncher};
use crate::types::{StopOutcome, SupervisedSnapshot, UnitPlan};

/// Point-in-time view of one unit
#[derive(Debug, Clone)]
pub struct UnitView {
    pub name: String,
    pub plan: UnitPlan,
    pub snapshot: SupervisedSnapshot,
}

pub struct SupervisorRegistry {
    units: Mutex<HashMap<String, SupervisorHandle>>,
    settings: SupervisorSettings,
    launcher: Arc<dyn WorkerLauncher>,
    factory: Arc<dyn PipelineFactory>,
    clock: Arc<dyn Clock>,
}

impl SupervisorRegistry {
    pub fn new(
        settings: SupervisorSettings,
        launcher: Arc<dyn WorkerLauncher>,
        factory: Arc<dyn PipelineFactory>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            units: Mutex::new(HashMap::new()),
            settings,
            launcher,
            factory,
            clock,
        }
    }

    /// Start supervising `plan`. A unit already running under the same name
    /// is fully stopped first and its outcome returned.
    pub async fn start(&self, plan: UnitPlan) -> Option<StopOutcome> {
        let name = plan.name().to_string();

        let previous = self.units.lock().await.remove(&name);
        let replaced = match previous {
            Some(handle) => Some(handle.stop().await),
            None => None,
        };

        let handle = SupervisorHandle::spawn(
            plan,
            self.settings,
            self.launcher.clone(),
            self.factory.clone(),
            self.clock.clone(),
        );
        self.units.lock().await.insert(name, handle);
        replaced
    }

    /// Stop one unit and wait for its workers to be reaped
    pub async fn stop(&self, name: &str) -> Option<StopOutcome> {
        let handle = self.units.lock().await.remove(name)?;
        Some(handle.stop().await)
    }

    /// Stop every unit concurrently. Units still running after `grace` are
    /// aborted, which kills their workers.
    pub async fn stop_all(&self, grace: Duration) -> StopOutcome {
        let handles: Vec<SupervisorHandle> = self.units.lock().await.drain().map(|(_, h)| h).collect();
        if handles.is_empty() {
            return StopOutcome::Clean;
        }

        let aborts: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();
        let count = handles.len();

        match tokio::time::timeout(grace, join_all(handles.into_iter().map(SupervisorHandle::stop))).await {
            Ok(outcomes) => {
                debug!(units = count, "All units stopped");
                outcomes.into_iter().fold(StopOutcome::Clean, StopOutcome::combine)
            }
            Err(_) => {
                warn!(units = count, "⏱️ Shutdown grace of {:?} exceeded, aborting units", grace);
                for abort in aborts {
                    abort.abort();
                }
                StopOutcome::Forced
            }
        }
    }

    pub async fn views(&self) -> Vec<UnitView> {
        let units = self.units.lock().await;
        let mut views: Vec<UnitView> = units
            .iter()
            .map(|(name, handle)| UnitView {
                name: name.clone(),
                plan: handle.plan().clone(),
                snapshot: handle.snapshot(),
            })
            .collect();
        views.sort_by(|a, b| a.name.cmp(&b.name));
        views
    }

    pub async fn snapshot(&self, name: &str) -> Option<SupervisedSnapshot> {
        self.units.lock().await.get(name).map(SupervisorHandle::snapshot)
    }

    pub async fn plan(&self, name: &str) -> Option<UnitPlan> {
        self.units.lock().await.get(name).map(|h| h.plan().clone())
    }

    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.units.lock().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn len(&self) -> usize {
        self.units.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.units.lock().await.is_empty()
    }

    /// Forward a health decision without waiting on the unit
    pub async fn dispatch(&self, name: &str, action: HealthAction) -> bool {
        let sender = match self.units.lock().await.get(name) {
            Some(handle) => handle.commands(),
            None => return false,
        };
        let command = match action {
            HealthAction::ShowPlaceholder => SupervisorCommand::ShowPlaceholder,
            HealthAction::Recover => SupervisorCommand::Recover,
        };
        match sender.try_send(command) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(camera = %name, "Command queue full, retrying next poll");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}
