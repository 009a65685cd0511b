//! Health classification and placeholder/recovery decisions

use shared::{DisplaySettings, HealthState, ProcessStatus};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

use crate::types::SupervisedSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthAction {
    ShowPlaceholder,
    /// Grant one fresh probe and launch attempt
    Recover,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthPolicy {
    pub show_placeholders: bool,
    pub placeholder_after_failures: u32,
    pub retry_interval: Duration,
}

impl HealthPolicy {
    pub fn from_settings(settings: &DisplaySettings) -> Self {
        Self {
            show_placeholders: settings.show_placeholders,
            placeholder_after_failures: settings.placeholder_after_failures,
            retry_interval: Duration::from_secs(settings.camera_retry_interval),
        }
    }
}

/// Result of evaluating one unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthVerdict {
    pub health: HealthState,
    pub actions: Vec<HealthAction>,
}

/// Per-unit health bookkeeping across polls
#[derive(Debug, Clone)]
pub struct HealthTracker {
    policy: HealthPolicy,
    /// Exhausted episode for which a recovery was already issued
    recovered: HashMap<String, Instant>,
}

impl HealthTracker {
    pub fn new(policy: HealthPolicy) -> Self {
        Self {
            policy,
            recovered: HashMap::new(),
        }
    }

    pub fn classify(snapshot: &SupervisedSnapshot) -> HealthState {
        if snapshot.is_exhausted() {
            HealthState::Unavailable
        } else if snapshot.consecutive_failures > 0 {
            HealthState::Degraded
        } else {
            HealthState::Healthy
        }
    }

    pub fn evaluate(&mut self, name: &str, snapshot: &SupervisedSnapshot, now: Instant) -> HealthVerdict {
        let health = Self::classify(snapshot);
        let mut actions = Vec::new();

        if self.policy.show_placeholders
            && snapshot.state == ProcessStatus::Failed
            && snapshot.consecutive_failures >= self.policy.placeholder_after_failures
            && !snapshot.placeholder_active
        {
            actions.push(HealthAction::ShowPlaceholder);
        }

        if let Some(since) = snapshot.exhausted_since {
            let already_issued = self.recovered.get(name) == Some(&since);
            if !already_issued && now.saturating_duration_since(since) >= self.policy.retry_interval {
                self.recovered.insert(name.to_string(), since);
                actions.push(HealthAction::Recover);
            }
        }

        HealthVerdict { health, actions }
    }

    /// Drop bookkeeping for units that no longer exist
    pub fn retain(&mut self, live: &[String]) {
        self.recovered.retain(|name, _| live.contains(name));
    }
}
