//! Supervision state machine, restart accounting and backoff
//!
//! Everything here is driven by explicit events and caller-supplied
//! instants so it can be exercised without a runtime.

use shared::{BackoffKind, DisplaySettings, ProcessStatus};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Events that move a supervised unit between states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Worker stayed alive past the startup grace period
    StartupConfirmed,
    /// Worker could not be started
    LaunchFailed,
    /// Worker exited on its own
    Exited,
    /// Backoff elapsed or a recovery attempt was granted
    RestartDue,
    StopRequested,
}

/// Transition table. `None` means the event is not valid in `state`.
pub fn transition(state: ProcessStatus, event: LifecycleEvent) -> Option<ProcessStatus> {
    use LifecycleEvent::*;
    use ProcessStatus::*;

    match (state, event) {
        (Stopped, _) => None,
        (_, StopRequested) => Some(Stopped),
        (Starting, StartupConfirmed) => Some(Running),
        (Starting, LaunchFailed) | (Starting, Exited) => Some(Failed),
        (Running, Exited) => Some(Failed),
        (Failed, RestartDue) => Some(Starting),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffPolicy {
    Fixed(Duration),
    Exponential { base: Duration, max: Duration },
}

impl BackoffPolicy {
    pub fn from_settings(settings: &DisplaySettings) -> Self {
        let base = Duration::from_secs(settings.restart_delay);
        match settings.backoff {
            BackoffKind::Fixed => BackoffPolicy::Fixed(base),
            BackoffKind::Exponential => BackoffPolicy::Exponential {
                base,
                max: Duration::from_secs(settings.max_restart_delay.max(settings.restart_delay)),
            },
        }
    }

    /// Delay before restart number `attempt` (1-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            BackoffPolicy::Fixed(delay) => delay,
            BackoffPolicy::Exponential { base, max } => {
                let exponent = attempt.saturating_sub(1).min(16);
                base.saturating_mul(1u32 << exponent).min(max)
            }
        }
    }
}

/// What to do after a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartDecision {
    Retry { delay: Duration },
    /// Retry budget used up; wait for an explicit recovery
    Exhausted,
}

/// Counts failures inside a rolling window and decides on restarts
#[derive(Debug, Clone)]
pub struct RestartTracker {
    max_failures: u32,
    window: Duration,
    backoff: BackoffPolicy,
    failures: VecDeque<Instant>,
    restart_count: u32,
    exhausted_since: Option<Instant>,
    recovering: bool,
}

impl RestartTracker {
    pub fn new(max_failures: u32, window: Duration, backoff: BackoffPolicy) -> Self {
        Self {
            max_failures,
            window,
            backoff,
            failures: VecDeque::new(),
            restart_count: 0,
            exhausted_since: None,
            recovering: false,
        }
    }

    pub fn record_failure(&mut self, now: Instant) -> RestartDecision {
        self.prune(now);
        self.failures.push_back(now);

        let consecutive = self.failures.len() as u32;
        if self.recovering || consecutive >= self.max_failures {
            self.recovering = false;
            self.exhausted_since = Some(now);
            return RestartDecision::Exhausted;
        }

        RestartDecision::Retry {
            delay: self.backoff.delay(consecutive),
        }
    }

    /// Worker reached running. Only a recovery attempt resets the counter here.
    pub fn record_running(&mut self) {
        if self.recovering {
            self.reset();
        }
    }

    /// Worker has been running long enough to count as stable
    pub fn record_stable(&mut self) {
        self.reset();
    }

    /// Allow exactly one attempt out of the exhausted state
    pub fn grant_recovery(&mut self) -> bool {
        if self.exhausted_since.take().is_some() {
            self.recovering = true;
            true
        } else {
            false
        }
    }

    pub fn note_restart(&mut self) {
        self.restart_count = self.restart_count.saturating_add(1);
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.failures.len() as u32
    }

    pub fn restart_count(&self) -> u32 {
        self.restart_count
    }

    pub fn exhausted_since(&self) -> Option<Instant> {
        self.exhausted_since
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted_since.is_some()
    }

    fn reset(&mut self) {
        self.failures.clear();
        self.recovering = false;
        self.exhausted_since = None;
    }

    fn prune(&mut self, now: Instant) {
        while let Some(oldest) = self.failures.front() {
            if now.saturating_duration_since(*oldest) > self.window {
                self.failures.pop_front();
            } else {
                break;
            }
        }
    }
}
