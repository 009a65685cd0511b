//! Trait definitions with mockall annotations for testing
//!
//! These are the seams between the supervision logic and the outside world:
//! spawning workers, inspecting streams, building launch specs and reading
//! the time. Real implementations live in `services`.

use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::DisplayResult;
use crate::types::{ExitInfo, PipelineSpec, StopOutcome, UnitPlan};

/// A running external worker process
#[async_trait::async_trait]
pub trait Worker: Send {
    /// Identity of this worker instance. A restart produces a new id.
    fn id(&self) -> Uuid;

    fn pid(&self) -> Option<u32>;

    /// Wait for the worker to exit. Must be cancel safe.
    async fn wait(&mut self) -> DisplayResult<ExitInfo>;

    /// Ask the worker to exit, escalating to a kill after `grace`
    async fn terminate(&mut self, grace: Duration) -> StopOutcome;
}

/// Starts workers from launch specs
#[mockall::automock]
pub trait WorkerLauncher: Send + Sync {
    /// Spawn the worker described by `spec`.
    ///
    /// # Returns
    /// A handle to the running worker, or `DisplayError::Launch` if the
    /// process could not be started at all
    fn launch(&self, spec: &PipelineSpec) -> DisplayResult<Box<dyn Worker>>;
}

/// Runs the stream inspection worker
#[mockall::automock]
#[async_trait::async_trait]
pub trait CodecInspector: Send + Sync {
    /// Inspect the first video stream of `url` and return the raw JSON report.
    ///
    /// `timeout` is forwarded to the worker as its own network timeout; the
    /// caller enforces the overall deadline.
    async fn inspect(&self, url: &str, timeout: Duration) -> DisplayResult<String>;
}

/// Produces launch specs for supervision units
#[async_trait::async_trait]
pub trait PipelineFactory: Send + Sync {
    /// Spec for the live worker of `plan`. Sources are re-probed on every call.
    async fn live_spec(&self, plan: &UnitPlan) -> DisplayResult<PipelineSpec>;

    /// Spec for the placeholder shown while `plan` is down, if it has one
    fn placeholder_spec(&self, plan: &UnitPlan) -> Option<PipelineSpec>;
}

/// Time source for health decisions
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Clock backed by tokio's timer, so paused test time applies
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}
