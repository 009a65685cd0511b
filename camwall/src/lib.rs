//! Multi-camera network video wall engine
//!
//! Keeps one supervised media worker per visible camera alive on a shared
//! screen: grid layout with optional rotation, codec-adaptive pipelines,
//! restart with backoff, and placeholder substitution while a camera is down.

pub mod core;
pub mod error;
pub mod services;
pub mod traits;
pub mod types;
pub mod wall;

// Re-export commonly used types
pub use crate::core::{HealthTracker, LayoutEngine, LayoutPlan, PipelineBuilder, RestartTracker, RotationSchedule};
pub use error::{DisplayError, DisplayResult};
pub use traits::{Clock, CodecInspector, PipelineFactory, TokioClock, Worker, WorkerLauncher};
pub use types::{ExitInfo, PipelineSpec, Placement, PlacementTable, StopOutcome, SupervisedSnapshot, UnitPlan};
pub use wall::{plan_layout, DisplayWall, ReloadReport};
