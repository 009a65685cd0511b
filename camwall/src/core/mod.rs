//! Core decision logic
//!
//! This module contains pure logic with no I/O dependencies: layout,
//! rotation, the supervision state machine, health decisions and launch
//! spec construction. Everything is deterministic and easily testable.

pub mod health;
pub mod layout;
pub mod lifecycle;
pub mod pipeline;
pub mod rotation;

pub use health::{HealthAction, HealthPolicy, HealthTracker, HealthVerdict};
pub use layout::{LayoutEngine, LayoutPlan};
pub use lifecycle::{transition, BackoffPolicy, LifecycleEvent, RestartDecision, RestartTracker};
pub use pipeline::{OutputVariant, PipelineBuilder, PipelineOptions};
pub use rotation::{RotationSchedule, SlotSwap};
