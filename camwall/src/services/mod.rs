//! Service implementations
//!
//! Everything here touches processes, timers or channels. The decisions
//! themselves live in `core`; these services run them against real workers.

pub mod codec_probe;
pub mod health_monitor;
pub mod hw_detect;
pub mod pipeline_factory;
pub mod process_launcher;
pub mod registry;
pub mod rotation_scheduler;
pub mod status_reporter;
pub mod supervisor;

#[cfg(test)]
mod tests;

pub use codec_probe::{CodecProbe, FfprobeInspector};
pub use health_monitor::{HealthMap, HealthMonitor};
pub use hw_detect::detect_hw_encoder;
pub use pipeline_factory::ProbingPipelineFactory;
pub use process_launcher::RealWorkerLauncher;
pub use registry::{SupervisorRegistry, UnitView};
pub use rotation_scheduler::{LayoutSender, RotationScheduler};
pub use status_reporter::{StatusReporter, StatusView};
pub use supervisor::{SupervisorCommand, SupervisorHandle, SupervisorSettings};
