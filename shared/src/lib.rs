//! Shared types for the camera wall
//!
//! Configuration, status reporting types and logging helpers used by the
//! engine and by anything that reports on it.

pub mod config;
pub mod errors;
pub mod logging;
pub mod types;

pub use config::{AppConfig, BackoffKind, CameraEntry, DisplaySettings, OutputMode, COMPOSITOR_NAME};
pub use errors::*;
pub use types::*;
