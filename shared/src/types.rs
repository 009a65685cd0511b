//! Core types shared between the engine and status consumers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Axis-aligned screen rectangle in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// True when the two rectangles share any pixel. Touching edges do not overlap.
    pub fn overlaps(&self, other: &Rect) -> bool {
        let (ax1, ay1) = (self.x as u64, self.y as u64);
        let (ax2, ay2) = (ax1 + self.width as u64, ay1 + self.height as u64);
        let (bx1, by1) = (other.x as u64, other.y as u64);
        let (bx2, by2) = (bx1 + other.width as u64, by1 + other.height as u64);

        ax1 < bx2 && bx1 < ax2 && ay1 < by2 && by1 < ay2
    }

    pub fn fits_within(&self, screen_width: u32, screen_height: u32) -> bool {
        self.width > 0
            && self.height > 0
            && self.x as u64 + self.width as u64 <= screen_width as u64
            && self.y as u64 + self.height as u64 <= screen_height as u64
    }

    /// X11-style geometry string, `WxH+X+Y`
    pub fn geometry(&self) -> String {
        format!("{}x{}+{}+{}", self.width, self.height, self.x, self.y)
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{} at ({},{})", self.width, self.height, self.x, self.y)
    }
}

/// Immutable description of one configured camera
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub name: String,
    pub url: String,
    pub enabled: bool,
    /// Explicit rectangle, used verbatim when present
    pub placement: Option<Rect>,
    /// Requested grid slot
    pub slot: Option<usize>,
}

impl SourceDescriptor {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            enabled: true,
            placement: None,
            slot: None,
        }
    }

    pub fn with_placement(mut self, rect: Rect) -> Self {
        self.placement = Some(rect);
        self
    }

    pub fn with_slot(mut self, slot: usize) -> Self {
        self.slot = Some(slot);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// How a stream is piped to its output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineMode {
    /// Pass the compressed stream through untouched
    Copy,
    /// Decode and re-encode
    Transcode,
}

impl fmt::Display for PipelineMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineMode::Copy => write!(f, "copy"),
            PipelineMode::Transcode => write!(f, "transcode"),
        }
    }
}

/// Lifecycle state of a supervised worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    Starting,
    Running,
    Failed,
    Stopped,
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessStatus::Starting => write!(f, "starting"),
            ProcessStatus::Running => write!(f, "running"),
            ProcessStatus::Failed => write!(f, "failed"),
            ProcessStatus::Stopped => write!(f, "stopped"),
        }
    }
}

/// Health of a source as shown to operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    /// Recently failed, still inside its retry budget
    Degraded,
    /// Retry budget exhausted, placeholder shown
    Unavailable,
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthState::Healthy => write!(f, "healthy"),
            HealthState::Degraded => write!(f, "degraded"),
            HealthState::Unavailable => write!(f, "unavailable"),
        }
    }
}

/// Status of one supervised unit for external reporting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceStatus {
    pub health: HealthState,
    pub state: ProcessStatus,
    pub mode: Option<PipelineMode>,
    pub uptime_secs: Option<u64>,
    pub restart_count: u32,
    pub consecutive_failures: u32,
    pub slot: Option<usize>,
    pub placeholder: bool,
    pub last_exit: Option<String>,
}

/// Point-in-time view of the whole wall
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub generated_at: DateTime<Utc>,
    pub sources: BTreeMap<String, SourceStatus>,
    pub compositor: Option<SourceStatus>,
    /// Enabled sources that never get a slot
    pub hidden: Vec<String>,
    /// Rotation pool members currently off screen
    #[serde(default)]
    pub waiting: Vec<String>,
}

impl StatusSnapshot {
    pub fn count_by_health(&self, health: HealthState) -> usize {
        self.sources.values().filter(|s| s.health == health).count()
    }
}
