//! Engine-internal types: placements, pipeline specs and worker reports

use serde::{Deserialize, Serialize};
use shared::{PipelineMode, ProcessStatus, Rect, SourceDescriptor};
use std::fmt;
use std::path::PathBuf;
use tokio::time::Instant;
use uuid::Uuid;

/// Where one source is drawn at one point in time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub source: String,
    pub rect: Rect,
    pub slot: usize,
}

/// Immutable set of current placements. Replaced wholesale, never patched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlacementTable {
    pub placements: Vec<Placement>,
}

impl PlacementTable {
    pub fn new(mut placements: Vec<Placement>) -> Self {
        placements.sort_by_key(|p| p.slot);
        Self { placements }
    }

    pub fn get(&self, source: &str) -> Option<&Placement> {
        self.placements.iter().find(|p| p.source == source)
    }

    pub fn occupant(&self, slot: usize) -> Option<&Placement> {
        self.placements.iter().find(|p| p.slot == slot)
    }

    /// Copy of the table with `slot` handed to `incoming`
    pub fn with_occupant(&self, slot: usize, incoming: &str) -> Self {
        let placements = self
            .placements
            .iter()
            .map(|p| {
                if p.slot == slot {
                    Placement {
                        source: incoming.to_string(),
                        rect: p.rect,
                        slot,
                    }
                } else {
                    p.clone()
                }
            })
            .collect();
        Self::new(placements)
    }
}

/// Codec family reported by the inspection worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CodecFamily {
    H264Compatible,
    Hevc,
    Mjpeg,
    Other(String),
    Unknown,
}

impl CodecFamily {
    pub fn from_codec_name(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "h264" | "avc" | "avc1" => CodecFamily::H264Compatible,
            "hevc" | "h265" => CodecFamily::Hevc,
            "mjpeg" => CodecFamily::Mjpeg,
            "" => CodecFamily::Unknown,
            other => CodecFamily::Other(other.to_string()),
        }
    }
}

impl fmt::Display for CodecFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecFamily::H264Compatible => write!(f, "h264-compatible"),
            CodecFamily::Hevc => write!(f, "hevc"),
            CodecFamily::Mjpeg => write!(f, "mjpeg"),
            CodecFamily::Other(name) => write!(f, "{name}"),
            CodecFamily::Unknown => write!(f, "unknown"),
        }
    }
}

/// Successful probe result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReport {
    pub family: CodecFamily,
    pub decision: PipelineMode,
    pub resolution: Option<(u32, u32)>,
}

/// Decision used to build a pipeline, including the fallback case
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub family: Option<CodecFamily>,
    pub decision: PipelineMode,
    pub fell_back: bool,
}

/// What a worker does for its slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerRole {
    Live,
    Placeholder,
    Compositor,
}

/// Network transport used to pull the source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transport {
    /// RTSP interleaved over TCP, reliable and ordered
    RtspTcp,
    RtspUdp,
    /// Whatever the URL scheme implies
    Native,
    /// Generated locally, no network input
    Local,
}

impl Transport {
    pub fn for_url(url: &str, prefer_udp: bool) -> Self {
        let scheme = url.split("://").next().unwrap_or_default().to_lowercase();
        match scheme.as_str() {
            "rtsp" | "rtsps" if prefer_udp => Transport::RtspUdp,
            "rtsp" | "rtsps" => Transport::RtspTcp,
            _ => Transport::Native,
        }
    }

    pub fn rtsp_flag(&self) -> Option<&'static str> {
        match self {
            Transport::RtspTcp => Some("tcp"),
            Transport::RtspUdp => Some("udp"),
            Transport::Native | Transport::Local => None,
        }
    }
}

/// Where a worker's frames end up
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputTarget {
    /// Local UDP feed read by the compositor
    UdpRelay { port: u16 },
    /// Independent window at a screen rectangle
    Window { rect: Rect },
    /// Framebuffer device written by the compositor
    Framebuffer { device: PathBuf },
}

/// Bounded buffering parameters handed to the worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Buffering {
    pub buffer_size_kb: u32,
    pub max_delay_ms: u32,
    pub thread_queue_size: u32,
}

/// Command line for an external worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerInvocation {
    pub program: String,
    pub args: Vec<String>,
    /// Environment variables removed before launch
    pub env_remove: Vec<String>,
}

impl WorkerInvocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env_remove: Vec::new(),
        }
    }

    pub fn arg(&mut self, arg: impl Into<String>) -> &mut Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Fully resolved launch parameters for one worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSpec {
    pub source: String,
    pub role: WorkerRole,
    pub mode: Option<PipelineMode>,
    pub transport: Transport,
    pub input: String,
    pub output: OutputTarget,
    pub buffering: Buffering,
    pub invocation: WorkerInvocation,
}

/// Name under which the compositor unit is supervised
pub const COMPOSITOR_UNIT: &str = shared::COMPOSITOR_NAME;

/// What one supervision unit keeps alive
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitPlan {
    /// A camera at its placement, re-probed on every launch
    Source {
        descriptor: SourceDescriptor,
        placement: Placement,
    },
    /// The shared composed output, launched from a fixed spec
    Compositor { spec: PipelineSpec },
}

impl UnitPlan {
    pub fn source(descriptor: SourceDescriptor, placement: Placement) -> Self {
        UnitPlan::Source { descriptor, placement }
    }

    pub fn name(&self) -> &str {
        match self {
            UnitPlan::Source { descriptor, .. } => &descriptor.name,
            UnitPlan::Compositor { .. } => COMPOSITOR_UNIT,
        }
    }

    pub fn slot(&self) -> Option<usize> {
        match self {
            UnitPlan::Source { placement, .. } => Some(placement.slot),
            UnitPlan::Compositor { .. } => None,
        }
    }
}

/// How a worker ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitInfo {
    pub code: Option<i32>,
    pub signal: Option<i32>,
    /// Last line the worker wrote to stderr
    pub detail: Option<String>,
}

impl ExitInfo {
    pub fn code(code: i32) -> Self {
        Self {
            code: Some(code),
            signal: None,
            detail: None,
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl fmt::Display for ExitInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {code}")?,
            (None, Some(signal)) => write!(f, "signal {signal}")?,
            (None, None) => write!(f, "unknown exit")?,
        }
        if let Some(detail) = &self.detail {
            write!(f, " ({detail})")?;
        }
        Ok(())
    }
}

/// How a stop request ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Worker exited within the grace period (or was not running)
    Clean,
    /// Worker had to be killed
    Forced,
}

impl StopOutcome {
    pub fn combine(self, other: StopOutcome) -> StopOutcome {
        if self == StopOutcome::Forced || other == StopOutcome::Forced {
            StopOutcome::Forced
        } else {
            StopOutcome::Clean
        }
    }
}

/// State published by one supervision task
#[derive(Debug, Clone, PartialEq)]
pub struct SupervisedSnapshot {
    pub state: ProcessStatus,
    pub started_at: Option<Instant>,
    pub consecutive_failures: u32,
    pub restart_count: u32,
    pub last_exit: Option<String>,
    pub mode: Option<PipelineMode>,
    pub exhausted_since: Option<Instant>,
    pub placeholder_active: bool,
    pub pid: Option<u32>,
    pub worker_id: Option<Uuid>,
}

impl SupervisedSnapshot {
    pub fn starting() -> Self {
        Self {
            state: ProcessStatus::Starting,
            started_at: None,
            consecutive_failures: 0,
            restart_count: 0,
            last_exit: None,
            mode: None,
            exhausted_since: None,
            placeholder_active: false,
            pid: None,
            worker_id: None,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted_since.is_some()
    }
}
