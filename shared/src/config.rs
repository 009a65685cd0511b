//! Configuration model for the camera wall
//!
//! The on-disk format is JSON with a `display` section and a `cameras` list.
//! Every display key has a default so a minimal file only lists cameras.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use crate::errors::{SharedError, SharedResult};
use crate::types::{Rect, SourceDescriptor};

/// URL schemes the media engine is expected to open
pub const SUPPORTED_SCHEMES: &[&str] = &["rtsp", "rtsps", "http", "https", "udp", "rtmp", "file"];

/// Unit name of the composed-mode compositor, unavailable to cameras
pub const COMPOSITOR_NAME: &str = "compositor";

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// How the visible sources reach the screen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// Per-slot relays composed into one framebuffer output
    Composed,
    /// One borderless player window per source
    Windowed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    Fixed,
    Exponential,
}

/// Display and supervision settings. Durations are whole seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplaySettings {
    pub screen_width: u32,
    pub screen_height: u32,
    pub grid_cols: u32,
    pub grid_rows: u32,
    pub enable_rotation: bool,
    pub rotation_interval: u64,
    pub network_timeout: u64,
    pub restart_retries: u32,
    pub log_level: String,
    pub camera_retry_interval: u64,

    pub output_mode: OutputMode,
    pub hardware_accel: bool,
    pub low_latency: bool,
    pub use_udp_transport: bool,
    pub buffer_size_kb: u32,
    pub max_delay_ms: u32,
    pub thread_queue_size: u32,
    pub thread_count: u32,
    pub frame_rate: u32,
    pub framebuffer_device: String,
    pub relay_base_port: u16,

    pub show_placeholders: bool,
    pub placeholder_image: Option<String>,
    pub placeholder_bg_color: String,
    pub placeholder_text_color: String,
    pub placeholder_after_failures: u32,

    pub health_poll_interval: u64,
    pub startup_grace: u64,
    pub probe_timeout: u64,
    pub failure_window: u64,
    pub backoff: BackoffKind,
    pub restart_delay: u64,
    pub max_restart_delay: u64,
    pub stable_after: u64,
    pub stop_grace: u64,
    pub shutdown_grace: u64,
    pub status_interval: u64,
    pub status_file: Option<String>,

    pub ffmpeg_bin: String,
    pub ffprobe_bin: String,
    pub player_bin: String,
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            screen_width: 1920,
            screen_height: 1080,
            grid_cols: 2,
            grid_rows: 2,
            enable_rotation: false,
            rotation_interval: 30,
            network_timeout: 30,
            restart_retries: 3,
            log_level: "info".to_string(),
            camera_retry_interval: 30,

            output_mode: OutputMode::Composed,
            hardware_accel: true,
            low_latency: true,
            use_udp_transport: false,
            buffer_size_kb: 512,
            max_delay_ms: 500,
            thread_queue_size: 8,
            thread_count: 1,
            frame_rate: 25,
            framebuffer_device: "/dev/fb0".to_string(),
            relay_base_port: 5000,

            show_placeholders: true,
            placeholder_image: None,
            placeholder_bg_color: "darkgray".to_string(),
            placeholder_text_color: "white".to_string(),
            placeholder_after_failures: 1,

            health_poll_interval: 10,
            startup_grace: 5,
            probe_timeout: 12,
            failure_window: 300,
            backoff: BackoffKind::Exponential,
            restart_delay: 3,
            max_restart_delay: 60,
            stable_after: 60,
            stop_grace: 5,
            shutdown_grace: 10,
            status_interval: 60,
            status_file: None,

            ffmpeg_bin: "ffmpeg".to_string(),
            ffprobe_bin: "ffprobe".to_string(),
            player_bin: "mpv".to_string(),
        }
    }
}

impl DisplaySettings {
    pub fn capacity(&self) -> usize {
        self.grid_cols as usize * self.grid_rows as usize
    }
}

/// One camera entry as written in the config file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraEntry {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub window_id: Option<usize>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub x: Option<u32>,
    #[serde(default)]
    pub y: Option<u32>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

fn default_enabled() -> bool {
    true
}

impl CameraEntry {
    /// Explicit rectangle, if all four coordinates were given
    pub fn explicit_rect(&self) -> SharedResult<Option<Rect>> {
        match (self.x, self.y, self.width, self.height) {
            (Some(x), Some(y), Some(width), Some(height)) => Ok(Some(Rect::new(x, y, width, height))),
            (None, None, None, None) => Ok(None),
            _ => Err(SharedError::invalid(
                format!("cameras[{}].placement", self.name),
                "x, y, width and height must be given together",
            )),
        }
    }

    pub fn to_descriptor(&self) -> SharedResult<SourceDescriptor> {
        Ok(SourceDescriptor {
            name: self.name.clone(),
            url: self.url.clone(),
            enabled: self.enabled,
            placement: self.explicit_rect()?,
            slot: self.window_id,
        })
    }
}

/// Complete application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub display: DisplaySettings,
    #[serde(default)]
    pub cameras: Vec<CameraEntry>,
}

impl AppConfig {
    /// Read, parse and validate a JSON configuration file
    pub fn load(path: impl AsRef<Path>) -> SharedResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| SharedError::ConfigRead {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_json(&raw).map_err(|e| match e {
            SharedError::ConfigParse { source, .. } => SharedError::ConfigParse {
                path: path.display().to_string(),
                source,
            },
            other => other,
        })?;
        Ok(config)
    }

    pub fn from_json(raw: &str) -> SharedResult<Self> {
        let mut config: AppConfig = serde_json::from_str(raw).map_err(|source| SharedError::ConfigParse {
            path: "<inline>".to_string(),
            source,
        })?;
        config.display.log_level = config.display.log_level.to_lowercase();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> SharedResult<()> {
        let d = &self.display;

        for (field, value) in [
            ("display.screen_width", d.screen_width),
            ("display.screen_height", d.screen_height),
            ("display.grid_cols", d.grid_cols),
            ("display.grid_rows", d.grid_rows),
            ("display.frame_rate", d.frame_rate),
        ] {
            if value == 0 {
                return Err(SharedError::invalid(field, value));
            }
        }

        for (field, value) in [
            ("display.rotation_interval", d.rotation_interval),
            ("display.health_poll_interval", d.health_poll_interval),
            ("display.probe_timeout", d.probe_timeout),
            ("display.failure_window", d.failure_window),
            ("display.status_interval", d.status_interval),
        ] {
            if value == 0 {
                return Err(SharedError::invalid(field, value));
            }
        }

        if !LOG_LEVELS.contains(&d.log_level.to_lowercase().as_str()) {
            return Err(SharedError::invalid("display.log_level", &d.log_level));
        }

        if d.output_mode == OutputMode::Composed
            && d.relay_base_port as usize + d.capacity() > u16::MAX as usize
        {
            return Err(SharedError::invalid("display.relay_base_port", d.relay_base_port));
        }

        // A dead relay with nothing standing in stalls every overlay
        if d.output_mode == OutputMode::Composed && !d.show_placeholders {
            return Err(SharedError::invalid(
                "display.show_placeholders",
                "placeholders cannot be disabled in composed output",
            ));
        }

        if self.cameras.is_empty() {
            return Err(SharedError::invalid("cameras", "no cameras configured"));
        }
        if !self.cameras.iter().any(|c| c.enabled) {
            return Err(SharedError::invalid("cameras", "no enabled cameras"));
        }

        let mut names = HashSet::new();
        for camera in &self.cameras {
            if camera.name.trim().is_empty() {
                return Err(SharedError::invalid("cameras.name", "empty"));
            }
            if camera.name == COMPOSITOR_NAME {
                return Err(SharedError::invalid("cameras.name", format!("'{COMPOSITOR_NAME}' is reserved")));
            }
            if !names.insert(camera.name.as_str()) {
                return Err(SharedError::invalid("cameras.name", format!("duplicate '{}'", camera.name)));
            }
            validate_url(&camera.name, &camera.url)?;
            camera.explicit_rect()?;
        }

        Ok(())
    }

    /// Source descriptors in declared order
    pub fn descriptors(&self) -> SharedResult<Vec<SourceDescriptor>> {
        self.cameras.iter().map(CameraEntry::to_descriptor).collect()
    }
}

fn validate_url(camera: &str, raw: &str) -> SharedResult<()> {
    let parsed = url::Url::parse(raw).map_err(|e| SharedError::InvalidUrl {
        camera: camera.to_string(),
        reason: e.to_string(),
    })?;

    if !SUPPORTED_SCHEMES.contains(&parsed.scheme()) {
        return Err(SharedError::InvalidUrl {
            camera: camera.to_string(),
            reason: format!("unsupported scheme '{}'", parsed.scheme()),
        });
    }

    Ok(())
}
