//! Test fixtures and data for wall tests
//!
//! Consistent camera sets and configurations used across the test suites.

use shared::{AppConfig, BackoffKind, CameraEntry, DisplaySettings, OutputMode};

/// Standard test data and fixtures
pub struct TestFixtures;

impl TestFixtures {
    pub const SCREEN_WIDTH: u32 = 1920;
    pub const SCREEN_HEIGHT: u32 = 1080;

    pub const H264: &'static str = "h264";
    pub const HEVC: &'static str = "hevc";

    pub const ROTATION_INTERVAL: u64 = 30;
    pub const RETRY_INTERVAL: u64 = 20;

    /// Camera names `cam1..=camN`
    pub fn camera_names(count: usize) -> Vec<String> {
        (1..=count).map(|i| format!("cam{i}")).collect()
    }

    pub fn camera_url(name: &str) -> String {
        format!("rtsp://192.168.1.50:554/{name}/stream1")
    }

    pub fn camera(name: &str) -> CameraEntry {
        CameraEntry {
            name: name.to_string(),
            url: Self::camera_url(name),
            window_id: None,
            enabled: true,
            x: None,
            y: None,
            width: None,
            height: None,
        }
    }

    pub fn cameras(count: usize) -> Vec<CameraEntry> {
        Self::camera_names(count).iter().map(|name| Self::camera(name)).collect()
    }

    /// Settings with short, deterministic supervision timings
    pub fn display(cols: u32, rows: u32) -> DisplaySettings {
        DisplaySettings {
            screen_width: Self::SCREEN_WIDTH,
            screen_height: Self::SCREEN_HEIGHT,
            grid_cols: cols,
            grid_rows: rows,
            rotation_interval: Self::ROTATION_INTERVAL,
            restart_retries: 3,
            camera_retry_interval: Self::RETRY_INTERVAL,
            output_mode: OutputMode::Windowed,
            hardware_accel: false,
            health_poll_interval: 1,
            startup_grace: 1,
            probe_timeout: 5,
            failure_window: 120,
            backoff: BackoffKind::Fixed,
            restart_delay: 2,
            stable_after: 10,
            stop_grace: 1,
            shutdown_grace: 5,
            status_interval: 3600,
            ..DisplaySettings::default()
        }
    }

    pub fn config(cols: u32, rows: u32, cameras: usize) -> AppConfig {
        AppConfig {
            display: Self::display(cols, rows),
            cameras: Self::cameras(cameras),
        }
    }

    /// The same configuration through the JSON loader
    pub fn config_json(cols: u32, rows: u32, cameras: usize) -> String {
        let cameras: Vec<String> = Self::camera_names(cameras)
            .iter()
            .map(|name| format!(r#"{{"name": "{name}", "url": "{}"}}"#, Self::camera_url(name)))
            .collect();
        format!(
            r#"{{
                "display": {{
                    "screen_width": {},
                    "screen_height": {},
                    "grid_cols": {cols},
                    "grid_rows": {rows},
                    "output_mode": "windowed"
                }},
                "cameras": [{}]
            }}"#,
            Self::SCREEN_WIDTH,
            Self::SCREEN_HEIGHT,
            cameras.join(", ")
        )
    }
}
