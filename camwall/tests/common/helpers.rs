//! Test helpers and builder patterns for wall tests
//!
//! `WallBuilder` starts a real `DisplayWall` on top of recording fakes, so
//! tests exercise the whole supervision stack under paused tokio time.

use std::sync::Arc;
use std::time::Duration;

use camwall::traits::TokioClock;
use camwall::types::PlacementTable;
use camwall::{DisplayResult, DisplayWall, SupervisedSnapshot};
use shared::{AppConfig, OutputMode};

use super::fakes::{RecordingLauncher, TableInspector};
use super::fixtures::TestFixtures;

/// Builder for walls backed by fakes, every camera h264 unless told otherwise
pub struct WallBuilder {
    config: AppConfig,
    launcher: RecordingLauncher,
    inspector: TableInspector,
}

impl WallBuilder {
    pub fn new(cols: u32, rows: u32, cameras: usize) -> Self {
        let config = TestFixtures::config(cols, rows, cameras);
        let inspector = TableInspector::new();
        for camera in &config.cameras {
            inspector.codec(&camera.url, TestFixtures::H264);
        }
        Self {
            config,
            launcher: RecordingLauncher::new(),
            inspector,
        }
    }

    pub fn with_rotation(mut self) -> Self {
        self.config.display.enable_rotation = true;
        self
    }

    pub fn with_output_mode(mut self, mode: OutputMode) -> Self {
        self.config.display.output_mode = mode;
        self
    }

    /// Adjust the configuration directly
    pub fn with_config<F>(mut self, setup: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        setup(&mut self.config);
        self
    }

    /// Configure the launcher with a setup function
    pub fn with_launcher<F>(self, setup: F) -> Self
    where
        F: FnOnce(&RecordingLauncher),
    {
        setup(&self.launcher);
        self
    }

    /// Configure the inspector with a setup function
    pub fn with_inspector<F>(self, setup: F) -> Self
    where
        F: FnOnce(&TableInspector),
    {
        setup(&self.inspector);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub async fn build(self) -> (DisplayWall, RecordingLauncher) {
        self.try_build().await.expect("wall should start")
    }

    /// Start the wall, handing back the startup error instead of panicking
    pub async fn try_build(self) -> DisplayResult<(DisplayWall, RecordingLauncher)> {
        let wall = DisplayWall::start_with(
            self.config,
            Arc::new(self.launcher.clone()),
            Arc::new(self.inspector),
            Arc::new(TokioClock),
            None,
        )
        .await?;
        Ok((wall, self.launcher))
    }
}

/// Common test operations and assertions
pub struct TestHelpers;

impl TestHelpers {
    /// Longest a condition may take in paused time before the test fails
    pub const WAIT_LIMIT: Duration = Duration::from_secs(3600);

    /// Let paused time run forward by `secs`
    pub async fn advance(secs: u64) {
        tokio::time::sleep(Duration::from_secs(secs)).await;
    }

    /// Poll until `name`'s snapshot satisfies `condition`
    pub async fn wait_for_unit<F>(wall: &DisplayWall, name: &str, condition: F) -> SupervisedSnapshot
    where
        F: Fn(&SupervisedSnapshot) -> bool,
    {
        let poll = async {
            loop {
                if let Some(snapshot) = wall.registry().snapshot(name).await {
                    if condition(&snapshot) {
                        return snapshot;
                    }
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        };
        tokio::time::timeout(Self::WAIT_LIMIT, poll)
            .await
            .unwrap_or_else(|_| panic!("{name} never reached the expected state"))
    }

    /// No two placements share pixels and all lie on screen
    pub fn assert_no_overlap(table: &PlacementTable, screen_width: u32, screen_height: u32) {
        for (i, a) in table.placements.iter().enumerate() {
            assert!(
                a.rect.fits_within(screen_width, screen_height),
                "{} at {} is off screen",
                a.source,
                a.rect
            );
            for b in &table.placements[i + 1..] {
                assert!(!a.rect.overlaps(&b.rect), "{} overlaps {}", a.source, b.source);
            }
        }
    }

    /// Occupant names in slot order
    pub fn occupants(table: &PlacementTable) -> Vec<String> {
        let mut placements = table.placements.clone();
        placements.sort_by_key(|p| p.slot);
        placements.into_iter().map(|p| p.source).collect()
    }
}
