//! Integration tests for the running wall
//!
//! Each test starts a complete `DisplayWall` on recording fakes under paused
//! tokio time: supervision, health monitoring, rotation and reload all run
//! for real, only the worker processes and stream inspection are faked.

use shared::{HealthState, OutputMode, PipelineMode, ProcessStatus, Rect};

use camwall::types::{OutputTarget, COMPOSITOR_UNIT};
use camwall::{DisplayError, StopOutcome};

mod common;
use common::{Behaviour, TestFixtures, TestHelpers, WallBuilder};

fn running(snapshot: &camwall::SupervisedSnapshot) -> bool {
    snapshot.state == ProcessStatus::Running
}

/// Test that every visible source gets one windowed worker at its cell
#[tokio::test(start_paused = true)]
async fn test_wall_starts_one_worker_per_source() {
    // Arrange & Act
    let (wall, launcher) = WallBuilder::new(2, 2, 4).build().await;
    for name in TestFixtures::camera_names(4) {
        TestHelpers::wait_for_unit(&wall, &name, running).await;
    }

    // Assert
    assert_eq!(launcher.live_sources(), TestFixtures::camera_names(4));
    let spec = launcher.last_live_spec("cam4").unwrap();
    assert_eq!(spec.mode, Some(PipelineMode::Copy));
    assert_eq!(
        spec.output,
        OutputTarget::Window {
            rect: Rect::new(960, 540, 960, 540)
        }
    );
    assert!(wall.registry().snapshot(COMPOSITOR_UNIT).await.is_none());
    assert!(launcher.overlaps().is_empty());

    assert_eq!(wall.shutdown().await, StopOutcome::Clean);
    assert_eq!(launcher.running_workers(), 0);
}

/// Test that composed output relays every slot into one compositor
#[tokio::test(start_paused = true)]
async fn test_composed_mode_runs_compositor() {
    // Arrange & Act
    let (wall, launcher) = WallBuilder::new(2, 2, 4)
        .with_output_mode(OutputMode::Composed)
        .build()
        .await;
    TestHelpers::wait_for_unit(&wall, COMPOSITOR_UNIT, running).await;
    TestHelpers::wait_for_unit(&wall, "cam3", running).await;

    // Assert
    let compositor = launcher.specs(COMPOSITOR_UNIT);
    assert_eq!(compositor.len(), 1);
    assert!(matches!(compositor[0].output, OutputTarget::Framebuffer { .. }));
    assert_eq!(
        launcher.last_live_spec("cam3").unwrap().output,
        OutputTarget::UdpRelay { port: 5002 }
    );

    let status = wall.status().await;
    assert!(status.compositor.is_some());
    assert_eq!(status.sources.len(), 4);

    wall.shutdown().await;
}

/// Test that a camera cannot take the compositor's unit name
#[tokio::test(start_paused = true)]
async fn test_camera_named_like_compositor_is_refused() {
    // Arrange
    let builder = WallBuilder::new(2, 1, 2)
        .with_output_mode(OutputMode::Composed)
        .with_config(|config| config.cameras[0].name = COMPOSITOR_UNIT.to_string());

    // Act
    let result = builder.try_build().await;

    // Assert
    match result {
        Err(err) => assert!(matches!(err, DisplayError::Config { .. }), "unexpected error {err}"),
        Ok(_) => panic!("wall started with a camera named {COMPOSITOR_UNIT}"),
    }
}

/// Test that a reload renaming a camera to the compositor's name leaves the compositor alone
#[tokio::test(start_paused = true)]
async fn test_reload_cannot_replace_compositor() {
    // Arrange
    let (mut wall, launcher) = WallBuilder::new(2, 1, 2)
        .with_output_mode(OutputMode::Composed)
        .build()
        .await;
    TestHelpers::wait_for_unit(&wall, COMPOSITOR_UNIT, running).await;
    let mut config = wall.config().clone();
    config.cameras[1].name = COMPOSITOR_UNIT.to_string();

    // Act
    let result = wall.reload(config).await;

    // Assert
    assert!(matches!(result, Err(DisplayError::Config { .. })));
    assert!(!launcher.was_terminated(COMPOSITOR_UNIT));
    assert_eq!(launcher.specs(COMPOSITOR_UNIT).len(), 1);
    assert!(matches!(
        wall.registry().plan(COMPOSITOR_UNIT).await,
        Some(camwall::UnitPlan::Compositor { .. })
    ));

    wall.shutdown().await;
}

/// Test that only h264 streams are copied and slow probes fall back
#[tokio::test(start_paused = true)]
async fn test_pipeline_mode_follows_codec() {
    // Arrange
    let builder = WallBuilder::new(2, 2, 3);
    let hevc_url = builder.config().cameras[1].url.clone();
    let slow_url = builder.config().cameras[2].url.clone();

    // Act
    let (wall, launcher) = builder
        .with_inspector(|inspector| {
            inspector.codec(&hevc_url, TestFixtures::HEVC).hang(&slow_url);
        })
        .build()
        .await;
    TestHelpers::wait_for_unit(&wall, "cam3", running).await;

    // Assert
    let mode = |name: &str| launcher.last_live_spec(name).and_then(|spec| spec.mode);
    assert_eq!(mode("cam1"), Some(PipelineMode::Copy));
    assert_eq!(mode("cam2"), Some(PipelineMode::Transcode));
    assert_eq!(mode("cam3"), Some(PipelineMode::Transcode));

    let status = wall.status().await;
    assert_eq!(status.sources["cam1"].mode, Some(PipelineMode::Copy));
    assert_eq!(status.sources["cam3"].mode, Some(PipelineMode::Transcode));

    wall.shutdown().await;
}

/// Test that a tenth camera on a 3x3 wall rotates through the last slot
#[tokio::test(start_paused = true)]
async fn test_rotation_swaps_last_slot() {
    // Arrange
    let (wall, launcher) = WallBuilder::new(3, 3, 10).with_rotation().build().await;
    TestHelpers::wait_for_unit(&wall, "cam9", running).await;

    let fixed_before = wall.registry().snapshot("cam1").await.unwrap().worker_id;
    assert_eq!(wall.layout().occupant(8).unwrap().source, "cam9");
    assert!(wall.hidden().is_empty());
    let status = wall.status().await;
    assert!(status.hidden.is_empty());
    assert_eq!(status.waiting, vec!["cam10".to_string()]);

    // Act: first rotation
    TestHelpers::advance(TestFixtures::ROTATION_INTERVAL + 1).await;

    // Assert
    assert_eq!(wall.layout().occupant(8).unwrap().source, "cam10");
    assert_eq!(wall.status().await.waiting, vec!["cam9".to_string()]);
    assert!(launcher.was_terminated("cam9"));
    assert!(launcher.live_sources().contains(&"cam10".to_string()));
    assert!(!launcher.live_sources().contains(&"cam9".to_string()));
    assert!(wall.registry().snapshot("cam9").await.is_none());

    // Act: second rotation brings the first occupant back
    TestHelpers::advance(TestFixtures::ROTATION_INTERVAL).await;

    // Assert
    assert_eq!(wall.layout().occupant(8).unwrap().source, "cam9");
    assert_eq!(launcher.live_launches("cam9"), 2);
    assert_eq!(launcher.live_launches("cam10"), 1);
    assert_eq!(launcher.live_launches("cam1"), 1);
    assert_eq!(wall.registry().snapshot("cam1").await.unwrap().worker_id, fixed_before);
    assert!(launcher.overlaps().is_empty());
    TestHelpers::assert_no_overlap(&wall.layout(), TestFixtures::SCREEN_WIDTH, TestFixtures::SCREEN_HEIGHT);

    wall.shutdown().await;
}

/// Test the retry ceiling, the placeholder and one recovery per retry interval
#[tokio::test(start_paused = true)]
async fn test_failing_camera_exhausts_then_retries_once() {
    // Arrange
    let (wall, launcher) = WallBuilder::new(2, 2, 4)
        .with_launcher(|launcher| launcher.always("cam2", Behaviour::crash()))
        .build()
        .await;

    // Act: well past three failures, short of the retry interval
    TestHelpers::advance(TestFixtures::RETRY_INTERVAL).await;

    // Assert
    assert_eq!(launcher.live_launches("cam2"), 3);
    let snapshot = wall.registry().snapshot("cam2").await.unwrap();
    assert!(snapshot.is_exhausted());
    assert!(snapshot.placeholder_active);

    let status = wall.status().await;
    assert_eq!(status.sources["cam2"].health, HealthState::Unavailable);
    assert!(status.sources["cam2"].placeholder);
    assert_eq!(status.count_by_health(HealthState::Healthy), 3);

    // Act & Assert: exactly one attempt per retry interval
    TestHelpers::advance(10).await;
    assert_eq!(launcher.live_launches("cam2"), 4);
    TestHelpers::advance(10).await;
    assert_eq!(launcher.live_launches("cam2"), 4);
    TestHelpers::advance(10).await;
    assert_eq!(launcher.live_launches("cam2"), 5);

    // Neighbours never noticed
    assert_eq!(launcher.live_launches("cam1"), 1);
    assert_eq!(launcher.live_launches("cam3"), 1);
    assert!(launcher.overlaps().is_empty());

    wall.shutdown().await;
}

/// Test that a camera coming back mid-episode returns to healthy
#[tokio::test(start_paused = true)]
async fn test_recovered_camera_becomes_healthy() {
    let (wall, launcher) = WallBuilder::new(2, 2, 4)
        .with_launcher(|launcher| {
            launcher.script("cam4", [Behaviour::crash(), Behaviour::crash(), Behaviour::crash()]);
        })
        .build()
        .await;

    TestHelpers::advance(TestFixtures::RETRY_INTERVAL + 10).await;

    let snapshot = TestHelpers::wait_for_unit(&wall, "cam4", running).await;
    assert_eq!(snapshot.consecutive_failures, 0);
    assert!(!snapshot.placeholder_active);
    assert_eq!(launcher.live_launches("cam4"), 4);
    assert!(launcher.live_sources().contains(&"cam4".to_string()));

    TestHelpers::advance(2).await;
    assert_eq!(wall.status().await.sources["cam4"].health, HealthState::Healthy);

    wall.shutdown().await;
}

/// Test that stopping one unit leaves the others untouched
#[tokio::test(start_paused = true)]
async fn test_stop_is_isolated() {
    // Arrange
    let (wall, launcher) = WallBuilder::new(2, 2, 4).build().await;
    for name in TestFixtures::camera_names(4) {
        TestHelpers::wait_for_unit(&wall, &name, running).await;
    }
    let before = wall.registry().snapshot("cam1").await.unwrap().worker_id;

    // Act
    let outcome = wall.registry().stop("cam2").await;

    // Assert
    assert_eq!(outcome, Some(StopOutcome::Clean));
    assert!(launcher.was_terminated("cam2"));
    assert!(!launcher.was_terminated("cam1"));
    assert_eq!(wall.registry().len().await, 3);
    assert_eq!(wall.registry().snapshot("cam1").await.unwrap().worker_id, before);

    wall.shutdown().await;
}

/// Test that reload only touches units whose configuration changed
#[tokio::test(start_paused = true)]
async fn test_reload_restarts_only_changed_units() {
    // Arrange
    let (mut wall, launcher) = WallBuilder::new(2, 2, 3).build().await;
    for name in TestFixtures::camera_names(3) {
        TestHelpers::wait_for_unit(&wall, &name, running).await;
    }
    let cam1 = wall.registry().snapshot("cam1").await.unwrap().worker_id;
    let cam3 = wall.registry().snapshot("cam3").await.unwrap().worker_id;

    let mut config = wall.config().clone();
    config.cameras[1].url = "rtsp://192.168.1.60:554/cam2/stream2".to_string();
    config.cameras.push(TestFixtures::camera("cam4"));

    // Act
    let report = wall.reload(config).await.unwrap();

    // Assert
    assert!(!report.full_restart);
    assert_eq!(report.stopped, vec!["cam2".to_string()]);
    assert_eq!(report.started, vec!["cam2".to_string(), "cam4".to_string()]);
    assert!(!report.compositor_rebuilt);

    assert_eq!(wall.registry().snapshot("cam1").await.unwrap().worker_id, cam1);
    assert_eq!(wall.registry().snapshot("cam3").await.unwrap().worker_id, cam3);
    assert!(!launcher.was_terminated("cam1"));
    assert_eq!(wall.layout().occupant(3).unwrap().source, "cam4");

    TestHelpers::wait_for_unit(&wall, "cam2", running).await;
    assert_eq!(
        launcher.last_live_spec("cam2").unwrap().input,
        "rtsp://192.168.1.60:554/cam2/stream2"
    );
    assert!(launcher.overlaps().is_empty());

    wall.shutdown().await;
}

/// Test that a grid change restarts every unit
#[tokio::test(start_paused = true)]
async fn test_reload_with_new_grid_restarts_everything() {
    let (mut wall, launcher) = WallBuilder::new(2, 2, 4).build().await;
    TestHelpers::wait_for_unit(&wall, "cam1", running).await;

    let mut config = wall.config().clone();
    config.display.grid_cols = 4;
    config.display.grid_rows = 1;
    let report = wall.reload(config).await.unwrap();

    assert!(report.full_restart);
    assert_eq!(report.started, TestFixtures::camera_names(4));
    TestHelpers::wait_for_unit(&wall, "cam1", running).await;
    assert_eq!(launcher.live_launches("cam1"), 2);
    assert_eq!(wall.layout().get("cam2").unwrap().rect, Rect::new(480, 0, 480, 1080));

    wall.shutdown().await;
}

/// Test that an invalid layout on reload leaves the wall running
#[tokio::test(start_paused = true)]
async fn test_rejected_reload_keeps_running_wall() {
    let (mut wall, launcher) = WallBuilder::new(2, 2, 2).build().await;
    TestHelpers::wait_for_unit(&wall, "cam1", running).await;

    let mut config = wall.config().clone();
    config.cameras[1].x = Some(1800);
    config.cameras[1].y = Some(0);
    config.cameras[1].width = Some(200);
    config.cameras[1].height = Some(200);

    assert!(wall.reload(config).await.is_err());
    assert_eq!(wall.registry().len().await, 2);
    assert!(!launcher.was_terminated("cam1"));

    wall.shutdown().await;
}

/// Test the status snapshot for an overflowing wall without rotation
#[tokio::test(start_paused = true)]
async fn test_status_snapshot_reports_hidden_sources() {
    let (wall, _launcher) = WallBuilder::new(2, 2, 6).build().await;
    for name in TestFixtures::camera_names(4) {
        TestHelpers::wait_for_unit(&wall, &name, running).await;
    }
    TestHelpers::advance(5).await;

    let status = wall.status().await;

    assert_eq!(wall.hidden(), &["cam5".to_string(), "cam6".to_string()]);
    assert_eq!(status.hidden, vec!["cam5".to_string(), "cam6".to_string()]);
    assert!(status.waiting.is_empty());
    assert_eq!(status.sources.len(), 4);
    assert_eq!(status.count_by_health(HealthState::Healthy), 4);
    assert_eq!(status.sources["cam3"].slot, Some(2));
    assert_eq!(status.sources["cam3"].state, ProcessStatus::Running);
    assert!(status.sources["cam3"].uptime_secs.unwrap() >= 4);
    assert!(status.compositor.is_none());

    wall.shutdown().await;
}

/// Test that a worker ignoring termination makes shutdown report a forced stop
#[tokio::test(start_paused = true)]
async fn test_shutdown_reports_forced_stop() {
    let (wall, launcher) = WallBuilder::new(2, 2, 2)
        .with_launcher(|launcher| launcher.always("cam2", Behaviour::Stubborn))
        .build()
        .await;
    TestHelpers::wait_for_unit(&wall, "cam2", running).await;

    let outcome = wall.shutdown().await;

    assert_eq!(outcome, StopOutcome::Forced);
    assert!(launcher.was_terminated("cam1"));
    assert_eq!(launcher.running_workers(), 0);
}
