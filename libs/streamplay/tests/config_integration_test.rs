// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

mod common;

use common::*;
use serial_test::serial;
use std::time::{Duration, Instant};
use streamplay::core::{
    init_logging, DispatchConfig, LoggingConfig, MediaCatalog, MediaPlayer, MediaStatus,
    PlaybackState, PlayerConfig, SimulatedEngine, SimulationOptions,
};

#[test]
fn test_player_config_from_project_dir() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join(PlayerConfig::FILE_NAME),
        r#"
state_change_timeout_ms = 2500
position_update_interval_ms = 250

[dispatch]
mode = "event-loop"

[rtsp]
latency_ms = 200
"#,
    )
    .unwrap();

    let config = PlayerConfig::load(dir.path()).unwrap();
    assert_eq!(config.state_change_timeout(), Duration::from_millis(2500));
    assert_eq!(config.dispatch, DispatchConfig::EventLoop);
    assert_eq!(config.rtsp.latency_ms, 200);
    assert!(config.rtsp.drop_on_latency);
    assert_eq!(config.buffered_threshold_percent, 100);
}

#[test]
fn test_invalid_config_rejected_by_player() {
    let engine = SimulatedEngine::new(MediaCatalog::new(), SimulationOptions::default()).unwrap();
    let config = PlayerConfig {
        buffered_threshold_percent: 0,
        ..PlayerConfig::default()
    };
    assert!(MediaPlayer::new(std::sync::Arc::new(engine), config).is_err());
}

#[test]
fn test_missing_config_falls_back_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    assert!(PlayerConfig::load(dir.path()).is_err());
    assert_eq!(PlayerConfig::load_or_default(dir.path()), PlayerConfig::default());
}

#[test]
fn test_catalog_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("media.toml");
    std::fs::write(
        &path,
        r#"
[[media]]
uri = "file:///media/clip.mp4"
duration_ms = 5000
container = "video/quicktime"

[[media.streams]]
kind = "video"
codec = "video/x-h264"
width = 640
height = 360

[[media.streams]]
kind = "audio"
codec = "audio/mpeg"
language = "en"
"#,
    )
    .unwrap();

    let catalog = MediaCatalog::load(&path).unwrap();
    let clip = catalog.get("file:///media/clip.mp4").unwrap();
    assert_eq!(clip.duration(), Some(Duration::from_secs(5)));
    assert_eq!(clip.streams.len(), 2);
}

#[test]
fn test_poll_mode_dispatches_on_its_own() {
    let config = PlayerConfig {
        position_update_interval_ms: 20,
        ..PlayerConfig::default()
    };
    let h = harness_with(config, SimulationOptions::default());
    h.player.set_media(SHORT).unwrap();

    let deadline = Instant::now() + WAIT;
    while h.player.media_status() != MediaStatus::Loaded && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(h.player.media_status(), MediaStatus::Loaded);

    h.player.play();
    while h.player.media_status() != MediaStatus::EndOfMedia && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(h.player.media_status(), MediaStatus::EndOfMedia);
    assert_eq!(h.player.state(), PlaybackState::Stopped);
    // explicit dispatch is refused while the poll thread owns it
    assert_eq!(h.player.dispatch(), 0);
}

#[test]
#[serial]
fn test_logging_init_is_idempotent() {
    let config = LoggingConfig {
        default_directive: "streamplay=debug".to_string(),
        ansi: false,
    };
    // the first call may or may not install, depending on test order
    init_logging(&config).unwrap();
    assert!(!init_logging(&config).unwrap());
}
