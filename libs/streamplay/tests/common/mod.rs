// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Shared fixtures for the player integration tests.

#![allow(dead_code)]

use crossbeam_channel::Receiver;
use std::sync::Arc;
use std::time::{Duration, Instant};
use streamplay::core::{
    DispatchConfig, MediaCatalog, MediaDescription, MediaPlayer, MediaStatus, PlayerConfig,
    PlayerEvent, SimulatedEngine, SimulationOptions, StreamDescription,
};

pub const SONG: &str = "file:///media/song.mp3";
pub const SHORT: &str = "file:///media/short.ogg";
pub const MOVIE: &str = "file:///media/movie.mkv";
pub const BROKEN: &str = "file:///media/broken.avi";
pub const RADIO: &str = "http://radio.example/live";
pub const MISSING: &str = "file:///media/missing.wav";

pub const WAIT: Duration = Duration::from_secs(3);

pub fn catalog() -> MediaCatalog {
    MediaCatalog::new()
        .with(
            MediaDescription::new(SONG)
                .with_duration(Duration::from_secs(30))
                .with_container("application/x-id3")
                .with_tag("title", "Song")
                .with_tag("artist", "Band")
                .with_stream(StreamDescription::audio("audio/mpeg")),
        )
        .with(
            MediaDescription::new(SHORT)
                .with_duration(Duration::from_millis(150))
                .with_container("application/ogg")
                .with_stream(StreamDescription::audio("audio/x-vorbis")),
        )
        .with(
            MediaDescription::new(MOVIE)
                .with_duration(Duration::from_secs(60))
                .with_container("video/x-matroska")
                .with_stream(StreamDescription::video("video/x-h264", 1280, 720))
                .with_stream(StreamDescription::audio("audio/mpeg").with_language("en"))
                .with_stream(StreamDescription::audio("audio/x-opus").with_language("de"))
                .with_stream(StreamDescription::subtitle("application/x-ssa").with_language("en")),
        )
        .with(
            MediaDescription::new(BROKEN)
                .with_duration(Duration::from_secs(10))
                .with_stream(StreamDescription::video("video/x-weird", 640, 480).unsupported()),
        )
        .with(
            MediaDescription::new(RADIO)
                .with_container("audio/mpeg")
                .with_stream(StreamDescription::audio("audio/mpeg")),
        )
}

pub struct Harness {
    pub player: MediaPlayer,
    pub engine: Arc<SimulatedEngine>,
    pub events: Receiver<PlayerEvent>,
}

pub fn event_loop_config() -> PlayerConfig {
    PlayerConfig {
        dispatch: DispatchConfig::EventLoop,
        position_update_interval_ms: 20,
        stalled_debounce_ms: 50,
        ..PlayerConfig::default()
    }
}

pub fn harness() -> Harness {
    harness_with(event_loop_config(), SimulationOptions::default())
}

pub fn harness_with(config: PlayerConfig, options: SimulationOptions) -> Harness {
    let engine = Arc::new(SimulatedEngine::new(catalog(), options).unwrap());
    let player = MediaPlayer::new(engine.clone(), config).unwrap();
    let events = player.subscribe();
    Harness {
        player,
        engine,
        events,
    }
}

/// Dispatch until `pred` holds or `timeout` elapses.
pub fn pump_until(
    player: &MediaPlayer,
    timeout: Duration,
    pred: impl Fn(&MediaPlayer) -> bool,
) -> bool {
    let watch = player.bus_watch();
    let deadline = Instant::now() + timeout;
    loop {
        player.dispatch();
        if pred(player) {
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        let _ = watch.recv_timeout((deadline - now).min(Duration::from_millis(5)));
    }
}

/// Dispatch for `duration` regardless of state.
pub fn pump_for(player: &MediaPlayer, duration: Duration) {
    pump_until(player, duration, |_| false);
}

pub fn load(h: &Harness, uri: &str) {
    h.player.set_media(uri).unwrap();
    assert!(
        pump_until(&h.player, WAIT, |p| p.media_status() == MediaStatus::Loaded),
        "'{}' did not load, status {}",
        uri,
        h.player.media_status()
    );
}

pub fn drain(events: &Receiver<PlayerEvent>) -> Vec<PlayerEvent> {
    events.try_iter().collect()
}

pub fn statuses(events: &[PlayerEvent]) -> Vec<MediaStatus> {
    events
        .iter()
        .filter_map(|e| match e {
            PlayerEvent::MediaStatusChanged(s) => Some(*s),
            _ => None,
        })
        .collect()
}
