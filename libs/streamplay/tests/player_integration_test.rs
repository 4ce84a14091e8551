// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

mod common;

use common::*;
use std::time::{Duration, Instant};
use streamplay::core::{
    factories, EngineError, ErrorCode, MediaKind, MediaStatus, MetaDataKey, MetaValue,
    PlaybackState, PlayerErrorKind, PlayerEvent, StreamDescription,
};

#[test]
fn test_load_audio_file() {
    let h = harness();
    h.player.set_media(SONG).unwrap();
    assert!(pump_until(&h.player, WAIT, |p| p.media_status() == MediaStatus::Loaded));

    let events = drain(&h.events);
    assert_eq!(
        statuses(&events),
        vec![MediaStatus::Loading, MediaStatus::Loaded]
    );
    assert!(events.contains(&PlayerEvent::SourceChanged(SONG.to_string())));
    assert!(events.contains(&PlayerEvent::TracksChanged));
    assert_eq!(h.player.track_count(MediaKind::Video), 0);
    assert_eq!(h.player.track_count(MediaKind::Audio), 1);
    assert_eq!(h.player.duration(), Some(Duration::from_secs(30)));
    assert_eq!(h.player.duration_us(), Some(30_000_000));
    assert_eq!(h.player.state(), PlaybackState::Stopped);
}

#[test]
fn test_play_to_end_of_media() {
    let h = harness();
    load(&h, SHORT);
    drain(&h.events);

    h.player.play();
    assert!(pump_until(&h.player, WAIT, |p| p.media_status() == MediaStatus::EndOfMedia));
    let events = drain(&h.events);
    assert_eq!(
        statuses(&events),
        vec![MediaStatus::Buffered, MediaStatus::EndOfMedia]
    );
    assert_eq!(h.player.state(), PlaybackState::Stopped);
    // position is kept at the end until the next play
    assert_eq!(h.player.position(), Duration::from_millis(150));

    h.player.play();
    let events = drain(&h.events);
    assert!(events.contains(&PlayerEvent::PositionChanged(Duration::ZERO)));
    assert_eq!(h.player.state(), PlaybackState::Playing);
    assert_ne!(h.player.media_status(), MediaStatus::EndOfMedia);
}

#[test]
fn test_switch_audio_track_before_play() {
    let h = harness();
    load(&h, MOVIE);
    assert_eq!(h.player.track_count(MediaKind::Video), 1);
    assert_eq!(h.player.track_count(MediaKind::Audio), 2);
    assert_eq!(h.player.track_count(MediaKind::Subtitle), 1);
    assert_eq!(h.player.active_track(MediaKind::Audio), Some(0));
    assert_eq!(
        h.player.metadata().get_str(MetaDataKey::AudioCodec),
        Some("audio/mpeg")
    );

    h.player.pause();
    drain(&h.events);
    assert!(h.player.set_active_track(MediaKind::Audio, Some(1)));
    assert_eq!(h.player.active_track(MediaKind::Audio), Some(1));
    assert!(drain(&h.events).contains(&PlayerEvent::ActiveTrackChanged {
        kind: MediaKind::Audio,
        index: Some(1),
    }));

    h.player.play();
    assert!(pump_until(&h.player, WAIT, |p| p.media_status() == MediaStatus::Buffered));
    assert_eq!(h.player.active_track(MediaKind::Audio), Some(1));
    assert_eq!(
        h.player.metadata().get_str(MetaDataKey::AudioCodec),
        Some("audio/x-opus")
    );
}

#[test]
fn test_engine_error_during_playback() {
    let h = harness();
    load(&h, SONG);
    h.player.play();
    pump_for(&h.player, Duration::from_millis(30));
    drain(&h.events);

    assert!(h
        .engine
        .post_error(EngineError::resource(ErrorCode::Read, "Could not read from resource.")));
    h.player.dispatch();

    assert_eq!(h.player.state(), PlaybackState::Stopped);
    assert_eq!(h.player.media_status(), MediaStatus::Invalid);
    assert_eq!(h.player.error_kind(), PlayerErrorKind::ResourceError);
    assert_ne!(h.player.error_kind() as u8, 0);
    assert_eq!(h.player.error_string(), "Could not read from resource.");

    let events = drain(&h.events);
    assert!(events
        .iter()
        .any(|e| matches!(e, PlayerEvent::ErrorOccurred(err) if err.kind == PlayerErrorKind::ResourceError)));
    assert!(events.contains(&PlayerEvent::StateChanged(PlaybackState::Stopped)));

    // Invalid media cannot be played until replaced
    h.player.play();
    assert_eq!(h.player.state(), PlaybackState::Stopped);
}

#[test]
fn test_pause_is_idempotent() {
    let h = harness();
    load(&h, SONG);
    h.player.pause();
    pump_for(&h.player, Duration::from_millis(20));
    assert_eq!(h.player.state(), PlaybackState::Paused);
    drain(&h.events);

    h.player.pause();
    pump_for(&h.player, Duration::from_millis(20));
    assert!(drain(&h.events).is_empty());
}

#[test]
fn test_legal_transitions_only() {
    let h = harness();
    load(&h, SONG);
    drain(&h.events);

    h.player.pause();
    h.player.play();
    h.player.play();
    h.player.pause();
    h.player.stop();
    h.player.stop();
    h.player.play();
    h.player.stop();

    let states: Vec<PlaybackState> = drain(&h.events)
        .into_iter()
        .filter_map(|e| match e {
            PlayerEvent::StateChanged(s) => Some(s),
            _ => None,
        })
        .collect();
    assert_eq!(
        states,
        vec![
            PlaybackState::Paused,
            PlaybackState::Playing,
            PlaybackState::Paused,
            PlaybackState::Stopped,
            PlaybackState::Playing,
            PlaybackState::Stopped,
        ]
    );
}

#[test]
fn test_set_position_round_trip() {
    let h = harness();
    load(&h, SONG);
    assert!(h.player.is_seekable());

    assert!(h.player.set_position(Duration::from_millis(7_250)));
    assert_eq!(h.player.position(), Duration::from_millis(7_250));
    assert_eq!(h.player.position_us(), 7_250_000);

    // clamped to the duration
    assert!(h.player.set_position(Duration::from_secs(90)));
    assert_eq!(h.player.position(), Duration::from_secs(30));
}

#[test]
fn test_position_monotonic_while_playing() {
    let h = harness();
    load(&h, SONG);
    h.player.play();

    let mut last = Duration::ZERO;
    for _ in 0..10 {
        pump_for(&h.player, Duration::from_millis(10));
        let position = h.player.position();
        assert!(position >= last, "{:?} went back from {:?}", position, last);
        assert!(position <= Duration::from_secs(30));
        last = position;
    }
    assert!(last > Duration::ZERO);

    let positions: Vec<Duration> = drain(&h.events)
        .into_iter()
        .filter_map(|e| match e {
            PlayerEvent::PositionChanged(p) => Some(p),
            _ => None,
        })
        .collect();
    assert!(!positions.is_empty());
}

#[test]
fn test_out_of_range_track_is_ignored() {
    let h = harness();
    load(&h, MOVIE);
    drain(&h.events);

    assert!(!h.player.set_active_track(MediaKind::Audio, Some(5)));
    assert_eq!(h.player.active_track(MediaKind::Audio), Some(0));
    assert!(!h.player.set_active_track(MediaKind::Audio, Some(0)));
    assert!(drain(&h.events).is_empty());
}

#[test]
fn test_switch_track_while_playing() {
    let h = harness();
    load(&h, MOVIE);
    h.player.play();
    assert!(pump_until(&h.player, WAIT, |p| p.media_status() == MediaStatus::Buffered));

    assert!(h.player.set_active_track(MediaKind::Audio, Some(1)));
    assert_eq!(h.player.active_track(MediaKind::Audio), Some(1));
    // the bracket restores playback
    assert_eq!(h.player.state(), PlaybackState::Playing);
    assert!(h.player.pipeline().state() == streamplay::core::ElementState::Playing);
}

#[test]
fn test_disable_subtitles() {
    let h = harness();
    load(&h, MOVIE);
    assert_eq!(h.player.active_track(MediaKind::Subtitle), Some(0));
    assert!(h.player.set_active_track(MediaKind::Subtitle, None));
    assert_eq!(h.player.active_track(MediaKind::Subtitle), None);
    assert_eq!(h.player.track_count(MediaKind::Subtitle), 1);
}

#[test]
fn test_video_metadata() {
    let h = harness();
    load(&h, MOVIE);
    let meta = h.player.metadata();
    assert_eq!(meta.get_str(MetaDataKey::FileFormat), Some("video/x-matroska"));
    assert_eq!(meta.get_str(MetaDataKey::VideoCodec), Some("video/x-h264"));
    assert_eq!(
        meta.get(MetaDataKey::Resolution),
        Some(&MetaValue::Size {
            width: 1280,
            height: 720
        })
    );
    assert_eq!(meta.get(MetaDataKey::VideoFrameRate), Some(&MetaValue::Double(25.0)));
    assert!(h.player.is_video_available());

    let german = h.player.track_metadata(MediaKind::Audio, 1).unwrap();
    assert_eq!(german.get_str(MetaDataKey::Language), Some("de"));
    assert!(h.player.track_metadata(MediaKind::Audio, 2).is_none());
}

#[test]
fn test_song_tags() {
    let h = harness();
    load(&h, SONG);
    let meta = h.player.metadata();
    assert_eq!(meta.get_str(MetaDataKey::Title), Some("Song"));
    assert_eq!(meta.get_str(MetaDataKey::Author), Some("Band"));
    assert_eq!(meta.get_str(MetaDataKey::Url), Some(SONG));
    assert_eq!(
        meta.get(MetaDataKey::Duration),
        Some(&MetaValue::Duration(Duration::from_secs(30)))
    );
}

#[test]
fn test_removed_active_track_does_not_fail_over() {
    let h = harness();
    load(&h, MOVIE);
    drain(&h.events);

    // first audio stream is the second decoder stream
    h.engine.remove_stream(1).unwrap();
    assert!(pump_until(&h.player, WAIT, |p| p.track_count(MediaKind::Audio) == 1));
    assert_eq!(h.player.active_track(MediaKind::Audio), None);
    assert!(!h.player.is_audio_available());
    let events = drain(&h.events);
    assert!(events.contains(&PlayerEvent::TracksChanged));
    assert!(events.contains(&PlayerEvent::AudioAvailableChanged(false)));
}

#[test]
fn test_stream_added_after_preroll() {
    let h = harness();
    load(&h, SONG);
    drain(&h.events);

    h.engine
        .add_stream(StreamDescription::audio("audio/x-flac").with_language("fr"))
        .unwrap();
    assert!(pump_until(&h.player, WAIT, |p| p.track_count(MediaKind::Audio) == 2));
    assert_eq!(h.player.active_track(MediaKind::Audio), Some(0));
    assert!(drain(&h.events).contains(&PlayerEvent::TracksChanged));
}

#[test]
fn test_unknown_resource_reported_once() {
    let h = harness();
    h.player.set_media(MISSING).unwrap();
    assert!(pump_until(&h.player, WAIT, |p| p.media_status() == MediaStatus::Invalid));
    assert_eq!(h.player.error_kind(), PlayerErrorKind::ResourceError);

    h.engine
        .post_error(EngineError::resource(ErrorCode::NotFound, "Resource not found."));
    pump_for(&h.player, Duration::from_millis(20));

    let errors = drain(&h.events)
        .into_iter()
        .filter(|e| matches!(e, PlayerEvent::ErrorOccurred(_)))
        .count();
    assert_eq!(errors, 1);
}

#[test]
fn test_unsupported_codec_is_format_error() {
    let h = harness();
    h.player.set_media(BROKEN).unwrap();
    assert!(pump_until(&h.player, WAIT, |p| p.media_status() == MediaStatus::Invalid));
    assert_eq!(h.player.error_kind(), PlayerErrorKind::FormatError);
    assert_eq!(h.player.state(), PlaybackState::Stopped);

    // a new media clears the error
    load(&h, SONG);
    assert!(!h.player.error().is_error());
}

#[test]
fn test_replacing_media_resets_tracks() {
    let h = harness();
    load(&h, MOVIE);
    h.player.play();
    pump_for(&h.player, Duration::from_millis(20));

    load(&h, SONG);
    assert_eq!(h.player.state(), PlaybackState::Stopped);
    assert_eq!(h.player.track_count(MediaKind::Video), 0);
    assert_eq!(h.player.track_count(MediaKind::Audio), 1);
    assert_eq!(h.player.track_count(MediaKind::Subtitle), 0);
    assert!(!h.player.is_video_available());
    assert_eq!(h.player.metadata().get_str(MetaDataKey::VideoCodec), None);
}

#[test]
fn test_replacing_media_resets_position() {
    let h = harness();
    load(&h, SONG);
    assert!(h.player.set_position(Duration::from_secs(12)));
    assert!(pump_until(&h.player, WAIT, |p| {
        p.position() == Duration::from_secs(12)
    }));

    h.player.set_media(MOVIE).unwrap();
    assert_eq!(h.player.position(), Duration::ZERO);
    assert!(pump_until(&h.player, WAIT, |p| p.media_status() == MediaStatus::Loaded));
    assert_eq!(h.player.position(), Duration::ZERO);
}

#[test]
fn test_concurrent_commands_publish_in_order() {
    let h = harness();
    load(&h, SONG);
    drain(&h.events);

    let player = &h.player;
    std::thread::scope(|scope| {
        for worker in 0..3 {
            scope.spawn(move || {
                for i in 0..50 {
                    match (worker + i) % 3 {
                        0 => player.play(),
                        1 => player.pause(),
                        _ => player.stop(),
                    }
                }
            });
        }
        scope.spawn(move || {
            for _ in 0..200 {
                player.dispatch();
            }
        });
    });
    pump_for(&h.player, Duration::from_millis(50));

    let events = drain(&h.events);
    let last_state = events.iter().rev().find_map(|e| match e {
        PlayerEvent::StateChanged(state) => Some(*state),
        _ => None,
    });
    if let Some(state) = last_state {
        assert_eq!(state, h.player.state());
    }
    if let Some(status) = statuses(&events).last() {
        assert_eq!(*status, h.player.media_status());
    }
}

#[test]
fn test_empty_media_unloads() {
    let h = harness();
    load(&h, SONG);
    h.player.set_media("").unwrap();
    assert_eq!(h.player.media_status(), MediaStatus::NoMedia);
    assert_eq!(h.player.duration(), None);
    assert_eq!(h.player.track_count(MediaKind::Audio), 0);
    let decoders = h
        .player
        .pipeline()
        .with_graph(|g| g.elements_by_factory(factories::URI_DECODE_BIN).len());
    assert_eq!(decoders, 0);
}

#[test]
fn test_loops() {
    let h = harness();
    load(&h, SHORT);
    h.player.set_loops(2);

    let started = Instant::now();
    h.player.play();
    assert!(pump_until(&h.player, WAIT, |p| p.media_status() == MediaStatus::EndOfMedia));
    // two full passes of 150ms each
    assert!(started.elapsed() >= Duration::from_millis(290));
    assert_eq!(h.player.state(), PlaybackState::Stopped);
}

#[test]
fn test_infinite_loops() {
    let h = harness();
    load(&h, SHORT);
    h.player.set_loops(-1);
    h.player.play();
    pump_for(&h.player, Duration::from_millis(400));
    assert_eq!(h.player.state(), PlaybackState::Playing);
    assert_ne!(h.player.media_status(), MediaStatus::EndOfMedia);
    h.player.stop();
    assert_eq!(h.player.position(), Duration::ZERO);
}

#[test]
fn test_playback_rate_applied_on_play() {
    let h = harness();
    load(&h, SONG);
    h.player.set_playback_rate(2.0);
    assert_eq!(h.player.playback_rate(), 2.0);
    assert!(drain(&h.events).contains(&PlayerEvent::PlaybackRateChanged(2.0)));
    // not applied while stopped
    assert_eq!(h.player.pipeline().playback_rate(), 1.0);

    h.player.play();
    assert_eq!(h.player.pipeline().playback_rate(), 2.0);

    h.player.set_playback_rate(0.5);
    assert_eq!(h.player.pipeline().playback_rate(), 0.5);

    h.player.set_playback_rate(0.0);
    assert_eq!(h.player.playback_rate(), 0.5);
}

#[test]
fn test_network_buffering_and_stall() {
    let h = harness();
    load(&h, RADIO);
    assert_eq!(h.player.buffer_progress(), 100);
    assert!(!h.player.is_seekable());

    h.player.play();
    assert_eq!(h.player.media_status(), MediaStatus::Buffered);

    h.engine.post_buffering(0);
    h.player.dispatch();
    assert_eq!(h.player.media_status(), MediaStatus::Buffering);
    assert_eq!(h.player.buffer_progress(), 0);

    assert!(pump_until(&h.player, WAIT, |p| p.media_status() == MediaStatus::Stalled));

    h.engine.post_buffering(40);
    h.player.dispatch();
    assert_eq!(h.player.media_status(), MediaStatus::Buffering);
    h.engine.post_buffering(100);
    h.player.dispatch();
    assert_eq!(h.player.media_status(), MediaStatus::Buffered);
}

#[test]
fn test_recovered_buffer_does_not_stall() {
    let h = harness();
    load(&h, RADIO);
    h.player.play();

    h.engine.post_buffering(0);
    h.player.dispatch();
    h.engine.post_buffering(60);
    h.player.dispatch();
    pump_for(&h.player, Duration::from_millis(100));
    assert_eq!(h.player.media_status(), MediaStatus::Buffering);
}

#[test]
fn test_warning_does_not_interrupt() {
    let h = harness();
    load(&h, SONG);
    h.player.play();
    h.engine.post_warning(
        EngineError::stream(ErrorCode::Decode, "Corrupt frame skipped.")
            .with_debug("frame 412: bad slice header"),
    );
    pump_for(&h.player, Duration::from_millis(20));
    assert_eq!(h.player.state(), PlaybackState::Playing);
    assert!(!h.player.error().is_error());
}

#[test]
fn test_remove_audio_output() {
    let h = harness();
    load(&h, SONG);
    h.player.set_audio_output(None).unwrap();
    let sinks = h
        .player
        .pipeline()
        .with_graph(|g| g.elements_by_factory(factories::AUDIO_SINK).len());
    assert_eq!(sinks, 0);
    // the track survives without an output branch
    assert_eq!(h.player.active_track(MediaKind::Audio), Some(0));
}
