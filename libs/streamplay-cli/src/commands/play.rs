// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::io::Write;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Result};
use streamplay::{MediaStatus, PlaybackState, PlayerConfig, PlayerEvent};

use super::{format_time, Session};
use crate::TrackChoice;

const EVENT_WAIT: Duration = Duration::from_millis(500);

pub struct PlayOptions {
    pub loops: i32,
    pub rate: f64,
    pub tracks: Vec<TrackChoice>,
    pub start: Option<u64>,
}

pub fn run(config: PlayerConfig, catalog: &Path, uri: &str, options: PlayOptions) -> Result<()> {
    if options.loops == 0 {
        bail!("--loops must be -1 or at least 1");
    }
    if !options.rate.is_finite() || options.rate == 0.0 {
        bail!("--rate must be a non-zero number");
    }

    let session = Session::open(config, catalog)?;
    let player = &session.player;
    player.set_loops(options.loops);
    session.load(uri)?;

    for choice in &options.tracks {
        let count = player.track_count(choice.kind);
        if choice.index.is_some_and(|index| index >= count) {
            bail!(
                "No {} track {} ({} available)",
                choice.kind,
                choice.index.unwrap_or_default(),
                count
            );
        }
        player.set_active_track(choice.kind, choice.index);
    }

    if let Some(ms) = options.start {
        if !player.set_position(Duration::from_millis(ms)) {
            tracing::warn!("[cli] {} is not seekable, starting from the beginning", uri);
        }
    }
    if options.rate != 1.0 {
        player.set_playback_rate(options.rate);
    }

    let total = player.duration().map(format_time);
    println!(
        "Playing {} ({})",
        uri,
        total.as_deref().unwrap_or("live")
    );
    player.play();

    let mut stdout = std::io::stdout();
    let mut ended = false;
    loop {
        let Some(event) = session.next_event(EVENT_WAIT) else {
            continue;
        };
        match event {
            PlayerEvent::PositionChanged(position) => {
                print!(
                    "\r  {} / {}",
                    format_time(position),
                    total.as_deref().unwrap_or("--:--.---")
                );
                stdout.flush()?;
            }
            PlayerEvent::MediaStatusChanged(MediaStatus::Stalled) => {
                println!("\n  Stalled, waiting for data");
            }
            PlayerEvent::MediaStatusChanged(MediaStatus::EndOfMedia) => {
                ended = true;
            }
            PlayerEvent::ActiveTrackChanged { kind, index } => match index {
                Some(index) => println!("\n  {} track {}", kind, index),
                None => println!("\n  {} disabled", kind),
            },
            PlayerEvent::ErrorOccurred(error) => {
                println!();
                bail!("Playback failed: {}", error);
            }
            PlayerEvent::StateChanged(PlaybackState::Stopped) => break,
            _ => {}
        }
    }

    println!();
    let error = player.error();
    if error.is_error() {
        bail!("Playback failed: {}", error);
    }
    if ended {
        println!("End of media");
    } else {
        println!("Stopped");
    }
    Ok(())
}
