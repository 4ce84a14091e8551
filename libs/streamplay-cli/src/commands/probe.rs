// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::path::Path;

use anyhow::Result;
use streamplay::{PlayerConfig, TrackType};

use super::{format_time, Session};

pub fn run(config: PlayerConfig, catalog: &Path, uri: &str, json: bool) -> Result<()> {
    let session = Session::open(config, catalog)?;
    session.load(uri)?;
    let player = &session.player;

    if json {
        let tracks: Vec<_> = TrackType::ALL
            .iter()
            .flat_map(|&kind| {
                (0..player.track_count(kind)).map(move |index| (kind, index))
            })
            .map(|(kind, index)| {
                serde_json::json!({
                    "kind": kind,
                    "index": index,
                    "active": player.active_track(kind) == Some(index),
                    "metadata": player.track_metadata(kind, index),
                })
            })
            .collect();
        let report = serde_json::json!({
            "uri": uri,
            "duration_ms": player.duration().map(|d| d.as_millis() as u64),
            "seekable": player.is_seekable(),
            "metadata": player.metadata(),
            "tracks": tracks,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("{}", uri);
    println!(
        "  duration: {}",
        player
            .duration()
            .map(format_time)
            .unwrap_or_else(|| "live".to_string())
    );
    println!("  seekable: {}", player.is_seekable());

    let metadata = player.metadata();
    if !metadata.is_empty() {
        println!("  metadata:");
        for (key, value) in metadata.iter() {
            println!("    {:?}: {}", key, value);
        }
    }

    for kind in TrackType::ALL {
        let active = player.active_track(kind);
        for index in 0..player.track_count(kind) {
            let marker = if active == Some(index) { "*" } else { " " };
            println!("  {} {} #{}", marker, kind, index);
            if let Some(track) = player.track_metadata(kind, index) {
                for (key, value) in track.iter() {
                    println!("        {:?}: {}", key, value);
                }
            }
        }
    }
    Ok(())
}
