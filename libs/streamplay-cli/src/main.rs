// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! StreamPlay CLI
//!
//! Drives the media player against a simulated engine described by a
//! media catalog file.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use streamplay::{PlayerConfig, TrackType};

mod commands;

#[derive(Parser)]
#[command(name = "streamplay")]
#[command(author, version, about = "StreamPlay media player CLI", long_about = None)]
struct Cli {
    /// Directory containing streamplay.toml (default: current directory)
    #[arg(long, global = true, value_name = "DIR")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Play a media URI until it ends or fails
    Play {
        /// URI to play
        #[arg(value_name = "URI")]
        uri: String,

        /// Media catalog describing the simulated resources (TOML)
        #[arg(long, value_name = "FILE")]
        catalog: PathBuf,

        /// Number of times to play the media (-1 loops forever)
        #[arg(long, default_value = "1", allow_hyphen_values = true)]
        loops: i32,

        /// Playback rate
        #[arg(long, default_value = "1.0")]
        rate: f64,

        /// Track to activate, as KIND=INDEX or KIND=none (repeatable)
        #[arg(long = "track", value_name = "KIND=INDEX", value_parser = parse_track)]
        tracks: Vec<TrackChoice>,

        /// Start position in milliseconds
        #[arg(long, value_name = "MS")]
        start: Option<u64>,
    },

    /// Load a media URI and print its tracks and metadata
    Probe {
        /// URI to probe
        #[arg(value_name = "URI")]
        uri: String,

        /// Media catalog describing the simulated resources (TOML)
        #[arg(long, value_name = "FILE")]
        catalog: PathBuf,

        /// Print a JSON report instead of text
        #[arg(long)]
        json: bool,
    },

    /// List the entries of a media catalog
    Catalog {
        /// Media catalog file (TOML)
        #[arg(value_name = "FILE")]
        catalog: PathBuf,
    },
}

/// Track selection given on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackChoice {
    pub kind: TrackType,
    pub index: Option<usize>,
}

fn parse_track(raw: &str) -> Result<TrackChoice> {
    let (kind, index) = raw
        .split_once('=')
        .with_context(|| format!("expected KIND=INDEX, got '{}'", raw))?;
    let kind = match kind.trim() {
        "video" => TrackType::Video,
        "audio" => TrackType::Audio,
        "subtitle" => TrackType::Subtitle,
        other => bail!("unknown track kind '{}'", other),
    };
    let index = match index.trim() {
        "none" | "off" => None,
        n => Some(
            n.parse::<usize>()
                .with_context(|| format!("invalid track index '{}'", n))?,
        ),
    };
    Ok(TrackChoice { kind, index })
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_dir = match cli.config {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to resolve current directory")?,
    };
    let config = PlayerConfig::load_or_default(&config_dir);
    streamplay::init_logging(&config.logging)?;

    match cli.command {
        Commands::Play {
            uri,
            catalog,
            loops,
            rate,
            tracks,
            start,
        } => commands::play::run(
            config,
            &catalog,
            &uri,
            commands::play::PlayOptions {
                loops,
                rate,
                tracks,
                start,
            },
        ),
        Commands::Probe { uri, catalog, json } => {
            commands::probe::run(config, &catalog, &uri, json)
        }
        Commands::Catalog { catalog } => commands::catalog::run(&catalog),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_track_selection() {
        let audio = parse_track("audio=1").unwrap();
        assert_eq!(audio.kind, TrackType::Audio);
        assert_eq!(audio.index, Some(1));
        let subtitle = parse_track("subtitle=none").unwrap();
        assert_eq!(subtitle.kind, TrackType::Subtitle);
        assert_eq!(subtitle.index, None);
        assert!(parse_track("audio").is_err());
        assert!(parse_track("data=0").is_err());
        assert!(parse_track("video=x").is_err());
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
