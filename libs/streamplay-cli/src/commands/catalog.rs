// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::path::Path;

use anyhow::{Context, Result};
use streamplay::MediaCatalog;

use super::format_time;

pub fn run(path: &Path) -> Result<()> {
    let catalog = MediaCatalog::load(path)
        .with_context(|| format!("Failed to load catalog {}", path.display()))?;

    if catalog.is_empty() {
        println!("No media in {}", path.display());
        return Ok(());
    }

    for media in catalog.iter() {
        let duration = media
            .duration()
            .map(format_time)
            .unwrap_or_else(|| "live".to_string());
        println!("{}  [{}]", media.uri, duration);
        for stream in &media.streams {
            let language = stream.language.as_deref().unwrap_or("-");
            println!("  {:<8} {:<24} {}", stream.kind.to_string(), stream.codec, language);
        }
    }
    Ok(())
}
