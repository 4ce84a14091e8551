// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

pub mod catalog;
pub mod play;
pub mod probe;

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use crossbeam_channel::{select, Receiver};
use streamplay::{
    DispatchConfig, MediaCatalog, MediaPlayer, MediaStatus, PlayerConfig, PlayerEvent,
    SimulatedEngine, SimulationOptions,
};

/// Upper bound for the initial load of a resource.
const LOAD_TIMEOUT: Duration = Duration::from_secs(10);

/// A player over a simulated engine, plus the event stream the commands read.
pub struct Session {
    pub player: MediaPlayer,
    events: Receiver<PlayerEvent>,
    /// Set in event-loop mode, where this process drives dispatch.
    watch: Option<Receiver<()>>,
}

impl Session {
    pub fn open(config: PlayerConfig, catalog_path: &Path) -> Result<Self> {
        let catalog = MediaCatalog::load(catalog_path)
            .with_context(|| format!("Failed to load catalog {}", catalog_path.display()))?;
        tracing::debug!("[cli] Catalog has {} entries", catalog.len());

        let event_loop = config.dispatch == DispatchConfig::EventLoop;
        let engine = SimulatedEngine::new(catalog, SimulationOptions::default())?;
        let player = MediaPlayer::new(Arc::new(engine), config)?;
        let events = player.subscribe();
        let watch = event_loop.then(|| player.bus_watch());

        Ok(Self {
            player,
            events,
            watch,
        })
    }

    /// Next player event, or `None` once `timeout` elapses.
    pub fn next_event(&self, timeout: Duration) -> Option<PlayerEvent> {
        let Some(watch) = &self.watch else {
            return self.events.recv_timeout(timeout).ok();
        };

        let deadline = Instant::now() + timeout;
        let tick = self.player.config().position_update_interval();
        loop {
            if let Ok(event) = self.events.try_recv() {
                return Some(event);
            }
            self.player.dispatch();
            if let Ok(event) = self.events.try_recv() {
                return Some(event);
            }
            let remaining = deadline.checked_duration_since(Instant::now())?;
            select! {
                recv(watch) -> _ => {}
                default(remaining.min(tick)) => {}
            }
        }
    }

    /// Load `uri` and wait until it is usable.
    pub fn load(&self, uri: &str) -> Result<()> {
        self.player.set_media(uri)?;

        let deadline = Instant::now() + LOAD_TIMEOUT;
        loop {
            match self.player.media_status() {
                MediaStatus::Loaded | MediaStatus::Buffered | MediaStatus::Buffering => {
                    return Ok(());
                }
                MediaStatus::Invalid => bail!("{}: {}", uri, self.player.error_string()),
                MediaStatus::NoMedia => bail!("No media to load"),
                _ => {}
            }
            let remaining = match deadline.checked_duration_since(Instant::now()) {
                Some(remaining) => remaining,
                None => bail!("Timed out loading {}", uri),
            };
            self.next_event(remaining);
        }
    }
}

/// `mm:ss.mmm`
pub fn format_time(time: Duration) -> String {
    let millis = time.as_millis();
    format!(
        "{:02}:{:02}.{:03}",
        millis / 60_000,
        (millis / 1000) % 60,
        millis % 1000
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_time() {
        assert_eq!(format_time(Duration::ZERO), "00:00.000");
        assert_eq!(format_time(Duration::from_millis(61_250)), "01:01.250");
    }
}
