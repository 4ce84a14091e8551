// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::time::Duration;

use super::types::{MediaStatus, PlaybackState, PlayerError, TrackType};

/// Change notifications published by [`MediaPlayer`](super::MediaPlayer).
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    StateChanged(PlaybackState),
    MediaStatusChanged(MediaStatus),
    PositionChanged(Duration),
    DurationChanged(Option<Duration>),
    BufferProgressChanged(i32),
    SeekableChanged(bool),
    TracksChanged,
    ActiveTrackChanged {
        kind: TrackType,
        index: Option<usize>,
    },
    MetaDataChanged,
    AudioAvailableChanged(bool),
    VideoAvailableChanged(bool),
    PlaybackRateChanged(f64),
    ErrorOccurred(PlayerError),
    SourceChanged(String),
}

/// Fan-out of player events to any number of subscribers.
///
/// Subscribers whose receiver was dropped are pruned on the next publish.
#[derive(Default)]
pub struct EventHub {
    subscribers: Mutex<Vec<Sender<PlayerEvent>>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<PlayerEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    pub fn publish(&self, event: PlayerEvent) {
        tracing::trace!("[player] Event {:?}", event);
        self.subscribers
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}
