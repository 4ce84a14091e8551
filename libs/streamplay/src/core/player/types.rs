// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use serde::Serialize;
use std::fmt;

use crate::core::graph::MediaKind;

/// Track kinds exposed to callers.
pub type TrackType = MediaKind;

/// Caller-requested playback state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum PlaybackState {
    #[default]
    Stopped,
    Playing,
    Paused,
}

impl PlaybackState {
    /// Whether moving from `self` to `next` is a real transition.
    /// Self-transitions are no-ops.
    pub fn can_transition_to(&self, next: PlaybackState) -> bool {
        *self != next
    }
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaybackState::Stopped => write!(f, "stopped"),
            PlaybackState::Playing => write!(f, "playing"),
            PlaybackState::Paused => write!(f, "paused"),
        }
    }
}

/// Loading and buffering status of the current media, orthogonal to
/// [`PlaybackState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum MediaStatus {
    #[default]
    Unknown,
    NoMedia,
    Loading,
    Loaded,
    Stalled,
    Buffering,
    Buffered,
    EndOfMedia,
    Invalid,
}

impl MediaStatus {
    /// Whether the media has finished prerolling and can be positioned.
    pub fn is_loaded(&self) -> bool {
        matches!(
            self,
            MediaStatus::Loaded
                | MediaStatus::Stalled
                | MediaStatus::Buffering
                | MediaStatus::Buffered
                | MediaStatus::EndOfMedia
        )
    }
}

impl fmt::Display for MediaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MediaStatus::Unknown => "unknown",
            MediaStatus::NoMedia => "no-media",
            MediaStatus::Loading => "loading",
            MediaStatus::Loaded => "loaded",
            MediaStatus::Stalled => "stalled",
            MediaStatus::Buffering => "buffering",
            MediaStatus::Buffered => "buffered",
            MediaStatus::EndOfMedia => "end-of-media",
            MediaStatus::Invalid => "invalid",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[repr(u8)]
pub enum PlayerErrorKind {
    #[default]
    NoError = 0,
    ResourceError,
    FormatError,
}

/// Error surfaced to callers. Stays queryable until the next media change.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct PlayerError {
    pub kind: PlayerErrorKind,
    pub description: String,
}

impl PlayerError {
    pub fn new(kind: PlayerErrorKind, description: impl Into<String>) -> Self {
        Self {
            kind,
            description: description.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.kind != PlayerErrorKind::NoError
    }
}

impl fmt::Display for PlayerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.description)
    }
}
