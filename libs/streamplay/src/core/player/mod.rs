// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

mod events;
mod metadata;
#[allow(clippy::module_inception)]
mod player;
mod track_selector;
mod types;

pub use events::{EventHub, PlayerEvent};
pub use metadata::{MetaData, MetaDataKey, MetaValue};
pub use player::MediaPlayer;
pub use track_selector::{SelectorState, TrackSelector};
pub use types::{MediaStatus, PlaybackState, PlayerError, PlayerErrorKind, TrackType};
