// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use serde::Serialize;
use std::fmt;

use super::caps::{Caps, MediaKind, TagList};
use super::element::ElementId;

/// Stable identifier of a pad inside a [`Graph`](super::Graph).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PadId(pub(crate) u64);

impl fmt::Display for PadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pad#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PadDirection {
    /// Produces data.
    Src,
    /// Consumes data.
    Sink,
}

/// When a pad exists on its element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PadPresence {
    /// Created with the element.
    Always,
    /// Created by the engine while streaming (decoder outputs).
    Sometimes,
    /// Created on demand from a template such as `sink_%u`.
    Request,
}

/// Connection point on an element.
#[derive(Debug, Clone, Serialize)]
pub struct Pad {
    pub(crate) id: PadId,
    pub(crate) name: String,
    pub(crate) element: ElementId,
    pub(crate) direction: PadDirection,
    pub(crate) presence: PadPresence,
    pub(crate) caps: Option<Caps>,
    pub(crate) tags: TagList,
    pub(crate) peer: Option<PadId>,
}

impl Pad {
    pub fn id(&self) -> PadId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn element(&self) -> ElementId {
        self.element
    }

    pub fn direction(&self) -> PadDirection {
        self.direction
    }

    pub fn presence(&self) -> PadPresence {
        self.presence
    }

    pub fn caps(&self) -> Option<&Caps> {
        self.caps.as_ref()
    }

    pub fn tags(&self) -> &TagList {
        &self.tags
    }

    pub fn peer(&self) -> Option<PadId> {
        self.peer
    }

    pub fn is_linked(&self) -> bool {
        self.peer.is_some()
    }

    pub fn media_kind(&self) -> Option<MediaKind> {
        self.caps.as_ref().and_then(Caps::media_kind)
    }
}
