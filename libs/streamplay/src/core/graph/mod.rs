// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

mod caps;
mod element;
#[allow(clippy::module_inception)]
mod graph;
mod link;
mod pad;
mod registry;

pub use caps::{tags, Caps, FieldValue, MediaKind, Structure, TagList};
pub use element::{Element, ElementId, PropertyValue};
pub use graph::Graph;
pub use link::{Link, LinkId};
pub use pad::{Pad, PadDirection, PadId, PadPresence};
pub use registry::{factories, ElementFactory, ElementRegistry, PadTemplate};
