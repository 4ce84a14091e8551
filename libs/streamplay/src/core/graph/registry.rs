// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Element factories known to an engine.

use std::collections::BTreeMap;

use super::element::ElementId;
use super::graph::Graph;
use super::pad::{PadDirection, PadPresence};
use crate::core::error::{Result, StreamError};

/// Factory names used by the player.
pub mod factories {
    pub const PIPELINE: &str = "pipeline";
    pub const URI_DECODE_BIN: &str = "uridecodebin";
    pub const INPUT_SELECTOR: &str = "input-selector";
    pub const AUDIO_SINK: &str = "audiosink";
    pub const VIDEO_SINK: &str = "videosink";
    pub const SUBTITLE_SINK: &str = "subtitlesink";
    pub const QUEUE: &str = "queue";
}

/// Pad created by a factory, either up front or on request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PadTemplate {
    pub name: String,
    pub direction: PadDirection,
    pub presence: PadPresence,
}

impl PadTemplate {
    pub fn always(name: &str, direction: PadDirection) -> Self {
        Self {
            name: name.to_string(),
            direction,
            presence: PadPresence::Always,
        }
    }

    pub fn request(name: &str, direction: PadDirection) -> Self {
        Self {
            name: name.to_string(),
            direction,
            presence: PadPresence::Request,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementFactory {
    pub name: String,
    pub templates: Vec<PadTemplate>,
}

impl ElementFactory {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            templates: Vec::new(),
        }
    }

    pub fn with_template(mut self, template: PadTemplate) -> Self {
        self.templates.push(template);
        self
    }

    pub fn request_template(&self, direction: PadDirection) -> Option<&PadTemplate> {
        self.templates
            .iter()
            .find(|t| t.presence == PadPresence::Request && t.direction == direction)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ElementRegistry {
    factories: BTreeMap<String, ElementFactory>,
}

impl ElementRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every factory the player needs.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(ElementFactory::new(factories::PIPELINE));
        // Output pads appear while prerolling.
        registry.register(ElementFactory::new(factories::URI_DECODE_BIN));
        registry.register(
            ElementFactory::new(factories::INPUT_SELECTOR)
                .with_template(PadTemplate::always("src", PadDirection::Src))
                .with_template(PadTemplate::request("sink_%u", PadDirection::Sink)),
        );
        for sink in [
            factories::AUDIO_SINK,
            factories::VIDEO_SINK,
            factories::SUBTITLE_SINK,
        ] {
            registry.register(
                ElementFactory::new(sink)
                    .with_template(PadTemplate::always("sink", PadDirection::Sink)),
            );
        }
        registry.register(
            ElementFactory::new(factories::QUEUE)
                .with_template(PadTemplate::always("sink", PadDirection::Sink))
                .with_template(PadTemplate::always("src", PadDirection::Src)),
        );
        registry
    }

    pub fn register(&mut self, factory: ElementFactory) {
        tracing::trace!("[registry] Registered factory '{}'", factory.name);
        self.factories.insert(factory.name.clone(), factory);
    }

    pub fn unregister(&mut self, name: &str) -> Option<ElementFactory> {
        self.factories.remove(name)
    }

    pub fn has_factory(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn factory(&self, name: &str) -> Option<&ElementFactory> {
        self.factories.get(name)
    }

    pub fn factory_names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Fail with [`StreamError::MissingElement`] naming the first absent factory.
    pub fn ensure_available(&self, names: &[&str]) -> Result<()> {
        match names.iter().find(|n| !self.has_factory(n)) {
            Some(missing) => Err(StreamError::MissingElement((*missing).to_string())),
            None => Ok(()),
        }
    }

    /// Instantiate `factory` into `graph`, creating its always-pads.
    pub fn create(&self, graph: &mut Graph, factory: &str, name: Option<&str>) -> Result<ElementId> {
        let template = self
            .factory(factory)
            .ok_or_else(|| StreamError::MissingElement(factory.to_string()))?;
        let id = graph.add_element(factory, name)?;
        for pad in template
            .templates
            .iter()
            .filter(|t| t.presence == PadPresence::Always)
        {
            graph.add_pad(id, &pad.name, pad.direction, pad.presence)?;
        }
        Ok(id)
    }

    /// Request a pad on `element` from its factory's request template.
    pub fn request_pad(
        &self,
        graph: &mut Graph,
        element: ElementId,
        direction: PadDirection,
    ) -> Result<super::pad::PadId> {
        let factory_name = graph
            .element(element)
            .map(|e| e.factory().to_string())
            .ok_or_else(|| StreamError::ElementNotFound(element.to_string()))?;
        let template = self
            .factory(&factory_name)
            .and_then(|f| f.request_template(direction))
            .ok_or_else(|| {
                StreamError::Graph(format!(
                    "factory '{}' has no {:?} request template",
                    factory_name, direction
                ))
            })?;
        graph.request_pad(element, &template.name, direction)
    }
}
