// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use petgraph::stable_graph::{EdgeIndex, NodeIndex, StableDiGraph};
use petgraph::visit::{EdgeRef, IntoEdgeReferences};
use std::collections::HashMap;

use super::caps::{Caps, TagList};
use super::element::{Element, ElementId};
use super::link::{Link, LinkId};
use super::pad::{Pad, PadDirection, PadId, PadPresence};
use crate::core::error::{Result, StreamError};

/// Arena of elements and pads, with links stored as petgraph edges.
///
/// Ids are never reused, so a stale [`PadId`] or [`ElementId`] simply fails
/// lookup instead of aliasing a newer object.
pub struct Graph {
    graph: StableDiGraph<Element, Link>,
    nodes: HashMap<ElementId, NodeIndex>,
    pads: HashMap<PadId, Pad>,
    links: HashMap<LinkId, EdgeIndex>,
    next_element: u64,
    next_pad: u64,
    next_link: u64,
    name_counters: HashMap<String, u64>,
}

impl Graph {
    pub fn new() -> Self {
        Self {
            graph: StableDiGraph::new(),
            nodes: HashMap::new(),
            pads: HashMap::new(),
            links: HashMap::new(),
            next_element: 1,
            next_pad: 1,
            next_link: 1,
            name_counters: HashMap::new(),
        }
    }

    // ---------------------------------------------------------------------
    // Elements
    // ---------------------------------------------------------------------

    /// Add a bare element. Without a name one is derived from the factory
    /// (`input-selector_0`, `input-selector_1`, ...).
    pub fn add_element(&mut self, factory: &str, name: Option<&str>) -> Result<ElementId> {
        let name = match name {
            Some(n) => {
                if self.element_by_name(n).is_some() {
                    return Err(StreamError::Graph(format!(
                        "element named '{}' already exists",
                        n
                    )));
                }
                n.to_string()
            }
            None => self.unique_name(factory),
        };

        let id = ElementId(self.next_element);
        self.next_element += 1;
        let index = self
            .graph
            .add_node(Element::new(id, name, factory.to_string()));
        self.nodes.insert(id, index);
        Ok(id)
    }

    fn unique_name(&mut self, factory: &str) -> String {
        loop {
            let counter = self.name_counters.entry(factory.to_string()).or_insert(0);
            let candidate = format!("{}_{}", factory, counter);
            *counter += 1;
            if self.element_by_name(&candidate).is_none() {
                return candidate;
            }
        }
    }

    /// Remove an element together with its pads. Peers of linked pads are
    /// left unlinked.
    pub fn remove_element(&mut self, id: ElementId) -> Result<Element> {
        let index = self
            .nodes
            .get(&id)
            .copied()
            .ok_or_else(|| StreamError::ElementNotFound(id.to_string()))?;

        let pad_ids = self.graph[index].pads.clone();
        for pad in pad_ids {
            self.unlink_pad(pad);
            self.pads.remove(&pad);
        }

        self.nodes.remove(&id);
        let element = self
            .graph
            .remove_node(index)
            .ok_or_else(|| StreamError::ElementNotFound(id.to_string()))?;
        Ok(element)
    }

    pub fn contains(&self, id: ElementId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn element(&self, id: ElementId) -> Option<&Element> {
        self.nodes.get(&id).map(|&i| &self.graph[i])
    }

    pub fn element_mut(&mut self, id: ElementId) -> Option<&mut Element> {
        let index = *self.nodes.get(&id)?;
        Some(&mut self.graph[index])
    }

    /// Like [`element_mut`](Self::element_mut) but reports a missing element as an error.
    pub fn require_element_mut(&mut self, id: ElementId) -> Result<&mut Element> {
        self.element_mut(id)
            .ok_or_else(|| StreamError::ElementNotFound(id.to_string()))
    }

    pub fn element_by_name(&self, name: &str) -> Option<ElementId> {
        self.graph
            .node_weights()
            .find(|e| e.name() == name)
            .map(Element::id)
    }

    pub fn elements_by_factory(&self, factory: &str) -> Vec<ElementId> {
        let mut ids: Vec<ElementId> = self
            .graph
            .node_weights()
            .filter(|e| e.factory() == factory)
            .map(Element::id)
            .collect();
        ids.sort();
        ids
    }

    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.graph.node_weights()
    }

    pub fn element_count(&self) -> usize {
        self.graph.node_count()
    }

    // ---------------------------------------------------------------------
    // Pads
    // ---------------------------------------------------------------------

    pub fn add_pad(
        &mut self,
        element: ElementId,
        name: &str,
        direction: PadDirection,
        presence: PadPresence,
    ) -> Result<PadId> {
        if self.static_pad(element, name).is_some() {
            return Err(StreamError::Graph(format!(
                "{} already has a pad named '{}'",
                element, name
            )));
        }
        let id = PadId(self.next_pad);
        self.next_pad += 1;
        let pad = Pad {
            id,
            name: name.to_string(),
            element,
            direction,
            presence,
            caps: None,
            tags: TagList::new(),
            peer: None,
        };
        self.require_element_mut(element)?.pads.push(id);
        self.pads.insert(id, pad);
        Ok(id)
    }

    /// Create a pad from a request template such as `sink_%u`, picking the
    /// lowest free index.
    pub fn request_pad(
        &mut self,
        element: ElementId,
        template: &str,
        direction: PadDirection,
    ) -> Result<PadId> {
        if !template.contains("%u") {
            return Err(StreamError::Graph(format!(
                "pad template '{}' has no %u placeholder",
                template
            )));
        }
        let mut index = 0u32;
        let name = loop {
            let candidate = template.replace("%u", &index.to_string());
            if self.static_pad(element, &candidate).is_none() {
                break candidate;
            }
            index += 1;
        };
        self.add_pad(element, &name, direction, PadPresence::Request)
    }

    /// Release a pad created by [`request_pad`](Self::request_pad).
    pub fn release_request_pad(&mut self, pad: PadId) -> Result<()> {
        let presence = self
            .pad(pad)
            .map(Pad::presence)
            .ok_or_else(|| StreamError::PadNotFound(pad.to_string()))?;
        if presence != PadPresence::Request {
            return Err(StreamError::Graph(format!("{} is not a request pad", pad)));
        }
        self.remove_pad(pad).map(|_| ())
    }

    pub fn remove_pad(&mut self, pad: PadId) -> Result<Pad> {
        if !self.pads.contains_key(&pad) {
            return Err(StreamError::PadNotFound(pad.to_string()));
        }
        self.unlink_pad(pad);
        let removed = self
            .pads
            .remove(&pad)
            .ok_or_else(|| StreamError::PadNotFound(pad.to_string()))?;
        if let Some(element) = self.element_mut(removed.element) {
            element.pads.retain(|p| *p != pad);
        }
        Ok(removed)
    }

    pub fn static_pad(&self, element: ElementId, name: &str) -> Option<PadId> {
        self.element(element)?
            .pads
            .iter()
            .copied()
            .find(|p| self.pads.get(p).is_some_and(|pad| pad.name == name))
    }

    pub fn pad(&self, id: PadId) -> Option<&Pad> {
        self.pads.get(&id)
    }

    pub fn contains_pad(&self, id: PadId) -> bool {
        self.pads.contains_key(&id)
    }

    pub fn pads_of(&self, element: ElementId) -> Vec<PadId> {
        self.element(element)
            .map(|e| e.pads.clone())
            .unwrap_or_default()
    }

    pub fn set_pad_caps(&mut self, pad: PadId, caps: Caps) -> Result<()> {
        let pad = self
            .pads
            .get_mut(&pad)
            .ok_or_else(|| StreamError::PadNotFound(pad.to_string()))?;
        pad.caps = Some(caps);
        Ok(())
    }

    pub fn set_pad_tags(&mut self, pad: PadId, tags: TagList) -> Result<()> {
        let pad = self
            .pads
            .get_mut(&pad)
            .ok_or_else(|| StreamError::PadNotFound(pad.to_string()))?;
        pad.tags = tags;
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Links
    // ---------------------------------------------------------------------

    pub fn link_pads(&mut self, src: PadId, sink: PadId) -> Result<LinkId> {
        let src_pad = self
            .pad(src)
            .ok_or_else(|| StreamError::PadNotFound(src.to_string()))?;
        let sink_pad = self
            .pad(sink)
            .ok_or_else(|| StreamError::PadNotFound(sink.to_string()))?;

        if src_pad.direction != PadDirection::Src {
            return Err(StreamError::Link(format!("{} is not a src pad", src)));
        }
        if sink_pad.direction != PadDirection::Sink {
            return Err(StreamError::Link(format!("{} is not a sink pad", sink)));
        }
        if src_pad.element == sink_pad.element {
            return Err(StreamError::Link(format!(
                "cannot link {} to a pad of the same element",
                src
            )));
        }
        if src_pad.is_linked() || sink_pad.is_linked() {
            return Err(StreamError::Link(format!(
                "{} or {} is already linked",
                src, sink
            )));
        }

        let (from, to) = match (
            self.nodes.get(&src_pad.element),
            self.nodes.get(&sink_pad.element),
        ) {
            (Some(&a), Some(&b)) => (a, b),
            _ => {
                return Err(StreamError::Link(format!(
                    "pads {} and {} belong to removed elements",
                    src, sink
                )));
            }
        };

        let id = LinkId(self.next_link);
        self.next_link += 1;
        let edge = self.graph.add_edge(from, to, Link { id, src, sink });
        self.links.insert(id, edge);

        if let Some(p) = self.pads.get_mut(&src) {
            p.peer = Some(sink);
        }
        if let Some(p) = self.pads.get_mut(&sink) {
            p.peer = Some(src);
        }
        Ok(id)
    }

    /// Link the `src` pad of `upstream` to the `sink` pad of `downstream`.
    pub fn link_elements(&mut self, upstream: ElementId, downstream: ElementId) -> Result<LinkId> {
        let src = self.static_pad(upstream, "src").ok_or_else(|| {
            StreamError::PadNotFound(format!("{} has no 'src' pad", upstream))
        })?;
        let sink = self.static_pad(downstream, "sink").ok_or_else(|| {
            StreamError::PadNotFound(format!("{} has no 'sink' pad", downstream))
        })?;
        self.link_pads(src, sink)
    }

    /// Unlink `pad` from its peer. Returns the removed link, if any.
    pub fn unlink_pad(&mut self, pad: PadId) -> Option<LinkId> {
        let peer = self.pads.get(&pad)?.peer?;

        let link = self
            .graph
            .edge_references()
            .find(|e| {
                let w = e.weight();
                (w.src == pad && w.sink == peer) || (w.src == peer && w.sink == pad)
            })
            .map(|e| (e.weight().id, e.id()));

        if let Some(p) = self.pads.get_mut(&pad) {
            p.peer = None;
        }
        if let Some(p) = self.pads.get_mut(&peer) {
            p.peer = None;
        }

        let (id, edge) = link?;
        self.graph.remove_edge(edge);
        self.links.remove(&id);
        Some(id)
    }

    pub fn is_linked(&self, pad: PadId) -> bool {
        self.pad(pad).is_some_and(Pad::is_linked)
    }

    pub fn link(&self, id: LinkId) -> Option<&Link> {
        self.links.get(&id).and_then(|&e| self.graph.edge_weight(e))
    }

    pub fn links(&self) -> impl Iterator<Item = &Link> {
        self.graph.edge_weights()
    }

    pub fn link_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Serialize the graph for debugging dumps.
    pub fn to_json(&self) -> serde_json::Value {
        let mut elements: Vec<&Element> = self.graph.node_weights().collect();
        elements.sort_by_key(|e| e.id());

        let elements: Vec<serde_json::Value> = elements
            .into_iter()
            .map(|e| {
                let pads: Vec<serde_json::Value> = e
                    .pads
                    .iter()
                    .filter_map(|p| self.pads.get(p))
                    .map(|p| {
                        serde_json::json!({
                            "id": p.id,
                            "name": p.name,
                            "direction": p.direction,
                            "presence": p.presence,
                            "caps": p.caps.as_ref().map(|c| c.to_string()),
                            "peer": p.peer,
                        })
                    })
                    .collect();
                serde_json::json!({
                    "id": e.id(),
                    "name": e.name(),
                    "factory": e.factory(),
                    "state": e.state().to_string(),
                    "pads": pads,
                })
            })
            .collect();

        let mut links: Vec<&Link> = self.graph.edge_weights().collect();
        links.sort_by_key(|l| l.id);

        serde_json::json!({
            "elements": elements,
            "links": links,
        })
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}
