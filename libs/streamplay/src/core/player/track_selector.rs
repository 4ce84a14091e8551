// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use crate::core::error::{Result, StreamError};
use crate::core::graph::{
    factories, ElementId, ElementRegistry, Graph, MediaKind, PadDirection, PadId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectorState {
    NoTracks,
    TracksInactive,
    TrackActive,
}

/// One multi-input selector per media kind.
///
/// Input pads are kept in discovery order, so a track's index is stable
/// until an earlier track is removed or the media changes.
#[derive(Debug)]
pub struct TrackSelector {
    kind: MediaKind,
    selector: ElementId,
    tracks: Vec<PadId>,
    active: Option<PadId>,
    /// Sink pad of the output branch, if one is configured.
    output: Option<PadId>,
}

impl TrackSelector {
    pub fn new(registry: &ElementRegistry, graph: &mut Graph, kind: MediaKind) -> Result<Self> {
        let name = format!("{}-selector", kind);
        let selector = registry.create(graph, factories::INPUT_SELECTOR, Some(&name))?;
        let element = graph.require_element_mut(selector)?;
        element.set_property("sync-streams", true)?;
        // sync against the pipeline clock
        element.set_property("sync-mode", 1i32)?;
        element.set_property("cache-buffers", kind == MediaKind::Subtitle)?;
        element.set_property("active-pad", None::<PadId>)?;

        Ok(Self {
            kind,
            selector,
            tracks: Vec::new(),
            active: None,
            output: None,
        })
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn selector(&self) -> ElementId {
        self.selector
    }

    pub fn state(&self) -> SelectorState {
        if self.tracks.is_empty() {
            SelectorState::NoTracks
        } else if self.active.is_some() {
            SelectorState::TrackActive
        } else {
            SelectorState::TracksInactive
        }
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    pub fn tracks(&self) -> &[PadId] {
        &self.tracks
    }

    pub fn input_pad(&self, index: usize) -> Option<PadId> {
        self.tracks.get(index).copied()
    }

    pub fn index_of(&self, pad: PadId) -> Option<usize> {
        self.tracks.iter().position(|p| *p == pad)
    }

    pub fn active_input_pad(&self) -> Option<PadId> {
        self.active
    }

    pub fn active_input_index(&self) -> Option<usize> {
        self.active.and_then(|pad| self.index_of(pad))
    }

    pub fn output(&self) -> Option<PadId> {
        self.output
    }

    /// Request a new input pad and link `upstream` into it. The first track
    /// becomes active and connects the output branch.
    ///
    /// Returns the index of the new track.
    pub fn add_track(
        &mut self,
        registry: &ElementRegistry,
        graph: &mut Graph,
        upstream: PadId,
    ) -> Result<usize> {
        let pad = registry.request_pad(graph, self.selector, PadDirection::Sink)?;
        if let Err(e) = graph.link_pads(upstream, pad) {
            let _ = graph.release_request_pad(pad);
            return Err(e);
        }
        self.tracks.push(pad);
        tracing::debug!(
            "[selector] {} track {} on {}",
            self.kind,
            self.tracks.len() - 1,
            pad
        );

        if self.active.is_none() && self.tracks.len() == 1 {
            self.activate(graph, Some(pad))?;
        }
        self.check_invariant();
        Ok(self.tracks.len() - 1)
    }

    /// Release the input pad. If it was active the output branch is
    /// disconnected; no other track is activated in its place.
    pub fn remove_input_pad(&mut self, graph: &mut Graph, pad: PadId) -> bool {
        let Some(index) = self.index_of(pad) else {
            return false;
        };
        self.tracks.remove(index);
        if self.active == Some(pad) {
            if let Err(e) = self.activate(graph, None) {
                tracing::warn!("[selector] Clearing active {} pad: {}", self.kind, e);
            }
        }
        if let Err(e) = graph.release_request_pad(pad) {
            tracing::debug!("[selector] Release of {}: {}", pad, e);
        }
        self.check_invariant();
        true
    }

    pub fn remove_all_input_pads(&mut self, graph: &mut Graph) {
        for pad in self.tracks.clone() {
            self.remove_input_pad(graph, pad);
        }
    }

    /// Make track `index` active, or deactivate with `None`.
    ///
    /// An index past the current track list is ignored with a warning.
    pub fn set_active_input(&mut self, graph: &mut Graph, index: Option<usize>) -> Result<bool> {
        let pad = match index {
            Some(i) => match self.input_pad(i) {
                Some(pad) => Some(pad),
                None => {
                    tracing::warn!(
                        "[selector] No {} track at index {} ({} known)",
                        self.kind,
                        i,
                        self.tracks.len()
                    );
                    return Ok(false);
                }
            },
            None => None,
        };
        if pad == self.active {
            return Ok(false);
        }
        self.activate(graph, pad)?;
        self.check_invariant();
        Ok(true)
    }

    /// Set the sink pad the selector output feeds. `None` removes the
    /// branch. The branch is connected only while a track is active.
    pub fn set_output(&mut self, graph: &mut Graph, sink: Option<PadId>) -> Result<()> {
        self.disconnect_output(graph);
        self.output = sink;
        if self.active.is_some() {
            self.connect_output(graph)?;
        }
        Ok(())
    }

    pub fn is_connected(&self, graph: &Graph) -> bool {
        self.src_pad(graph).is_some_and(|src| graph.is_linked(src))
    }

    fn activate(&mut self, graph: &mut Graph, pad: Option<PadId>) -> Result<()> {
        graph
            .require_element_mut(self.selector)?
            .set_property("active-pad", pad)?;
        self.active = pad;
        if pad.is_some() {
            self.connect_output(graph)
        } else {
            self.disconnect_output(graph);
            Ok(())
        }
    }

    fn connect_output(&self, graph: &mut Graph) -> Result<()> {
        let Some(sink) = self.output else {
            return Ok(());
        };
        let src = self.src_pad(graph).ok_or_else(|| {
            StreamError::PadNotFound(format!("{} selector has no src pad", self.kind))
        })?;
        if graph.pad(src).and_then(|p| p.peer()) == Some(sink) {
            return Ok(());
        }
        graph.unlink_pad(src);
        graph.link_pads(src, sink).map(|_| ())
    }

    fn disconnect_output(&self, graph: &mut Graph) {
        if let Some(src) = self.src_pad(graph) {
            graph.unlink_pad(src);
        }
    }

    fn src_pad(&self, graph: &Graph) -> Option<PadId> {
        graph.static_pad(self.selector, "src")
    }

    fn check_invariant(&self) {
        let valid = self.active.is_none_or(|pad| self.tracks.contains(&pad));
        if !valid {
            debug_assert!(false, "active pad is not an input of the selector");
            tracing::warn!("[selector] Active {} pad is not one of its inputs", self.kind);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::graph::PadPresence;

    struct Fixture {
        registry: ElementRegistry,
        graph: Graph,
        decoder: ElementId,
        sink_pad: PadId,
    }

    fn fixture() -> Fixture {
        let registry = ElementRegistry::with_defaults();
        let mut graph = Graph::new();
        let decoder = registry
            .create(&mut graph, factories::URI_DECODE_BIN, Some("decoder"))
            .unwrap();
        let sink = registry
            .create(&mut graph, factories::AUDIO_SINK, None)
            .unwrap();
        let sink_pad = graph.static_pad(sink, "sink").unwrap();
        Fixture {
            registry,
            graph,
            decoder,
            sink_pad,
        }
    }

    fn decoder_pad(f: &mut Fixture, n: usize) -> PadId {
        f.graph
            .add_pad(
                f.decoder,
                &format!("src_{}", n),
                PadDirection::Src,
                PadPresence::Sometimes,
            )
            .unwrap()
    }

    #[test]
    fn test_first_track_becomes_active_and_connects() {
        let mut f = fixture();
        let mut sel = TrackSelector::new(&f.registry, &mut f.graph, MediaKind::Audio).unwrap();
        sel.set_output(&mut f.graph, Some(f.sink_pad)).unwrap();
        assert_eq!(sel.state(), SelectorState::NoTracks);
        assert!(!sel.is_connected(&f.graph));

        let up = decoder_pad(&mut f, 0);
        assert_eq!(sel.add_track(&f.registry, &mut f.graph, up).unwrap(), 0);
        assert_eq!(sel.state(), SelectorState::TrackActive);
        assert_eq!(sel.active_input_index(), Some(0));
        assert!(sel.is_connected(&f.graph));

        let up = decoder_pad(&mut f, 1);
        assert_eq!(sel.add_track(&f.registry, &mut f.graph, up).unwrap(), 1);
        // second track does not steal activation
        assert_eq!(sel.active_input_index(), Some(0));
    }

    #[test]
    fn test_selector_properties() {
        let mut f = fixture();
        let sel = TrackSelector::new(&f.registry, &mut f.graph, MediaKind::Subtitle).unwrap();
        let element = f.graph.element(sel.selector()).unwrap();
        assert_eq!(element.name(), "subtitle-selector");
        assert!(element.property_bool("sync-streams").unwrap());
        assert!(element.property_bool("cache-buffers").unwrap());
        assert_eq!(element.property_pad("active-pad").unwrap(), None);
    }

    #[test]
    fn test_set_active_input_bounds_checked() {
        let mut f = fixture();
        let mut sel = TrackSelector::new(&f.registry, &mut f.graph, MediaKind::Audio).unwrap();
        for n in 0..2 {
            let up = decoder_pad(&mut f, n);
            sel.add_track(&f.registry, &mut f.graph, up).unwrap();
        }

        assert!(!sel.set_active_input(&mut f.graph, Some(5)).unwrap());
        assert_eq!(sel.active_input_index(), Some(0));

        assert!(sel.set_active_input(&mut f.graph, Some(1)).unwrap());
        assert_eq!(sel.active_input_index(), Some(1));
        let active = f
            .graph
            .element(sel.selector())
            .unwrap()
            .property_pad("active-pad")
            .unwrap();
        assert_eq!(active, sel.input_pad(1));
    }

    #[test]
    fn test_removing_active_track_does_not_fail_over() {
        let mut f = fixture();
        let mut sel = TrackSelector::new(&f.registry, &mut f.graph, MediaKind::Audio).unwrap();
        sel.set_output(&mut f.graph, Some(f.sink_pad)).unwrap();
        for n in 0..2 {
            let up = decoder_pad(&mut f, n);
            sel.add_track(&f.registry, &mut f.graph, up).unwrap();
        }
        let first = sel.input_pad(0).unwrap();

        assert!(sel.remove_input_pad(&mut f.graph, first));
        assert_eq!(sel.state(), SelectorState::TracksInactive);
        assert_eq!(sel.active_input_pad(), None);
        assert!(!sel.is_connected(&f.graph));
        assert!(!f.graph.contains_pad(first));
        // remaining track shifts down
        assert_eq!(sel.track_count(), 1);
        assert!(!sel.remove_input_pad(&mut f.graph, first));
    }

    #[test]
    fn test_remove_all_input_pads() {
        let mut f = fixture();
        let mut sel = TrackSelector::new(&f.registry, &mut f.graph, MediaKind::Video).unwrap();
        for n in 0..3 {
            let up = decoder_pad(&mut f, n);
            sel.add_track(&f.registry, &mut f.graph, up).unwrap();
        }
        sel.remove_all_input_pads(&mut f.graph);
        assert_eq!(sel.state(), SelectorState::NoTracks);
        assert_eq!(f.graph.pads_of(sel.selector()).len(), 1);
    }

    #[test]
    fn test_output_connected_only_while_active() {
        let mut f = fixture();
        let mut sel = TrackSelector::new(&f.registry, &mut f.graph, MediaKind::Audio).unwrap();
        let up = decoder_pad(&mut f, 0);
        sel.add_track(&f.registry, &mut f.graph, up).unwrap();
        sel.set_active_input(&mut f.graph, None).unwrap();

        sel.set_output(&mut f.graph, Some(f.sink_pad)).unwrap();
        assert!(!sel.is_connected(&f.graph));
        sel.set_active_input(&mut f.graph, Some(0)).unwrap();
        assert!(sel.is_connected(&f.graph));

        sel.set_output(&mut f.graph, None).unwrap();
        assert!(!sel.is_connected(&f.graph));
    }
}
