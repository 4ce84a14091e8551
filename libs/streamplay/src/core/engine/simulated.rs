// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! In-process engine that plays media described by a [`MediaCatalog`].
//!
//! Nothing is decoded. Preroll discovers the catalog's streams as
//! sometimes-pads on the `uridecodebin` element, the clock advances in real
//! time at the current rate, and end-of-stream is posted when the position
//! reaches the duration. Faults and topology changes can be injected.

use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::catalog::{MediaCatalog, MediaDescription, StreamDescription};
use super::{Engine, EngineBinding};
use crate::core::bus::{ContextSlot, EngineError, ErrorCode, MessageSource, MessageView};
use crate::core::error::{Result, StreamError};
use crate::core::graph::{
    factories, ElementId, ElementRegistry, Graph, MediaKind, PadDirection, PadId, PadPresence,
    TagList,
};
use crate::core::pipeline::{ElementState, SeekRequest, StateChangeReturn, StateSnapshot};

/// Context type requested before video output starts.
pub const DISPLAY_CONTEXT_TYPE: &str = "gl-display";

#[derive(Debug, Clone)]
pub struct SimulationOptions {
    /// Time between the Paused request and the end of preroll.
    pub preroll_delay: Duration,
    /// Clock granularity while playing (end-of-stream detection).
    pub tick_interval: Duration,
    pub instant_rate_change: bool,
    /// Buffering levels posted while prerolling network resources.
    pub network_buffering_steps: Vec<i32>,
}

impl Default for SimulationOptions {
    fn default() -> Self {
        Self {
            preroll_delay: Duration::from_millis(10),
            tick_interval: Duration::from_millis(5),
            instant_rate_change: true,
            network_buffering_steps: vec![25, 75, 100],
        }
    }
}

struct Session {
    uri: String,
    decoder: ElementId,
    decoder_name: String,
    media: Option<MediaDescription>,
    pads: Vec<(PadId, StreamDescription)>,
    prerolled: bool,
    base_position: Duration,
    running_since: Option<Instant>,
    rate: f64,
    segment_stop: Option<Duration>,
    eos_posted: bool,
}

impl Session {
    fn duration(&self) -> Option<Duration> {
        self.media.as_ref().and_then(MediaDescription::duration)
    }

    fn position(&self) -> Duration {
        let position = match self.running_since {
            Some(since) => {
                let advanced = since.elapsed().as_secs_f64() * self.rate;
                Duration::from_secs_f64((self.base_position.as_secs_f64() + advanced).max(0.0))
            }
            None => self.base_position,
        };
        match self.segment_end() {
            Some(end) => position.min(end),
            None => position,
        }
    }

    fn segment_end(&self) -> Option<Duration> {
        match (self.segment_stop, self.duration()) {
            (Some(stop), Some(duration)) => Some(stop.min(duration)),
            (stop, duration) => stop.or(duration),
        }
    }

    fn start_clock(&mut self) {
        if self.running_since.is_none() {
            self.running_since = Some(Instant::now());
        }
    }

    fn stop_clock(&mut self) {
        self.base_position = self.position();
        self.running_since = None;
    }

    fn source(&self) -> MessageSource {
        MessageSource::new(self.decoder, self.decoder_name.clone())
    }
}

struct EngineState {
    current: ElementState,
    /// Final target of an in-flight async transition, `VoidPending` when settled.
    pending: ElementState,
    last_return: StateChangeReturn,
    binding: Option<EngineBinding>,
    session: Option<Session>,
    generation: u64,
    preroll_due: Option<(u64, Instant)>,
}

struct Shared {
    state: Mutex<EngineState>,
    cond: Condvar,
    catalog: Mutex<MediaCatalog>,
    options: SimulationOptions,
}

enum Control {
    Wake,
    Shutdown,
}

pub struct SimulatedEngine {
    registry: ElementRegistry,
    shared: Arc<Shared>,
    control_tx: Sender<Control>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SimulatedEngine {
    pub fn new(catalog: MediaCatalog, options: SimulationOptions) -> Result<Self> {
        Self::with_registry(catalog, options, ElementRegistry::with_defaults())
    }

    /// Engine exposing only the factories in `registry`.
    pub fn with_registry(
        catalog: MediaCatalog,
        options: SimulationOptions,
        registry: ElementRegistry,
    ) -> Result<Self> {
        let shared = Arc::new(Shared {
            state: Mutex::new(EngineState {
                current: ElementState::Null,
                pending: ElementState::VoidPending,
                last_return: StateChangeReturn::Success,
                binding: None,
                session: None,
                generation: 0,
                preroll_due: None,
            }),
            cond: Condvar::new(),
            catalog: Mutex::new(catalog),
            options,
        });

        let (control_tx, control_rx) = crossbeam_channel::unbounded();
        let worker_shared = Arc::clone(&shared);
        let worker = std::thread::Builder::new()
            .name("streamplay-engine".to_string())
            .spawn(move || run_worker(worker_shared, control_rx))
            .map_err(|e| {
                StreamError::Configuration(format!("Failed to spawn engine thread: {}", e))
            })?;

        Ok(Self {
            registry,
            shared,
            control_tx,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Add or replace a catalog entry. Takes effect on the next preroll.
    pub fn insert_media(&self, media: MediaDescription) {
        self.shared.catalog.lock().insert(media);
    }

    pub fn current_state(&self) -> ElementState {
        self.shared.state.lock().current
    }

    pub fn current_uri(&self) -> Option<String> {
        self.shared
            .state
            .lock()
            .session
            .as_ref()
            .map(|s| s.uri.clone())
    }

    /// Post an error as if raised by the source element.
    pub fn post_error(&self, error: EngineError) -> bool {
        self.post_from_source(MessageView::Error(error))
    }

    pub fn post_warning(&self, warning: EngineError) -> bool {
        self.post_from_source(MessageView::Warning(warning))
    }

    pub fn post_info(&self, info: EngineError) -> bool {
        self.post_from_source(MessageView::Info(info))
    }

    pub fn post_buffering(&self, percent: i32) -> bool {
        self.post_from_source(MessageView::Buffering { percent })
    }

    pub fn post_tags(&self, tags: TagList) -> bool {
        self.post_from_source(MessageView::Tag(tags))
    }

    fn post_from_source(&self, view: MessageView) -> bool {
        let st = self.shared.state.lock();
        let Some(binding) = st.binding.as_ref() else {
            return false;
        };
        let source = match st.session.as_ref() {
            Some(session) => session.source(),
            None => pipeline_source(binding),
        };
        binding.bus.post(source, view)
    }

    /// Expose a new stream on the prerolled source element.
    pub fn add_stream(&self, stream: StreamDescription) -> Result<PadId> {
        let mut st = self.shared.state.lock();
        let binding = st
            .binding
            .clone()
            .ok_or_else(|| StreamError::Configuration("engine is not bound".into()))?;
        let session = st
            .session
            .as_mut()
            .filter(|s| s.prerolled)
            .ok_or_else(|| StreamError::Configuration("no prerolled media".into()))?;

        let index = session.pads.len();
        let pad = {
            let mut graph = binding.graph.lock();
            create_stream_pad(&mut graph, session.decoder, index, &stream)?
        };
        session.pads.push((pad, stream));
        binding
            .bus
            .post(session.source(), MessageView::PadAdded { pad });
        Ok(pad)
    }

    /// Remove the `index`-th stream (discovery order) of the source element.
    pub fn remove_stream(&self, index: usize) -> Result<()> {
        let mut st = self.shared.state.lock();
        let binding = st
            .binding
            .clone()
            .ok_or_else(|| StreamError::Configuration("engine is not bound".into()))?;
        let session = st
            .session
            .as_mut()
            .ok_or_else(|| StreamError::Configuration("no media".into()))?;
        if index >= session.pads.len() {
            return Err(StreamError::PadNotFound(format!("stream {}", index)));
        }
        let (pad, stream) = session.pads.remove(index);
        let caps = binding.graph.lock().remove_pad(pad).ok().and_then(|p| p.caps);
        binding.bus.post(
            session.source(),
            MessageView::PadRemoved {
                pad,
                kind: Some(stream.kind),
                caps,
            },
        );
        Ok(())
    }

    fn wake_worker(&self) {
        let _ = self.control_tx.send(Control::Wake);
    }
}

impl Drop for SimulatedEngine {
    fn drop(&mut self) {
        let _ = self.control_tx.send(Control::Shutdown);
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                tracing::error!("[engine] Worker thread panicked");
            }
        }
    }
}

fn pipeline_source(binding: &EngineBinding) -> MessageSource {
    MessageSource::new(binding.pipeline, binding.pipeline_name.clone())
}

fn set_element_state(graph: &mut Graph, id: ElementId, state: ElementState) {
    if let Some(element) = graph.element_mut(id) {
        element.state = state;
    }
}

fn create_stream_pad(
    graph: &mut Graph,
    decoder: ElementId,
    index: usize,
    stream: &StreamDescription,
) -> Result<PadId> {
    let mut n = index;
    // Pad names stay unique even after removals.
    while graph.static_pad(decoder, &format!("src_{}", n)).is_some() {
        n += 1;
    }
    let pad = graph.add_pad(
        decoder,
        &format!("src_{}", n),
        PadDirection::Src,
        PadPresence::Sometimes,
    )?;
    graph.set_pad_caps(pad, stream.raw_caps())?;
    graph.set_pad_tags(pad, stream.tags())?;
    Ok(pad)
}

/// Remove the session's pads, announcing each removal.
fn teardown_session(st: &mut EngineState, binding: &EngineBinding) {
    let Some(session) = st.session.take() else {
        return;
    };
    st.generation += 1;
    st.preroll_due = None;

    let mut graph = binding.graph.lock();
    set_element_state(&mut graph, session.decoder, ElementState::Null);
    for (pad, stream) in &session.pads {
        let caps = graph.remove_pad(*pad).ok().and_then(|p| p.caps);
        binding.bus.post(
            session.source(),
            MessageView::PadRemoved {
                pad: *pad,
                kind: Some(stream.kind),
                caps,
            },
        );
    }
    tracing::debug!("[engine] Released '{}'", session.uri);
}

impl Engine for SimulatedEngine {
    fn name(&self) -> &str {
        "simulated"
    }

    fn registry(&self) -> &ElementRegistry {
        &self.registry
    }

    fn bind(&self, binding: EngineBinding) -> Result<()> {
        let mut st = self.shared.state.lock();
        if st.binding.is_some() {
            return Err(StreamError::Configuration(
                "engine is already bound to a pipeline".into(),
            ));
        }
        tracing::debug!("[engine] Bound to pipeline '{}'", binding.pipeline_name);
        st.binding = Some(binding);
        Ok(())
    }

    fn set_state(&self, target: ElementState) -> StateChangeReturn {
        let mut st = self.shared.state.lock();
        let Some(binding) = st.binding.clone() else {
            return StateChangeReturn::Failure;
        };
        if target == ElementState::VoidPending {
            return StateChangeReturn::Failure;
        }

        if st.pending != ElementState::VoidPending {
            if target >= ElementState::Paused {
                // Preroll still running; it finishes towards the new target.
                st.pending = target;
                return StateChangeReturn::Async;
            }
            st.pending = ElementState::VoidPending;
            st.preroll_due = None;
        }

        let old = st.current;
        if target == old {
            st.last_return = StateChangeReturn::Success;
            return StateChangeReturn::Success;
        }

        if target <= ElementState::Ready {
            teardown_session(&mut st, &binding);
            st.current = target;
            st.last_return = StateChangeReturn::Success;
            set_element_state(&mut binding.graph.lock(), binding.pipeline, target);
            binding.bus.post(
                pipeline_source(&binding),
                MessageView::StateChanged {
                    old,
                    current: target,
                    pending: ElementState::VoidPending,
                },
            );
            self.shared.cond.notify_all();
            return StateChangeReturn::Success;
        }

        if old <= ElementState::Ready {
            teardown_session(&mut st, &binding);
            let decoder = {
                let graph = binding.graph.lock();
                graph
                    .elements_by_factory(factories::URI_DECODE_BIN)
                    .first()
                    .and_then(|id| graph.element(*id))
                    .map(|e| {
                        (
                            e.id(),
                            e.name().to_string(),
                            e.property_str("uri").unwrap_or_default().to_string(),
                        )
                    })
            };

            let Some((decoder, decoder_name, uri)) = decoder else {
                // Nothing to preroll.
                st.current = target;
                st.last_return = StateChangeReturn::Success;
                binding.bus.post(
                    pipeline_source(&binding),
                    MessageView::StateChanged {
                        old,
                        current: target,
                        pending: ElementState::VoidPending,
                    },
                );
                return StateChangeReturn::Success;
            };

            if old == ElementState::Null {
                binding.bus.post(
                    pipeline_source(&binding),
                    MessageView::StateChanged {
                        old,
                        current: ElementState::Ready,
                        pending: target,
                    },
                );
            }

            let media = self.shared.catalog.lock().get(&uri).cloned();
            st.generation += 1;
            st.current = ElementState::Ready;
            st.pending = target;
            st.session = Some(Session {
                uri: uri.clone(),
                decoder,
                decoder_name,
                media,
                pads: Vec::new(),
                prerolled: false,
                base_position: Duration::ZERO,
                running_since: None,
                rate: 1.0,
                segment_stop: None,
                eos_posted: false,
            });
            st.preroll_due = Some((
                st.generation,
                Instant::now() + self.shared.options.preroll_delay,
            ));
            {
                let mut graph = binding.graph.lock();
                set_element_state(&mut graph, binding.pipeline, ElementState::Ready);
                set_element_state(&mut graph, decoder, ElementState::Ready);
            }
            drop(st);
            tracing::debug!("[engine] Prerolling '{}'", uri);
            self.wake_worker();
            return StateChangeReturn::Async;
        }

        // Paused <-> Playing on prerolled media.
        if let Some(session) = st.session.as_mut() {
            if target == ElementState::Playing {
                session.start_clock();
            } else {
                session.stop_clock();
            }
        }
        st.current = target;
        st.last_return = StateChangeReturn::Success;
        set_element_state(&mut binding.graph.lock(), binding.pipeline, target);
        binding.bus.post(
            pipeline_source(&binding),
            MessageView::StateChanged {
                old,
                current: target,
                pending: ElementState::VoidPending,
            },
        );
        self.shared.cond.notify_all();
        drop(st);
        self.wake_worker();
        StateChangeReturn::Success
    }

    fn get_state(&self, timeout: Duration) -> StateSnapshot {
        let deadline = Instant::now() + timeout;
        let mut st = self.shared.state.lock();
        while st.pending != ElementState::VoidPending {
            if self.shared.cond.wait_until(&mut st, deadline).timed_out() {
                break;
            }
        }
        StateSnapshot {
            result: if st.pending != ElementState::VoidPending {
                StateChangeReturn::Async
            } else {
                st.last_return
            },
            current: st.current,
            pending: st.pending,
        }
    }

    fn query_position(&self) -> Option<Duration> {
        let st = self.shared.state.lock();
        if st.pending != ElementState::VoidPending || st.current < ElementState::Paused {
            return None;
        }
        st.session
            .as_ref()
            .filter(|s| s.prerolled)
            .map(Session::position)
    }

    fn query_duration(&self) -> Option<Duration> {
        let st = self.shared.state.lock();
        st.session
            .as_ref()
            .filter(|s| s.prerolled)
            .and_then(Session::duration)
    }

    fn query_seekable(&self) -> Option<bool> {
        let st = self.shared.state.lock();
        let session = st.session.as_ref().filter(|s| s.prerolled)?;
        let media = session.media.as_ref()?;
        Some(media.seekable && media.duration().is_some())
    }

    fn seek(&self, request: &SeekRequest) -> bool {
        let mut st = self.shared.state.lock();
        let Some(binding) = st.binding.clone() else {
            return false;
        };
        let playing = st.current == ElementState::Playing;
        let Some(session) = st.session.as_mut().filter(|s| s.prerolled) else {
            return false;
        };

        if request.is_instant_rate_change() {
            if !self.shared.options.instant_rate_change {
                return false;
            }
            session.stop_clock();
            session.rate = request.rate;
            if playing {
                session.start_clock();
            }
            tracing::debug!("[engine] Instant rate change to {}", request.rate);
            return true;
        }

        let seekable = session
            .media
            .as_ref()
            .is_some_and(|m| m.seekable && m.duration().is_some());
        if !seekable {
            tracing::debug!("[engine] Seek rejected, '{}' is not seekable", session.uri);
            return false;
        }

        let duration = session.duration().unwrap_or_default();
        let target = request
            .target_position()
            .unwrap_or_else(|| session.position())
            .min(duration);
        session.base_position = target;
        session.rate = request.rate;
        session.segment_stop = if request.rate >= 0.0 { request.stop } else { None };
        session.running_since = if playing { Some(Instant::now()) } else { None };
        session.eos_posted = false;

        if request.is_flushing() {
            binding
                .bus
                .post(pipeline_source(&binding), MessageView::AsyncDone);
            binding.bus.post(
                session.source(),
                MessageView::SegmentStart { position: target },
            );
        }
        tracing::debug!("[engine] Seek to {:?} at rate {}", target, request.rate);
        true
    }

    fn supports_instant_rate_change(&self) -> bool {
        self.shared.options.instant_rate_change
    }
}

fn run_worker(shared: Arc<Shared>, control_rx: Receiver<Control>) {
    tracing::trace!("[engine] Worker started");
    loop {
        let timeout = {
            let st = shared.state.lock();
            match st.preroll_due {
                Some((_, due)) => due.saturating_duration_since(Instant::now()),
                None if st.current == ElementState::Playing => shared.options.tick_interval,
                None => Duration::from_millis(100),
            }
        };

        crossbeam_channel::select! {
            recv(control_rx) -> msg => match msg {
                Ok(Control::Wake) => {}
                Ok(Control::Shutdown) | Err(_) => break,
            },
            default(timeout) => {}
        }

        let mut st = shared.state.lock();
        if let Some((generation, due)) = st.preroll_due {
            if due <= Instant::now() {
                st.preroll_due = None;
                if generation == st.generation {
                    preroll(&shared, &mut st);
                }
            }
        }
        if st.current == ElementState::Playing {
            check_eos(&mut st);
        }
    }
    tracing::trace!("[engine] Worker stopped");
}

fn fail_preroll(shared: &Shared, st: &mut EngineState, binding: &EngineBinding, error: EngineError) {
    if let Some(session) = st.session.as_ref() {
        tracing::debug!("[engine] Preroll of '{}' failed: {}", session.uri, error);
        binding.bus.post(session.source(), MessageView::Error(error));
    }
    st.pending = ElementState::VoidPending;
    st.last_return = StateChangeReturn::Failure;
    shared.cond.notify_all();
}

fn preroll(shared: &Shared, st: &mut EngineState) {
    let Some(binding) = st.binding.clone() else {
        return;
    };
    if st.pending == ElementState::VoidPending {
        return;
    }
    let Some(session) = st.session.as_mut() else {
        return;
    };

    let Some(media) = session.media.clone() else {
        let error = EngineError::resource(ErrorCode::NotFound, "Resource not found.")
            .with_debug(format!("no catalog entry for '{}'", session.uri));
        fail_preroll(shared, st, &binding, error);
        return;
    };

    if media.is_network() {
        for percent in &shared.options.network_buffering_steps {
            binding.bus.post(
                session.source(),
                MessageView::Buffering { percent: *percent },
            );
        }
    }

    for stream in &media.streams {
        if !stream.supported {
            let error = EngineError::stream(
                ErrorCode::CodecNotFound,
                format!("No decoder available for type '{}'.", stream.codec),
            );
            fail_preroll(shared, st, &binding, error);
            return;
        }
        let index = session.pads.len();
        let created = {
            let mut graph = binding.graph.lock();
            create_stream_pad(&mut graph, session.decoder, index, stream)
        };
        match created {
            Ok(pad) => {
                session.pads.push((pad, stream.clone()));
                binding
                    .bus
                    .post(session.source(), MessageView::PadAdded { pad });
            }
            Err(e) => {
                let error = EngineError::core(ErrorCode::Failed, e.to_string());
                fail_preroll(shared, st, &binding, error);
                return;
            }
        }
    }

    let global_tags = media.global_tags();
    if !global_tags.is_empty() {
        binding
            .bus
            .post(session.source(), MessageView::Tag(global_tags));
    }

    if media.streams.iter().any(|s| s.kind == MediaKind::Video) {
        let reply = ContextSlot::new();
        binding.bus.post(
            session.source(),
            MessageView::NeedContext {
                context_type: DISPLAY_CONTEXT_TYPE.to_string(),
                reply: reply.clone(),
            },
        );
        if reply.is_provided() {
            tracing::debug!("[engine] Received '{}' context", DISPLAY_CONTEXT_TYPE);
        } else {
            tracing::debug!("[engine] No '{}' context provided", DISPLAY_CONTEXT_TYPE);
        }
    }

    binding.bus.post(
        session.source(),
        MessageView::Element(media.topology()),
    );

    let pipeline = pipeline_source(&binding);
    binding.bus.post(pipeline.clone(), MessageView::StreamStart);
    if media.duration().is_some() {
        binding
            .bus
            .post(pipeline.clone(), MessageView::DurationChanged);
    }
    // Child elements report their own transitions too.
    binding.bus.post(
        session.source(),
        MessageView::StateChanged {
            old: ElementState::Ready,
            current: ElementState::Paused,
            pending: ElementState::VoidPending,
        },
    );

    session.prerolled = true;
    let decoder = session.decoder;
    let target = st.pending;
    st.pending = ElementState::VoidPending;
    st.current = ElementState::Paused;
    st.last_return = StateChangeReturn::Success;

    binding.bus.post(
        pipeline.clone(),
        MessageView::StateChanged {
            old: ElementState::Ready,
            current: ElementState::Paused,
            pending: if target == ElementState::Playing {
                ElementState::Playing
            } else {
                ElementState::VoidPending
            },
        },
    );
    binding.bus.post(pipeline.clone(), MessageView::AsyncDone);

    if target == ElementState::Playing {
        if let Some(session) = st.session.as_mut() {
            session.start_clock();
        }
        st.current = ElementState::Playing;
        binding.bus.post(
            pipeline,
            MessageView::StateChanged {
                old: ElementState::Paused,
                current: ElementState::Playing,
                pending: ElementState::VoidPending,
            },
        );
    }

    {
        let mut graph = binding.graph.lock();
        set_element_state(&mut graph, binding.pipeline, st.current);
        set_element_state(&mut graph, decoder, st.current);
    }
    shared.cond.notify_all();
}

fn check_eos(st: &mut EngineState) {
    let Some(binding) = st.binding.clone() else {
        return;
    };
    let Some(session) = st.session.as_mut().filter(|s| s.prerolled) else {
        return;
    };
    if session.eos_posted {
        return;
    }

    let position = session.position();
    let finished = if session.rate >= 0.0 {
        session.segment_end().is_some_and(|end| position >= end)
    } else {
        position.is_zero()
    };
    if finished {
        session.stop_clock();
        session.eos_posted = true;
        tracing::debug!("[engine] End of stream for '{}'", session.uri);
        binding
            .bus
            .post(pipeline_source(&binding), MessageView::Eos);
    }
}
