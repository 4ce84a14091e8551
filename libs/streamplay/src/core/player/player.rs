// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use crossbeam_channel::Receiver;
use parking_lot::{Mutex, MutexGuard};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use super::events::{EventHub, PlayerEvent};
use super::metadata::{MetaData, MetaDataKey, MetaValue};
use super::track_selector::TrackSelector;
use super::types::{MediaStatus, PlaybackState, PlayerError, PlayerErrorKind, TrackType};
use crate::core::bus::{
    BusMessageFilter, Dispatcher, EngineError, ErrorCode, ErrorDomain, FilterId, FilterResult,
    Message, MessageView, SyncMessageFilter,
};
use crate::core::config::PlayerConfig;
use crate::core::device::{AudioOutput, DeviceDescriptor, VideoBranch, VideoOutput};
use crate::core::engine::{Engine, DISPLAY_CONTEXT_TYPE};
use crate::core::error::{Result, StreamError};
use crate::core::graph::{factories, ElementId, Graph, MediaKind, PadId, Structure, TagList};
use crate::core::pipeline::{ElementState, Pipeline, StateChangeReturn};

const PIPELINE_NAME: &str = "media-player";
const DECODER_NAME: &str = "decoder";

/// Everything the orchestrator mutates. Guarded by one lock; caller threads
/// and the dispatch context both go through it.
struct PlayerInner {
    state: PlaybackState,
    status: MediaStatus,
    source: String,
    decoder: Option<ElementId>,
    /// Indexed by [`MediaKind::index`].
    selectors: [TrackSelector; 3],
    /// Decoder output pad to the selector input it feeds.
    decoder_outputs: HashMap<PadId, (MediaKind, PadId)>,
    audio_sink: Option<ElementId>,
    video_branch: Option<VideoBranch>,

    prerolling: bool,
    duration: Option<Duration>,
    position: Duration,
    buffer_progress: i32,
    can_track_progress: bool,
    stalled_since: Option<Instant>,
    seekable: bool,
    error: PlayerError,
    not_found_reported: bool,
    metadata: MetaData,
    topology: Option<Structure>,
    audio_available: bool,
    video_available: bool,

    playback_rate: f64,
    pending_rate: Option<f64>,
    pending_flush_on_play: bool,
    loops: i32,
    current_loop: i32,
    last_position_update: Option<Instant>,
    /// Bus messages numbered below this belong to media already torn down.
    stale_before: u64,

    /// Notifications raised under the lock, published when it is committed.
    outbox: Vec<PlayerEvent>,
}

impl PlayerInner {
    fn emit(&mut self, event: PlayerEvent) {
        self.outbox.push(event);
    }

    fn selector(&self, kind: MediaKind) -> &TrackSelector {
        &self.selectors[kind.index()]
    }

    fn selector_mut(&mut self, kind: MediaKind) -> &mut TrackSelector {
        &mut self.selectors[kind.index()]
    }

    fn set_state(&mut self, state: PlaybackState) {
        if self.state.can_transition_to(state) {
            tracing::debug!("[player] State {} -> {}", self.state, state);
            self.state = state;
            self.emit(PlayerEvent::StateChanged(state));
        }
    }

    fn set_status(&mut self, status: MediaStatus) {
        if self.status != status {
            tracing::debug!("[player] Status {} -> {}", self.status, status);
            self.status = status;
            self.emit(PlayerEvent::MediaStatusChanged(status));
        }
    }

    fn set_position(&mut self, position: Duration) {
        if self.position != position {
            self.position = position;
            self.emit(PlayerEvent::PositionChanged(position));
        }
    }

    fn set_duration(&mut self, duration: Option<Duration>) {
        if self.duration != duration {
            self.duration = duration;
            self.emit(PlayerEvent::DurationChanged(duration));
        }
    }

    fn set_buffer_progress(&mut self, percent: i32) {
        let percent = percent.clamp(0, 100);
        if self.buffer_progress != percent {
            self.buffer_progress = percent;
            self.emit(PlayerEvent::BufferProgressChanged(percent));
        }
    }

    fn set_seekable(&mut self, seekable: bool) {
        if self.seekable != seekable {
            self.seekable = seekable;
            self.emit(PlayerEvent::SeekableChanged(seekable));
        }
    }

    fn set_available(&mut self, kind: MediaKind, available: bool) {
        match kind {
            MediaKind::Audio if self.audio_available != available => {
                self.audio_available = available;
                self.emit(PlayerEvent::AudioAvailableChanged(available));
            }
            MediaKind::Video if self.video_available != available => {
                self.video_available = available;
                self.emit(PlayerEvent::VideoAvailableChanged(available));
            }
            _ => {}
        }
    }

    fn clamp_to_duration(&self, position: Duration) -> Duration {
        match self.duration {
            Some(duration) => position.min(duration),
            None => position,
        }
    }

    /// Status while playing or paused once preroll is done.
    fn buffered_status(&self, threshold: i32) -> MediaStatus {
        if !self.can_track_progress || self.buffer_progress >= threshold {
            MediaStatus::Buffered
        } else {
            MediaStatus::Buffering
        }
    }

    fn track_count(&self) -> usize {
        self.selectors.iter().map(TrackSelector::track_count).sum()
    }
}

struct PlayerShared {
    pipeline: Pipeline,
    config: PlayerConfig,
    events: EventHub,
    inner: Mutex<PlayerInner>,
}

/// Answers display context requests on the posting thread.
struct ContextProvider {
    display: Structure,
}

impl SyncMessageFilter for ContextProvider {
    fn on_sync_message(&self, message: &Message) -> FilterResult {
        match message.view() {
            MessageView::NeedContext {
                context_type,
                reply,
            } if context_type == DISPLAY_CONTEXT_TYPE => {
                reply.provide(self.display.clone());
                FilterResult::Consumed
            }
            _ => FilterResult::Pass,
        }
    }
}

/// Routes dispatched bus messages into the player.
struct PlayerBusFilter {
    shared: Weak<PlayerShared>,
}

impl BusMessageFilter for PlayerBusFilter {
    fn on_message(&mut self, message: &Message) -> FilterResult {
        match self.shared.upgrade() {
            Some(shared) if shared.handle_message(message) => FilterResult::Consumed,
            _ => FilterResult::Pass,
        }
    }
}

/// Media player built on a [`Pipeline`].
///
/// The graph is `uridecodebin` -> one input selector per media kind -> the
/// audio, video and subtitle sinks. Decoder pads appear while prerolling and
/// become tracks of the selector matching their caps.
///
/// Every caller-visible change is announced as a [`PlayerEvent`] to the
/// receivers returned by [`subscribe`](Self::subscribe).
pub struct MediaPlayer {
    shared: Arc<PlayerShared>,
    dispatcher: Mutex<Option<Dispatcher>>,
    sync_filter: FilterId,
    bus_filter: FilterId,
}

impl MediaPlayer {
    pub fn new(engine: Arc<dyn Engine>, config: PlayerConfig) -> Result<Self> {
        config.validate()?;
        engine.registry().ensure_available(&[
            factories::PIPELINE,
            factories::URI_DECODE_BIN,
            factories::INPUT_SELECTOR,
        ])?;

        let pipeline = Pipeline::new(PIPELINE_NAME, engine, config.state_change_timeout())?;
        let registry = pipeline.registry();
        let selectors = pipeline.with_graph(|graph| -> Result<[TrackSelector; 3]> {
            Ok([
                TrackSelector::new(registry, graph, MediaKind::Video)?,
                TrackSelector::new(registry, graph, MediaKind::Audio)?,
                TrackSelector::new(registry, graph, MediaKind::Subtitle)?,
            ])
        })?;

        let inner = PlayerInner {
            state: PlaybackState::Stopped,
            status: MediaStatus::Unknown,
            source: String::new(),
            decoder: None,
            selectors,
            decoder_outputs: HashMap::new(),
            audio_sink: None,
            video_branch: None,
            prerolling: false,
            duration: None,
            position: Duration::ZERO,
            buffer_progress: 0,
            can_track_progress: false,
            stalled_since: None,
            seekable: false,
            error: PlayerError::default(),
            not_found_reported: false,
            metadata: MetaData::new(),
            topology: None,
            audio_available: false,
            video_available: false,
            playback_rate: 1.0,
            pending_rate: None,
            pending_flush_on_play: false,
            loops: 1,
            current_loop: 0,
            last_position_update: None,
            stale_before: 0,
            outbox: Vec::new(),
        };

        let shared = Arc::new(PlayerShared {
            pipeline,
            config,
            events: EventHub::new(),
            inner: Mutex::new(inner),
        });

        shared.install_default_outputs();

        let bus = shared.pipeline.bus();
        let sync_filter = bus.add_sync_filter(Arc::new(ContextProvider {
            display: Structure::new(DISPLAY_CONTEXT_TYPE).with("display", PIPELINE_NAME),
        }));
        let bus_filter = bus.add_filter(Arc::new(Mutex::new(PlayerBusFilter {
            shared: Arc::downgrade(&shared),
        })));

        let weak = Arc::downgrade(&shared);
        let mode = shared.config.dispatch.mode();
        let dispatcher = Dispatcher::start(mode, bus.watch(), move || match weak.upgrade() {
            Some(shared) => {
                shared.dispatch_cycle();
                true
            }
            None => false,
        })?;

        tracing::info!("[player] Created with {}", mode.description());

        Ok(Self {
            shared,
            dispatcher: Mutex::new(Some(dispatcher)),
            sync_filter,
            bus_filter,
        })
    }

    // ---------------------------------------------------------------------
    // Commands
    // ---------------------------------------------------------------------

    /// Load `uri`, tearing down the current media first. An empty `uri`
    /// unloads and leaves the status at `NoMedia`.
    ///
    /// Returns once prerolling has been started; completion is reported
    /// through the `Loaded` status.
    pub fn set_media(&self, uri: &str) -> Result<()> {
        self.shared.set_media(uri)
    }

    pub fn play(&self) {
        self.shared.play()
    }

    pub fn pause(&self) {
        self.shared.pause()
    }

    pub fn stop(&self) {
        let shared = &self.shared;
        let mut inner = shared.inner.lock();
        shared.stop_or_eos(&mut inner, false);
        shared.commit(inner);
    }

    /// Seek to `position`, clamped to the duration once known.
    pub fn set_position(&self, position: Duration) -> bool {
        self.shared.set_position(position)
    }

    pub fn set_playback_rate(&self, rate: f64) {
        self.shared.set_playback_rate(rate)
    }

    /// Number of times the media plays before stopping. `-1` loops forever;
    /// `0` is rejected.
    pub fn set_loops(&self, loops: i32) {
        if loops == 0 {
            tracing::warn!("[player] Ignoring loop count of 0");
            return;
        }
        self.shared.inner.lock().loops = loops;
    }

    /// Activate track `index` of `kind`, or disable the kind with `None`.
    ///
    /// Returns `false` without changing anything when `index` is out of
    /// range or already active.
    pub fn set_active_track(&self, kind: TrackType, index: Option<usize>) -> bool {
        self.shared.set_active_track(kind, index)
    }

    /// Replace the audio output branch. `None` disconnects audio.
    pub fn set_audio_output(&self, output: Option<AudioOutput>) -> Result<()> {
        self.shared.set_audio_output(output.as_ref())
    }

    /// Replace the video output branch. `None` disconnects video and
    /// subtitles.
    pub fn set_video_output(&self, output: Option<VideoOutput>) -> Result<()> {
        self.shared.set_video_output(output.as_ref())
    }

    // ---------------------------------------------------------------------
    // Observables
    // ---------------------------------------------------------------------

    pub fn state(&self) -> PlaybackState {
        self.shared.inner.lock().state
    }

    pub fn media_status(&self) -> MediaStatus {
        self.shared.inner.lock().status
    }

    pub fn source(&self) -> String {
        self.shared.inner.lock().source.clone()
    }

    /// Current position, clamped to the duration.
    pub fn position(&self) -> Duration {
        self.shared.position()
    }

    pub fn position_us(&self) -> i64 {
        self.position().as_micros() as i64
    }

    pub fn duration(&self) -> Option<Duration> {
        self.shared.inner.lock().duration
    }

    pub fn duration_us(&self) -> Option<i64> {
        self.duration().map(|d| d.as_micros() as i64)
    }

    /// Buffer fill level in percent.
    pub fn buffer_progress(&self) -> i32 {
        self.shared.inner.lock().buffer_progress
    }

    pub fn is_seekable(&self) -> bool {
        self.shared.inner.lock().seekable
    }

    pub fn error(&self) -> PlayerError {
        self.shared.inner.lock().error.clone()
    }

    pub fn error_kind(&self) -> PlayerErrorKind {
        self.shared.inner.lock().error.kind
    }

    pub fn error_string(&self) -> String {
        self.shared.inner.lock().error.description.clone()
    }

    pub fn metadata(&self) -> MetaData {
        self.shared.inner.lock().metadata.clone()
    }

    pub fn is_audio_available(&self) -> bool {
        self.shared.inner.lock().audio_available
    }

    pub fn is_video_available(&self) -> bool {
        self.shared.inner.lock().video_available
    }

    pub fn playback_rate(&self) -> f64 {
        self.shared.inner.lock().playback_rate
    }

    pub fn loops(&self) -> i32 {
        self.shared.inner.lock().loops
    }

    pub fn track_count(&self, kind: TrackType) -> usize {
        self.shared.inner.lock().selector(kind).track_count()
    }

    pub fn active_track(&self, kind: TrackType) -> Option<usize> {
        self.shared.inner.lock().selector(kind).active_input_index()
    }

    /// Language, codec and title of one track.
    pub fn track_metadata(&self, kind: TrackType, index: usize) -> Option<MetaData> {
        let inner = self.shared.inner.lock();
        let pad = inner.selector(kind).input_pad(index)?;
        Some(
            self.shared
                .pipeline
                .with_graph(|graph| track_metadata(graph, kind, pad)),
        )
    }

    pub fn subscribe(&self) -> Receiver<PlayerEvent> {
        self.shared.events.subscribe()
    }

    /// Wakeup channel for host event loops: signalled when messages are
    /// waiting. Pair with [`dispatch`](Self::dispatch).
    pub fn bus_watch(&self) -> Receiver<()> {
        self.shared.pipeline.bus().watch()
    }

    /// Run one dispatch cycle from the host event loop. Returns the number
    /// of messages dispatched.
    ///
    /// Only valid with the event-loop dispatch mode; the poll thread owns
    /// dispatch otherwise.
    pub fn dispatch(&self) -> usize {
        let external = self
            .dispatcher
            .lock()
            .as_ref()
            .is_some_and(Dispatcher::is_external);
        if !external {
            tracing::warn!("[player] dispatch() called while the poll thread owns dispatch");
            return 0;
        }
        self.shared.dispatch_cycle()
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.shared.pipeline
    }

    pub fn config(&self) -> &PlayerConfig {
        &self.shared.config
    }
}

impl Drop for MediaPlayer {
    fn drop(&mut self) {
        if let Some(mut dispatcher) = self.dispatcher.lock().take() {
            dispatcher.stop();
        }
        let bus = self.shared.pipeline.bus();
        bus.remove_sync_filter(self.sync_filter);
        bus.remove_filter(self.bus_filter);
        tracing::debug!("[player] Dropped");
    }
}

impl PlayerShared {
    /// Publish what was raised under the lock, then release it.
    ///
    /// Subscribers observe notifications in the order the changes were made.
    /// Subscriber channels are unbounded, so publishing never blocks.
    fn commit(&self, mut inner: MutexGuard<'_, PlayerInner>) {
        for event in inner.outbox.drain(..) {
            self.events.publish(event);
        }
    }

    fn install_default_outputs(&self) {
        let registry = self.pipeline.registry();
        if registry.has_factory(factories::AUDIO_SINK) {
            let output = AudioOutput::new(DeviceDescriptor::default_audio_output());
            if let Err(e) = output.and_then(|o| self.set_audio_output(Some(&o))) {
                tracing::warn!("[player] Audio output disabled: {}", e);
            }
        } else {
            tracing::warn!(
                "[player] '{}' is not available, audio output disabled",
                factories::AUDIO_SINK
            );
        }
        if registry.has_factory(factories::VIDEO_SINK) {
            let output = VideoOutput::new(DeviceDescriptor::default_video_output());
            if let Err(e) = output.and_then(|o| self.set_video_output(Some(&o))) {
                tracing::warn!("[player] Video output disabled: {}", e);
            }
        } else {
            tracing::warn!(
                "[player] '{}' is not available, video output disabled",
                factories::VIDEO_SINK
            );
        }
    }

    fn dispatch_cycle(&self) -> usize {
        let bus = self.pipeline.bus();
        if bus.is_closed() {
            return 0;
        }
        let dispatched = bus.dispatch_pending();
        self.on_tick();
        dispatched
    }

    /// Periodic work: position notifications and the stall debounce.
    fn on_tick(&self) {
        let mut inner = self.inner.lock();
        let now = Instant::now();

        if inner.state == PlaybackState::Playing && !inner.prerolling {
            let due = inner
                .last_position_update
                .is_none_or(|last| now.duration_since(last) >= self.config.position_update_interval());
            if due {
                inner.last_position_update = Some(now);
                let position = inner.clamp_to_duration(self.pipeline.position());
                inner.set_position(position);
            }
        }

        if let Some(since) = inner.stalled_since {
            if now.duration_since(since) >= self.config.stalled_debounce() {
                inner.stalled_since = None;
                if inner.buffer_progress == 0 && inner.state != PlaybackState::Stopped {
                    tracing::debug!("[player] Buffer starved, stalled");
                    inner.set_status(MediaStatus::Stalled);
                }
            }
        }
        self.commit(inner);
    }

    fn position(&self) -> Duration {
        let inner = self.inner.lock();
        if inner.decoder.is_none() {
            return inner.position;
        }
        inner.clamp_to_duration(self.pipeline.position())
    }

    // ---------------------------------------------------------------------
    // Commands
    // ---------------------------------------------------------------------

    fn set_media(&self, uri: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        tracing::info!("[player] Setting media '{}'", uri);

        if let Err(e) = self.pipeline.set_state_sync(ElementState::Null) {
            tracing::warn!("[player] Teardown did not reach Null: {}", e);
        }
        self.teardown_media(&mut inner);
        self.reset_observables(&mut inner);

        if inner.source != uri {
            inner.source = uri.to_string();
            inner.emit(PlayerEvent::SourceChanged(uri.to_string()));
        }

        if uri.is_empty() {
            inner.set_status(MediaStatus::NoMedia);
            self.commit(inner);
            return Ok(());
        }

        let decoder = match self.create_decoder(uri) {
            Ok(decoder) => decoder,
            Err(e) => {
                let error = PlayerError::new(
                    PlayerErrorKind::ResourceError,
                    format!("Cannot create the decoder: {}", e),
                );
                tracing::error!("[player] {}", error.description);
                inner.error = error.clone();
                inner.emit(PlayerEvent::ErrorOccurred(error));
                inner.set_status(MediaStatus::Invalid);
                self.commit(inner);
                return Err(e);
            }
        };
        inner.decoder = Some(decoder);
        inner.prerolling = true;
        inner.set_status(MediaStatus::Loading);

        if self.pipeline.set_state(ElementState::Paused) == StateChangeReturn::Failure {
            let error = PlayerError::new(PlayerErrorKind::ResourceError, "Cannot start prerolling");
            inner.prerolling = false;
            inner.error = error.clone();
            inner.emit(PlayerEvent::ErrorOccurred(error));
            inner.set_status(MediaStatus::Invalid);
        }
        self.commit(inner);
        Ok(())
    }

    /// Remove the decoder and every track. The pipeline must already be
    /// quiescent.
    fn teardown_media(&self, inner: &mut PlayerInner) {
        let decoder = inner.decoder.take();
        let selectors = &mut inner.selectors;
        self.pipeline.with_graph(|graph| {
            for selector in selectors.iter_mut() {
                selector.remove_all_input_pads(graph);
            }
            if let Some(decoder) = decoder {
                if let Err(e) = graph.remove_element(decoder) {
                    tracing::warn!("[player] Removing decoder: {}", e);
                }
            }
        });
        inner.decoder_outputs.clear();
        self.pipeline.reset_position();

        // Anything posted so far belongs to the old media, including a
        // message the dispatch context has already popped.
        let bus = self.pipeline.bus();
        inner.stale_before = bus.next_seqnum();
        let dropped = bus.drain_all();
        if !dropped.is_empty() {
            tracing::debug!("[player] Discarded {} stale messages", dropped.len());
        }
    }

    fn reset_observables(&self, inner: &mut PlayerInner) {
        let had_tracks = inner.track_count() > 0;
        inner.prerolling = false;
        inner.set_state(PlaybackState::Stopped);
        inner.set_position(Duration::ZERO);
        inner.set_duration(None);
        inner.set_buffer_progress(0);
        inner.can_track_progress = false;
        inner.stalled_since = None;
        inner.set_seekable(false);
        inner.error = PlayerError::default();
        inner.not_found_reported = false;
        inner.topology = None;
        if !inner.metadata.is_empty() {
            inner.metadata.clear();
            inner.emit(PlayerEvent::MetaDataChanged);
        }
        inner.set_available(MediaKind::Audio, false);
        inner.set_available(MediaKind::Video, false);
        if had_tracks {
            inner.emit(PlayerEvent::TracksChanged);
        }
        inner.current_loop = 0;
        inner.pending_flush_on_play = false;
        inner.last_position_update = None;
        // A fresh engine session starts at normal speed.
        inner.pending_rate = (inner.playback_rate != 1.0).then_some(inner.playback_rate);
    }

    fn create_decoder(&self, uri: &str) -> Result<ElementId> {
        let decoder = self
            .pipeline
            .add_element(factories::URI_DECODE_BIN, Some(DECODER_NAME))?;
        let rtsp = uri
            .starts_with("rtsp://")
            .then(|| self.config.rtsp.clone().with_env_overrides());
        let ring_buffer = self.config.ring_buffer_max_size;

        let configured = self.pipeline.with_graph(|graph| -> Result<()> {
            let element = graph.require_element_mut(decoder)?;
            element.set_property("uri", uri)?;
            element.set_property("use-buffering", true)?;
            element.set_property("ring-buffer-max-size", ring_buffer)?;
            element.set_property("post-stream-topology", true)?;
            if let Some(rtsp) = rtsp {
                element.set_property("latency", rtsp.latency_ms)?;
                element.set_property("drop-on-latency", rtsp.drop_on_latency)?;
                element.set_property("do-retransmission", rtsp.do_retransmission)?;
            }
            Ok(())
        });
        if let Err(e) = configured {
            let _ = self.pipeline.remove_element(decoder);
            return Err(e);
        }
        Ok(decoder)
    }

    fn play(&self) {
        let mut inner = self.inner.lock();
        if inner.decoder.is_none() || inner.status == MediaStatus::Invalid {
            tracing::debug!("[player] Nothing to play");
            return;
        }
        if inner.state == PlaybackState::Playing {
            return;
        }

        if inner.state == PlaybackState::Stopped {
            inner.current_loop = 0;
        }
        if inner.status == MediaStatus::EndOfMedia {
            self.pipeline.set_position(Duration::ZERO);
            inner.set_position(Duration::ZERO);
            inner.set_status(MediaStatus::Loaded);
        }

        if self.pipeline.set_state(ElementState::Playing) == StateChangeReturn::Failure {
            tracing::warn!("[player] Could not start playback");
        }

        if !inner.prerolling {
            if let Some(rate) = inner.pending_rate.take() {
                self.pipeline.set_playback_rate(rate, true);
                inner.pending_flush_on_play = false;
            } else if inner.pending_flush_on_play {
                inner.pending_flush_on_play = false;
                self.pipeline.flush();
            }
        }

        inner.set_state(PlaybackState::Playing);
        inner.last_position_update = None;
        if !inner.prerolling && inner.status == MediaStatus::Loaded {
            let status = inner.buffered_status(self.config.buffered_threshold_percent);
            inner.set_status(status);
        }
        self.commit(inner);
    }

    fn pause(&self) {
        let mut inner = self.inner.lock();
        if inner.state == PlaybackState::Paused
            || inner.decoder.is_none()
            || inner.status == MediaStatus::Invalid
        {
            return;
        }

        if self.pipeline.set_state(ElementState::Paused) == StateChangeReturn::Failure {
            tracing::warn!("[player] Could not pause");
        }

        if inner.status == MediaStatus::EndOfMedia {
            self.pipeline.set_position(Duration::ZERO);
            inner.set_position(Duration::ZERO);
        } else if !inner.prerolling {
            let position = inner.clamp_to_duration(self.pipeline.position());
            inner.set_position(position);
        }

        inner.set_state(PlaybackState::Paused);
        if !inner.prerolling {
            let status = if inner.buffer_progress > 0 || !inner.can_track_progress {
                MediaStatus::Buffered
            } else {
                MediaStatus::Buffering
            };
            inner.set_status(status);
        }
        self.commit(inner);
    }

    /// Stop, rewinding to zero unless the stop was caused by end of stream.
    fn stop_or_eos(&self, inner: &mut PlayerInner, eos: bool) {
        if inner.state == PlaybackState::Stopped {
            if !eos && inner.decoder.is_some() && inner.position != Duration::ZERO {
                self.pipeline.set_position(Duration::ZERO);
                inner.set_position(Duration::ZERO);
            }
            return;
        }

        if inner.status != MediaStatus::Invalid
            && self.pipeline.set_state(ElementState::Paused) == StateChangeReturn::Failure
        {
            tracing::warn!("[player] Could not pause while stopping");
        }
        if !eos {
            self.pipeline.set_position(Duration::ZERO);
            inner.set_position(Duration::ZERO);
        }
        inner.set_state(PlaybackState::Stopped);
        inner.stalled_since = None;
        if !inner.prerolling && inner.status != MediaStatus::Invalid {
            inner.set_status(if eos {
                MediaStatus::EndOfMedia
            } else {
                MediaStatus::Loaded
            });
        }
        inner.set_buffer_progress(0);
    }

    fn set_position(&self, position: Duration) -> bool {
        let mut inner = self.inner.lock();
        if inner.decoder.is_none() {
            return false;
        }
        let position = inner.clamp_to_duration(position);
        if !self.pipeline.set_position(position) {
            return false;
        }
        inner.set_position(position);
        if inner.status == MediaStatus::EndOfMedia {
            inner.set_status(MediaStatus::Loaded);
        }
        self.commit(inner);
        true
    }

    fn set_playback_rate(&self, rate: f64) {
        if !rate.is_finite() || rate == 0.0 {
            tracing::warn!("[player] Ignoring playback rate {}", rate);
            return;
        }
        let mut inner = self.inner.lock();
        if inner.playback_rate == rate {
            return;
        }
        inner.playback_rate = rate;
        inner.emit(PlayerEvent::PlaybackRateChanged(rate));

        let deferred = inner.decoder.is_none()
            || inner.prerolling
            || inner.state == PlaybackState::Stopped;
        if deferred {
            inner.pending_rate = Some(rate);
        } else {
            inner.pending_rate = None;
            self.pipeline.set_playback_rate(rate, false);
        }
        self.commit(inner);
    }

    fn set_active_track(&self, kind: MediaKind, index: Option<usize>) -> bool {
        let mut inner = self.inner.lock();
        let selector = inner.selector(kind);
        if let Some(i) = index {
            if i >= selector.track_count() {
                tracing::warn!(
                    "[player] Ignoring {} track {}, only {} known",
                    kind,
                    i,
                    selector.track_count()
                );
                return false;
            }
        }
        if selector.active_input_index() == index {
            return false;
        }

        let playing = inner.state == PlaybackState::Playing;
        let switched = {
            let _scope = self.pipeline.config_scope();
            let selector = inner.selector_mut(kind);
            let switched = self
                .pipeline
                .with_graph(|graph| selector.set_active_input(graph, index));
            if playing {
                self.pipeline.flush();
            }
            switched
        };

        match switched {
            Ok(true) => {}
            Ok(false) => return false,
            Err(e) => {
                tracing::warn!("[player] Switching {} track: {}", kind, e);
                return false;
            }
        }
        if !playing {
            inner.pending_flush_on_play = true;
        }

        tracing::debug!("[player] Active {} track is now {:?}", kind, index);
        inner.emit(PlayerEvent::ActiveTrackChanged { kind, index });
        if kind != MediaKind::Subtitle {
            inner.set_available(kind, index.is_some());
        }
        self.refresh_track_metadata(&mut inner);
        self.commit(inner);
        true
    }

    fn set_audio_output(&self, output: Option<&AudioOutput>) -> Result<()> {
        let mut inner = self.inner.lock();
        let registry = self.pipeline.registry();
        let _scope = self.pipeline.config_scope();

        let old = inner.audio_sink.take();
        let selector = inner.selector_mut(MediaKind::Audio);
        let sink = self.pipeline.with_graph(|graph| -> Result<Option<ElementId>> {
            selector.set_output(graph, None)?;
            if let Some(old) = old {
                graph.remove_element(old)?;
            }
            let Some(output) = output else {
                return Ok(None);
            };
            let sink = output.build(registry, graph)?;
            let pad = graph
                .static_pad(sink, "sink")
                .ok_or_else(|| StreamError::PadNotFound(format!("{} has no sink pad", sink)))?;
            selector.set_output(graph, Some(pad))?;
            Ok(Some(sink))
        })?;
        inner.audio_sink = sink;
        tracing::debug!(
            "[player] Audio output {}",
            if sink.is_some() { "connected" } else { "removed" }
        );
        Ok(())
    }

    fn set_video_output(&self, output: Option<&VideoOutput>) -> Result<()> {
        let mut inner = self.inner.lock();
        let registry = self.pipeline.registry();
        let _scope = self.pipeline.config_scope();

        let old = inner.video_branch.take();
        let PlayerInner { selectors, .. } = &mut *inner;
        let [video, _, subtitle] = selectors;
        let branch = self.pipeline.with_graph(|graph| -> Result<Option<VideoBranch>> {
            video.set_output(graph, None)?;
            subtitle.set_output(graph, None)?;
            if let Some(old) = old {
                graph.remove_element(old.video_sink)?;
                if let Some(sub) = old.subtitle_sink {
                    graph.remove_element(sub)?;
                }
            }
            let Some(output) = output else {
                return Ok(None);
            };
            let branch = output.build(registry, graph)?;
            let pad = sink_pad(graph, branch.video_sink)?;
            video.set_output(graph, Some(pad))?;
            if let Some(sub) = branch.subtitle_sink {
                let pad = sink_pad(graph, sub)?;
                subtitle.set_output(graph, Some(pad))?;
            }
            Ok(Some(branch))
        })?;
        inner.video_branch = branch;
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Bus messages
    // ---------------------------------------------------------------------

    /// Returns whether the message was handled.
    fn handle_message(&self, message: &Message) -> bool {
        let mut inner = self.inner.lock();
        if message.seqnum() < inner.stale_before {
            tracing::debug!("[player] Ignoring stale {}", message);
            return true;
        }
        let handled = match message.view() {
            MessageView::Tag(list) => {
                self.on_tags(&mut inner, list);
                true
            }
            MessageView::DurationChanged => {
                if !inner.prerolling {
                    self.refresh_duration(&mut inner);
                }
                true
            }
            MessageView::Buffering { percent } => {
                self.on_buffering(&mut inner, *percent);
                true
            }
            MessageView::Eos => {
                self.on_eos(&mut inner);
                true
            }
            MessageView::StateChanged {
                old,
                current,
                pending,
            } => {
                // Child elements report their own transitions.
                if message.src() == self.pipeline.id() {
                    tracing::trace!("[player] Pipeline {} -> {} (pending {})", old, current, pending);
                    self.on_pipeline_state(&mut inner, *current);
                }
                true
            }
            MessageView::Error(error) => {
                self.on_error(&mut inner, message, error);
                true
            }
            MessageView::Warning(warning) => {
                tracing::warn!("[player] Warning from {}: {}", message.source().name, warning);
                if let Some(details) = &warning.debug {
                    tracing::debug!("[player] {}", details);
                }
                self.pipeline.dump_graph("warning");
                true
            }
            MessageView::Info(info) => {
                tracing::info!("[player] Info from {}: {}", message.source().name, info);
                true
            }
            MessageView::SegmentStart { position } => {
                let position = inner.clamp_to_duration(*position);
                inner.set_position(position);
                true
            }
            MessageView::Element(structure) if structure.name() == "stream-topology" => {
                inner.topology = Some(structure.clone());
                if !inner.prerolling && inner.decoder.is_some() {
                    self.apply_topology(&mut inner);
                }
                true
            }
            MessageView::AsyncDone => {
                if !inner.prerolling && inner.decoder.is_some() {
                    let seekable = self.pipeline.can_seek();
                    inner.set_seekable(seekable);
                }
                true
            }
            MessageView::Latency | MessageView::StreamStart => {
                tracing::debug!("[player] {:?} from {}", message.message_type(), message.source().name);
                true
            }
            MessageView::PadAdded { pad } => {
                self.on_pad_added(&mut inner, *pad);
                true
            }
            MessageView::PadRemoved { pad, .. } => {
                self.on_pad_removed(&mut inner, *pad);
                true
            }
            _ => false,
        };
        self.commit(inner);
        handled
    }

    fn on_tags(&self, inner: &mut PlayerInner, list: &TagList) {
        if inner.metadata.merge_tags(list) {
            inner.emit(PlayerEvent::MetaDataChanged);
        }
    }

    fn refresh_duration(&self, inner: &mut PlayerInner) {
        let duration = self.pipeline.duration();
        if duration != inner.duration {
            inner.set_duration(duration);
            match duration {
                Some(d) => inner.metadata.insert(MetaDataKey::Duration, MetaValue::Duration(d)),
                None => inner.metadata.remove(MetaDataKey::Duration),
            };
            inner.emit(PlayerEvent::MetaDataChanged);
        }
    }

    fn on_buffering(&self, inner: &mut PlayerInner, percent: i32) {
        let previous = inner.buffer_progress;
        inner.can_track_progress = true;

        if inner.state != PlaybackState::Stopped && !inner.prerolling {
            if previous > 0 && percent == 0 {
                // Starving. Stalled only if it stays empty.
                inner.stalled_since = Some(Instant::now());
                inner.set_status(MediaStatus::Buffering);
            } else if percent >= self.config.buffered_threshold_percent {
                inner.stalled_since = None;
                inner.set_status(MediaStatus::Buffered);
            } else {
                if percent > 0 {
                    inner.stalled_since = None;
                }
                inner.set_status(MediaStatus::Buffering);
            }
        }
        inner.set_buffer_progress(percent);
    }

    fn on_eos(&self, inner: &mut PlayerInner) {
        if inner.decoder.is_none() {
            return;
        }
        if let Some(duration) = inner.duration {
            inner.set_position(duration);
        }

        let repeat = inner.loops < 0 || {
            inner.current_loop += 1;
            inner.current_loop < inner.loops
        };
        if repeat {
            tracing::debug!("[player] Looping ({} of {})", inner.current_loop + 1, inner.loops);
            if self.pipeline.set_position(Duration::ZERO) {
                inner.set_position(Duration::ZERO);
            }
            return;
        }
        self.stop_or_eos(inner, true);
    }

    fn on_pipeline_state(&self, inner: &mut PlayerInner, current: ElementState) {
        match current {
            ElementState::Paused if inner.prerolling => self.on_preroll_complete(inner),
            ElementState::Playing if !inner.prerolling => {
                if !inner.can_track_progress {
                    inner.set_buffer_progress(100);
                }
                if matches!(inner.status, MediaStatus::Loaded | MediaStatus::Buffering)
                    && inner.state == PlaybackState::Playing
                {
                    let status = inner.buffered_status(self.config.buffered_threshold_percent);
                    inner.set_status(status);
                }
            }
            _ => {}
        }
    }

    fn on_preroll_complete(&self, inner: &mut PlayerInner) {
        inner.prerolling = false;
        tracing::debug!("[player] Preroll of '{}' complete", inner.source);

        self.refresh_duration(inner);
        let url = inner.source.clone();
        let mut changed = inner.metadata.insert(MetaDataKey::Url, url.as_str());
        if inner.topology.is_some() {
            changed |= self.parse_topology(inner);
        }
        changed |= self.update_track_metadata(inner);
        if changed {
            inner.emit(PlayerEvent::MetaDataChanged);
        }

        let seekable = self.pipeline.can_seek();
        inner.set_seekable(seekable);
        inner.emit(PlayerEvent::TracksChanged);
        inner.set_status(MediaStatus::Loaded);

        match inner.state {
            PlaybackState::Playing => {
                if let Some(rate) = inner.pending_rate.take() {
                    self.pipeline.set_playback_rate(rate, true);
                    inner.pending_flush_on_play = false;
                } else if inner.pending_flush_on_play {
                    inner.pending_flush_on_play = false;
                    self.pipeline.flush();
                }
                let status = inner.buffered_status(self.config.buffered_threshold_percent);
                inner.set_status(status);
            }
            PlaybackState::Paused => {
                let status = inner.buffered_status(self.config.buffered_threshold_percent);
                inner.set_status(status);
            }
            PlaybackState::Stopped => {}
        }
        self.pipeline.dump_graph("preroll");
    }

    fn apply_topology(&self, inner: &mut PlayerInner) {
        if self.parse_topology(inner) {
            inner.emit(PlayerEvent::MetaDataChanged);
        }
    }

    fn parse_topology(&self, inner: &mut PlayerInner) -> bool {
        match inner.topology.take() {
            Some(topology) => {
                let changed = inner.metadata.apply_topology(&topology);
                inner.topology = Some(topology);
                changed
            }
            None => false,
        }
    }

    /// Copy codec and video format of the active tracks into the metadata
    /// map.
    fn update_track_metadata(&self, inner: &mut PlayerInner) -> bool {
        let active: Vec<(MediaKind, PadId)> = MediaKind::ALL
            .iter()
            .filter_map(|kind| {
                inner
                    .selector(*kind)
                    .active_input_pad()
                    .map(|pad| (*kind, pad))
            })
            .collect();
        let tracks: Vec<MetaData> = self.pipeline.with_graph(|graph| {
            active
                .iter()
                .map(|(kind, pad)| track_metadata(graph, *kind, *pad))
                .collect()
        });

        let mut changed = false;
        for track in &tracks {
            for (key, value) in track.iter() {
                if *key != MetaDataKey::Language && *key != MetaDataKey::Title {
                    changed |= inner.metadata.insert(*key, value.clone());
                }
            }
        }
        changed
    }

    fn refresh_track_metadata(&self, inner: &mut PlayerInner) {
        if self.update_track_metadata(inner) {
            inner.emit(PlayerEvent::MetaDataChanged);
        }
    }

    fn on_error(&self, inner: &mut PlayerInner, message: &Message, error: &EngineError) {
        if error.matches(ErrorDomain::Resource, ErrorCode::NotFound) {
            if inner.not_found_reported {
                tracing::debug!("[player] Repeated not-found error suppressed");
                return;
            }
            inner.not_found_reported = true;
        }

        let reported = classify_error(error);
        tracing::error!(
            "[player] Error from {}: {} ({})",
            message.source().name,
            error,
            error.debug.as_deref().unwrap_or("no details")
        );
        self.pipeline.dump_graph("error");

        inner.error = reported.clone();
        inner.emit(PlayerEvent::ErrorOccurred(reported));
        inner.prerolling = false;
        inner.stalled_since = None;
        inner.set_state(PlaybackState::Stopped);
        inner.set_status(MediaStatus::Invalid);
        self.pipeline.set_state(ElementState::Null);
    }

    fn on_pad_added(&self, inner: &mut PlayerInner, pad: PadId) {
        let Some(decoder) = inner.decoder else {
            return;
        };
        let kind = self.pipeline.with_graph(|graph| {
            graph
                .pad(pad)
                .filter(|p| p.element() == decoder)
                .map(|p| (p.name().to_string(), p.media_kind()))
        });
        let Some((name, kind)) = kind else {
            tracing::trace!("[player] Ignoring {} outside the decoder", pad);
            return;
        };
        let Some(kind) = kind else {
            tracing::debug!("[player] Decoder pad '{}' has unsupported caps", name);
            return;
        };

        let registry = self.pipeline.registry();
        let added = {
            let _scope = self.pipeline.config_scope();
            let selector = inner.selector_mut(kind);
            self.pipeline.with_graph(|graph| {
                selector
                    .add_track(registry, graph, pad)
                    .map(|index| (index, selector.tracks()[index]))
            })
        };
        let (index, input) = match added {
            Ok(added) => added,
            Err(e) => {
                tracing::warn!("[player] Could not add {} track '{}': {}", kind, name, e);
                return;
            }
        };
        inner.decoder_outputs.insert(pad, (kind, input));
        tracing::debug!("[player] Decoder pad '{}' is {} track {}", name, kind, index);

        if index == 0 {
            inner.set_available(kind, true);
        }
        if !inner.prerolling {
            inner.emit(PlayerEvent::TracksChanged);
            self.refresh_track_metadata(inner);
        }
    }

    fn on_pad_removed(&self, inner: &mut PlayerInner, pad: PadId) {
        let Some((kind, input)) = inner.decoder_outputs.remove(&pad) else {
            return;
        };
        {
            let _scope = self.pipeline.config_scope();
            let selector = inner.selector_mut(kind);
            self.pipeline
                .with_graph(|graph| selector.remove_input_pad(graph, input));
        }
        tracing::debug!("[player] {} track on {} removed", kind, pad);

        let selector = inner.selector(kind);
        let available = selector.active_input_pad().is_some();
        inner.set_available(kind, available);
        inner.emit(PlayerEvent::TracksChanged);
    }
}

fn sink_pad(graph: &Graph, element: ElementId) -> Result<PadId> {
    graph
        .static_pad(element, "sink")
        .ok_or_else(|| StreamError::PadNotFound(format!("{} has no sink pad", element)))
}

/// Metadata of the track feeding selector input `input`, read from the
/// upstream decoder pad.
fn track_metadata(graph: &Graph, kind: MediaKind, input: PadId) -> MetaData {
    let upstream = graph
        .pad(input)
        .and_then(|p| p.peer())
        .and_then(|peer| graph.pad(peer))
        .or_else(|| graph.pad(input));
    match upstream {
        Some(pad) => MetaData::for_track(kind, pad.caps(), pad.tags()),
        None => MetaData::new(),
    }
}

fn classify_error(error: &EngineError) -> PlayerError {
    match error.domain {
        ErrorDomain::Stream if error.code == ErrorCode::CodecNotFound => PlayerError::new(
            PlayerErrorKind::FormatError,
            format!("Cannot play stream: {}", error.message),
        ),
        ErrorDomain::Stream => PlayerError::new(PlayerErrorKind::FormatError, error.message.clone()),
        _ => PlayerError::new(PlayerErrorKind::ResourceError, error.message.clone()),
    }
}
