// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::seek::{SeekFlags, SeekRequest};
use super::state::{ElementState, StateChangeReturn, StateSnapshot};
use crate::core::bus::{MessageBus, MessageSource};
use crate::core::engine::{Engine, EngineBinding};
use crate::core::error::{Result, StreamError};
use crate::core::graph::{factories, ElementId, ElementRegistry, Graph};

/// Interval between polls in [`Pipeline::query_position_and_duration`].
const QUERY_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Reentrant configuration bracket state.
#[derive(Debug, Default)]
struct ConfigBracket {
    depth: u32,
    /// State to restore when the outermost bracket ends.
    saved_state: Option<ElementState>,
    /// Seek requested inside the bracket. Later requests replace earlier ones.
    pending_seek: Option<(Duration, f64)>,
    pending_flush: bool,
}

/// Owns the media graph, its message bus and the engine driving both.
///
/// The bus is created with the pipeline and closed when it is dropped, after
/// a blocking transition to `Null`.
pub struct Pipeline {
    id: ElementId,
    name: String,
    graph: Arc<Mutex<Graph>>,
    bus: MessageBus,
    engine: Arc<dyn Engine>,
    bracket: Mutex<ConfigBracket>,
    cached_position: Mutex<Duration>,
    rate: Mutex<f64>,
    state_timeout: Duration,
}

impl Pipeline {
    pub fn new(name: &str, engine: Arc<dyn Engine>, state_timeout: Duration) -> Result<Self> {
        let mut graph = Graph::new();
        let id = engine
            .registry()
            .create(&mut graph, factories::PIPELINE, Some(name))?;
        let graph = Arc::new(Mutex::new(graph));
        let bus = MessageBus::new();

        engine.bind(EngineBinding {
            pipeline: id,
            pipeline_name: name.to_string(),
            graph: Arc::clone(&graph),
            bus: bus.clone(),
        })?;

        tracing::debug!(
            "[pipeline] Created '{}' on the {} engine",
            name,
            engine.name()
        );

        Ok(Self {
            id,
            name: name.to_string(),
            graph,
            bus,
            engine,
            bracket: Mutex::new(ConfigBracket::default()),
            cached_position: Mutex::new(Duration::ZERO),
            rate: Mutex::new(1.0),
            state_timeout,
        })
    }

    pub fn id(&self) -> ElementId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    pub fn registry(&self) -> &ElementRegistry {
        self.engine.registry()
    }

    pub fn engine(&self) -> &Arc<dyn Engine> {
        &self.engine
    }

    pub fn message_source(&self) -> MessageSource {
        MessageSource::new(self.id, self.name.clone())
    }

    /// Run `f` with exclusive access to the graph.
    ///
    /// Must not call back into the pipeline's state, seek or query methods:
    /// the engine takes the graph lock after its own.
    pub fn with_graph<R>(&self, f: impl FnOnce(&mut Graph) -> R) -> R {
        let mut graph = self.graph.lock();
        f(&mut graph)
    }

    /// Instantiate `factory` as a child of the pipeline.
    pub fn add_element(&self, factory: &str, name: Option<&str>) -> Result<ElementId> {
        let registry = self.engine.registry();
        self.with_graph(|graph| registry.create(graph, factory, name))
    }

    pub fn remove_element(&self, id: ElementId) -> Result<()> {
        if id == self.id {
            return Err(StreamError::Graph("cannot remove the pipeline root".into()));
        }
        self.with_graph(|graph| graph.remove_element(id)).map(|_| ())
    }

    // ---------------------------------------------------------------------
    // State
    // ---------------------------------------------------------------------

    /// Request a state change without waiting for it to complete.
    pub fn set_state(&self, target: ElementState) -> StateChangeReturn {
        let result = self.engine.set_state(target);
        match result {
            StateChangeReturn::Failure => {
                tracing::warn!("[pipeline] Failed to change '{}' to {}", self.name, target);
                self.dump_graph("state-change-failure");
            }
            _ => tracing::trace!("[pipeline] set_state({}) -> {:?}", target, result),
        }
        result
    }

    /// Change state and wait (bounded by the configured timeout) for the
    /// transition to complete.
    ///
    /// Never call this from the dispatch context.
    pub fn set_state_sync(&self, target: ElementState) -> Result<()> {
        match self.set_state(target) {
            StateChangeReturn::Failure => Err(StreamError::StateChange { target }),
            StateChangeReturn::Success | StateChangeReturn::NoPreroll => Ok(()),
            StateChangeReturn::Async => {
                let snapshot = self.finish_state_change(self.state_timeout);
                if snapshot.result == StateChangeReturn::Failure
                    || snapshot.pending != ElementState::VoidPending
                {
                    tracing::warn!(
                        "[pipeline] Transition of '{}' to {} did not complete (now {}, pending {})",
                        self.name,
                        target,
                        snapshot.current,
                        snapshot.pending
                    );
                    return Err(StreamError::StateChange { target });
                }
                Ok(())
            }
        }
    }

    /// Wait up to `timeout` for an in-flight async transition.
    pub fn finish_state_change(&self, timeout: Duration) -> StateSnapshot {
        self.engine.get_state(timeout)
    }

    /// Whether an async transition completed within `timeout`.
    pub fn wait_for_async_state_change_complete(&self, timeout: Duration) -> bool {
        let snapshot = self.finish_state_change(timeout);
        snapshot.pending == ElementState::VoidPending && !snapshot.result.is_failure()
    }

    /// Current (achieved) state.
    pub fn state(&self) -> ElementState {
        self.engine.get_state(Duration::ZERO).current
    }

    /// Target of an in-flight transition, or the current state when settled.
    pub fn target_state(&self) -> ElementState {
        let snapshot = self.engine.get_state(Duration::ZERO);
        if snapshot.pending == ElementState::VoidPending {
            snapshot.current
        } else {
            snapshot.pending
        }
    }

    // ---------------------------------------------------------------------
    // Configuration bracket
    // ---------------------------------------------------------------------

    /// Enter a configuration bracket. The outermost bracket pauses a
    /// playing pipeline so the graph can be rewired.
    pub fn begin_config(&self) {
        let mut bracket = self.bracket.lock();
        bracket.depth += 1;
        if bracket.depth > 1 {
            return;
        }

        let snapshot = self.engine.get_state(Duration::ZERO);
        if snapshot.pending == ElementState::Playing {
            // Still prerolling towards Playing: retarget without blocking.
            self.set_state(ElementState::Paused);
            bracket.saved_state = Some(ElementState::Playing);
        } else if snapshot.current == ElementState::Playing
            && snapshot.pending == ElementState::VoidPending
        {
            if let Err(e) = self.set_state_sync(ElementState::Paused) {
                tracing::warn!("[pipeline] Could not pause for reconfiguration: {}", e);
            }
            bracket.saved_state = Some(ElementState::Playing);
        }
        tracing::trace!(
            "[pipeline] Begin config (saved {:?})",
            bracket.saved_state
        );
    }

    /// Leave a configuration bracket. The outermost bracket restores the
    /// saved state, then applies any seek or flush requested inside it.
    pub fn end_config(&self) {
        let (saved, seek, flush) = {
            let mut bracket = self.bracket.lock();
            if bracket.depth == 0 {
                debug_assert!(false, "end_config without begin_config");
                tracing::warn!("[pipeline] Unbalanced end_config ignored");
                return;
            }
            bracket.depth -= 1;
            if bracket.depth > 0 {
                return;
            }
            (
                bracket.saved_state.take(),
                bracket.pending_seek.take(),
                std::mem::take(&mut bracket.pending_flush),
            )
        };

        if let Some(state) = saved {
            self.set_state(state);
        }
        if let Some((position, rate)) = seek {
            self.do_seek(position, rate);
        } else if flush {
            let position = self.position();
            self.do_seek(position, self.playback_rate());
        }
        tracing::trace!("[pipeline] End config");
    }

    /// Scoped configuration bracket, ended when the guard drops.
    pub fn config_scope(&self) -> ConfigGuard<'_> {
        self.begin_config();
        ConfigGuard { pipeline: self }
    }

    pub fn in_config(&self) -> bool {
        self.bracket.lock().depth > 0
    }

    // ---------------------------------------------------------------------
    // Position, seeking and rate
    // ---------------------------------------------------------------------

    /// Flushing seek to `position` at `rate`. Inside a configuration bracket
    /// the seek is deferred to the end of the outermost bracket.
    pub fn seek(&self, position: Duration, rate: f64) -> bool {
        {
            let mut bracket = self.bracket.lock();
            if bracket.depth > 0 {
                bracket.pending_seek = Some((position, rate));
                bracket.pending_flush = false;
                *self.cached_position.lock() = position;
                return true;
            }
        }
        self.do_seek(position, rate)
    }

    fn do_seek(&self, position: Duration, rate: f64) -> bool {
        let request = SeekRequest::segment(position, rate, SeekFlags::FLUSH | SeekFlags::ACCURATE);
        if !self.engine.seek(&request) {
            tracing::warn!(
                "[pipeline] Seek to {:?} at rate {} failed",
                position,
                rate
            );
            self.dump_graph("seek-failure");
            return false;
        }
        *self.cached_position.lock() = position;
        *self.rate.lock() = rate;
        true
    }

    pub fn set_position(&self, position: Duration) -> bool {
        self.seek(position, self.playback_rate())
    }

    /// Flush in-flight data by seeking to the current position. Requests
    /// inside a configuration bracket coalesce into one flush.
    pub fn flush(&self) {
        {
            let mut bracket = self.bracket.lock();
            if bracket.depth > 0 {
                if bracket.pending_seek.is_none() {
                    bracket.pending_flush = true;
                }
                return;
            }
        }
        let position = self.position();
        self.do_seek(position, self.playback_rate());
    }

    /// Change the playback rate. Uses an instant rate change when the engine
    /// supports it and `force_flush` is not set, a flushing seek otherwise.
    pub fn set_playback_rate(&self, rate: f64, force_flush: bool) -> bool {
        if rate == self.playback_rate() && !force_flush {
            return false;
        }

        if !force_flush && self.engine.supports_instant_rate_change() {
            if self.engine.seek(&SeekRequest::instant_rate(rate)) {
                *self.rate.lock() = rate;
                return true;
            }
            tracing::debug!("[pipeline] Instant rate change rejected, flushing instead");
        }

        let position = self.position();
        self.seek(position, rate)
    }

    pub fn playback_rate(&self) -> f64 {
        *self.rate.lock()
    }

    /// Forget the position and rate of the previous media. Call once the
    /// pipeline is quiescent, before loading something new.
    pub fn reset_position(&self) {
        *self.cached_position.lock() = Duration::ZERO;
        *self.rate.lock() = 1.0;
    }

    /// Current position. While a query cannot be answered (mid-transition)
    /// the last known position is returned.
    pub fn position(&self) -> Duration {
        let mut cached = self.cached_position.lock();
        if let Some(position) = self.engine.query_position() {
            *cached = position;
        }
        *cached
    }

    pub fn duration(&self) -> Option<Duration> {
        self.engine.query_duration()
    }

    pub fn can_seek(&self) -> bool {
        self.engine.query_seekable().unwrap_or(false)
    }

    /// Poll until both position and duration are known, or `timeout` elapses.
    pub fn query_position_and_duration(&self, timeout: Duration) -> Option<(Duration, Duration)> {
        let deadline = Instant::now() + timeout;
        loop {
            if let (Some(position), Some(duration)) =
                (self.engine.query_position(), self.engine.query_duration())
            {
                return Some((position, duration));
            }
            if Instant::now() >= deadline {
                return None;
            }
            std::thread::sleep(QUERY_POLL_INTERVAL);
        }
    }

    /// Log the graph topology as JSON at debug level.
    pub fn dump_graph(&self, reason: &str) {
        if tracing::enabled!(tracing::Level::DEBUG) {
            let json = self.graph.lock().to_json();
            tracing::debug!("[pipeline] Graph dump ({}): {}", reason, json);
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if let Err(e) = self.set_state_sync(ElementState::Null) {
            tracing::warn!("[pipeline] Teardown of '{}': {}", self.name, e);
        }
        self.bus.close();
        tracing::debug!("[pipeline] Destroyed '{}'", self.name);
    }
}

/// Ends a configuration bracket on drop.
pub struct ConfigGuard<'a> {
    pipeline: &'a Pipeline,
}

impl Drop for ConfigGuard<'_> {
    fn drop(&mut self) {
        self.pipeline.end_config();
    }
}
