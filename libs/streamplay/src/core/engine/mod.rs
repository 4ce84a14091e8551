// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Seam to the streaming engine that moves data through the graph.

mod catalog;
mod simulated;

pub use catalog::{MediaCatalog, MediaDescription, StreamDescription};
pub use simulated::{SimulatedEngine, SimulationOptions, DISPLAY_CONTEXT_TYPE};

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use crate::core::bus::MessageBus;
use crate::core::error::Result;
use crate::core::graph::{ElementId, ElementRegistry, Graph};
use crate::core::pipeline::{ElementState, SeekRequest, StateChangeReturn, StateSnapshot};

/// What an engine drives: the pipeline root, its graph and its bus.
#[derive(Clone)]
pub struct EngineBinding {
    pub pipeline: ElementId,
    pub pipeline_name: String,
    pub graph: Arc<Mutex<Graph>>,
    pub bus: MessageBus,
}

/// A streaming engine bound to exactly one pipeline.
///
/// Implementations post their notifications on the bound [`MessageBus`],
/// possibly from their own threads. Lock order for implementations: engine
/// state first, then the graph.
pub trait Engine: Send + Sync {
    fn name(&self) -> &str;

    /// Factories this engine can instantiate.
    fn registry(&self) -> &ElementRegistry;

    fn bind(&self, binding: EngineBinding) -> Result<()>;

    /// Request a pipeline state change. Never blocks on preroll.
    fn set_state(&self, target: ElementState) -> StateChangeReturn;

    /// Wait up to `timeout` for a pending async transition to settle.
    fn get_state(&self, timeout: Duration) -> StateSnapshot;

    fn query_position(&self) -> Option<Duration>;

    /// `None` while unknown (not prerolled, or a live source).
    fn query_duration(&self) -> Option<Duration>;

    /// `None` when the query cannot be answered yet.
    fn query_seekable(&self) -> Option<bool>;

    fn seek(&self, request: &SeekRequest) -> bool;

    fn supports_instant_rate_change(&self) -> bool;
}
