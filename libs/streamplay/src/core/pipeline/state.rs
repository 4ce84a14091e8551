// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Element state machine types.
//!
//! ```text
//! Null ⇄ Ready ⇄ Paused ⇄ Playing
//! ```
//!
//! Transitions always walk through the intermediate states. A change to
//! Paused from below requires preroll and usually completes asynchronously.

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Default)]
pub enum ElementState {
    /// No pending transition. Only appears as the `pending` field of a
    /// state-changed message.
    VoidPending,
    /// Quiescent: no resources held, no data flowing.
    #[default]
    Null,
    /// Resources allocated, no data flowing.
    Ready,
    /// Prerolled: data flows up to the sinks, clock stopped.
    Paused,
    /// Clock running.
    Playing,
}

impl ElementState {
    /// Whether data may be flowing through the graph.
    pub fn is_flowing(&self) -> bool {
        matches!(self, Self::Paused | Self::Playing)
    }

    /// Next state on the way from `self` towards `target`.
    pub fn step_towards(self, target: ElementState) -> ElementState {
        use ElementState::*;
        if self == target || target == VoidPending {
            return self;
        }
        match (self, self < target) {
            (VoidPending, _) => target,
            (Null, true) => Ready,
            (Ready, true) => Paused,
            (Paused, true) => Playing,
            (Playing, false) => Paused,
            (Paused, false) => Ready,
            (Ready, false) => Null,
            (s, _) => s,
        }
    }
}

impl fmt::Display for ElementState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::VoidPending => write!(f, "VoidPending"),
            Self::Null => write!(f, "Null"),
            Self::Ready => write!(f, "Ready"),
            Self::Paused => write!(f, "Paused"),
            Self::Playing => write!(f, "Playing"),
        }
    }
}

/// Result of requesting a state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StateChangeReturn {
    /// The transition completed synchronously.
    Success,
    /// The transition completes later; a state-changed message follows.
    Async,
    /// The transition is complete but the element produces no preroll data (live sources).
    NoPreroll,
    Failure,
}

impl StateChangeReturn {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure)
    }
}

/// Answer of a state query: where an element is, and where it is heading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateSnapshot {
    pub result: StateChangeReturn,
    pub current: ElementState,
    pub pending: ElementState,
}
