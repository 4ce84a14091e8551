// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

// Suppress pedantic clippy warnings that are intentional design choices
#![allow(clippy::type_complexity)] // Complex types are clear in context
#![allow(clippy::new_without_default)] // Handles are created explicitly

//! Pipeline control and playback state machine on top of a node/pad
//! streaming engine.
//!
//! The crate owns pipeline lifecycle transitions, dynamic track discovery and
//! selection, asynchronous message dispatch from the engine's bus and the
//! derived observables (position, duration, buffering, metadata,
//! seekability). Decoding and demuxing are delegated to an [`core::Engine`];
//! [`core::SimulatedEngine`] is an in-process engine driven by a media
//! catalog.

pub mod core;

pub use crate::core::*;
