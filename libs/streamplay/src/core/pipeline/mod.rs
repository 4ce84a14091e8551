// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

#[allow(clippy::module_inception)]
mod pipeline;
mod seek;
mod state;

pub use pipeline::{ConfigGuard, Pipeline};
pub use seek::{SeekFlags, SeekRequest};
pub use state::{ElementState, StateChangeReturn, StateSnapshot};
