// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

pub mod bus;
pub mod config;
pub mod device;
pub mod engine;
pub mod error;
pub mod graph;
pub mod logging;
pub mod pipeline;
pub mod player;

pub use bus::*;
pub use config::{DispatchConfig, LoggingConfig, PlayerConfig, RtspConfig};
pub use device::*;
pub use engine::*;
pub use error::*;
pub use graph::*;
pub use logging::init_logging;
pub use pipeline::*;
pub use player::*;
