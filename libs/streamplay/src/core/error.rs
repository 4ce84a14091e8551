// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use thiserror::Error;

use super::pipeline::ElementState;

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Element factory '{0}' is not available")]
    MissingElement(String),

    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("Pad not found: {0}")]
    PadNotFound(String),

    #[error("Link error: {0}")]
    Link(String),

    #[error("Stream graph error: {0}")]
    Graph(String),

    #[error("State change to {target} failed")]
    StateChange { target: ElementState },

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Message bus is closed")]
    BusClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, StreamError>;
