// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Message channel between the engine and the player.
//!
//! The engine posts [`Message`]s from its own threads. Privileged sync
//! filters see each message on the posting thread and may consume it; every
//! other message is queued and later handed to the generic filter chain on
//! the single dispatch context (see [`Dispatcher`]).

#[allow(clippy::module_inception)]
mod bus;
mod dispatch;
mod filter;
mod message;

pub use bus::{FilterId, MessageBus};
pub use dispatch::{DispatchMode, Dispatcher};
pub use filter::{BusMessageFilter, FilterResult, SyncMessageFilter};
pub use message::{
    ContextSlot, EngineError, ErrorCode, ErrorDomain, Message, MessageSource, MessageType,
    MessageView,
};
