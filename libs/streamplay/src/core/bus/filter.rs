// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use super::message::Message;

/// Outcome of offering a message to a filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterResult {
    /// Not interested; offer the message to the next filter.
    Pass,
    /// Accepted; no later filter sees the message.
    Consumed,
}

/// Privileged filter, run synchronously on the posting thread.
///
/// Must not block and must not touch the graph: the poster may be an engine
/// streaming thread that holds engine locks.
pub trait SyncMessageFilter: Send + Sync {
    fn on_sync_message(&self, message: &Message) -> FilterResult;
}

/// Generic filter, run on the dispatch context.
pub trait BusMessageFilter: Send {
    fn on_message(&mut self, message: &Message) -> FilterResult;
}

impl<F> SyncMessageFilter for F
where
    F: Fn(&Message) -> FilterResult + Send + Sync,
{
    fn on_sync_message(&self, message: &Message) -> FilterResult {
        self(message)
    }
}

impl<F> BusMessageFilter for F
where
    F: FnMut(&Message) -> FilterResult + Send,
{
    fn on_message(&mut self, message: &Message) -> FilterResult {
        self(message)
    }
}
