// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::filter::{BusMessageFilter, FilterResult, SyncMessageFilter};
use super::message::{Message, MessageSource, MessageType, MessageView};

/// Handle returned when installing a filter, used to remove it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FilterId(u64);

type SyncFilterEntry = (FilterId, Arc<dyn SyncMessageFilter>);
type BusFilterEntry = (FilterId, Arc<Mutex<dyn BusMessageFilter>>);

struct BusInner {
    queue: Mutex<VecDeque<Message>>,
    queue_cond: Condvar,
    sync_filters: Mutex<Vec<SyncFilterEntry>>,
    filters: Mutex<Vec<BusFilterEntry>>,
    next_seqnum: AtomicU64,
    next_filter: AtomicU64,
    flushing: AtomicBool,
    closed: AtomicBool,
    watch_tx: Sender<()>,
    watch_rx: Receiver<()>,
}

/// Thread-safe message channel owned by a pipeline.
///
/// Cloning yields another handle to the same channel.
#[derive(Clone)]
pub struct MessageBus {
    inner: Arc<BusInner>,
}

impl MessageBus {
    pub fn new() -> Self {
        // Capacity 1: the watch only signals "something is pending".
        let (watch_tx, watch_rx) = crossbeam_channel::bounded(1);
        Self {
            inner: Arc::new(BusInner {
                queue: Mutex::new(VecDeque::new()),
                queue_cond: Condvar::new(),
                sync_filters: Mutex::new(Vec::new()),
                filters: Mutex::new(Vec::new()),
                next_seqnum: AtomicU64::new(1),
                next_filter: AtomicU64::new(1),
                flushing: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                watch_tx,
                watch_rx,
            }),
        }
    }

    /// Post a message. Called by the engine, possibly from its own threads.
    ///
    /// Returns `false` when the message was dropped because the bus is
    /// flushing or closed.
    pub fn post(&self, source: MessageSource, view: MessageView) -> bool {
        if self.inner.closed.load(Ordering::Acquire) {
            tracing::trace!("[bus] Dropping {:?} posted after close", view.message_type());
            return false;
        }
        if self.inner.flushing.load(Ordering::Acquire) {
            tracing::trace!("[bus] Dropping {:?} while flushing", view.message_type());
            return false;
        }

        let seqnum = self.inner.next_seqnum.fetch_add(1, Ordering::AcqRel);
        let message = Message::new(seqnum, source, view);

        // Snapshot so filters may install/remove filters without deadlocking.
        let sync_filters: Vec<Arc<dyn SyncMessageFilter>> = self
            .inner
            .sync_filters
            .lock()
            .iter()
            .map(|(_, f)| Arc::clone(f))
            .collect();
        for filter in sync_filters {
            if filter.on_sync_message(&message) == FilterResult::Consumed {
                tracing::trace!("[bus] {} consumed by sync filter", message);
                return true;
            }
        }

        self.inner.queue.lock().push_back(message);
        self.inner.queue_cond.notify_all();
        // Full means a wakeup is already pending.
        let _ = self.inner.watch_tx.try_send(());
        true
    }

    /// Remove and return the first queued message matching `mask`.
    /// Non-matching messages stay queued in order.
    pub fn try_pop(&self, mask: MessageType) -> Option<Message> {
        let mut queue = self.inner.queue.lock();
        let index = queue.iter().position(|m| m.is(mask))?;
        queue.remove(index)
    }

    /// Like [`try_pop`](Self::try_pop) but waits up to `timeout` for a
    /// matching message.
    pub fn pop_blocking(&self, mask: MessageType, timeout: Duration) -> Option<Message> {
        let deadline = Instant::now() + timeout;
        let mut queue = self.inner.queue.lock();
        loop {
            if let Some(index) = queue.iter().position(|m| m.is(mask)) {
                return queue.remove(index);
            }
            if self.inner.closed.load(Ordering::Acquire) {
                return None;
            }
            if self
                .inner
                .queue_cond
                .wait_until(&mut queue, deadline)
                .timed_out()
            {
                let index = queue.iter().position(|m| m.is(mask))?;
                return queue.remove(index);
            }
        }
    }

    pub fn add_sync_filter(&self, filter: Arc<dyn SyncMessageFilter>) -> FilterId {
        let id = self.next_filter_id();
        self.inner.sync_filters.lock().push((id, filter));
        id
    }

    pub fn remove_sync_filter(&self, id: FilterId) -> bool {
        let mut filters = self.inner.sync_filters.lock();
        let before = filters.len();
        filters.retain(|(fid, _)| *fid != id);
        filters.len() != before
    }

    pub fn add_filter(&self, filter: Arc<Mutex<dyn BusMessageFilter>>) -> FilterId {
        let id = self.next_filter_id();
        self.inner.filters.lock().push((id, filter));
        id
    }

    pub fn remove_filter(&self, id: FilterId) -> bool {
        let mut filters = self.inner.filters.lock();
        let before = filters.len();
        filters.retain(|(fid, _)| *fid != id);
        filters.len() != before
    }

    /// Sequence number the next posted message will carry. Every message
    /// already posted has a lower one.
    pub fn next_seqnum(&self) -> u64 {
        self.inner.next_seqnum.load(Ordering::Acquire)
    }

    fn next_filter_id(&self) -> FilterId {
        FilterId(self.inner.next_filter.fetch_add(1, Ordering::Relaxed))
    }

    /// Deliver every queued message to the generic filter chain, in post
    /// order. Must only be called from the dispatch context.
    ///
    /// Returns the number of messages dispatched.
    pub fn dispatch_pending(&self) -> usize {
        if self.inner.closed.load(Ordering::Acquire) {
            debug_assert!(false, "dispatch on a closed message bus");
            tracing::warn!("[bus] Dispatch on a closed bus ignored");
            return 0;
        }

        let mut dispatched = 0;
        loop {
            // Release the queue lock before running filters; they may post.
            let Some(message) = self.inner.queue.lock().pop_front() else {
                break;
            };
            self.dispatch_one(&message);
            dispatched += 1;
        }
        dispatched
    }

    fn dispatch_one(&self, message: &Message) {
        let filters: Vec<Arc<Mutex<dyn BusMessageFilter>>> = self
            .inner
            .filters
            .lock()
            .iter()
            .map(|(_, f)| Arc::clone(f))
            .collect();

        for filter in filters {
            if filter.lock().on_message(message) == FilterResult::Consumed {
                return;
            }
        }
        tracing::trace!("[bus] {} not handled by any filter", message);
    }

    /// Remove and return every queued message without dispatching.
    pub fn drain_all(&self) -> Vec<Message> {
        let drained: Vec<Message> = self.inner.queue.lock().drain(..).collect();
        while self.inner.watch_rx.try_recv().is_ok() {}
        if !drained.is_empty() {
            tracing::debug!("[bus] Drained {} pending messages", drained.len());
        }
        drained
    }

    /// While flushing, posts are dropped and the queue is kept empty.
    pub fn set_flushing(&self, flushing: bool) {
        self.inner.flushing.store(flushing, Ordering::Release);
        if flushing {
            self.drain_all();
        }
    }

    pub fn is_flushing(&self) -> bool {
        self.inner.flushing.load(Ordering::Acquire)
    }

    /// Close the bus: pending messages are discarded, later posts dropped and
    /// blocked poppers released.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.drain_all();
        self.inner.sync_filters.lock().clear();
        self.inner.filters.lock().clear();
        self.inner.queue_cond.notify_all();
        tracing::debug!("[bus] Closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    pub fn pending(&self) -> usize {
        self.inner.queue.lock().len()
    }

    /// Wakeup channel that becomes ready whenever a message is queued.
    /// For integration with a host event loop.
    pub fn watch(&self) -> Receiver<()> {
        self.inner.watch_rx.clone()
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::graph::ElementId;
    use std::sync::atomic::AtomicUsize;

    fn source() -> MessageSource {
        MessageSource::new(ElementId(1), "pipeline_0")
    }

    #[test]
    fn test_try_pop_keeps_non_matching() {
        let bus = MessageBus::new();
        bus.post(source(), MessageView::Buffering { percent: 10 });
        bus.post(source(), MessageView::Eos);
        bus.post(source(), MessageView::Buffering { percent: 20 });

        let eos = bus.try_pop(MessageType::EOS).unwrap();
        assert_eq!(eos.message_type(), MessageType::EOS);
        assert!(bus.try_pop(MessageType::EOS).is_none());
        assert_eq!(bus.pending(), 2);

        let first = bus.try_pop(MessageType::ANY).unwrap();
        assert_eq!(first.view(), &MessageView::Buffering { percent: 10 });
    }

    #[test]
    fn test_seqnums_increase() {
        let bus = MessageBus::new();
        bus.post(source(), MessageView::Eos);
        bus.post(source(), MessageView::Eos);
        let a = bus.try_pop(MessageType::ANY).unwrap();
        let b = bus.try_pop(MessageType::ANY).unwrap();
        assert!(a.seqnum() < b.seqnum());
    }

    #[test]
    fn test_pop_blocking_times_out() {
        let bus = MessageBus::new();
        bus.post(source(), MessageView::Eos);
        let start = Instant::now();
        assert!(bus
            .pop_blocking(MessageType::ERROR, Duration::from_millis(30))
            .is_none());
        assert!(start.elapsed() >= Duration::from_millis(30));
        assert_eq!(bus.pending(), 1);
    }

    #[test]
    fn test_pop_blocking_wakes_on_post() {
        let bus = MessageBus::new();
        let poster = bus.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            poster.post(source(), MessageView::AsyncDone);
        });
        let msg = bus
            .pop_blocking(MessageType::ASYNC_DONE, Duration::from_secs(2))
            .unwrap();
        assert_eq!(msg.message_type(), MessageType::ASYNC_DONE);
        handle.join().unwrap();
    }

    #[test]
    fn test_sync_filter_consumes_before_queue() {
        let bus = MessageBus::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = Arc::clone(&seen);
        bus.add_sync_filter(Arc::new(move |m: &Message| {
            if m.is(MessageType::NEED_CONTEXT) {
                seen_clone.fetch_add(1, Ordering::SeqCst);
                FilterResult::Consumed
            } else {
                FilterResult::Pass
            }
        }));

        bus.post(
            source(),
            MessageView::NeedContext {
                context_type: "gl-display".into(),
                reply: Default::default(),
            },
        );
        bus.post(source(), MessageView::Eos);

        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(bus.pending(), 1);
        assert!(bus.try_pop(MessageType::NEED_CONTEXT).is_none());
    }

    #[test]
    fn test_first_accepting_filter_wins() {
        let bus = MessageBus::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let f = Arc::clone(&first);
        bus.add_filter(Arc::new(Mutex::new(move |m: &Message| {
            f.fetch_add(1, Ordering::SeqCst);
            if m.is(MessageType::EOS) {
                FilterResult::Consumed
            } else {
                FilterResult::Pass
            }
        })));
        let s = Arc::clone(&second);
        bus.add_filter(Arc::new(Mutex::new(move |_: &Message| {
            s.fetch_add(1, Ordering::SeqCst);
            FilterResult::Consumed
        })));

        bus.post(source(), MessageView::Eos);
        bus.post(source(), MessageView::Latency);
        assert_eq!(bus.dispatch_pending(), 2);

        assert_eq!(first.load(Ordering::SeqCst), 2);
        // Only the latency message reached the second filter.
        assert_eq!(second.load(Ordering::SeqCst), 1);
        assert_eq!(bus.pending(), 0);
    }

    #[test]
    fn test_remove_filter() {
        let bus = MessageBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let id = bus.add_filter(Arc::new(Mutex::new(move |_: &Message| {
            c.fetch_add(1, Ordering::SeqCst);
            FilterResult::Consumed
        })));
        assert!(bus.remove_filter(id));
        assert!(!bus.remove_filter(id));

        bus.post(source(), MessageView::Eos);
        bus.dispatch_pending();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_watch_signals_pending_messages() {
        let bus = MessageBus::new();
        let watch = bus.watch();
        assert!(watch.try_recv().is_err());
        bus.post(source(), MessageView::Eos);
        bus.post(source(), MessageView::Eos);
        assert!(watch.try_recv().is_ok());
        // Coalesced into a single wakeup.
        assert!(watch.try_recv().is_err());
    }

    #[test]
    fn test_drain_all_and_flushing() {
        let bus = MessageBus::new();
        bus.post(source(), MessageView::Eos);
        bus.post(source(), MessageView::AsyncDone);
        let drained = bus.drain_all();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].message_type(), MessageType::EOS);

        bus.set_flushing(true);
        assert!(!bus.post(source(), MessageView::Eos));
        assert_eq!(bus.pending(), 0);
        bus.set_flushing(false);
        assert!(bus.post(source(), MessageView::Eos));
    }

    #[test]
    fn test_close_drops_posts() {
        let bus = MessageBus::new();
        bus.post(source(), MessageView::Eos);
        bus.close();
        assert!(bus.is_closed());
        assert_eq!(bus.pending(), 0);
        assert!(!bus.post(source(), MessageView::Eos));
        assert!(bus
            .pop_blocking(MessageType::ANY, Duration::from_secs(1))
            .is_none());
    }

    #[test]
    fn test_next_seqnum_is_past_posted_messages() {
        let bus = MessageBus::new();
        bus.post(source(), MessageView::Eos);
        let watermark = bus.next_seqnum();
        bus.post(source(), MessageView::Latency);

        let old = bus.try_pop(MessageType::EOS).unwrap();
        let new = bus.try_pop(MessageType::LATENCY).unwrap();
        assert!(old.seqnum() < watermark);
        assert!(new.seqnum() >= watermark);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "dispatch on a closed message bus")]
    fn test_dispatch_on_closed_bus_panics_in_debug() {
        let bus = MessageBus::new();
        bus.close();
        bus.dispatch_pending();
    }

    #[test]
    #[cfg(not(debug_assertions))]
    fn test_dispatch_on_closed_bus_is_noop_in_release() {
        let bus = MessageBus::new();
        bus.close();
        assert_eq!(bus.dispatch_pending(), 0);
    }
}
