// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use crossbeam_channel::{Receiver, Sender};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::core::error::{Result, StreamError};

/// Where bus messages get dispatched. Exactly one context exists per player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// A dedicated thread dispatches on every bus wakeup and at least once
    /// per `interval`.
    Poll { interval: Duration },
    /// The host event loop waits on the bus watch and calls `dispatch()`.
    EventLoop,
}

impl DispatchMode {
    pub fn description(&self) -> String {
        match self {
            Self::Poll { interval } => format!("poll every {:?}", interval),
            Self::EventLoop => "host event loop".to_string(),
        }
    }
}

/// Owns the poll-mode dispatch thread.
///
/// The tick closure returns `false` to stop the thread (its owner is gone).
pub struct Dispatcher {
    mode: DispatchMode,
    shutdown_tx: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl Dispatcher {
    pub fn start<F>(mode: DispatchMode, watch: Receiver<()>, tick: F) -> Result<Self>
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let interval = match mode {
            DispatchMode::EventLoop => {
                tracing::debug!("[dispatch] Using {}", mode.description());
                return Ok(Self {
                    mode,
                    shutdown_tx: None,
                    thread: None,
                });
            }
            DispatchMode::Poll { interval } => interval,
        };

        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded(1);
        let thread = std::thread::Builder::new()
            .name("streamplay-dispatch".to_string())
            .spawn(move || run_poll_loop(shutdown_rx, watch, interval, tick))
            .map_err(|e| StreamError::Configuration(format!("Failed to spawn dispatch thread: {}", e)))?;

        tracing::debug!("[dispatch] Using {}", mode.description());
        Ok(Self {
            mode,
            shutdown_tx: Some(shutdown_tx),
            thread: Some(thread),
        })
    }

    pub fn mode(&self) -> DispatchMode {
        self.mode
    }

    /// Whether the caller must drive dispatch itself.
    pub fn is_external(&self) -> bool {
        self.mode == DispatchMode::EventLoop
    }

    pub fn is_dispatch_thread(&self) -> bool {
        self.thread
            .as_ref()
            .is_some_and(|t| t.thread().id() == std::thread::current().id())
    }

    /// Stop and join the poll thread. Safe to call more than once.
    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.thread.take() {
            // Joining ourselves would deadlock; the loop exits on its own.
            if handle.thread().id() == std::thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                tracing::error!("[dispatch] Dispatch thread panicked");
            }
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_poll_loop<F>(shutdown_rx: Receiver<()>, watch: Receiver<()>, interval: Duration, mut tick: F)
where
    F: FnMut() -> bool,
{
    tracing::trace!("[dispatch] Poll thread started");
    loop {
        crossbeam_channel::select! {
            recv(shutdown_rx) -> _ => break,
            recv(watch) -> msg => {
                if msg.is_err() {
                    break;
                }
            }
            default(interval) => {}
        }
        if !tick() {
            break;
        }
    }
    tracing::trace!("[dispatch] Poll thread stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_event_loop_mode_spawns_nothing() {
        let (_tx, rx) = crossbeam_channel::bounded(1);
        let dispatcher = Dispatcher::start(DispatchMode::EventLoop, rx, || true).unwrap();
        assert!(dispatcher.is_external());
        assert!(!dispatcher.is_dispatch_thread());
    }

    #[test]
    fn test_poll_mode_ticks_on_wakeup_and_interval() {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let ticks = Arc::new(AtomicUsize::new(0));
        let t = Arc::clone(&ticks);
        let mut dispatcher = Dispatcher::start(
            DispatchMode::Poll {
                interval: Duration::from_millis(5),
            },
            rx,
            move || {
                t.fetch_add(1, Ordering::SeqCst);
                true
            },
        )
        .unwrap();

        tx.send(()).unwrap();
        std::thread::sleep(Duration::from_millis(60));
        dispatcher.stop();
        let seen = ticks.load(Ordering::SeqCst);
        assert!(seen >= 2, "expected several ticks, got {}", seen);

        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(ticks.load(Ordering::SeqCst), seen);
    }

    #[test]
    fn test_tick_returning_false_stops_thread() {
        let (_tx, rx) = crossbeam_channel::bounded::<()>(1);
        let ticks = Arc::new(AtomicUsize::new(0));
        let t = Arc::clone(&ticks);
        let mut dispatcher = Dispatcher::start(
            DispatchMode::Poll {
                interval: Duration::from_millis(1),
            },
            rx,
            move || {
                t.fetch_add(1, Ordering::SeqCst);
                false
            },
        )
        .unwrap();
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(ticks.load(Ordering::SeqCst), 1);
        dispatcher.stop();
    }
}
