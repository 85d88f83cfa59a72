//! Lifecycle flags and counters shared by the connector and its pollers.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::Serialize;
use tokio::sync::watch;

/// Connected, stopped and running flags plus the stop signal.
///
/// A fresh state is stopped and disconnected.
#[derive(Debug)]
pub struct LifecycleState {
    connected: AtomicBool,
    stopped: AtomicBool,
    running: AtomicBool,
    stop_tx: watch::Sender<bool>,
}

impl Default for LifecycleState {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleState {
    pub fn new() -> Self {
        let (stop_tx, _) = watch::channel(true);
        Self {
            connected: AtomicBool::new(false),
            stopped: AtomicBool::new(true),
            running: AtomicBool::new(false),
            stop_tx,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Mark running and clear the stop signal.
    ///
    /// Returns `false` when already running.
    pub fn start(&self) -> bool {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        self.stopped.store(false, Ordering::SeqCst);
        self.stop_tx.send_replace(false);
        true
    }

    /// Raise the stop signal and drop the connected flag.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        self.stop_tx.send_replace(true);
    }

    /// Clear the running flag once every polling task has exited.
    pub fn finish(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// A receiver of the stop signal (`true` means stop).
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.stop_tx.subscribe()
    }
}

/// Message counters reported with the connector status.
#[derive(Debug, Default)]
pub struct Statistics {
    messages_received: AtomicU64,
    messages_sent: AtomicU64,
}

/// Serializable view of [`Statistics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatisticsSnapshot {
    pub messages_received: u64,
    pub messages_sent: u64,
}

impl Statistics {
    /// Count readings returned by a batched read.
    pub fn received(&self, readings: usize) {
        self.messages_received
            .fetch_add(readings as u64, Ordering::Relaxed);
    }

    /// Count a record accepted by the sink.
    pub fn sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
        }
    }
}
