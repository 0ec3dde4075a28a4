//! Broadcast-style fan-out for test status changes.
//!
//! Mirrors the teacher's bridge event bus: any number of subscribers can
//! register after the QueueManager is built, and each gets every status
//! change published from that point on. Disconnected subscribers are pruned
//! on the next publish rather than tracked explicitly.

use std::sync::{Arc, Mutex};
use tp_core::types::StatusSnapshot;

#[derive(Clone)]
pub struct StatusEventBus {
    inner: Arc<Mutex<Vec<flume::Sender<StatusSnapshot>>>>,
}

impl StatusEventBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Register a new subscriber and return its receiving end. It sees only
    /// snapshots published after this call.
    pub fn subscribe(&self) -> flume::Receiver<StatusSnapshot> {
        let (tx, rx) = flume::unbounded();
        let mut senders = self.inner.lock().expect("StatusEventBus lock poisoned");
        senders.push(tx);
        rx
    }

    /// Publish a status snapshot to every live subscriber.
    pub fn publish(&self, snapshot: StatusSnapshot) {
        let mut senders = self.inner.lock().expect("StatusEventBus lock poisoned");
        senders.retain(|tx| tx.send(snapshot.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().expect("StatusEventBus lock poisoned").len()
    }
}

impl Default for StatusEventBus {
    fn default() -> Self {
        Self::new()
    }
}
