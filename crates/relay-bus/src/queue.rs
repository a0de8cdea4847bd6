//! Bounded FIFO of inbound user messages with drop-oldest overflow.

use std::collections::VecDeque;

use parking_lot::Mutex;
use relay_protocol::QueuedMessage;
use tokio::sync::Notify;
use tracing::warn;

/// Queue capacity; overflow drops the oldest entry, never the producer.
pub(crate) const QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Default)]
pub(crate) struct MessageQueue {
    entries: Mutex<VecDeque<QueuedMessage>>,
    notify: Notify,
}

impl MessageQueue {
    /// Enqueue without ever blocking. A full queue loses its oldest entry.
    pub fn push(&self, message: QueuedMessage) {
        {
            let mut entries = self.entries.lock();
            if entries.len() >= QUEUE_CAPACITY {
                entries.pop_front();
                warn!("message queue full, dropped oldest entry");
            }
            entries.push_back(message);
        }
        self.notify.notify_one();
    }

    /// Remove and return everything queued, in arrival order. Non-blocking.
    pub fn drain(&self) -> Vec<QueuedMessage> {
        self.entries.lock().drain(..).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Suspend until at least one entry is queued, then drain the rest
    /// without blocking. Cancel-safe.
    pub async fn wait(&self) -> Vec<QueuedMessage> {
        loop {
            let notified = self.notify.notified();
            {
                let mut entries = self.entries.lock();
                if !entries.is_empty() {
                    return entries.drain(..).collect();
                }
            }
            notified.await;
        }
    }
}
