//! Fan-out sinks for connected clients.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use relay_protocol::Event;
use tokio::sync::mpsc;
use tracing::debug;

/// Per-subscriber mailbox depth. A full mailbox drops the event for that
/// subscriber only; reconnect replay repairs the gap.
pub(crate) const MAILBOX_CAPACITY: usize = 64;

/// Dynamic set of live fan-out sinks, one per connected client.
#[derive(Debug, Default)]
pub(crate) struct SubscriberSet {
    senders: Mutex<HashMap<u64, mpsc::Sender<Event>>>,
    next_id: AtomicU64,
}

impl SubscriberSet {
    pub fn subscribe(self: &Arc<Self>) -> Subscriber {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel(MAILBOX_CAPACITY);
        self.senders.lock().insert(id, sender);
        debug!(subscriber = id, "subscriber registered");
        Subscriber {
            id,
            receiver,
            set: Arc::clone(self),
        }
    }

    /// Deliver `event` to every live sink without blocking on any of them.
    pub fn broadcast(&self, event: &Event) {
        for (id, sender) in self.senders.lock().iter() {
            if sender.try_send(event.clone()).is_err() {
                debug!(subscriber = id, seq = event.seq, "mailbox full, event dropped for subscriber");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.senders.lock().len()
    }

    fn remove(&self, id: u64) {
        self.senders.lock().remove(&id);
        debug!(subscriber = id, "subscriber removed");
    }
}

/// A live fan-out sink owned by one connection. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscriber {
    id: u64,
    receiver: mpsc::Receiver<Event>,
    set: Arc<SubscriberSet>,
}

impl Subscriber {
    /// Next live event, or `None` once the bus side is gone.
    pub async fn recv(&mut self) -> Option<Event> {
        self.receiver.recv().await
    }

    /// Non-blocking variant used by tests and polling consumers.
    pub fn try_recv(&mut self) -> Option<Event> {
        self.receiver.try_recv().ok()
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        self.set.remove(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn broadcast_reaches_every_subscriber() {
        let set = Arc::new(SubscriberSet::default());
        let mut first = set.subscribe();
        let mut second = set.subscribe();

        set.broadcast(&Event::agent_message("hello"));

        assert_eq!(first.recv().await.unwrap().text, "hello");
        assert_eq!(second.recv().await.unwrap().text, "hello");
    }

    #[tokio::test]
    async fn dropped_subscriber_is_unregistered() {
        let set = Arc::new(SubscriberSet::default());
        let subscriber = set.subscribe();
        assert_eq!(set.len(), 1);
        drop(subscriber);
        assert_eq!(set.len(), 0);
    }

    #[tokio::test]
    async fn full_mailbox_drops_for_that_subscriber_only() {
        let set = Arc::new(SubscriberSet::default());
        let mut stalled = set.subscribe();
        let mut healthy = set.subscribe();

        for i in 0..MAILBOX_CAPACITY + 8 {
            set.broadcast(&Event::agent_message(format!("m{i}")));
            // Keep the healthy mailbox drained so nothing is lost there.
            while let Some(event) = healthy.try_recv() {
                assert!(event.text.starts_with('m'));
            }
        }

        let mut stalled_count = 0;
        while stalled.try_recv().is_some() {
            stalled_count += 1;
        }
        assert_eq!(stalled_count, MAILBOX_CAPACITY);
    }
}
