//! The shared event bus.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use relay_protocol::{AckResult, BusError, BusResult, Event, EventKind, FileRef, QueuedMessage};
use tracing::{debug, instrument};

use crate::ack::{AckHandle, AckRegistry};
use crate::log::{DurableLog, EventLog, load_event_log};
use crate::queue::MessageQueue;
use crate::subscriber::{Subscriber, SubscriberSet};

/// How often `wait_for_subscriber` re-checks the subscriber set.
const SUBSCRIBER_POLL: Duration = Duration::from_millis(100);

/// Ceiling on `wait_for_subscriber` before giving up.
const SUBSCRIBER_WAIT_CEILING: Duration = Duration::from_secs(30);

/// State mutated only under the bus's in-memory lock: the event log, the
/// sequence counter inside it, and the session-derived flags.
#[derive(Debug, Default)]
struct BusState {
    log: EventLog,
    /// Quick replies from the last event that carried any; cleared when a
    /// user message is published. Non-empty means the agent is waiting.
    last_quick_replies: Vec<String>,
    /// Whether the last consumed batch of user messages was voice input.
    last_voice: bool,
}

/// Fans events out to connected clients, tracks pending blocking acks,
/// queues inbound user messages, and keeps the sequence-numbered event log
/// for reconnect replay — optionally mirrored to a JSONL file.
///
/// Constructed once by the process entry point and shared (`Arc`) with every
/// collaborator; there is no hidden global instance.
#[derive(Debug)]
pub struct EventBus {
    state: Mutex<BusState>,
    subscribers: Arc<SubscriberSet>,
    acks: Arc<AckRegistry>,
    queue: MessageQueue,
    durable: DurableLog,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// In-memory bus with no durable mirror.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BusState::default()),
            subscribers: Arc::new(SubscriberSet::default()),
            acks: Arc::new(AckRegistry::default()),
            queue: MessageQueue::default(),
            durable: DurableLog::disabled(),
        }
    }

    /// Bus that mirrors events to a JSONL file. If the file already exists
    /// its events are reloaded so browsers get full history across process
    /// restarts, and sequence numbers continue from the maximum seen.
    pub async fn with_log(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let loaded = load_event_log(path).await;
        let durable = DurableLog::open(path).await?;
        Ok(Self {
            state: Mutex::new(BusState {
                log: EventLog::from_loaded(loaded.events, loaded.max_seq),
                last_quick_replies: loaded.last_quick_replies,
                last_voice: false,
            }),
            subscribers: Arc::new(SubscriberSet::default()),
            acks: Arc::new(AckRegistry::default()),
            queue: MessageQueue::default(),
            durable,
        })
    }

    /// Assign sequence and timestamp, append to the log, update derived
    /// state, fan out to every live subscriber, and mirror to the durable
    /// log. Returns the stored event.
    ///
    /// Fan-out never blocks and never fails the publish: a full subscriber
    /// mailbox drops the event for that subscriber only.
    #[instrument(skip(self, event), fields(kind = ?event.kind))]
    pub async fn publish(&self, mut event: Event) -> Event {
        if event.ts == 0 {
            event.ts = Event::now_millis();
        }
        let stored = {
            let mut state = self.state.lock();
            let stored = state.log.assign(event);
            if !stored.quick_replies.is_empty() {
                state.last_quick_replies = stored.quick_replies.clone();
            }
            if stored.kind == EventKind::UserMessage {
                state.last_quick_replies.clear();
            }
            stored
        };
        self.subscribers.broadcast(&stored);
        self.durable.append(&stored).await;
        debug!(seq = stored.seq, "event published");
        stored
    }

    /// Append a user message to the log for reconnect replay without
    /// broadcasting it. The entry keeps `seq == 0`.
    pub async fn log_user_message(&self, text: impl Into<String>, files: Vec<FileRef>) {
        let mut event = Event::user_message(text, files);
        event.ts = Event::now_millis();
        self.state.lock().log.append_raw(event.clone());
        self.durable.append(&event).await;
    }

    /// All stored events after `cursor`, in original order.
    pub fn events_since(&self, cursor: i64) -> Vec<Event> {
        self.state.lock().log.events_since(cursor)
    }

    /// Drop the stored event log. Sequence numbers are not reset.
    pub fn clear_log(&self) {
        self.state.lock().log.clear();
    }

    /// Register a live fan-out sink. Dropping the subscriber unregisters it.
    pub fn subscribe(&self) -> Subscriber {
        self.subscribers.subscribe()
    }

    /// Poll until at least one subscriber is connected. Gives up with
    /// [`BusError::NoSubscriber`] after 30 seconds; callers cancel earlier
    /// by dropping the future.
    pub async fn wait_for_subscriber(&self) -> BusResult<()> {
        let deadline = tokio::time::Instant::now() + SUBSCRIBER_WAIT_CEILING;
        loop {
            if self.subscribers.len() > 0 {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(BusError::NoSubscriber);
            }
            tokio::time::sleep(SUBSCRIBER_POLL).await;
        }
    }

    /// Queue a user message from a client. Never blocks; a full queue drops
    /// its oldest entry.
    pub fn push_message(&self, text: impl Into<String>, files: Vec<FileRef>) {
        self.queue.push(QueuedMessage {
            text: text.into(),
            files,
        });
    }

    /// Everything currently queued, in arrival order. Non-blocking.
    pub fn drain_messages(&self) -> Vec<QueuedMessage> {
        self.queue.drain()
    }

    /// Suspend until at least one message is queued, then drain the rest.
    /// Cancel-safe; bound it with `tokio::time::timeout` for a deadline.
    pub async fn wait_for_messages(&self) -> Vec<QueuedMessage> {
        self.queue.wait().await
    }

    pub fn has_queued_messages(&self) -> bool {
        !self.queue.is_empty()
    }

    /// Allocate a blocking acknowledgment. The caller waits on the handle;
    /// dropping it (cancellation included) removes the pending entry.
    pub fn create_ack(&self) -> AckHandle {
        self.acks.create()
    }

    /// Resolve a pending ack. Returns whether the token existed; a second
    /// resolution of the same token returns false and has no effect.
    pub fn resolve_ack(&self, token: &str, result: AckResult) -> bool {
        self.acks.resolve(token, result)
    }

    /// A currently pending ack token, if any, for the reconnect handshake.
    pub fn pending_ack_token(&self) -> Option<String> {
        self.acks.first_token()
    }

    /// Quick replies of the open question, or empty when the agent is
    /// working and no reply is expected.
    pub fn last_quick_replies(&self) -> Vec<String> {
        self.state.lock().last_quick_replies.clone()
    }

    pub fn last_voice(&self) -> bool {
        self.state.lock().last_voice
    }

    /// Recorded by the tool layer after consuming a batch of user messages,
    /// to steer the next reply to the matching modality.
    pub fn set_last_voice(&self, voice: bool) {
        self.state.lock().last_voice = voice;
    }

    /// Flush and close the durable mirror. In-memory operation continues.
    pub async fn close(&self) {
        self.durable.close().await;
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Duration;

    use relay_protocol::{AckResult, Event, EventKind};
    use tokio::time::timeout;

    use crate::EventBus;

    fn unique_log_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("{name}-{}.jsonl", uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn publish_assigns_increasing_sequence_and_timestamp() {
        let bus = EventBus::new();
        let first = bus.publish(Event::agent_message("one")).await;
        let second = bus.publish(Event::agent_message("two")).await;
        assert_eq!(first.seq, 1);
        assert_eq!(second.seq, 2);
        assert!(first.ts > 0);
    }

    #[tokio::test]
    async fn concurrent_publishers_never_share_a_sequence() {
        let bus = Arc::new(EventBus::new());
        let mut tasks = Vec::new();
        for worker in 0..8 {
            let bus = Arc::clone(&bus);
            tasks.push(tokio::spawn(async move {
                let mut seqs = Vec::new();
                for i in 0..25 {
                    let stored = bus.publish(Event::agent_message(format!("{worker}-{i}"))).await;
                    seqs.push(stored.seq);
                }
                seqs
            }));
        }

        let mut all = Vec::new();
        for task in tasks {
            all.extend(task.await.unwrap());
        }
        all.sort_unstable();
        let expected: Vec<i64> = (1..=200).collect();
        assert_eq!(all, expected);
    }

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::new();
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        bus.publish(Event::agent_message("hello").with_ack("test-123")).await;

        let event = first.recv().await.unwrap();
        assert_eq!(event.kind, EventKind::AgentMessage);
        assert_eq!(event.ack_id.as_deref(), Some("test-123"));
        assert_eq!(second.recv().await.unwrap().text, "hello");
    }

    #[tokio::test]
    async fn dropped_subscriber_receives_nothing_further() {
        let bus = EventBus::new();
        let subscriber = bus.subscribe();
        drop(subscriber);
        // Publishing into an empty set is a no-op, not an error.
        bus.publish(Event::agent_message("into the void")).await;
    }

    #[tokio::test]
    async fn events_since_returns_exact_tail() {
        let bus = EventBus::new();
        bus.publish(Event::agent_message("one")).await;
        bus.publish(Event::user_message("two", Vec::new())).await;
        bus.publish(Event::agent_message("three")).await;

        let all = bus.events_since(0);
        assert_eq!(all.iter().map(|e| e.seq).collect::<Vec<_>>(), vec![1, 2, 3]);

        let tail = bus.events_since(1);
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].text, "two");
        assert_eq!(tail[1].text, "three");

        assert!(bus.events_since(3).is_empty());
    }

    #[tokio::test]
    async fn replay_then_live_stream_with_cursor_dedup() {
        let bus = EventBus::new();
        for i in 1..=5 {
            bus.publish(Event::agent_message(format!("m{i}"))).await;
        }

        // A client reconnecting with cursor=3: subscribe first, then replay.
        let mut subscriber = bus.subscribe();
        let replay = bus.events_since(3);
        assert_eq!(replay.iter().map(|e| e.seq).collect::<Vec<_>>(), vec![4, 5]);
        let mut high_seq = replay.last().map_or(3, |e| e.seq);

        bus.publish(Event::agent_message("m6")).await;

        let mut delivered = Vec::new();
        while let Some(event) = subscriber.try_recv() {
            if event.seq <= high_seq {
                continue;
            }
            high_seq = event.seq;
            delivered.push(event.seq);
        }
        // Exactly seq 6 arrives live; 4 and 5 came from replay only.
        assert_eq!(delivered, vec![6]);
    }

    #[tokio::test]
    async fn durable_log_round_trips_across_restarts() {
        let path = unique_log_path("relay-bus-restart");

        let bus = EventBus::with_log(&path).await.unwrap();
        bus.publish(Event::agent_message("hello")).await;
        bus.log_user_message("world", Vec::new()).await;
        bus.close().await;

        let reloaded = EventBus::with_log(&path).await.unwrap();
        let events = reloaded.events_since(0);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].text, "hello");
        assert_eq!(events[1].text, "world");
        assert_eq!(events[1].seq, 0);

        // New events continue after the reloaded maximum, never reset.
        let next = reloaded.publish(Event::agent_message("new")).await;
        assert_eq!(next.seq, 2);
        reloaded.close().await;

        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn reload_recovers_quick_reply_state() {
        let path = unique_log_path("relay-bus-quickreplies");

        let bus = EventBus::with_log(&path).await.unwrap();
        bus.publish(
            Event::agent_message("pick one").with_quick_replies(vec!["Yes".to_owned()]),
        )
        .await;
        bus.close().await;

        let reloaded = EventBus::with_log(&path).await.unwrap();
        assert_eq!(reloaded.last_quick_replies(), vec!["Yes".to_owned()]);
        reloaded.close().await;

        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn quick_reply_state_tracks_waiting_vs_working() {
        let bus = EventBus::new();
        assert!(bus.last_quick_replies().is_empty());

        bus.publish(
            Event::agent_message("continue?").with_quick_replies(vec!["Continue".to_owned()]),
        )
        .await;
        assert_eq!(bus.last_quick_replies(), vec!["Continue".to_owned()]);

        bus.publish(Event::user_message("Continue", Vec::new())).await;
        assert!(bus.last_quick_replies().is_empty());
    }

    #[tokio::test]
    async fn wait_for_subscriber_unblocks_on_subscribe() {
        let bus = Arc::new(EventBus::new());
        let waiter = {
            let bus = Arc::clone(&bus);
            tokio::spawn(async move { bus.wait_for_subscriber().await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        let _subscriber = bus.subscribe();
        let result = timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn wait_for_subscriber_blocks_again_after_disconnect() {
        let bus = Arc::new(EventBus::new());
        let first = bus.subscribe();
        bus.wait_for_subscriber().await.unwrap();
        drop(first);

        let waiter = {
            let bus = Arc::clone(&bus);
            tokio::spawn(async move { bus.wait_for_subscriber().await })
        };
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(!waiter.is_finished());

        let _second = bus.subscribe();
        let result = timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_subscriber_times_out_at_the_ceiling() {
        let bus = EventBus::new();
        let result = bus.wait_for_subscriber().await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn wait_for_messages_coalesces_a_batch() {
        let bus = Arc::new(EventBus::new());
        let waiter = {
            let bus = Arc::clone(&bus);
            tokio::spawn(async move { bus.wait_for_messages().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        bus.push_message("first", Vec::new());
        bus.push_message("second", Vec::new());

        let batch = timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
        assert!(!batch.is_empty());
        assert_eq!(batch[0].text, "first");
        assert!(bus.drain_messages().is_empty());
    }

    #[tokio::test]
    async fn ack_lifecycle_resolves_exactly_once() {
        let bus = Arc::new(EventBus::new());
        let handle = bus.create_ack();
        let token = handle.token().to_owned();
        assert_eq!(bus.pending_ack_token(), Some(token.clone()));

        let resolver = {
            let bus = Arc::clone(&bus);
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                bus.resolve_ack(&token, AckResult::Reply("clicked continue".to_owned()))
            })
        };

        let result = timeout(Duration::from_secs(1), handle.wait())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result, AckResult::Reply("clicked continue".to_owned()));
        assert!(resolver.await.unwrap());

        assert!(!bus.resolve_ack(&token, AckResult::Acknowledged));
        assert!(bus.pending_ack_token().is_none());
    }

    #[tokio::test]
    async fn voice_flag_round_trip() {
        let bus = EventBus::new();
        assert!(!bus.last_voice());
        bus.set_last_voice(true);
        assert!(bus.last_voice());
    }

    #[tokio::test]
    async fn end_to_end_message_flow() {
        let bus = Arc::new(EventBus::new());
        let mut tab_b = bus.subscribe();

        // Tab A sends a message: queue it and broadcast the bubble.
        bus.push_message("hi", Vec::new());
        bus.publish(Event::user_message("hi", Vec::new())).await;

        let batch = timeout(Duration::from_secs(1), bus.wait_for_messages())
            .await
            .unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].text, "hi");

        let seen = tab_b.recv().await.unwrap();
        assert_eq!(seen.kind, EventKind::UserMessage);
        assert_eq!(seen.text, "hi");
    }
}
