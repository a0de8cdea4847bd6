//! In-memory event log and the optional durable JSONL mirror.

use std::path::Path;

use relay_protocol::{Event, EventKind};
use tokio::fs::OpenOptions;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, warn};

/// Append-only, sequence-numbered record of everything published.
///
/// Sequence numbers are assigned exactly once and never reused; after a
/// reload the counter continues from the maximum seen. Entries appended
/// with [`EventLog::append_raw`] keep `seq == 0` and are replayed in their
/// logged position but never broadcast.
#[derive(Debug, Default)]
pub(crate) struct EventLog {
    events: Vec<Event>,
    next_seq: i64,
}

impl EventLog {
    pub fn from_loaded(events: Vec<Event>, max_seq: i64) -> Self {
        Self {
            events,
            next_seq: max_seq,
        }
    }

    /// Assign the next sequence number to `event` and store it.
    pub fn assign(&mut self, mut event: Event) -> Event {
        self.next_seq += 1;
        event.seq = self.next_seq;
        self.events.push(event.clone());
        event
    }

    /// Store a log-only entry without assigning a sequence number.
    pub fn append_raw(&mut self, event: Event) {
        self.events.push(event);
    }

    /// All events after the first entry with `seq > cursor`, in order.
    ///
    /// The scan is positional, not a per-event filter: log-only `seq == 0`
    /// entries that follow a matching event are included in the tail.
    pub fn events_since(&self, cursor: i64) -> Vec<Event> {
        let start = self
            .events
            .iter()
            .position(|event| event.seq > cursor)
            .unwrap_or(self.events.len());
        self.events[start..].to_vec()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

/// Result of reloading a durable JSONL log.
#[derive(Debug, Default)]
pub(crate) struct LoadedLog {
    pub events: Vec<Event>,
    pub max_seq: i64,
    pub last_quick_replies: Vec<String>,
}

/// Read a JSONL event log. Malformed lines are skipped; a missing file
/// yields an empty log. `last_quick_replies` is reconstructed by replaying
/// the same derived-state rule used at publish time.
pub(crate) async fn load_event_log(path: &Path) -> LoadedLog {
    let file = match OpenOptions::new().read(true).open(path).await {
        Ok(file) => file,
        Err(_) => return LoadedLog::default(),
    };

    let mut loaded = LoadedLog::default();
    let mut lines = BufReader::new(file).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        let Ok(event) = serde_json::from_str::<Event>(&line) else {
            continue;
        };
        loaded.max_seq = loaded.max_seq.max(event.seq);
        if !event.quick_replies.is_empty() {
            loaded.last_quick_replies = event.quick_replies.clone();
        }
        if event.kind == EventKind::UserMessage {
            loaded.last_quick_replies.clear();
        }
        loaded.events.push(event);
    }
    debug!(count = loaded.events.len(), max_seq = loaded.max_seq, "event log reloaded");
    loaded
}

/// Optional JSONL mirror of the event log.
///
/// Owns the file handle behind its own async lock so a slow disk never
/// stalls the in-memory state lock or fan-out. Write failures are logged
/// and swallowed: losing the disk mirror must not break the live chat.
#[derive(Debug)]
pub(crate) struct DurableLog {
    file: tokio::sync::Mutex<Option<tokio::fs::File>>,
}

impl DurableLog {
    pub fn disabled() -> Self {
        Self {
            file: tokio::sync::Mutex::new(None),
        }
    }

    pub async fn open(path: &Path) -> anyhow::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        Ok(Self {
            file: tokio::sync::Mutex::new(Some(file)),
        })
    }

    /// Append one event as a JSON line, flushed before returning.
    pub async fn append(&self, event: &Event) {
        let mut guard = self.file.lock().await;
        let Some(file) = guard.as_mut() else {
            return;
        };
        let mut line = match serde_json::to_string(event) {
            Ok(line) => line,
            Err(error) => {
                warn!(%error, "failed to serialize event for durable log");
                return;
            }
        };
        line.push('\n');
        if let Err(error) = file.write_all(line.as_bytes()).await {
            warn!(%error, "failed to append to durable log");
            return;
        }
        if let Err(error) = file.flush().await {
            warn!(%error, "failed to flush durable log");
        }
    }

    /// Flush and release the file handle. Later appends become no-ops.
    pub async fn close(&self) {
        let mut guard = self.file.lock().await;
        if let Some(mut file) = guard.take()
            && let Err(error) = file.sync_all().await
        {
            warn!(%error, "failed to sync durable log on close");
        }
    }
}
