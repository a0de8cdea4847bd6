//! # relay-watcher — debounced permission prompts
//!
//! Tails an externally-written agent session JSONL file and publishes
//! `permissionPrompt` events through the bus, but only for tool uses that
//! stay unresolved past a debounce window. Tool uses the agent harness
//! approves instantly never reach the UI.

mod session;

pub use session::{PermissionRequest, parse_session_line};

use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use relay_bus::EventBus;
use relay_protocol::Event;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// How long a tool use must remain unresolved before it is surfaced as a
/// permission prompt.
pub const PROMPT_DEBOUNCE: Duration = Duration::from_millis(1500);

/// How often the watcher checks the file for newly appended lines.
pub const POLL_INTERVAL: Duration = Duration::from_millis(200);

struct PendingPrompt {
    request: PermissionRequest,
    timer: JoinHandle<()>,
}

struct WatcherInner {
    path: PathBuf,
    bus: Arc<EventBus>,
    pending: Mutex<HashMap<String, PendingPrompt>>,
}

/// Tails a session JSONL file from its current end and runs the debounce
/// state machine. Historical content before watch start is never surfaced.
#[derive(Clone)]
pub struct SessionWatcher {
    inner: Arc<WatcherInner>,
    stop: watch::Sender<bool>,
}

impl SessionWatcher {
    pub fn new(path: impl Into<PathBuf>, bus: Arc<EventBus>) -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            inner: Arc::new(WatcherInner {
                path: path.into(),
                bus,
                pending: Mutex::new(HashMap::new()),
            }),
            stop,
        }
    }

    /// Tail the file until [`SessionWatcher::stop`] is called. Blocks the
    /// calling task; spawn it.
    pub async fn run(&self) {
        let mut stop = self.stop.subscribe();
        if *stop.borrow() {
            return;
        }

        let mut file = match File::open(&self.inner.path).await {
            Ok(file) => file,
            Err(error) => {
                warn!(path = %self.inner.path.display(), %error, "failed to open session log");
                return;
            }
        };
        if let Err(error) = file.seek(SeekFrom::End(0)).await {
            warn!(%error, "failed to seek session log");
            return;
        }

        let mut partial = Vec::new();
        let mut ticker = tokio::time::interval(POLL_INTERVAL);
        loop {
            tokio::select! {
                _ = stop.changed() => {
                    self.clear_pending();
                    return;
                }
                _ = ticker.tick() => {
                    self.read_new_lines(&mut file, &mut partial).await;
                }
            }
        }
    }

    /// Stop the tail loop and cancel all outstanding debounce timers
    /// without publishing.
    pub fn stop(&self) {
        // send_replace also covers a stop issued before run() subscribes.
        self.stop.send_replace(true);
    }

    /// Read whatever the file has grown by and process complete lines;
    /// a line without a trailing newline yet is left for the next poll.
    ///
    /// The buffer stays raw bytes until a full line is available: decoding
    /// per read chunk would mangle a multi-byte character that straddles a
    /// chunk boundary.
    async fn read_new_lines(&self, file: &mut File, partial: &mut Vec<u8>) {
        let mut chunk = [0_u8; 8192];
        loop {
            match file.read(&mut chunk).await {
                Ok(0) => break,
                Ok(read) => partial.extend_from_slice(&chunk[..read]),
                Err(error) => {
                    warn!(%error, "failed reading session log");
                    break;
                }
            }
        }

        while let Some(newline) = partial.iter().position(|&byte| byte == b'\n') {
            let line: Vec<u8> = partial.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            self.process_line(line).await;
        }
    }

    async fn process_line(&self, line: &str) {
        let (requests, resolved_ids) = parse_session_line(line);

        for tool_use_id in resolved_ids {
            let removed = self.inner.pending.lock().remove(&tool_use_id);
            if let Some(pending) = removed {
                pending.timer.abort();
                debug!(tool_use_id, tool = pending.request.tool_name, "tool use resolved");
                self.inner
                    .bus
                    .publish(Event::permission_resolved(tool_use_id))
                    .await;
            }
        }

        for request in requests {
            let inner = Arc::clone(&self.inner);
            let fired = request.clone();
            let timer = tokio::spawn(async move {
                tokio::time::sleep(PROMPT_DEBOUNCE).await;
                // Publish only if no tool_result arrived in the meantime.
                // The entry stays registered so a late result still
                // retracts the prompt.
                let still_pending = inner.pending.lock().contains_key(&fired.tool_use_id);
                if still_pending {
                    inner
                        .bus
                        .publish(Event::permission_prompt(
                            &fired.tool_use_id,
                            &fired.tool_name,
                            &fired.title,
                            &fired.detail,
                        ))
                        .await;
                }
            });
            self.inner
                .pending
                .lock()
                .insert(request.tool_use_id.clone(), PendingPrompt { request, timer });
        }
    }

    fn clear_pending(&self) {
        let mut pending = self.inner.pending.lock();
        for (_, prompt) in pending.drain() {
            prompt.timer.abort();
        }
    }
}
