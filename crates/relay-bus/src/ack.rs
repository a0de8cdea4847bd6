//! Pending blocking-acknowledgment registry.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use relay_protocol::{AckResult, BusError, BusResult};
use tokio::sync::oneshot;
use tracing::debug;

/// Tracks pending blocking replies keyed by an opaque token. Each entry is
/// resolved at most once; resolving an unknown or already-resolved token is
/// a no-op.
#[derive(Debug, Default)]
pub(crate) struct AckRegistry {
    pending: Mutex<HashMap<String, oneshot::Sender<AckResult>>>,
}

impl AckRegistry {
    /// Allocate a token and register a single-use result channel.
    pub fn create(self: &Arc<Self>) -> AckHandle {
        let token = uuid::Uuid::new_v4().to_string();
        let (sender, receiver) = oneshot::channel();
        self.pending.lock().insert(token.clone(), sender);
        AckHandle {
            token,
            receiver: Some(receiver),
            registry: Arc::clone(self),
        }
    }

    /// Deliver `result` to the waiter for `token`, removing the entry.
    /// Returns whether the token existed.
    pub fn resolve(&self, token: &str, result: AckResult) -> bool {
        let Some(sender) = self.pending.lock().remove(token) else {
            return false;
        };
        // The receiver may already be gone if the waiter was cancelled
        // between removal on drop and this send; the result is discarded.
        let _ = sender.send(result);
        true
    }

    /// Any currently pending token, for the reconnect handshake.
    pub fn first_token(&self) -> Option<String> {
        self.pending.lock().keys().next().cloned()
    }

    fn remove(&self, token: &str) {
        if self.pending.lock().remove(token).is_some() {
            debug!(token, "abandoned ack removed from registry");
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }
}

/// Handle for one blocking acknowledgment.
///
/// Dropping the handle (including cancelling a `wait` in a `select!`)
/// removes the registry entry, so abandoned acks never accumulate.
#[derive(Debug)]
pub struct AckHandle {
    token: String,
    receiver: Option<oneshot::Receiver<AckResult>>,
    registry: Arc<AckRegistry>,
}

impl AckHandle {
    /// The token a client must echo back to resolve this ack.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Suspend until the ack is resolved. Cancel-safe: dropping the future
    /// unregisters the pending entry.
    pub async fn wait(mut self) -> BusResult<AckResult> {
        let Some(receiver) = self.receiver.take() else {
            return Err(BusError::AckAbandoned);
        };
        receiver.await.map_err(|_| BusError::AckAbandoned)
    }
}

impl Drop for AckHandle {
    fn drop(&mut self) {
        self.registry.remove(&self.token);
    }
}
