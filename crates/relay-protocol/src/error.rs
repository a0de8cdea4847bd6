//! Error types for the chat relay.

use thiserror::Error;

/// Errors surfaced by blocking bus operations.
///
/// Nothing here is fatal: callers report the condition to the agent and keep
/// the process alive. Fan-out drops and durable-log failures are handled by
/// policy (silent drop, log-and-continue) and never become errors.
#[derive(Debug, Error)]
pub enum BusError {
    /// No browser connected within the subscriber-wait ceiling.
    #[error("timed out waiting for a browser to connect")]
    NoSubscriber,
    /// The acknowledgment channel closed before a reply arrived.
    #[error("acknowledgment abandoned before a reply arrived")]
    AckAbandoned,
}

/// Convenience result type for bus operations.
pub type BusResult<T> = Result<T, BusError>;
