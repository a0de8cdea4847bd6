//! # relay-bus — the chat relay event bus
//!
//! Composes the append-only event log (optionally mirrored to a JSONL file),
//! the pending-acknowledgment registry, the fan-out subscriber set, and the
//! bounded inbound message queue behind one shared [`EventBus`].
//!
//! The hard invariant lives here: every subscriber sees every event exactly
//! once, in order, regardless of when it connects or how often the process
//! restarts. Live fan-out is best-effort (a slow client's events are dropped
//! for that client only); correctness for reconnecting clients comes from
//! cursor replay over the log.

mod ack;
mod bus;
mod log;
mod queue;
mod subscriber;

pub use ack::AckHandle;
pub use bus::EventBus;
pub use subscriber::Subscriber;
