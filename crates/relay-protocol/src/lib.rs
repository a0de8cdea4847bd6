//! # relay-protocol — shared chat relay contract
//!
//! Types exchanged between the event bus, the connection handler, and the
//! permission watcher. Intentionally dependency-light (no tokio, no axum) so
//! it can be used as a pure contract crate.
//!
//! - [`event`] — `Event`, `EventKind`, `FileRef`, `QueuedMessage`
//! - [`wire`] — browser frames (`ClientFrame`, `ServerFrame`) and `AckResult`
//! - [`error`] — `BusError`

pub mod error;
pub mod event;
pub mod wire;

pub use error::{BusError, BusResult};
pub use event::{Event, EventKind, FileRef, QueuedMessage};
pub use wire::{AckResult, ClientFrame, ServerFrame};
