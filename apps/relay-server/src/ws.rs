//! The `/ws` endpoint: handshake, cursor replay, live fan-out, and the
//! inbound frame loop for one browser tab.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use relay_bus::{EventBus, Subscriber};
use relay_protocol::{AckResult, ClientFrame, Event, ServerFrame};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::AppState;

#[derive(Debug, Deserialize, Default)]
pub struct WsQuery {
    cursor: Option<i64>,
}

pub async fn handle_upgrade(
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> Response {
    let cursor = query.cursor.unwrap_or(0);
    ws.on_upgrade(move |socket| handle_socket(state.bus, socket, cursor))
}

async fn handle_socket(bus: Arc<EventBus>, socket: WebSocket, cursor: i64) {
    let (mut sink, stream) = socket.split();

    let connected = ServerFrame::Connected {
        version: env!("CARGO_PKG_VERSION").to_owned(),
        pending_ack_id: bus.pending_ack_token(),
        quick_replies: bus.last_quick_replies(),
    };
    if send_json(&mut sink, &connected).await.is_err() {
        return;
    }

    // Subscribe before replaying so nothing published during the replay is
    // lost; the writer drops anything the replay already covered.
    let subscriber = bus.subscribe();
    let mut high_seq = cursor;
    for event in bus.events_since(cursor) {
        if event.seq > high_seq {
            high_seq = event.seq;
        }
        if send_json(&mut sink, &event).await.is_err() {
            return;
        }
    }

    let (notice_tx, notice_rx) = mpsc::channel::<ServerFrame>(16);
    let writer = tokio::spawn(write_loop(sink, subscriber, notice_rx, high_seq));

    read_loop(&bus, stream, notice_tx).await;

    // Aborting drops the subscriber, which unregisters its mailbox.
    writer.abort();
}

/// Single-writer task: interleaves live events with per-connection notices
/// so frames never race on the socket.
async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut subscriber: Subscriber,
    mut notices: mpsc::Receiver<ServerFrame>,
    mut high_seq: i64,
) {
    loop {
        tokio::select! {
            event = subscriber.recv() => {
                let Some(event) = event else {
                    return;
                };
                if event.seq <= high_seq {
                    continue;
                }
                high_seq = event.seq;
                if send_json(&mut sink, &event).await.is_err() {
                    return;
                }
            }
            notice = notices.recv() => {
                let Some(notice) = notice else {
                    return;
                };
                if send_json(&mut sink, &notice).await.is_err() {
                    return;
                }
            }
        }
    }
}

async fn read_loop(
    bus: &EventBus,
    mut stream: SplitStream<WebSocket>,
    notice_tx: mpsc::Sender<ServerFrame>,
) {
    while let Some(message) = stream.next().await {
        let message = match message {
            Ok(message) => message,
            Err(error) => {
                debug!(%error, "websocket read failed");
                return;
            }
        };
        match message {
            Message::Text(text) => {
                let frame = match serde_json::from_str::<ClientFrame>(&text) {
                    Ok(frame) => frame,
                    Err(error) => {
                        debug!(%error, "skipping malformed client frame");
                        continue;
                    }
                };
                handle_frame(bus, frame, &notice_tx).await;
            }
            Message::Close(_) => return,
            _ => {}
        }
    }
}

async fn handle_frame(bus: &EventBus, frame: ClientFrame, notice_tx: &mpsc::Sender<ServerFrame>) {
    match frame {
        ClientFrame::Message { text, files } => {
            if text.is_empty() && files.is_empty() {
                return;
            }
            bus.push_message(text.clone(), files.clone());
            bus.publish(Event::user_message(text, files)).await;
            let _ = notice_tx.try_send(ServerFrame::MessageQueued);
        }
        ClientFrame::Ack { id, message } => {
            if id.is_empty() {
                return;
            }
            if !bus.resolve_ack(&id, AckResult::from_reply(&message)) {
                debug!(token = id, "ack for unknown or already-resolved token");
            }
            // The ack reply joins the conversation feed so every tab sees
            // what was answered, even a bare acknowledgment.
            bus.publish(Event::user_message(message, Vec::new())).await;
        }
    }
}

async fn send_json<T: Serialize>(
    sink: &mut SplitSink<WebSocket, Message>,
    value: &T,
) -> Result<(), axum::Error> {
    let json = match serde_json::to_string(value) {
        Ok(json) => json,
        Err(error) => {
            warn!(%error, "failed to serialize outbound frame");
            return Ok(());
        }
    };
    sink.send(Message::Text(json.into())).await
}
