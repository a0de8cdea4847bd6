//! JSON frames exchanged over the persistent browser connection.
//!
//! Published [`Event`](crate::Event)s are serialized to the wire directly;
//! the frames here cover the handshake, the per-connection queue notice, and
//! everything the client sends back.

use serde::{Deserialize, Serialize};

use crate::event::FileRef;

/// Result of a blocking acknowledgment, delivered to the waiting publisher.
///
/// Replaces the raw `"ack"` / `"ack:<message>"` string convention: the wire
/// text is parsed exactly once, at the frame boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckResult {
    /// Bare acknowledgment with no reply text.
    Acknowledged,
    /// Acknowledgment carrying a typed reply.
    Reply(String),
}

impl AckResult {
    /// Build from the optional reply text of an inbound ack frame. An empty
    /// message means a bare acknowledgment.
    pub fn from_reply(message: &str) -> Self {
        if message.is_empty() {
            Self::Acknowledged
        } else {
            Self::Reply(message.to_owned())
        }
    }

    /// The reply text, if any.
    pub fn reply(&self) -> Option<&str> {
        match self {
            Self::Acknowledged => None,
            Self::Reply(message) => Some(message),
        }
    }
}

/// Frames sent from server to client, aside from serialized events.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ServerFrame {
    /// Handshake sent on connect, before history replay. Carries enough
    /// state for a tab reconnecting mid-prompt to re-render the open
    /// question immediately.
    #[serde(rename = "connected")]
    Connected {
        version: String,
        #[serde(rename = "pendingAckId", skip_serializing_if = "Option::is_none")]
        pending_ack_id: Option<String>,
        #[serde(rename = "quickReplies", skip_serializing_if = "Vec::is_empty")]
        quick_replies: Vec<String>,
    },
    /// Sent only to the connection whose message was just queued.
    #[serde(rename = "messageQueued")]
    MessageQueued,
}

/// Frames received from the client. Unknown or malformed frames are skipped.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum ClientFrame {
    /// A chat message for the agent's inbound queue.
    #[serde(rename = "message")]
    Message {
        #[serde(default)]
        text: String,
        #[serde(default)]
        files: Vec<FileRef>,
    },
    /// Resolution of a pending blocking acknowledgment.
    #[serde(rename = "ack")]
    Ack {
        id: String,
        #[serde(default)]
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connected_frame_includes_pending_state() {
        let frame = ServerFrame::Connected {
            version: "0.1.0".to_owned(),
            pending_ack_id: Some("tok".to_owned()),
            quick_replies: vec!["Continue".to_owned()],
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "connected");
        assert_eq!(json["pendingAckId"], "tok");
        assert_eq!(json["quickReplies"][0], "Continue");
    }

    #[test]
    fn connected_frame_omits_absent_state() {
        let frame = ServerFrame::Connected {
            version: "0.1.0".to_owned(),
            pending_ack_id: None,
            quick_replies: Vec::new(),
        };
        let json = serde_json::to_value(&frame).unwrap();
        let object = json.as_object().unwrap();
        assert!(!object.contains_key("pendingAckId"));
        assert!(!object.contains_key("quickReplies"));
    }

    #[test]
    fn message_queued_frame_shape() {
        let json = serde_json::to_string(&ServerFrame::MessageQueued).unwrap();
        assert_eq!(json, r#"{"type":"messageQueued"}"#);
    }

    #[test]
    fn client_message_frame_parses() {
        let frame: ClientFrame =
            serde_json::from_str(r#"{"type":"message","text":"hi"}"#).unwrap();
        assert_eq!(
            frame,
            ClientFrame::Message {
                text: "hi".to_owned(),
                files: Vec::new()
            }
        );
    }

    #[test]
    fn client_ack_frame_parses_with_and_without_message() {
        let bare: ClientFrame = serde_json::from_str(r#"{"type":"ack","id":"t1"}"#).unwrap();
        let ClientFrame::Ack { id, message } = bare else {
            panic!("expected ack frame");
        };
        assert_eq!(id, "t1");
        assert_eq!(AckResult::from_reply(&message), AckResult::Acknowledged);

        let with_text: ClientFrame =
            serde_json::from_str(r#"{"type":"ack","id":"t2","message":"looks good"}"#).unwrap();
        let ClientFrame::Ack { message, .. } = with_text else {
            panic!("expected ack frame");
        };
        assert_eq!(
            AckResult::from_reply(&message),
            AckResult::Reply("looks good".to_owned())
        );
    }

    #[test]
    fn unknown_frame_type_is_an_error() {
        let result = serde_json::from_str::<ClientFrame>(r#"{"type":"ping"}"#);
        assert!(result.is_err());
    }
}
