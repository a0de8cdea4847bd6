//! Chat event types.
//!
//! An [`Event`] is immutable once published: the bus assigns its sequence
//! number and timestamp exactly once, and the same JSON shape is used on the
//! wire and in the durable JSONL log.

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Reference to a file uploaded through the chat UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    /// Original filename.
    pub name: String,
    /// Absolute path on the server.
    pub path: String,
    /// URL the browser fetches the file from.
    pub url: String,
    /// Size in bytes.
    pub size: i64,
    /// MIME type. Empty means unknown; renderers substitute a default.
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub mime: String,
}

/// A user message with optional attachments, queued for the agent to consume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedMessage {
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<FileRef>,
}

/// Event discriminant, serialized as the wire `type` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "agentMessage")]
    AgentMessage,
    #[serde(rename = "verbalReply")]
    VerbalReply,
    #[serde(rename = "userMessage")]
    UserMessage,
    #[serde(rename = "draw")]
    Draw,
    #[serde(rename = "permissionPrompt")]
    PermissionPrompt,
    #[serde(rename = "permissionResolved")]
    PermissionResolved,
}

/// A chat event broadcast to connected browsers and kept in the event log.
///
/// `seq` is assigned by the bus at publish time and is strictly increasing;
/// `seq == 0` marks log-only entries that are never broadcast. `ts` is unix
/// milliseconds, defaulted at publish time when the producer supplies none.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(default)]
    pub seq: i64,
    #[serde(rename = "ts", default, skip_serializing_if = "is_zero")]
    pub ts: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub quick_replies: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<FileRef>,
    /// Opaque draw instructions. The bus carries this value without ever
    /// interpreting it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tool_use_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tool_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub detail: String,
}

fn is_zero(value: &i64) -> bool {
    *value == 0
}

impl Event {
    /// Bare event of the given kind; sequence and timestamp are assigned by
    /// the bus at publish time.
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            seq: 0,
            ts: 0,
            text: String::new(),
            ack_id: None,
            quick_replies: Vec::new(),
            files: Vec::new(),
            instructions: None,
            tool_use_id: String::new(),
            tool_name: String::new(),
            detail: String::new(),
        }
    }

    pub fn agent_message(text: impl Into<String>) -> Self {
        let mut event = Self::new(EventKind::AgentMessage);
        event.text = text.into();
        event
    }

    pub fn verbal_reply(text: impl Into<String>) -> Self {
        let mut event = Self::new(EventKind::VerbalReply);
        event.text = text.into();
        event
    }

    pub fn user_message(text: impl Into<String>, files: Vec<FileRef>) -> Self {
        let mut event = Self::new(EventKind::UserMessage);
        event.text = text.into();
        event.files = files;
        event
    }

    pub fn draw(instructions: serde_json::Value) -> Self {
        let mut event = Self::new(EventKind::Draw);
        event.instructions = Some(instructions);
        event
    }

    pub fn permission_prompt(
        tool_use_id: impl Into<String>,
        tool_name: impl Into<String>,
        title: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        let mut event = Self::new(EventKind::PermissionPrompt);
        event.tool_use_id = tool_use_id.into();
        event.tool_name = tool_name.into();
        event.text = title.into();
        event.detail = detail.into();
        event
    }

    pub fn permission_resolved(tool_use_id: impl Into<String>) -> Self {
        let mut event = Self::new(EventKind::PermissionResolved);
        event.tool_use_id = tool_use_id.into();
        event
    }

    pub fn with_quick_replies(mut self, quick_replies: Vec<String>) -> Self {
        self.quick_replies = quick_replies;
        self
    }

    pub fn with_files(mut self, files: Vec<FileRef>) -> Self {
        self.files = files;
        self
    }

    pub fn with_ack(mut self, token: impl Into<String>) -> Self {
        self.ack_id = Some(token.into());
        self
    }

    /// Current time in unix milliseconds.
    pub fn now_millis() -> i64 {
        Utc::now().timestamp_millis()
    }
}
