//! Parsing of agent session JSONL lines.
//!
//! The session file is written by the agent harness, not by this system:
//! assistant entries carry `tool_use` blocks (a sensitive action is about to
//! run), user entries carry `tool_result` blocks (the action finished).

use serde::Deserialize;
use serde_json::Value;

/// A pending tool use that may need user attention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionRequest {
    pub tool_use_id: String,
    pub tool_name: String,
    /// Short human-readable description.
    pub title: String,
    /// The command, file path, pattern, etc.
    pub detail: String,
}

#[derive(Debug, Deserialize)]
struct SessionEntry {
    #[serde(rename = "type", default)]
    entry_type: String,
    #[serde(default)]
    message: SessionMessage,
}

#[derive(Debug, Deserialize, Default)]
struct SessionMessage {
    #[serde(default)]
    role: String,
    #[serde(default)]
    content: Value,
}

/// Parse one JSONL line into new permission requests and resolved tool-use
/// ids. Lines that are not well-formed session entries yield nothing.
pub fn parse_session_line(line: &str) -> (Vec<PermissionRequest>, Vec<String>) {
    let Ok(entry) = serde_json::from_str::<SessionEntry>(line) else {
        return (Vec::new(), Vec::new());
    };

    match entry.entry_type.as_str() {
        "assistant" => (parse_tool_uses(&entry.message), Vec::new()),
        "user" => (Vec::new(), parse_tool_results(&entry.message)),
        _ => (Vec::new(), Vec::new()),
    }
}

fn parse_tool_uses(message: &SessionMessage) -> Vec<PermissionRequest> {
    if message.role != "assistant" {
        return Vec::new();
    }
    let Some(blocks) = message.content.as_array() else {
        return Vec::new();
    };

    blocks
        .iter()
        .filter(|block| block["type"] == "tool_use")
        .filter_map(request_from_block)
        .collect()
}

fn parse_tool_results(message: &SessionMessage) -> Vec<String> {
    if message.role != "user" {
        return Vec::new();
    }
    let Some(blocks) = message.content.as_array() else {
        return Vec::new();
    };

    blocks
        .iter()
        .filter(|block| block["type"] == "tool_result")
        .filter_map(|block| block["tool_use_id"].as_str())
        .filter(|id| !id.is_empty())
        .map(str::to_owned)
        .collect()
}

fn request_from_block(block: &Value) -> Option<PermissionRequest> {
    let tool_use_id = block["id"].as_str()?.to_owned();
    let tool_name = block["name"].as_str().unwrap_or_default().to_owned();
    let input = &block["input"];

    let (mut title, detail) = match tool_name.as_str() {
        "Bash" => (
            string_field(input, "description"),
            string_field(input, "command"),
        ),
        "Read" => {
            let path = string_field(input, "file_path");
            (format!("Read {path}"), path)
        }
        "Write" => {
            let path = string_field(input, "file_path");
            (format!("Write {path}"), path)
        }
        "Edit" => {
            let path = string_field(input, "file_path");
            (format!("Edit {path}"), path)
        }
        "Glob" => (
            format!("Search for {}", string_field(input, "pattern")),
            string_field(input, "path"),
        ),
        "Grep" => (
            format!("Search for '{}'", string_field(input, "pattern")),
            string_field(input, "path"),
        ),
        _ => (tool_name.clone(), String::new()),
    };
    if title.is_empty() {
        title = if detail.is_empty() {
            tool_name.clone()
        } else {
            detail.clone()
        };
    }

    Some(PermissionRequest {
        tool_use_id,
        tool_name,
        title,
        detail,
    })
}

fn string_field(input: &Value, key: &str) -> String {
    input[key].as_str().unwrap_or_default().to_owned()
}
