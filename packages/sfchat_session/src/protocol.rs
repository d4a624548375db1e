//! Wire frames.
//!
//! Every frame is a JSON object with a `type` discriminator. Inbound frames
//! are decoded into [`InboundFrame`]; outbound ones are built as
//! [`OutboundFrame`] and serialized with [`OutboundFrame::encode`].
//!
//! ```text
//! client -> server   {"type":"auth","password":...}
//!                    {"type":"loadHistory","userQQ":...,"mode":...,"timestamp":...}
//!                    {"type":<mode>,"content":...,"timestamp":...,"images":[...]?,"userQQ":...}
//! server -> client   {"type":"auth","success":bool}
//!                    {"type":"history","messages":[{"content":...,"role":...}]}
//!                    {"type":"error","content":...}
//!                    {"content":...}   (any other or missing type)
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;
use crate::mode::Mode;
use crate::transcript::Origin;

pub const KIND_AUTH: &str = "auth";
pub const KIND_ERROR: &str = "error";
pub const KIND_HISTORY: &str = "history";
pub const KIND_LOAD_HISTORY: &str = "loadHistory";

/// Frames the client understands.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InboundFrame {
    AuthResult { success: bool },
    Error { content: String },
    History { messages: Vec<HistoryEntry> },
    /// A peer chat turn; `content` is already trimmed and non-empty.
    Content { content: String },
    /// Unknown kind without usable content. Kept for logging only.
    Ignored { kind: Option<String> },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HistoryEntry {
    pub origin: Origin,
    pub content: String,
}

/// Loose view of an inbound object; field presence varies per kind.
#[derive(Debug, Default, Deserialize)]
struct RawFrame {
    #[serde(rename = "type", default)]
    kind: Option<Value>,
    #[serde(default)]
    success: Option<Value>,
    #[serde(default)]
    content: Option<Value>,
    #[serde(default)]
    messages: Option<Value>,
}

/// Decode one inbound text frame.
pub fn decode(text: &str) -> Result<InboundFrame, ProtocolError> {
    let value: Value = serde_json::from_str(text)?;
    if !value.is_object() {
        return Err(ProtocolError::NotAnObject);
    }
    let raw: RawFrame = serde_json::from_value(value)?;
    let kind = raw.kind.as_ref().and_then(Value::as_str);

    let frame = match kind {
        Some(KIND_AUTH) => InboundFrame::AuthResult {
            success: matches!(raw.success, Some(Value::Bool(true))),
        },
        Some(KIND_ERROR) => InboundFrame::Error {
            content: raw.content.as_ref().map(display_value).unwrap_or_default(),
        },
        Some(KIND_HISTORY) => InboundFrame::History {
            messages: history_entries(raw.messages.as_ref()),
        },
        _ => match raw.content.as_ref().and_then(Value::as_str).map(str::trim) {
            Some(content) if !content.is_empty() => InboundFrame::Content {
                content: content.to_string(),
            },
            _ => InboundFrame::Ignored {
                kind: kind.map(str::to_string),
            },
        },
    };
    Ok(frame)
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn history_entries(messages: Option<&Value>) -> Vec<HistoryEntry> {
    let Some(Value::Array(items)) = messages else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| {
            let content = item.get("content")?.as_str()?;
            if content.is_empty() {
                return None;
            }
            let origin = match item.get("role").and_then(Value::as_str) {
                Some("user") => Origin::LocalUser,
                _ => Origin::RemotePeer,
            };
            Some(HistoryEntry {
                origin,
                content: content.to_string(),
            })
        })
        .collect()
}

/// Frames the client sends.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutboundFrame {
    Auth {
        password: String,
    },
    LoadHistory {
        user_id: String,
        mode: Mode,
        timestamp: i64,
    },
    Chat {
        mode: Mode,
        content: String,
        timestamp: i64,
        images: Vec<String>,
        user_id: String,
    },
}

#[derive(Serialize)]
struct AuthWire<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    password: &'a str,
}

#[derive(Serialize)]
struct LoadHistoryWire<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(rename = "userQQ")]
    user_id: &'a str,
    mode: Mode,
    timestamp: i64,
}

#[derive(Serialize)]
struct ChatWire<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    content: &'a str,
    timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    images: Option<&'a [String]>,
    #[serde(rename = "userQQ")]
    user_id: &'a str,
}

impl OutboundFrame {
    /// The frame's `type` on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundFrame::Auth { .. } => KIND_AUTH,
            OutboundFrame::LoadHistory { .. } => KIND_LOAD_HISTORY,
            OutboundFrame::Chat { mode, .. } => mode.as_str(),
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        match self {
            OutboundFrame::Auth { password } => serde_json::to_string(&AuthWire {
                kind: KIND_AUTH,
                password,
            }),
            OutboundFrame::LoadHistory {
                user_id,
                mode,
                timestamp,
            } => serde_json::to_string(&LoadHistoryWire {
                kind: KIND_LOAD_HISTORY,
                user_id,
                mode: *mode,
                timestamp: *timestamp,
            }),
            OutboundFrame::Chat {
                mode,
                content,
                timestamp,
                images,
                user_id,
            } => serde_json::to_string(&ChatWire {
                kind: mode.as_str(),
                content,
                timestamp: *timestamp,
                images: (!images.is_empty()).then_some(images.as_slice()),
                user_id,
            }),
        }
    }
}
