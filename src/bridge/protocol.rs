//! Wire formats on both sides of the bridge and the translation between them.
//!
//! The client dialect is keyed on `type`, the upstream dialect on
//! `message_type`. Audio payloads are opaque base64 strings and are never
//! decoded here.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Upstream message kinds that are vendor-specific spellings of "error".
const UPSTREAM_ERROR_KINDS: &[&str] = &[
    "error",
    "auth_error",
    "quota_exceeded",
    "throttled",
    "commit_throttled",
    "rate_limited",
    "resource_exhausted",
];

/// Fields consulted, in order, for a human-readable upstream error message.
const ERROR_MESSAGE_FIELDS: &[&str] = &["error", "message", "detail", "reason"];

/// A message sent by the downstream client.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// One chunk of base64 audio. `commit` closes the current utterance.
    Audio {
        base64: String,
        #[serde(default)]
        commit: Option<bool>,
    },
}

impl ClientMessage {
    /// Parse a client text frame. Anything that is not a well-formed `audio`
    /// message comes back as an error describing why it was rejected.
    pub fn parse(text: &str) -> Result<Self, String> {
        serde_json::from_str(text).map_err(|err| err.to_string())
    }
}

/// An event sent to the downstream client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// The upstream handshake completed; audio is now forwarded.
    Connected,
    Partial { text: String },
    Final { text: String },
    /// Carries the vendor's session identifier untouched.
    SessionStarted { session_id: Value },
    Error { error: String },
}

impl ClientEvent {
    pub fn error(message: impl Into<String>) -> Self {
        ClientEvent::Error { error: message.into() }
    }

    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientEvent::Connected => "connected",
            ClientEvent::Partial { .. } => "partial",
            ClientEvent::Final { .. } => "final",
            ClientEvent::SessionStarted { .. } => "session_started",
            ClientEvent::Error { .. } => "error",
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// One audio chunk as the upstream expects it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpstreamAudioFrame {
    pub audio_base_64: String,
    pub commit: bool,
    pub sample_rate: u32,
}

impl UpstreamAudioFrame {
    /// Translate a client audio chunk. The sample rate is the session's, not
    /// anything the client said.
    pub fn from_client(base64: String, commit: Option<bool>, sample_rate: u32) -> Self {
        Self {
            audio_base_64: base64,
            commit: commit.unwrap_or(false),
            sample_rate,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&UpstreamRequest::InputAudioChunk(self.clone()))
    }
}

/// Envelope for everything the bridge sends upstream.
#[derive(Debug, Serialize)]
#[serde(tag = "message_type", rename_all = "snake_case")]
enum UpstreamRequest {
    InputAudioChunk(UpstreamAudioFrame),
}

/// What to do with one upstream text frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Translation {
    Forward(ClientEvent),
    /// Valid JSON with a `message_type` the bridge does not relay.
    Unrecognized(String),
    /// Not JSON, or JSON without a usable shape.
    Malformed(String),
}

/// Map one upstream text frame onto the client dialect.
pub fn translate_upstream(text: &str) -> Translation {
    let value: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(err) => return Translation::Malformed(err.to_string()),
    };

    let Some(message) = value.as_object() else {
        return Translation::Malformed("expected a JSON object".to_string());
    };

    let kind = message
        .get("message_type")
        .and_then(Value::as_str)
        .unwrap_or_default();

    match kind {
        "partial_transcript" => Translation::Forward(ClientEvent::Partial {
            text: text_field(message),
        }),
        "committed_transcript" | "committed_transcript_with_timestamps" => {
            Translation::Forward(ClientEvent::Final {
                text: text_field(message),
            })
        }
        "session_started" => Translation::Forward(ClientEvent::SessionStarted {
            session_id: message.get("session_id").cloned().unwrap_or(Value::Null),
        }),
        kind if UPSTREAM_ERROR_KINDS.contains(&kind) || message.contains_key("error") => {
            Translation::Forward(ClientEvent::Error {
                error: error_message(message, kind),
            })
        }
        "" => Translation::Malformed("missing message_type".to_string()),
        other => Translation::Unrecognized(other.to_string()),
    }
}

fn text_field(message: &Map<String, Value>) -> String {
    message
        .get("text")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// First non-empty message among the known fields, else a generic label.
fn error_message(message: &Map<String, Value>, kind: &str) -> String {
    ERROR_MESSAGE_FIELDS
        .iter()
        .filter_map(|field| message.get(*field))
        .find_map(|value| match value {
            Value::String(text) if !text.trim().is_empty() => Some(text.clone()),
            // Some vendors nest the details: {"error": {"message": "..."}}
            Value::Object(inner) => inner
                .get("message")
                .and_then(Value::as_str)
                .filter(|text| !text.trim().is_empty())
                .map(str::to_string),
            _ => None,
        })
        .unwrap_or_else(|| {
            if kind.is_empty() {
                "Upstream error".to_string()
            } else {
                format!("Upstream error ({kind})")
            }
        })
}
