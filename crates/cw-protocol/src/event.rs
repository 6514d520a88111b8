//! Protocol events produced by the frame parser.
//!
//! Each event keeps its payload as the raw `data:` string. Interpreting the
//! payload (JSON envelope or plain text) is deferred to the consumer so that
//! malformed payloads can be recovered per event kind.

use serde_json::Value;

/// Event names recognized on the wire.
pub mod names {
    pub const ASSISTANT_WRITE: &str = "assistant_write";
    pub const REFERENCES: &str = "references";
    pub const MESSAGE_SOURCE: &str = "message_source";
    pub const DONE: &str = "done";
    pub const ERROR: &str = "error";
}

/// A classified event from the response stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolEvent {
    /// Incremental assistant text (`assistant_write`).
    ContentDelta { raw_payload: String },
    /// Single-shot legacy reference list (`references`).
    LegacyReferences { payload: String },
    /// One citation source (`message_source`).
    InlineSource { payload: String },
    /// Terminal signal (`done`).
    Done,
    /// Server-reported failure (`error`).
    StreamError { payload: String },
    /// Any other event name, or a `data:` line with no preceding `event:` line.
    Unknown {
        event_name: Option<String>,
        payload: String,
    },
}

impl ProtocolEvent {
    /// Classify a `data:` payload by the most recently seen event name.
    /// Matching is case-sensitive.
    pub fn classify(event_name: Option<&str>, payload: &str) -> Self {
        match event_name {
            Some(names::ASSISTANT_WRITE) => Self::ContentDelta {
                raw_payload: payload.to_string(),
            },
            Some(names::REFERENCES) => Self::LegacyReferences {
                payload: payload.to_string(),
            },
            Some(names::MESSAGE_SOURCE) => Self::InlineSource {
                payload: payload.to_string(),
            },
            Some(names::DONE) => Self::Done,
            Some(names::ERROR) => Self::StreamError {
                payload: payload.to_string(),
            },
            other => Self::Unknown {
                event_name: other.map(str::to_string),
                payload: payload.to_string(),
            },
        }
    }

    /// Whether this event ends the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::StreamError { .. })
    }
}

/// Interpretation of an `assistant_write` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentPayload {
    /// The payload parsed as JSON. Either field may be absent.
    Envelope {
        content: Option<String>,
        message_id: Option<String>,
    },
    /// The payload was not JSON; the whole string is the delta.
    Plain(String),
}

impl ContentPayload {
    /// The text to append, if any.
    pub fn delta(&self) -> Option<&str> {
        match self {
            Self::Envelope { content, .. } => content.as_deref(),
            Self::Plain(text) => Some(text),
        }
    }

    pub fn message_id(&self) -> Option<&str> {
        match self {
            Self::Envelope { message_id, .. } => message_id.as_deref(),
            Self::Plain(_) => None,
        }
    }
}

/// Decode an `assistant_write` payload.
///
/// Empty `content` strings count as absent. Non-JSON payloads become
/// [`ContentPayload::Plain`] verbatim, including the empty string.
pub fn decode_content(raw: &str) -> ContentPayload {
    match serde_json::from_str::<Value>(raw) {
        Ok(value) => ContentPayload::Envelope {
            content: value
                .get("content")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            message_id: value.get("messageId").and_then(scalar_to_string),
        },
        Err(_) => ContentPayload::Plain(raw.to_string()),
    }
}

/// Extract the message from an `error` payload.
///
/// Uses `.message` when the payload is a JSON object carrying one, otherwise
/// the raw payload string.
pub fn decode_error_message(payload: &str) -> String {
    serde_json::from_str::<Value>(payload)
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| payload.to_string())
}

/// String or number identifiers, rendered as a string. Empty strings are absent.
pub(crate) fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_known_names() {
        assert_eq!(
            ProtocolEvent::classify(Some("assistant_write"), "{}"),
            ProtocolEvent::ContentDelta {
                raw_payload: "{}".to_string()
            }
        );
        assert_eq!(ProtocolEvent::classify(Some("done"), "{}"), ProtocolEvent::Done);
        assert!(matches!(
            ProtocolEvent::classify(Some("message_source"), "x"),
            ProtocolEvent::InlineSource { .. }
        ));
        assert!(matches!(
            ProtocolEvent::classify(Some("references"), "x"),
            ProtocolEvent::LegacyReferences { .. }
        ));
        assert!(ProtocolEvent::classify(Some("error"), "x").is_terminal());
    }

    #[test]
    fn classify_is_case_sensitive() {
        assert_eq!(
            ProtocolEvent::classify(Some("DONE"), ""),
            ProtocolEvent::Unknown {
                event_name: Some("DONE".to_string()),
                payload: String::new(),
            }
        );
    }

    #[test]
    fn classify_without_event_name() {
        assert_eq!(
            ProtocolEvent::classify(None, "orphan"),
            ProtocolEvent::Unknown {
                event_name: None,
                payload: "orphan".to_string(),
            }
        );
    }

    #[test]
    fn decode_content_envelope() {
        let payload = decode_content(r#"{"content":"Hi","messageId":"m1"}"#);
        assert_eq!(payload.delta(), Some("Hi"));
        assert_eq!(payload.message_id(), Some("m1"));
    }

    #[test]
    fn decode_content_plain_text() {
        let payload = decode_content("plain text");
        assert_eq!(payload, ContentPayload::Plain("plain text".to_string()));
        assert_eq!(payload.delta(), Some("plain text"));
        assert_eq!(payload.message_id(), None);
    }

    #[test]
    fn decode_content_without_content_field() {
        let payload = decode_content(r#"{"messageId":42}"#);
        assert_eq!(payload.delta(), None);
        assert_eq!(payload.message_id(), Some("42"));
    }

    #[test]
    fn decode_content_empty_string_is_absent() {
        assert_eq!(decode_content(r#"{"content":""}"#).delta(), None);
    }

    #[test]
    fn decode_error_message_variants() {
        assert_eq!(decode_error_message(r#"{"message":"boom"}"#), "boom");
        assert_eq!(decode_error_message("upstream timeout"), "upstream timeout");
        assert_eq!(decode_error_message(r#"{"code":500}"#), r#"{"code":500}"#);
    }
}
