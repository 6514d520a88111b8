//! Scripted response streams for testing.
//!
//! Produces the exact wire bytes the chat endpoint sends, optionally cut
//! into fixed-size chunks, so every layer above the transport can be
//! exercised without HTTP.

use std::time::Duration;

use async_stream::stream;
use bytes::Bytes;
use cw_protocol::event::names;
use cw_protocol::InlineSourceRecord;
use futures::Stream;
use serde_json::{json, Value};
use tokio::time::sleep;

/// One scripted element of a response.
#[derive(Debug, Clone)]
pub enum MockFrame {
    /// `assistant_write` with a JSON envelope.
    Content {
        content: String,
        message_id: Option<String>,
    },
    /// `assistant_write` whose payload is not JSON.
    PlainContent(String),
    /// `message_source` for one citation source.
    Source(InlineSourceRecord),
    /// `references` with an arbitrary JSON body.
    References(Value),
    /// `error` with a `{message}` envelope.
    Error { message: String },
    /// `done`.
    Done,
    /// Any event name and raw data line.
    Event { name: String, data: String },
    /// Bytes sent verbatim.
    Raw(String),
    /// Pause before the next frame.
    Delay { ms: u64 },
    /// The transport fails at this point.
    Fail { message: String },
}

impl MockFrame {
    pub fn content(text: impl Into<String>) -> Self {
        Self::Content {
            content: text.into(),
            message_id: None,
        }
    }

    pub fn source(source_id: &str, document_name: &str) -> Self {
        Self::Source(InlineSourceRecord {
            source_id: source_id.to_string(),
            document_id: format!("doc-{source_id}"),
            document_name: document_name.to_string(),
            page: None,
            source_type: "kb".to_string(),
        })
    }

    /// Wire bytes for this frame. Control frames encode to nothing.
    pub fn to_wire(&self) -> String {
        match self {
            Self::Content {
                content,
                message_id,
            } => {
                let mut body = json!({ "content": content });
                if let Some(id) = message_id {
                    body["messageId"] = Value::from(id.as_str());
                }
                encode_frame(names::ASSISTANT_WRITE, &body.to_string())
            }
            Self::PlainContent(text) => encode_frame(names::ASSISTANT_WRITE, text),
            Self::Source(source) => encode_frame(
                names::MESSAGE_SOURCE,
                &serde_json::to_string(source).unwrap_or_default(),
            ),
            Self::References(body) => encode_frame(names::REFERENCES, &body.to_string()),
            Self::Error { message } => {
                encode_frame(names::ERROR, &json!({ "message": message }).to_string())
            }
            Self::Done => encode_frame(names::DONE, "{}"),
            Self::Event { name, data } => encode_frame(name, data),
            Self::Raw(text) => text.clone(),
            Self::Delay { .. } | Self::Fail { .. } => String::new(),
        }
    }
}

/// Encode one `event:`/`data:` frame with its terminating blank line.
pub fn encode_frame(event: &str, data: &str) -> String {
    format!("event: {event}\ndata: {data}\n\n")
}

/// Configuration for a mock byte stream.
#[derive(Debug, Clone, Default)]
pub struct MockConfig {
    /// Frames to emit, in order.
    pub frames: Vec<MockFrame>,
    /// Cut the wire bytes into chunks of at most this many bytes.
    /// Chunks may end mid-line or mid-character.
    pub chunk_size: Option<usize>,
    /// Optional delay before each chunk (ms).
    pub chunk_delay_ms: Option<u64>,
}

impl MockConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_frames(mut self, frames: Vec<MockFrame>) -> Self {
        self.frames = frames;
        self
    }

    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = Some(size.max(1));
        self
    }

    pub fn with_chunk_delay(mut self, ms: u64) -> Self {
        self.chunk_delay_ms = Some(ms);
        self
    }

    /// All wire bytes, ignoring control frames.
    pub fn wire_bytes(&self) -> Vec<u8> {
        self.frames
            .iter()
            .map(MockFrame::to_wire)
            .collect::<String>()
            .into_bytes()
    }
}

/// Split `bytes` into chunks of at most `size` bytes (one chunk if `None`).
fn split_chunks(bytes: &[u8], size: Option<usize>) -> Vec<Bytes> {
    if bytes.is_empty() {
        return Vec::new();
    }
    match size {
        Some(n) => bytes.chunks(n).map(Bytes::copy_from_slice).collect(),
        None => vec![Bytes::copy_from_slice(bytes)],
    }
}

/// Create a byte stream from mock config.
///
/// Consecutive wire frames are concatenated before chunking, so chunk
/// boundaries fall independently of frame boundaries. `Delay` and `Fail`
/// flush what has been buffered so far.
pub fn mock_byte_stream(config: MockConfig) -> impl Stream<Item = Result<Bytes, std::io::Error>> {
    stream! {
        let mut buffered: Vec<u8> = Vec::new();

        for frame in config.frames {
            match frame {
                MockFrame::Delay { ms } => {
                    for chunk in split_chunks(&std::mem::take(&mut buffered), config.chunk_size) {
                        if let Some(delay_ms) = config.chunk_delay_ms {
                            sleep(Duration::from_millis(delay_ms)).await;
                        }
                        yield Ok(chunk);
                    }
                    sleep(Duration::from_millis(ms)).await;
                }
                MockFrame::Fail { message } => {
                    for chunk in split_chunks(&std::mem::take(&mut buffered), config.chunk_size) {
                        yield Ok(chunk);
                    }
                    yield Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, message));
                    return;
                }
                other => buffered.extend_from_slice(other.to_wire().as_bytes()),
            }
        }

        for chunk in split_chunks(&buffered, config.chunk_size) {
            if let Some(delay_ms) = config.chunk_delay_ms {
                sleep(Duration::from_millis(delay_ms)).await;
            }
            yield Ok(chunk);
        }
    }
}

/// Built-in test fixtures for common scenarios.
pub mod fixtures {
    use super::*;

    /// Text deltas followed by `done`.
    pub fn streaming_text(chunks: &[&str]) -> MockConfig {
        let mut frames: Vec<MockFrame> = chunks.iter().map(|c| MockFrame::content(*c)).collect();
        frames.push(MockFrame::Done);
        MockConfig::new().with_frames(frames)
    }

    /// Sources interleaved before the text that cites them, then `done`.
    pub fn answer_with_sources(sources: &[(&str, &str)], chunks: &[&str]) -> MockConfig {
        let mut frames: Vec<MockFrame> = sources
            .iter()
            .map(|(id, name)| MockFrame::source(id, name))
            .collect();
        frames.extend(chunks.iter().map(|c| MockFrame::content(*c)));
        frames.push(MockFrame::Done);
        MockConfig::new().with_frames(frames)
    }

    /// Text deltas with no `done`: the connection simply closes.
    pub fn truncated(chunks: &[&str]) -> MockConfig {
        MockConfig::new().with_frames(chunks.iter().map(|c| MockFrame::content(*c)).collect())
    }

    /// Some text, then a server `error` event.
    pub fn error_mid_stream(text_before: &str, error: &str) -> MockConfig {
        MockConfig::new().with_frames(vec![
            MockFrame::content(text_before),
            MockFrame::Error {
                message: error.to_string(),
            },
        ])
    }
}
