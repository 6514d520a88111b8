//! Incremental frame parser for the chat response stream.
//!
//! The wire format is line oriented:
//!
//! ```text
//! event: assistant_write
//! id: 17
//! data: {"content":"Hel"}
//!
//! ```
//!
//! Chunks may split a line, a frame, or a multi-byte character anywhere.
//! Only complete lines are interpreted; the trailing partial line stays
//! buffered until the next chunk arrives.

use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use cw_protocol::ProtocolEvent;
use futures::Stream;

const EVENT_PREFIX: &str = "event:";
const ID_PREFIX: &str = "id:";
const DATA_PREFIX: &str = "data:";

/// Streaming UTF-8 decoder that defers incomplete trailing sequences.
///
/// Invalid sequences become U+FFFD; a sequence that is merely cut off at
/// the end of a chunk is held back and completed by the next chunk.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode as much of `bytes` (after any deferred bytes) as possible.
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        let mut buf = std::mem::take(&mut self.pending);
        buf.extend_from_slice(bytes);

        let mut out = String::with_capacity(buf.len());
        let mut rest: &[u8] = &buf;
        loop {
            match std::str::from_utf8(rest) {
                Ok(s) => {
                    out.push_str(s);
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    out.push_str(std::str::from_utf8(valid).unwrap_or_default());
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            self.pending = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    /// Flush deferred bytes at end of input. A truncated sequence decodes lossily.
    pub fn flush(&mut self) -> String {
        if self.pending.is_empty() {
            return String::new();
        }
        let pending = std::mem::take(&mut self.pending);
        String::from_utf8_lossy(&pending).into_owned()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

/// Push parser: raw byte chunks in, protocol events out.
#[derive(Debug, Default)]
pub struct FrameParser {
    decoder: Utf8Decoder,
    /// Incomplete last line carried across chunks.
    line_buf: String,
    /// Most recent `event:` name. Blank lines do not reset it.
    current_event: Option<String>,
}

impl FrameParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk. Returns the events completed by it, in order.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<ProtocolEvent> {
        let text = self.decoder.decode(bytes);
        // Only the new text can hold a terminator; the buffer held none.
        let Some(newline_in_text) = text.rfind('\n') else {
            self.line_buf.push_str(&text);
            return Vec::new();
        };
        let last_newline = self.line_buf.len() + newline_in_text;
        self.line_buf.push_str(&text);

        let rest = self.line_buf.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.line_buf, rest);

        complete[..last_newline]
            .split('\n')
            .filter_map(|line| self.process_line(line))
            .collect()
    }

    /// Signal end of input. The unterminated final line, if any, is
    /// processed as a complete line.
    pub fn finish(&mut self) -> Vec<ProtocolEvent> {
        let tail = self.decoder.flush();
        self.line_buf.push_str(&tail);
        let line = std::mem::take(&mut self.line_buf);
        self.process_line(&line).into_iter().collect()
    }

    /// The event name that the next `data:` line will be paired with.
    pub fn current_event(&self) -> Option<&str> {
        self.current_event.as_deref()
    }

    /// Bytes or characters still waiting for a line terminator.
    pub fn has_partial(&self) -> bool {
        !self.line_buf.is_empty() || self.decoder.has_pending()
    }

    fn process_line(&mut self, line: &str) -> Option<ProtocolEvent> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        if let Some(name) = line.strip_prefix(EVENT_PREFIX) {
            self.current_event = Some(name.trim().to_string());
            return None;
        }

        if line.starts_with(ID_PREFIX) {
            return None;
        }

        if let Some(value) = line.strip_prefix(DATA_PREFIX) {
            // One optional space separates the field from its value.
            let payload = value.strip_prefix(' ').unwrap_or(value);
            return Some(ProtocolEvent::classify(self.current_event.as_deref(), payload));
        }

        None
    }
}

/// Stream wrapper that parses protocol events from a byte stream.
pub struct FrameStream<S> {
    inner: S,
    parser: FrameParser,
    pending: VecDeque<ProtocolEvent>,
    ended: bool,
}

impl<S> FrameStream<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            parser: FrameParser::new(),
            pending: VecDeque::new(),
            ended: false,
        }
    }
}

impl<S, E> Stream for FrameStream<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    type Item = Result<ProtocolEvent, E>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;

        loop {
            if let Some(event) = this.pending.pop_front() {
                return Poll::Ready(Some(Ok(event)));
            }
            if this.ended {
                return Poll::Ready(None);
            }

            match Pin::new(&mut this.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    this.pending.extend(this.parser.push(&bytes));
                }
                Poll::Ready(Some(Err(e))) => {
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => {
                    this.ended = true;
                    this.pending.extend(this.parser.finish());
                }
                Poll::Pending => {
                    return Poll::Pending;
                }
            }
        }
    }
}

/// Create a protocol event stream from a byte stream.
pub fn parse_frame_stream<S, E>(stream: S) -> FrameStream<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    FrameStream::new(stream)
}
