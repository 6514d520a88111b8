//! Per-stream state machine folding protocol events into a [`StreamResult`].
//!
//! States: `Streaming` on construction, then `Completed` on `done` or at end
//! of input, or `Failed` on an `error` event or transport failure. Events are
//! applied strictly in arrival order and every handler callback runs
//! synchronously inside the pull loop.

use std::fmt::Display;

use bytes::Bytes;
use cw_protocol::{
    decode_content, decode_error_message, InlineSourceRecord, LegacyReferenceSet,
    ProtocolEvent, StreamResult,
};
use futures::{Stream, StreamExt};

use crate::error::StreamError;
use crate::sse::FrameParser;

/// Consumer callbacks. Exactly one of `on_complete`/`on_error` fires per stream.
pub trait StreamHandler {
    /// A content delta arrived. `accumulated` already includes `delta`.
    fn on_chunk(&mut self, _delta: &str, _accumulated: &str, _message_id: Option<&str>) {}

    fn on_references(&mut self, _references: &LegacyReferenceSet) {}

    fn on_source(&mut self, _source: &InlineSourceRecord) {}

    fn on_complete(&mut self, _result: &StreamResult) {}

    fn on_error(&mut self, _error: &StreamError) {}
}

impl StreamHandler for () {}

impl<H: StreamHandler + ?Sized> StreamHandler for &mut H {
    fn on_chunk(&mut self, delta: &str, accumulated: &str, message_id: Option<&str>) {
        (**self).on_chunk(delta, accumulated, message_id);
    }

    fn on_references(&mut self, references: &LegacyReferenceSet) {
        (**self).on_references(references);
    }

    fn on_source(&mut self, source: &InlineSourceRecord) {
        (**self).on_source(source);
    }

    fn on_complete(&mut self, result: &StreamResult) {
        (**self).on_complete(result);
    }

    fn on_error(&mut self, error: &StreamError) {
        (**self).on_error(error);
    }
}

/// Fan out to two handlers, `A` first.
impl<A: StreamHandler, B: StreamHandler> StreamHandler for (A, B) {
    fn on_chunk(&mut self, delta: &str, accumulated: &str, message_id: Option<&str>) {
        self.0.on_chunk(delta, accumulated, message_id);
        self.1.on_chunk(delta, accumulated, message_id);
    }

    fn on_references(&mut self, references: &LegacyReferenceSet) {
        self.0.on_references(references);
        self.1.on_references(references);
    }

    fn on_source(&mut self, source: &InlineSourceRecord) {
        self.0.on_source(source);
        self.1.on_source(source);
    }

    fn on_complete(&mut self, result: &StreamResult) {
        self.0.on_complete(result);
        self.1.on_complete(result);
    }

    fn on_error(&mut self, error: &StreamError) {
        self.0.on_error(error);
        self.1.on_error(error);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Streaming,
    Completed,
    Failed,
}

/// Mutable fold state for one request.
#[derive(Debug, Default)]
struct AccumulatorState {
    content: String,
    message_id: Option<String>,
    references: Option<LegacyReferenceSet>,
    sources: Vec<InlineSourceRecord>,
}

impl AccumulatorState {
    fn snapshot(&self) -> StreamResult {
        StreamResult {
            content: self.content.clone(),
            message_id: self.message_id.clone(),
            references: self.references.clone(),
            sources: if self.sources.is_empty() {
                None
            } else {
                Some(self.sources.clone())
            },
        }
    }
}

/// One accumulator per in-flight stream; never shared.
#[derive(Debug)]
pub struct Accumulator {
    parser: FrameParser,
    state: AccumulatorState,
    phase: Phase,
    failure: Option<StreamError>,
}

impl Default for Accumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Accumulator {
    pub fn new() -> Self {
        Self {
            parser: FrameParser::new(),
            state: AccumulatorState::default(),
            phase: Phase::Streaming,
            failure: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Text accumulated so far.
    pub fn content(&self) -> &str {
        &self.state.content
    }

    pub fn sources(&self) -> &[InlineSourceRecord] {
        &self.state.sources
    }

    /// Feed one raw chunk.
    ///
    /// Returns `Ok(Some(result))` when a `done` event completes the stream;
    /// events after it in the same chunk are not applied. Feeding a finished
    /// accumulator is a no-op.
    pub fn feed<H: StreamHandler + ?Sized>(
        &mut self,
        bytes: &[u8],
        handler: &mut H,
    ) -> Result<Option<StreamResult>, StreamError> {
        if self.phase != Phase::Streaming {
            return Ok(None);
        }
        for event in self.parser.push(bytes) {
            if let Some(result) = self.apply(event, handler)? {
                return Ok(Some(result));
            }
        }
        Ok(None)
    }

    /// The byte source ended. Processes any final unterminated line, then
    /// completes with whatever was accumulated if no terminal event arrived.
    pub fn finish<H: StreamHandler + ?Sized>(
        &mut self,
        handler: &mut H,
    ) -> Result<StreamResult, StreamError> {
        match self.phase {
            Phase::Completed => return Ok(self.state.snapshot()),
            Phase::Failed => return Err(self.failure_or_default()),
            Phase::Streaming => {}
        }
        for event in self.parser.finish() {
            if let Some(result) = self.apply(event, handler)? {
                return Ok(result);
            }
        }
        log::debug!("stream ended without a done event; completing implicitly");
        Ok(self.complete(handler))
    }

    /// Record a read failure from the byte source.
    pub fn fail_transport<H: StreamHandler + ?Sized>(
        &mut self,
        message: impl Into<String>,
        handler: &mut H,
    ) -> StreamError {
        let error = StreamError::Transport(message.into());
        log::error!("{error}");
        self.fail(error, handler)
    }

    /// Apply a single classified event.
    pub fn apply<H: StreamHandler + ?Sized>(
        &mut self,
        event: ProtocolEvent,
        handler: &mut H,
    ) -> Result<Option<StreamResult>, StreamError> {
        if self.phase != Phase::Streaming {
            return Ok(None);
        }

        match event {
            ProtocolEvent::ContentDelta { raw_payload } => {
                let payload = decode_content(&raw_payload);
                if let Some(id) = payload.message_id() {
                    self.state.message_id = Some(id.to_string());
                }
                if let Some(delta) = payload.delta() {
                    self.state.content.push_str(delta);
                    handler.on_chunk(
                        delta,
                        &self.state.content,
                        self.state.message_id.as_deref(),
                    );
                }
            }
            ProtocolEvent::LegacyReferences { payload } => {
                match LegacyReferenceSet::from_payload(&payload) {
                    Ok(references) => {
                        handler.on_references(&references);
                        self.state.references = Some(references);
                    }
                    Err(e) => log::warn!("dropping malformed references payload: {e}"),
                }
            }
            ProtocolEvent::InlineSource { payload } => {
                match InlineSourceRecord::from_payload(&payload) {
                    Ok(source) => {
                        if self
                            .state
                            .sources
                            .iter()
                            .any(|s| s.source_id == source.source_id)
                        {
                            log::debug!("ignoring duplicate source {}", source.source_id);
                        } else {
                            handler.on_source(&source);
                            self.state.sources.push(source);
                        }
                    }
                    Err(e) => log::warn!("dropping malformed message_source payload: {e}"),
                }
            }
            ProtocolEvent::Done => {
                return Ok(Some(self.complete(handler)));
            }
            ProtocolEvent::StreamError { payload } => {
                let error = StreamError::Protocol(decode_error_message(&payload));
                log::warn!("server reported stream error: {error}");
                return Err(self.fail(error, handler));
            }
            ProtocolEvent::Unknown {
                event_name,
                payload,
            } => {
                log::debug!(
                    "ignoring event {:?} ({} bytes of data)",
                    event_name.as_deref().unwrap_or(""),
                    payload.len()
                );
            }
        }

        Ok(None)
    }

    fn complete<H: StreamHandler + ?Sized>(&mut self, handler: &mut H) -> StreamResult {
        self.phase = Phase::Completed;
        let result = self.state.snapshot();
        handler.on_complete(&result);
        result
    }

    fn fail<H: StreamHandler + ?Sized>(&mut self, error: StreamError, handler: &mut H) -> StreamError {
        self.phase = Phase::Failed;
        handler.on_error(&error);
        self.failure = Some(error.clone());
        error
    }

    fn failure_or_default(&self) -> StreamError {
        self.failure
            .clone()
            .unwrap_or_else(|| StreamError::Protocol("stream failed".to_string()))
    }
}

/// Drive one stream to completion: read a chunk, process it, repeat.
///
/// Stops reading as soon as a `done` or `error` event is seen. A source
/// that simply ends is an implicit completion; a source that yields an
/// error fails the stream.
pub async fn process_stream<S, E, H>(mut stream: S, handler: &mut H) -> Result<StreamResult, StreamError>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: Display,
    H: StreamHandler + ?Sized,
{
    let mut accumulator = Accumulator::new();

    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(bytes) => {
                if let Some(result) = accumulator.feed(&bytes, handler)? {
                    return Ok(result);
                }
            }
            Err(e) => return Err(accumulator.fail_transport(e.to_string(), handler)),
        }
    }

    accumulator.finish(handler)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct Recorder {
        chunks: Vec<(String, String, Option<String>)>,
        sources: Vec<String>,
        references: usize,
        completed: Vec<StreamResult>,
        errors: Vec<StreamError>,
    }

    impl StreamHandler for Recorder {
        fn on_chunk(&mut self, delta: &str, accumulated: &str, message_id: Option<&str>) {
            self.chunks.push((
                delta.to_string(),
                accumulated.to_string(),
                message_id.map(str::to_string),
            ));
        }

        fn on_references(&mut self, _references: &LegacyReferenceSet) {
            self.references += 1;
        }

        fn on_source(&mut self, source: &InlineSourceRecord) {
            self.sources.push(source.source_id.clone());
        }

        fn on_complete(&mut self, result: &StreamResult) {
            self.completed.push(result.clone());
        }

        fn on_error(&mut self, error: &StreamError) {
            self.errors.push(error.clone());
        }
    }

    fn chunks(parts: Vec<&'static str>) -> impl Stream<Item = Result<Bytes, std::io::Error>> {
        futures::stream::iter(parts.into_iter().map(|s| Ok(Bytes::from(s))))
    }

    #[tokio::test]
    async fn single_delta_then_done() {
        let mut rec = Recorder::default();
        let result = process_stream(
            chunks(vec![
                "event: assistant_write\ndata: {\"content\":\"Hi\"}\n\n",
                "event: done\ndata: {}\n\n",
            ]),
            &mut rec,
        )
        .await
        .unwrap();

        assert_eq!(
            rec.chunks,
            vec![("Hi".to_string(), "Hi".to_string(), None)]
        );
        assert_eq!(
            result,
            StreamResult {
                content: "Hi".to_string(),
                message_id: None,
                references: None,
                sources: None,
            }
        );
        assert_eq!(rec.completed, vec![result]);
        assert!(rec.errors.is_empty());
    }

    #[tokio::test]
    async fn plain_text_payload_is_verbatim_delta() {
        let mut rec = Recorder::default();
        let result = process_stream(
            chunks(vec!["event: assistant_write\ndata: plain text\n\nevent: done\ndata: {}\n\n"]),
            &mut rec,
        )
        .await
        .unwrap();
        assert_eq!(rec.chunks[0].0, "plain text");
        assert_eq!(result.content, "plain text");
    }

    #[tokio::test]
    async fn message_id_first_value_survives_later_nulls() {
        let mut rec = Recorder::default();
        let result = process_stream(
            chunks(vec![
                "event: assistant_write\ndata: {\"content\":\"a\",\"messageId\":\"m1\"}\n\n",
                "event: assistant_write\ndata: {\"content\":\"b\"}\n\n",
                "event: assistant_write\ndata: {\"content\":\"c\",\"messageId\":\"m2\"}\n\n",
            ]),
            &mut rec,
        )
        .await
        .unwrap();

        assert_eq!(rec.chunks[1].2.as_deref(), Some("m1"));
        assert_eq!(rec.chunks[2].2.as_deref(), Some("m2"));
        assert_eq!(result.message_id.as_deref(), Some("m2"));
        assert_eq!(result.content, "abc");
    }

    #[tokio::test]
    async fn implicit_completion_without_done() {
        let mut rec = Recorder::default();
        let result = process_stream(
            chunks(vec![
                "event: assistant_write\ndata: {\"content\":\"Hello, \"}\n\n",
                "event: assistant_write\ndata: {\"content\":\"world\"}\n\n",
            ]),
            &mut rec,
        )
        .await
        .unwrap();
        assert_eq!(result.content, "Hello, world");
        assert_eq!(rec.completed.len(), 1);
    }

    #[tokio::test]
    async fn error_event_fails_stream() {
        let mut rec = Recorder::default();
        let err = process_stream(
            chunks(vec![
                "event: assistant_write\ndata: {\"content\":\"partial\"}\n\n",
                "event: error\ndata: {\"message\":\"boom\"}\n\n",
                "event: done\ndata: {}\n\n",
            ]),
            &mut rec,
        )
        .await
        .unwrap_err();

        assert_eq!(err, StreamError::Protocol("boom".to_string()));
        assert_eq!(err.to_string(), "boom");
        assert!(rec.completed.is_empty());
        assert_eq!(rec.errors, vec![err]);
    }

    #[tokio::test]
    async fn raw_error_payload_is_message() {
        let err = process_stream(chunks(vec!["event: error\ndata: rate limited\n"]), &mut ())
            .await
            .unwrap_err();
        assert_eq!(err.message(), "rate limited");
    }

    #[tokio::test]
    async fn transport_failure_propagates() {
        let stream = futures::stream::iter(vec![
            Ok(Bytes::from_static(b"event: assistant_write\ndata: a\n")),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
        ]);
        let mut rec = Recorder::default();
        let err = process_stream(stream, &mut rec).await.unwrap_err();
        assert!(matches!(err, StreamError::Transport(_)));
        assert_eq!(rec.errors.len(), 1);
        assert!(rec.completed.is_empty());
    }

    #[tokio::test]
    async fn done_stops_consuming_the_source() {
        let stream = futures::stream::iter(vec![
            Ok(Bytes::from_static(b"event: done\ndata: {}\n\n")),
            Err(std::io::Error::new(std::io::ErrorKind::Other, "never read")),
        ]);
        let result = process_stream(stream, &mut ()).await.unwrap();
        assert_eq!(result.content, "");
    }

    #[test]
    fn events_after_done_in_same_chunk_are_ignored() {
        let mut acc = Accumulator::new();
        let mut rec = Recorder::default();
        let result = acc
            .feed(
                b"event: done\ndata: {}\n\nevent: assistant_write\ndata: late\n\n",
                &mut rec,
            )
            .unwrap()
            .unwrap();
        assert_eq!(result.content, "");
        assert!(rec.chunks.is_empty());
        assert_eq!(acc.phase(), Phase::Completed);
        assert_eq!(acc.feed(b"more", &mut rec).unwrap(), None);
        assert_eq!(acc.finish(&mut rec).unwrap(), result);
        assert_eq!(rec.completed.len(), 1);
    }

    #[test]
    fn sources_keep_arrival_order_and_skip_duplicates() {
        let mut acc = Accumulator::new();
        let mut rec = Recorder::default();
        acc.feed(
            b"event: message_source\ndata: {\"sourceId\":\"b\",\"documentId\":\"2\",\"documentName\":\"B\"}\n\n\
              event: message_source\ndata: {\"sourceId\":\"a\",\"documentId\":\"1\",\"documentName\":\"A\"}\n\n\
              event: message_source\ndata: {\"sourceId\":\"b\",\"documentId\":\"2\",\"documentName\":\"B\"}\n\n",
            &mut rec,
        )
        .unwrap();
        let result = acc.finish(&mut rec).unwrap();
        assert_eq!(rec.sources, vec!["b", "a"]);
        let ids: Vec<_> = result
            .sources
            .unwrap()
            .into_iter()
            .map(|s| s.source_id)
            .collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[test]
    fn malformed_source_and_references_are_dropped() {
        let mut acc = Accumulator::new();
        let mut rec = Recorder::default();
        acc.feed(
            b"event: message_source\ndata: {broken\n\nevent: references\ndata: nope\n\n",
            &mut rec,
        )
        .unwrap();
        let result = acc.finish(&mut rec).unwrap();
        assert!(rec.sources.is_empty());
        assert_eq!(rec.references, 0);
        assert_eq!(result.sources, None);
        assert_eq!(result.references, None);
        assert_eq!(acc.phase(), Phase::Completed);
    }

    #[test]
    fn references_last_write_wins() {
        let mut acc = Accumulator::new();
        let mut rec = Recorder::default();
        acc.feed(
            b"event: references\ndata: {\"documents\":[{\"id\":\"1\",\"name\":\"first\"}]}\n\n\
              event: references\ndata: {\"references\":{\"documents\":[{\"id\":\"2\",\"name\":\"second\"}]}}\n\n",
            &mut rec,
        )
        .unwrap();
        let result = acc.finish(&mut rec).unwrap();
        assert_eq!(rec.references, 2);
        assert_eq!(result.references.unwrap().documents[0].name, "second");
    }

    #[test]
    fn unknown_events_change_nothing() {
        let mut acc = Accumulator::new();
        acc.feed(b"event: heartbeat\ndata: {\"content\":\"x\"}\n\n", &mut ())
            .unwrap();
        assert_eq!(acc.content(), "");
        assert_eq!(acc.phase(), Phase::Streaming);
    }

    #[test]
    fn failed_accumulator_reports_same_error() {
        let mut acc = Accumulator::new();
        let err = acc
            .feed(b"event: error\ndata: {\"message\":\"nope\"}\n", &mut ())
            .unwrap_err();
        assert_eq!(acc.phase(), Phase::Failed);
        assert_eq!(acc.finish(&mut ()).unwrap_err(), err);
    }

    #[test]
    fn final_unterminated_line_is_applied() {
        let mut acc = Accumulator::new();
        let mut rec = Recorder::default();
        acc.feed(b"event: assistant_write\ndata: {\"content\":\"end\"}", &mut rec)
            .unwrap();
        assert!(rec.chunks.is_empty());
        let result = acc.finish(&mut rec).unwrap();
        assert_eq!(result.content, "end");
    }

    #[tokio::test]
    async fn pair_handler_notifies_both_in_order() {
        let mut pair = (Recorder::default(), Recorder::default());
        process_stream(
            chunks(vec!["event: assistant_write\ndata: x\n\nevent: done\ndata: {}\n\n"]),
            &mut pair,
        )
        .await
        .unwrap();
        assert_eq!(pair.0.chunks, pair.1.chunks);
        assert_eq!(pair.0.completed.len(), 1);
        assert_eq!(pair.1.completed.len(), 1);
    }
}
