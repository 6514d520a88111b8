//! cw-protocol: Shared types for the chat widget streaming pipeline.
//!
//! This crate defines the wire-level event vocabulary, the records carried
//! inside event payloads, and the request shapes sent to the chat endpoint.

pub mod context;
pub mod event;
pub mod message;

pub use context::{ChatRequest, ChatTurn, Role};
pub use event::{decode_content, decode_error_message, ContentPayload, ProtocolEvent};
pub use message::{
    InlineSourceRecord, LegacyReferenceSet, ReferenceDocument, ReferenceMetadata, StreamResult,
};
