//! cw-backend: Response stream pipeline for the chat widget.
//!
//! Turns the chat endpoint's line-oriented event stream into protocol
//! events (`sse`), folds those events into a final result while notifying
//! a handler (`accumulator`), and issues the HTTP request (`client`).

pub mod accumulator;
pub mod client;
pub mod error;
pub mod mock;
pub mod sse;

pub use accumulator::{process_stream, Accumulator, Phase, StreamHandler};
pub use client::ChatClient;
pub use error::{ClientError, StreamError};
pub use mock::{MockConfig, MockFrame};
pub use sse::{parse_frame_stream, FrameParser, FrameStream};
