//! cw-core: Rendering, orchestration and persistence for the chat widget.
//!
//! Turns accumulated assistant text into HTML (`markup`, `citation`),
//! drives message views from stream callbacks (`orchestrator`, `view`),
//! and keeps conversation history on disk (`history`).
//! Exposed as a library for integration testing.

pub mod chat;
pub mod citation;
pub mod config;
pub mod history;
pub mod markup;
pub mod orchestrator;
pub mod view;

pub use citation::{apply_citations, render_reference_list, render_source_list};
pub use markup::{render_markup, RenderOptions};
pub use orchestrator::{ChatMessage, ChatSession, MessageStream, MessageView};
pub use view::{HtmlView, ProgressOutput};
