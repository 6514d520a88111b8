//! Wires accumulator callbacks to a message view and to history.
//!
//! Every content or source event re-renders the full accumulated text
//! through the markup and citation passes. The renderer never sees its own
//! output.

use cw_backend::{StreamError, StreamHandler};
use cw_protocol::{ChatTurn, InlineSourceRecord, LegacyReferenceSet, Role, StreamResult};
use serde::{Deserialize, Serialize};

use crate::citation::{apply_citations, render_reference_list, render_source_list};
use crate::config::{Config, ThemeConfig};
use crate::history::{epoch_secs, generate_message_id, ConversationHistory};
use crate::markup::{render_markup, RenderOptions};

/// One conversation entry, as shown and as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub references: Option<LegacyReferenceSet>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<InlineSourceRecord>,
    pub timestamp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: generate_message_id(),
            role,
            content: content.into(),
            message_id: None,
            references: None,
            sources: Vec::new(),
            timestamp: epoch_secs(),
            error: None,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }

    fn to_turn(&self) -> ChatTurn {
        ChatTurn {
            role: self.role,
            content: self.content.clone(),
        }
    }

    fn absorb(&mut self, result: &StreamResult) {
        self.content = result.content.clone();
        if result.message_id.is_some() {
            self.message_id = result.message_id.clone();
        }
        self.references = result.references.clone();
        self.sources = result.sources.clone().unwrap_or_default();
    }
}

/// Display surface for one message. Every view implements every method;
/// the orchestrator never probes for capabilities.
pub trait MessageView {
    /// Populate a fresh view. Sources and references are set before the
    /// content so citation numbers never point at missing entries.
    fn initialize(&mut self, sources_html: &str, references_html: &str, content_html: &str);

    fn update_content(&mut self, content_html: &str);

    fn set_sources(&mut self, sources_html: &str);

    fn set_references(&mut self, references_html: &str);

    fn show_error(&mut self, message: &str);

    fn apply_theme(&mut self, theme: &ThemeConfig);
}

/// Markup then citations, over the full text.
pub fn render_message(
    content: &str,
    sources: &[InlineSourceRecord],
    options: &RenderOptions,
) -> String {
    apply_citations(&render_markup(content, options), sources)
}

/// Conversation state shared across requests.
pub struct ChatSession {
    history: ConversationHistory,
    messages: Vec<ChatMessage>,
    options: RenderOptions,
    theme: ThemeConfig,
    context_messages: usize,
    /// Index of a user message awaiting its reply before being persisted.
    pending: Option<usize>,
}

impl ChatSession {
    /// Start a session seeded with whatever `history` holds.
    pub fn new(
        history: ConversationHistory,
        options: RenderOptions,
        theme: ThemeConfig,
        context_messages: usize,
    ) -> Self {
        let messages = history.load();
        log::debug!("session restored {} messages", messages.len());
        Self {
            history,
            messages,
            options,
            theme,
            context_messages,
            pending: None,
        }
    }

    pub fn from_config(config: &Config, history: ConversationHistory) -> Self {
        Self::new(
            history,
            config.render.options(),
            config.theme.clone(),
            config.history.context_messages,
        )
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn options(&self) -> &RenderOptions {
        &self.options
    }

    pub fn history_mut(&mut self) -> &mut ConversationHistory {
        &mut self.history
    }

    /// The turns to send for `prompt`: the most recent successful messages
    /// followed by the prompt. Records nothing.
    pub fn context_turns(&self, prompt: &str) -> Vec<ChatTurn> {
        let mut turns: Vec<ChatTurn> = self
            .messages
            .iter()
            .filter(|m| !m.is_failed())
            .map(ChatMessage::to_turn)
            .collect();
        let skip = turns.len().saturating_sub(self.context_messages);
        turns.drain(..skip);
        turns.push(ChatTurn::user(prompt));
        turns
    }

    /// Record the user's prompt and return the turns to send. The prompt is
    /// persisted together with its reply, once the reply completes.
    pub fn begin_user_turn(&mut self, prompt: &str) -> Vec<ChatTurn> {
        let turns = self.context_turns(prompt);
        self.abandon_turn("superseded");
        self.messages.push(ChatMessage::new(Role::User, prompt));
        self.pending = Some(self.messages.len() - 1);
        turns
    }

    /// The pending prompt got no reply. It stays visible but is dropped
    /// from context and never persisted.
    pub fn abandon_turn(&mut self, reason: &str) {
        if let Some(message) = self.pending.take().and_then(|i| self.messages.get_mut(i)) {
            message.error = Some(reason.to_string());
        }
    }

    fn commit_turn(&mut self, reply: ChatMessage) {
        if let Some(prompt) = self.pending.take().and_then(|i| self.messages.get(i)) {
            self.history.append(prompt);
        }
        self.history.append(&reply);
        self.messages.push(reply);
    }

    /// Handler that drives `view` for a new assistant message.
    pub fn stream_into<'a, V: MessageView>(&'a mut self, view: &'a mut V) -> MessageStream<'a, V> {
        view.apply_theme(&self.theme);
        view.initialize("", "", "");
        MessageStream {
            session: self,
            view,
            message: ChatMessage::new(Role::Assistant, ""),
        }
    }

    /// Show a stored message with a single ordered initialization.
    pub fn restore<V: MessageView>(&self, view: &mut V, message: &ChatMessage) {
        view.apply_theme(&self.theme);
        let references = message
            .references
            .as_ref()
            .map(render_reference_list)
            .unwrap_or_default();
        let content = match message.role {
            Role::Assistant => render_message(&message.content, &message.sources, &self.options),
            Role::User => render_markup(&message.content, &self.options),
        };
        view.initialize(&render_source_list(&message.sources), &references, &content);
        if let Some(error) = &message.error {
            view.show_error(error);
        }
    }
}

/// Live assistant message bound to one view for one stream.
pub struct MessageStream<'a, V: MessageView> {
    session: &'a mut ChatSession,
    view: &'a mut V,
    message: ChatMessage,
}

impl<V: MessageView> MessageStream<'_, V> {
    pub fn message(&self) -> &ChatMessage {
        &self.message
    }

    fn render_content(&mut self) {
        let html = render_message(
            &self.message.content,
            &self.message.sources,
            &self.session.options,
        );
        self.view.update_content(&html);
    }
}

impl<V: MessageView> StreamHandler for MessageStream<'_, V> {
    fn on_chunk(&mut self, _delta: &str, accumulated: &str, message_id: Option<&str>) {
        self.message.content = accumulated.to_string();
        if let Some(id) = message_id {
            self.message.message_id = Some(id.to_string());
        }
        self.render_content();
    }

    fn on_references(&mut self, references: &LegacyReferenceSet) {
        self.view.set_references(&render_reference_list(references));
        self.message.references = Some(references.clone());
    }

    fn on_source(&mut self, source: &InlineSourceRecord) {
        self.message.sources.push(source.clone());
        self.view.set_sources(&render_source_list(&self.message.sources));
        // Markers already in the text may now resolve.
        if !self.message.content.is_empty() {
            self.render_content();
        }
    }

    fn on_complete(&mut self, result: &StreamResult) {
        self.message.absorb(result);
        let references = self
            .message
            .references
            .as_ref()
            .map(render_reference_list)
            .unwrap_or_default();
        self.view.set_sources(&render_source_list(&self.message.sources));
        self.view.set_references(&references);
        self.render_content();

        self.session.commit_turn(self.message.clone());
    }

    fn on_error(&mut self, error: &StreamError) {
        log::warn!("assistant message {} failed: {error}", self.message.id);
        self.message.error = Some(error.message().to_string());
        self.view.show_error(error.message());
        // Failed replies stay visible but are never persisted.
        self.session.abandon_turn(error.message());
        self.session.messages.push(self.message.clone());
    }
}
