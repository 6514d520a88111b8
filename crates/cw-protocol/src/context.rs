//! Request types sent to the chat endpoint.

use serde::{Deserialize, Serialize};

/// Role in a conversation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One prior or current turn in the request body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Body of `POST /v1/endpoints/{id}/chat`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatRequest {
    pub messages: Vec<ChatTurn>,
    pub streaming: bool,
}

impl ChatRequest {
    pub fn streaming(messages: Vec<ChatTurn>) -> Self {
        Self {
            messages,
            streaming: true,
        }
    }

    pub fn non_streaming(messages: Vec<ChatTurn>) -> Self {
        Self {
            messages,
            streaming: false,
        }
    }
}
