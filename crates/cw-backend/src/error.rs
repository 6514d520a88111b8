use thiserror::Error;

/// Fatal conditions for a single stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    /// The server sent an explicit `error` event.
    #[error("{0}")]
    Protocol(String),
    /// Reading the byte source failed.
    #[error("transport failure: {0}")]
    Transport(String),
}

impl StreamError {
    pub fn message(&self) -> &str {
        match self {
            Self::Protocol(msg) | Self::Transport(msg) => msg,
        }
    }
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("API error: {0}")]
    Api(String),
    #[error(transparent)]
    Stream(#[from] StreamError),
}
