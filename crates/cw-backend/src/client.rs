//! HTTP client for the chat endpoint.

use std::time::Duration;

use bytes::Bytes;
use cw_protocol::{ChatRequest, ChatTurn, StreamResult};
use futures::Stream;
use reqwest::{Client, RequestBuilder};

use crate::accumulator::{process_stream, StreamHandler};
use crate::error::ClientError;
use crate::sse::{parse_frame_stream, FrameStream};

const API_KEY_HEADER: &str = "x-api-key";
const FEATURE_FLAGS_HEADER: &str = "x-feature-flags";

/// Boxed response body, as handed to the frame parser.
pub type ByteStream = std::pin::Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>;

/// Client for `POST {base}/v1/endpoints/{endpoint_id}/chat`.
#[derive(Debug, Clone)]
pub struct ChatClient {
    base_url: String,
    endpoint_id: String,
    api_key: Option<String>,
    feature_flags: Vec<String>,
    http: Client,
}

/// Build an HTTP client. Only connection setup is bounded; a streamed body
/// may legitimately stay open for a long time.
fn build_http_client() -> Result<Client, ClientError> {
    Ok(Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .pool_max_idle_per_host(2)
        .build()?)
}

impl ChatClient {
    pub fn new(
        base_url: impl Into<String>,
        endpoint_id: impl Into<String>,
    ) -> Result<Self, ClientError> {
        Ok(Self {
            base_url: base_url.into(),
            endpoint_id: endpoint_id.into(),
            api_key: None,
            feature_flags: Vec::new(),
            http: build_http_client()?,
        })
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_feature_flags(mut self, flags: Vec<String>) -> Self {
        self.feature_flags = flags;
        self
    }

    /// Full chat URL for the configured endpoint.
    pub fn chat_url(&self) -> String {
        format!(
            "{}/v1/endpoints/{}/chat",
            self.base_url.trim_end_matches('/'),
            self.endpoint_id
        )
    }

    /// Send a streaming request and fold the response through `handler`.
    pub async fn send_streaming<H>(
        &self,
        turns: &[ChatTurn],
        handler: &mut H,
    ) -> Result<StreamResult, ClientError>
    where
        H: StreamHandler + ?Sized,
    {
        let body = self.open_stream(turns).await?;
        Ok(process_stream(body, handler).await?)
    }

    /// Send a streaming request and return the raw protocol events.
    pub async fn event_stream(&self, turns: &[ChatTurn]) -> Result<FrameStream<ByteStream>, ClientError> {
        Ok(parse_frame_stream(self.open_stream(turns).await?))
    }

    /// Send a non-streaming request. The response body is a single JSON
    /// object shaped like [`StreamResult`].
    pub async fn send(&self, turns: &[ChatTurn]) -> Result<StreamResult, ClientError> {
        let body = ChatRequest::non_streaming(turns.to_vec());
        let response = self.post(&body).await?;
        let text = response.text().await?;
        decode_result(&text)
    }

    async fn open_stream(&self, turns: &[ChatTurn]) -> Result<ByteStream, ClientError> {
        let body = ChatRequest::streaming(turns.to_vec());
        let response = self.post(&body).await?;
        Ok(Box::pin(response.bytes_stream()))
    }

    async fn post(&self, body: &ChatRequest) -> Result<reqwest::Response, ClientError> {
        log::debug!(
            "POST {} ({} messages, streaming={})",
            self.chat_url(),
            body.messages.len(),
            body.streaming
        );

        let response = self.request().json(body).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Api(format!("{status}: {body}")));
        }

        Ok(response)
    }

    fn request(&self) -> RequestBuilder {
        let mut request = self
            .http
            .post(self.chat_url())
            .header("content-type", "application/json");
        if let Some(key) = &self.api_key {
            request = request.header(API_KEY_HEADER, key);
        }
        if !self.feature_flags.is_empty() {
            request = request.header(FEATURE_FLAGS_HEADER, self.feature_flags.join(","));
        }
        request
    }
}

/// Decode a non-streaming response body into the same shape a stream
/// would have produced.
fn decode_result(body: &str) -> Result<StreamResult, ClientError> {
    let result: StreamResult = serde_json::from_str(body)?;
    Ok(result.normalized())
}
