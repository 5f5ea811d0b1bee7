//! HTTP transport for the chat endpoint
//!
//! The endpoint speaks two shapes, selected by configuration: a chunked
//! stream (`text SENTINEL payload`) decoded incrementally, or a single JSON
//! document carrying the reply and its speech material in one body.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, TryStreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::history::{ConversationHistory, Turn};
use crate::config::EndpointConfig;
use crate::voice::SpeechSegment;
use crate::{Error, Result};

/// Raw chunk stream handed to the decoder
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>>> + Send>>;

/// Request body for the chat endpoint
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    /// Full conversation so far, oldest turn first
    pub history: Vec<Turn>,
    /// Stable per-installation identifier
    #[serde(rename = "userId")]
    pub user_id: String,
}

impl ChatRequest {
    /// Snapshot the conversation into a request body
    #[must_use]
    pub fn new(history: &ConversationHistory, user_id: impl Into<String>) -> Self {
        Self {
            history: history.turns().to_vec(),
            user_id: user_id.into(),
        }
    }
}

/// Non-streaming reply document
#[derive(Debug, Clone, Deserialize)]
pub struct DocumentReply {
    /// Full assistant reply text
    pub reply: String,
    /// Speech segments to synthesize, possibly empty
    #[serde(default)]
    pub segments: Vec<SpeechSegment>,
    /// Pre-synthesized audio as base64, when the server already rendered it
    #[serde(default)]
    pub audio_content: Option<String>,
}

/// Transport seam for the chat endpoint
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Open a chunked response stream for the given request
    async fn open_stream(&self, request: &ChatRequest) -> Result<ByteStream>;

    /// Fetch the reply as a single JSON document
    async fn fetch_document(&self, request: &ChatRequest) -> Result<DocumentReply>;
}

/// Production transport over reqwest
pub struct HttpChatTransport {
    client: Client,
    chat_url: String,
}

impl HttpChatTransport {
    /// Build a transport from endpoint configuration
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be constructed
    pub fn new(endpoint: &EndpointConfig) -> Result<Self> {
        let client = Client::builder().timeout(endpoint.timeout).build()?;
        Ok(Self {
            client,
            chat_url: endpoint.chat_url.clone(),
        })
    }

    async fn post(&self, request: &ChatRequest) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(&self.chat_url)
            .json(request)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("chat request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Transport(format!(
                "chat endpoint returned {status}: {body}"
            )));
        }

        Ok(response)
    }
}

#[async_trait]
impl ChatTransport for HttpChatTransport {
    async fn open_stream(&self, request: &ChatRequest) -> Result<ByteStream> {
        let response = self.post(request).await?;
        tracing::debug!(url = %self.chat_url, "response stream opened");

        let stream = response
            .bytes_stream()
            .map_ok(|chunk| chunk.to_vec())
            .map_err(|e| Error::Transport(format!("stream interrupted: {e}")));
        Ok(Box::pin(stream))
    }

    async fn fetch_document(&self, request: &ChatRequest) -> Result<DocumentReply> {
        let response = self.post(request).await?;
        let reply: DocumentReply = response
            .json()
            .await
            .map_err(|e| Error::Transport(format!("malformed reply document: {e}")))?;
        tracing::debug!(
            reply_len = reply.reply.len(),
            segments = reply.segments.len(),
            has_audio = reply.audio_content.is_some(),
            "reply document fetched"
        );
        Ok(reply)
    }
}
