//! Speech synthesis client
//!
//! Talks to the companion speech endpoint, which accepts either plain text or
//! a list of prosody-annotated segments and returns base64-encoded MP3 audio.

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::config::EndpointConfig;
use crate::{Error, Result};

/// One piece of the reply to synthesize, with optional prosody hints
///
/// The server turns these into SSML; the client only relays them verbatim.
/// Every field except `text` is optional and passed through as received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeechSegment {
    /// Emotional style, e.g. `cheerful`, `comforting`, `excited`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    /// Style intensity, e.g. `1.1`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub degree: Option<f64>,
    /// Relative speaking rate, e.g. `+10%`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate: Option<String>,
    /// Relative pitch shift, e.g. `-3st`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pitch: Option<String>,
    /// Word to stress, empty for none
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emphasis: Option<String>,
    /// Text to speak
    pub text: String,
}

impl SpeechSegment {
    /// Segment with no prosody hints
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            style: None,
            degree: None,
            rate: None,
            pitch: None,
            emphasis: None,
            text: text.into(),
        }
    }
}

/// Response body from the speech endpoint
///
/// Older servers use `audio_content` for the same field.
#[derive(Debug, Deserialize)]
struct SpeechReply {
    #[serde(alias = "audio_content")]
    audio_base64: String,
}

/// Synthesis seam for the sequencer
///
/// Both operations return audio bytes (MP3 format).
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Synthesize plain text
    ///
    /// # Errors
    ///
    /// Returns error if synthesis fails
    async fn synthesize_text(&self, text: &str) -> Result<Vec<u8>>;

    /// Synthesize a list of segments, relayed verbatim
    ///
    /// # Errors
    ///
    /// Returns error if synthesis fails
    async fn synthesize_segments(&self, segments: &[SpeechSegment]) -> Result<Vec<u8>>;
}

/// Client for the speech endpoint
pub struct SpeechClient {
    client: reqwest::Client,
    speech_url: String,
}

impl SpeechClient {
    /// Build a client from endpoint configuration
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be constructed
    pub fn new(endpoint: &EndpointConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(endpoint.timeout)
            .build()?;
        Ok(Self {
            client,
            speech_url: endpoint.speech_url.clone(),
        })
    }

    async fn request(&self, body: &serde_json::Value) -> Result<Vec<u8>> {
        let response = self
            .client
            .post(&self.speech_url)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Speech(format!("speech request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Speech(format!(
                "speech endpoint returned {status}: {body}"
            )));
        }

        let reply: SpeechReply = response
            .json()
            .await
            .map_err(|e| Error::Speech(format!("malformed speech response: {e}")))?;

        let audio = base64::engine::general_purpose::STANDARD
            .decode(reply.audio_base64.as_bytes())
            .map_err(|e| Error::Speech(format!("invalid base64 audio: {e}")))?;

        tracing::debug!(bytes = audio.len(), "speech synthesized");
        Ok(audio)
    }
}

#[async_trait]
impl Synthesizer for SpeechClient {
    async fn synthesize_text(&self, text: &str) -> Result<Vec<u8>> {
        let body = serde_json::json!({ "text": text });
        self.request(&body).await
    }

    async fn synthesize_segments(&self, segments: &[SpeechSegment]) -> Result<Vec<u8>> {
        let body = serde_json::json!({ "segments": segments });
        self.request(&body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_serializes_only_present_fields() {
        let plain = serde_json::to_value(SpeechSegment::new("hello")).unwrap();
        assert_eq!(plain, serde_json::json!({"text": "hello"}));
    }

    #[test]
    fn test_segment_relays_prosody_hints_verbatim() {
        let raw = r#"{
            "style": "cheerful",
            "degree": 1.3,
            "rate": "+10%",
            "pitch": "-3st",
            "emphasis": "",
            "text": "hello"
        }"#;
        let segment: SpeechSegment = serde_json::from_str(raw).unwrap();
        assert_eq!(segment.style.as_deref(), Some("cheerful"));
        assert_eq!(segment.degree, Some(1.3));

        let value = serde_json::to_value(&segment).unwrap();
        assert_eq!(value["rate"], "+10%");
        assert_eq!(value["pitch"], "-3st");
        assert_eq!(value["emphasis"], "");
        assert_eq!(value["text"], "hello");
    }

    #[test]
    fn test_reply_accepts_both_field_names() {
        let modern: SpeechReply = serde_json::from_str(r#"{"audio_base64": "QUJD"}"#).unwrap();
        assert_eq!(modern.audio_base64, "QUJD");

        let legacy: SpeechReply = serde_json::from_str(r#"{"audio_content": "QUJD"}"#).unwrap();
        assert_eq!(legacy.audio_base64, "QUJD");
    }
}
