//! Response sequencing for one conversation
//!
//! `ChatSession` owns the per-conversation state: the history, the in-flight
//! guard, the animator, and the audio player. A send walks the full turn
//! lifecycle in order: append the user turn, silence any playing clip, stream
//! the reply through the decoder into the animator, wait for the reveal to
//! complete, append the model turn, then resolve the side payload into audio.

use std::sync::Arc;

use base64::Engine;
use futures::StreamExt;

use super::decoder::{StreamDecoder, StreamEvent};
use super::history::{ConversationHistory, InlineImage, Part, Turn};
use super::transport::{ChatRequest, ChatTransport};
use crate::config::{EndpointConfig, PayloadKind, TransportMode};
use crate::render::TextAnimator;
use crate::store::StateRepo;
use crate::voice::{AudioPlayer, SpeechSegment, Synthesizer};
use crate::Result;

/// Why a send did nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Neither message text nor an image was provided
    EmptyInput,
    /// A previous send is still in flight
    Busy,
}

/// What a send did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Precondition not met; history and network untouched
    Skipped(SkipReason),
    /// Reply rendered and both turns recorded
    Completed {
        /// Final assistant text
        reply: String,
        /// Whether a clip made it to the player
        played_audio: bool,
    },
    /// Transport failed; the user turn was rolled back and the surface
    /// repainted with this message
    Failed { message: String },
}

/// Audio material carried out of a reply, resolved after the text lands
enum PendingAudio {
    /// Raw side payload from the stream; interpretation is configured
    Payload(String),
    /// Pre-rendered base64 audio from a document reply
    Encoded(String),
}

/// Sequences chat turns against the backend
pub struct ChatSession {
    endpoint: EndpointConfig,
    transport: Arc<dyn ChatTransport>,
    synth: Arc<dyn Synthesizer>,
    player: AudioPlayer,
    animator: TextAnimator,
    state: StateRepo,
    history: ConversationHistory,
    user_id: String,
    speech_enabled: bool,
    in_flight: bool,
}

impl ChatSession {
    /// Assemble a session, resolving the persistent user id and speech
    /// preference
    ///
    /// # Errors
    ///
    /// Returns error if the client state store cannot be read
    pub fn new(
        endpoint: EndpointConfig,
        transport: Arc<dyn ChatTransport>,
        synth: Arc<dyn Synthesizer>,
        player: AudioPlayer,
        animator: TextAnimator,
        state: StateRepo,
    ) -> Result<Self> {
        let user_id = state.user_id()?;
        let speech_enabled = state.speech_enabled()?;
        tracing::info!(user_id = %user_id, speech_enabled, "chat session ready");
        Ok(Self {
            endpoint,
            transport,
            synth,
            player,
            animator,
            state,
            history: ConversationHistory::new(),
            user_id,
            speech_enabled,
            in_flight: false,
        })
    }

    /// Conversation so far
    #[must_use]
    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    /// Persistent identifier sent with every request
    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Current speech preference
    #[must_use]
    pub const fn speech_enabled(&self) -> bool {
        self.speech_enabled
    }

    /// Persist the speech preference; disabling also silences live playback
    ///
    /// # Errors
    ///
    /// Returns error if the preference cannot be persisted
    pub fn set_speech_enabled(&mut self, enabled: bool) -> Result<()> {
        self.state.set_speech_enabled(enabled)?;
        self.speech_enabled = enabled;
        if !enabled {
            self.player.stop()?;
        }
        Ok(())
    }

    /// Send one user turn and sequence the reply
    ///
    /// No-ops (`Skipped`) when there is nothing to send or a send is already
    /// running. Transport failure is contained: the outcome is `Failed`, the
    /// user turn is rolled back, and the surface shows a synthetic message in
    /// place of the partial reply.
    ///
    /// # Errors
    ///
    /// Returns error only for faults outside the turn itself, such as the
    /// audio device rejecting a teardown
    pub async fn send(
        &mut self,
        message: &str,
        image: Option<InlineImage>,
    ) -> Result<SendOutcome> {
        let message = message.trim();
        if message.is_empty() && image.is_none() {
            tracing::debug!("empty send, skipping");
            return Ok(SendOutcome::Skipped(SkipReason::EmptyInput));
        }
        if self.in_flight {
            tracing::debug!("send already in flight, skipping");
            return Ok(SendOutcome::Skipped(SkipReason::Busy));
        }

        self.in_flight = true;
        let outcome = self.run_turn(message, image).await;
        self.in_flight = false;
        outcome
    }

    async fn run_turn(
        &mut self,
        message: &str,
        image: Option<InlineImage>,
    ) -> Result<SendOutcome> {
        let request_id = uuid::Uuid::new_v4();
        tracing::info!(
            %request_id,
            message_len = message.len(),
            has_image = image.is_some(),
            "sending turn"
        );

        let mut parts = Vec::new();
        if !message.is_empty() {
            parts.push(Part::text(message.to_string()));
        }
        if let Some(image) = image {
            parts.push(Part::image(image));
        }
        self.history.push(Turn::user(parts));

        // A reply for the previous turn must not talk over this one
        if let Err(e) = self.player.stop() {
            tracing::warn!(error = %e, "failed to stop playback before send");
        }

        let request = ChatRequest::new(&self.history, self.user_id.clone());
        let result = match self.endpoint.mode {
            TransportMode::Stream => self.run_stream(&request).await,
            TransportMode::Document => self.run_document(&request).await,
        };

        match result {
            Ok((reply, pending)) => {
                self.animator.finish().await;
                self.history.push(Turn::model(reply.clone()));
                let played_audio = self.resolve_audio(pending).await;
                tracing::info!(
                    %request_id,
                    reply_len = reply.len(),
                    played_audio,
                    "turn complete"
                );
                Ok(SendOutcome::Completed {
                    reply,
                    played_audio,
                })
            }
            Err(e) => {
                let rolled_back = self.history.rollback_user_turn();
                tracing::warn!(%request_id, error = %e, rolled_back, "turn failed");
                let message = format!("Yoyo couldn't answer right now ({e})");
                self.animator.replace_now(&message);
                Ok(SendOutcome::Failed { message })
            }
        }
    }

    /// Stream the reply, forwarding text deltas to the animator as they land
    async fn run_stream(
        &mut self,
        request: &ChatRequest,
    ) -> Result<(String, Option<PendingAudio>)> {
        let mut stream = self.transport.open_stream(request).await?;
        let mut decoder = StreamDecoder::new(self.endpoint.sentinel.clone());
        let mut reply = String::new();
        let mut payload = None;

        self.animator.begin();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            for event in decoder.feed(&chunk) {
                self.apply_event(event, &mut reply, &mut payload);
            }
        }
        for event in decoder.finish() {
            self.apply_event(event, &mut reply, &mut payload);
        }

        Ok((reply, payload.map(PendingAudio::Payload)))
    }

    /// Fetch the reply as one document and hand it to the animator whole
    async fn run_document(
        &mut self,
        request: &ChatRequest,
    ) -> Result<(String, Option<PendingAudio>)> {
        let document = self.transport.fetch_document(request).await?;

        self.animator.begin();
        self.animator.push(&document.reply);

        let pending = document.audio_content.map(PendingAudio::Encoded);
        Ok((document.reply, pending))
    }

    fn apply_event(
        &mut self,
        event: StreamEvent,
        reply: &mut String,
        payload: &mut Option<String>,
    ) {
        match event {
            StreamEvent::Text(delta) => {
                reply.push_str(&delta);
                self.animator.push(&delta);
            }
            StreamEvent::SidePayload(raw) => *payload = Some(raw),
        }
    }

    /// Turn the pending audio material into playback
    ///
    /// Malformed material never aborts the turn: it is logged and treated as
    /// no audio. Returns whether a clip reached the player.
    async fn resolve_audio(&mut self, pending: Option<PendingAudio>) -> bool {
        let Some(pending) = pending else {
            tracing::debug!("no side payload, no audio");
            return false;
        };
        if !self.speech_enabled {
            tracing::debug!("speech disabled, skipping audio resolution");
            return false;
        }

        let clip = match pending {
            PendingAudio::Payload(raw) if raw.is_empty() => {
                tracing::debug!("empty side payload, intentional silence");
                return false;
            }
            PendingAudio::Encoded(encoded) => match decode_base64(&encoded) {
                Some(clip) => clip,
                None => return false,
            },
            PendingAudio::Payload(raw) => match self.endpoint.payload {
                PayloadKind::Audio => match decode_base64(&raw) {
                    Some(clip) => clip,
                    None => return false,
                },
                PayloadKind::Segments => match self.synthesize_payload(&raw).await {
                    Some(clip) => clip,
                    None => return false,
                },
            },
        };

        match self.player.play(clip, self.speech_enabled) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "playback failed");
                false
            }
        }
    }

    /// Parse a segments payload and make the synthesis round trip
    async fn synthesize_payload(&self, raw: &str) -> Option<Vec<u8>> {
        let segments: Vec<SpeechSegment> = match serde_json::from_str(raw) {
            Ok(segments) => segments,
            Err(e) => {
                tracing::warn!(error = %e, "malformed segments payload, skipping audio");
                return None;
            }
        };
        if segments.is_empty() {
            tracing::debug!("no segments to synthesize");
            return None;
        }

        match self.synth.synthesize_segments(&segments).await {
            Ok(clip) => Some(clip),
            Err(e) => {
                tracing::warn!(error = %e, "synthesis failed, skipping audio");
                None
            }
        }
    }
}

/// Decode base64 audio, logging instead of failing the turn
fn decode_base64(encoded: &str) -> Option<Vec<u8>> {
    match base64::engine::general_purpose::STANDARD.decode(encoded.as_bytes()) {
        Ok(clip) => Some(clip),
        Err(e) => {
            tracing::warn!(error = %e, "invalid base64 audio, skipping playback");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use crate::chat::transport::{ByteStream, DocumentReply};
    use crate::config::{AnimatorStrategy, RenderConfig};
    use crate::render::BufferSurface;
    use crate::store::{self, StateRepo};
    use crate::voice::{AudioSink, SinkHandle};
    use crate::Error;
    use async_trait::async_trait;

    const SEP: &str = "---YOYO_AUDIO_SEPARATOR---";

    /// One scripted reply from the fake transport
    enum Script {
        Chunks(Vec<Result<Vec<u8>>>),
        OpenError(String),
        Document(DocumentReply),
    }

    #[derive(Default)]
    struct ScriptedTransport {
        scripts: Mutex<VecDeque<Script>>,
        requests: Mutex<Vec<ChatRequest>>,
    }

    impl ScriptedTransport {
        fn push_script(&self, script: Script) {
            self.scripts.lock().unwrap().push_back(script);
        }

        fn requests(&self) -> Vec<ChatRequest> {
            self.requests.lock().unwrap().clone()
        }

        fn next_script(&self) -> Script {
            self.scripts
                .lock()
                .unwrap()
                .pop_front()
                .expect("transport called without a script")
        }
    }

    #[async_trait]
    impl ChatTransport for ScriptedTransport {
        async fn open_stream(&self, request: &ChatRequest) -> Result<ByteStream> {
            self.requests.lock().unwrap().push(request.clone());
            match self.next_script() {
                Script::Chunks(chunks) => Ok(Box::pin(futures::stream::iter(chunks))),
                Script::OpenError(message) => Err(Error::Transport(message)),
                Script::Document(_) => panic!("document script for a stream call"),
            }
        }

        async fn fetch_document(&self, request: &ChatRequest) -> Result<DocumentReply> {
            self.requests.lock().unwrap().push(request.clone());
            match self.next_script() {
                Script::Document(reply) => Ok(reply),
                Script::OpenError(message) => Err(Error::Transport(message)),
                Script::Chunks(_) => panic!("chunk script for a document call"),
            }
        }
    }

    #[derive(Default)]
    struct ScriptedSynth {
        segment_calls: Mutex<Vec<Vec<SpeechSegment>>>,
    }

    #[async_trait]
    impl Synthesizer for ScriptedSynth {
        async fn synthesize_text(&self, _text: &str) -> Result<Vec<u8>> {
            Ok(b"mp3".to_vec())
        }

        async fn synthesize_segments(&self, segments: &[SpeechSegment]) -> Result<Vec<u8>> {
            self.segment_calls.lock().unwrap().push(segments.to_vec());
            Ok(b"mp3".to_vec())
        }
    }

    /// Sink that records clips and completes them immediately
    #[derive(Clone, Default)]
    struct CountingSink {
        plays: Arc<Mutex<Vec<Vec<u8>>>>,
    }

    impl AudioSink for CountingSink {
        fn start(
            &self,
            clip: Vec<u8>,
            on_done: Box<dyn FnOnce() + Send>,
        ) -> Result<Box<dyn SinkHandle>> {
            self.plays.lock().unwrap().push(clip);
            on_done();
            Ok(Box::new(NoopHandle))
        }
    }

    struct NoopHandle;

    impl SinkHandle for NoopHandle {
        fn pause(&mut self) -> Result<()> {
            Ok(())
        }

        fn resume(&mut self) -> Result<()> {
            Ok(())
        }

        fn stop(&mut self) -> Result<()> {
            Ok(())
        }
    }

    struct Harness {
        transport: Arc<ScriptedTransport>,
        synth: Arc<ScriptedSynth>,
        surface: BufferSurface,
        plays: Arc<Mutex<Vec<Vec<u8>>>>,
    }

    fn endpoint(mode: TransportMode, payload: PayloadKind) -> EndpointConfig {
        EndpointConfig {
            chat_url: "http://test.local/api/chat".to_string(),
            speech_url: "http://test.local/api/speech".to_string(),
            mode,
            sentinel: SEP.to_string(),
            payload,
            timeout: Duration::from_secs(5),
        }
    }

    fn setup(mode: TransportMode, payload: PayloadKind) -> (ChatSession, Harness) {
        let transport = Arc::new(ScriptedTransport::default());
        let synth = Arc::new(ScriptedSynth::default());
        let sink = CountingSink::default();
        let plays = Arc::clone(&sink.plays);
        let surface = BufferSurface::new();

        let player = AudioPlayer::new(Arc::new(sink));
        let animator = TextAnimator::new(
            Arc::new(surface.clone()),
            &RenderConfig {
                animator: AnimatorStrategy::Immediate,
                typewriter_interval: Duration::from_millis(30),
            },
        );
        let state = StateRepo::new(store::init_memory().unwrap());

        let session = ChatSession::new(
            endpoint(mode, payload),
            Arc::clone(&transport) as Arc<dyn ChatTransport>,
            Arc::clone(&synth) as Arc<dyn Synthesizer>,
            player,
            animator,
            state,
        )
        .unwrap();

        (
            session,
            Harness {
                transport,
                synth,
                surface,
                plays,
            },
        )
    }

    fn chunks(parts: &[&str]) -> Script {
        Script::Chunks(parts.iter().map(|p| Ok(p.as_bytes().to_vec())).collect())
    }

    #[tokio::test]
    async fn test_send_streams_reply_and_appends_turns() {
        let (mut session, harness) = setup(TransportMode::Stream, PayloadKind::Audio);
        harness
            .transport
            .push_script(chunks(&["Hello ", "world---YOYO_AUDIO_SEPARATOR---", "QUJD"]));

        let outcome = session.send("hi there", None).await.unwrap();
        assert_eq!(
            outcome,
            SendOutcome::Completed {
                reply: "Hello world".to_string(),
                played_audio: true,
            }
        );

        assert_eq!(harness.surface.text(), "Hello world");
        assert_eq!(session.history().len(), 2);
        assert_eq!(harness.plays.lock().unwrap().as_slice(), &[b"ABC".to_vec()]);

        // The request carried only the user turn and the minted user id
        let requests = harness.transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].history.len(), 1);
        assert!(requests[0].user_id.starts_with("user_"));
    }

    #[tokio::test]
    async fn test_empty_send_is_a_noop() {
        let (mut session, harness) = setup(TransportMode::Stream, PayloadKind::Audio);

        let outcome = session.send("   ", None).await.unwrap();
        assert_eq!(outcome, SendOutcome::Skipped(SkipReason::EmptyInput));
        assert!(session.history().is_empty());
        assert!(harness.transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_send_while_in_flight_is_skipped() {
        let (mut session, harness) = setup(TransportMode::Stream, PayloadKind::Audio);
        session.in_flight = true;

        let outcome = session.send("hello", None).await.unwrap();
        assert_eq!(outcome, SendOutcome::Skipped(SkipReason::Busy));
        assert!(session.history().is_empty());
        assert!(harness.transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_image_only_send_is_allowed() {
        let (mut session, harness) = setup(TransportMode::Stream, PayloadKind::Audio);
        harness.transport.push_script(chunks(&["nice photo"]));

        let image = InlineImage {
            mime_type: "image/png".to_string(),
            data: "iVBORw0KGgo=".to_string(),
        };
        let outcome = session.send("", Some(image)).await.unwrap();
        assert!(matches!(outcome, SendOutcome::Completed { .. }));

        let requests = harness.transport.requests();
        let value = serde_json::to_value(&requests[0]).unwrap();
        assert_eq!(
            value["history"][0]["parts"],
            serde_json::json!([
                {"inline_data": {"mime_type": "image/png", "data": "iVBORw0KGgo="}}
            ])
        );
    }

    #[tokio::test]
    async fn test_transport_failure_rolls_back_user_turn() {
        let (mut session, harness) = setup(TransportMode::Stream, PayloadKind::Audio);
        harness
            .transport
            .push_script(Script::OpenError("connection refused".to_string()));

        let outcome = session.send("hello", None).await.unwrap();
        let SendOutcome::Failed { message } = outcome else {
            panic!("expected failure");
        };
        assert!(message.contains("connection refused"));
        assert!(session.history().is_empty());
        assert_eq!(harness.surface.text(), message);

        // The guard is clear, so a retry goes through
        harness.transport.push_script(chunks(&["better now"]));
        let outcome = session.send("hello", None).await.unwrap();
        assert!(matches!(outcome, SendOutcome::Completed { .. }));
        assert_eq!(session.history().len(), 2);
    }

    #[tokio::test]
    async fn test_midstream_error_repaints_partial_reply() {
        let (mut session, harness) = setup(TransportMode::Stream, PayloadKind::Audio);
        harness.transport.push_script(Script::Chunks(vec![
            Ok(b"Hel".to_vec()),
            Err(Error::Transport("connection reset".to_string())),
        ]));

        let outcome = session.send("hello", None).await.unwrap();
        assert!(matches!(outcome, SendOutcome::Failed { .. }));
        assert!(session.history().is_empty());
        assert!(harness.surface.text().contains("connection reset"));
        assert!(!harness.surface.text().contains("Hel"));
    }

    #[tokio::test]
    async fn test_reply_without_sentinel_plays_nothing() {
        let (mut session, harness) = setup(TransportMode::Stream, PayloadKind::Audio);
        harness.transport.push_script(chunks(&["text only"]));

        let outcome = session.send("hello", None).await.unwrap();
        assert_eq!(
            outcome,
            SendOutcome::Completed {
                reply: "text only".to_string(),
                played_audio: false,
            }
        );
        assert!(harness.plays.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_payload_means_intentional_silence() {
        let (mut session, harness) = setup(TransportMode::Stream, PayloadKind::Audio);
        harness
            .transport
            .push_script(chunks(&["quiet---YOYO_AUDIO_SEPARATOR---"]));

        let outcome = session.send("hello", None).await.unwrap();
        assert_eq!(
            outcome,
            SendOutcome::Completed {
                reply: "quiet".to_string(),
                played_audio: false,
            }
        );
        assert_eq!(session.history().len(), 2);
    }

    #[tokio::test]
    async fn test_malformed_audio_payload_keeps_text() {
        let (mut session, harness) = setup(TransportMode::Stream, PayloadKind::Audio);
        harness
            .transport
            .push_script(chunks(&["hi---YOYO_AUDIO_SEPARATOR---", "!!not base64!!"]));

        let outcome = session.send("hello", None).await.unwrap();
        assert_eq!(
            outcome,
            SendOutcome::Completed {
                reply: "hi".to_string(),
                played_audio: false,
            }
        );
        assert_eq!(session.history().len(), 2);
        assert_eq!(harness.surface.text(), "hi");
    }

    #[tokio::test]
    async fn test_segments_payload_makes_one_synthesis_call() {
        let (mut session, harness) = setup(TransportMode::Stream, PayloadKind::Segments);
        harness.transport.push_script(chunks(&[
            "sure---YOYO_AUDIO_SEPARATOR---",
            r#"[{"style": "cheerful", "degree": 1.1, "text": "sure"}]"#,
        ]));

        let outcome = session.send("hello", None).await.unwrap();
        assert!(matches!(
            outcome,
            SendOutcome::Completed {
                played_audio: true,
                ..
            }
        ));

        let calls = harness.synth.segment_calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0][0].text, "sure");
        assert_eq!(calls[0][0].style.as_deref(), Some("cheerful"));
    }

    #[tokio::test]
    async fn test_malformed_segments_payload_skips_synthesis() {
        let (mut session, harness) = setup(TransportMode::Stream, PayloadKind::Segments);
        harness
            .transport
            .push_script(chunks(&["ok---YOYO_AUDIO_SEPARATOR---", "not json"]));

        let outcome = session.send("hello", None).await.unwrap();
        assert!(matches!(
            outcome,
            SendOutcome::Completed {
                played_audio: false,
                ..
            }
        ));
        assert!(harness.synth.segment_calls.lock().unwrap().is_empty());
        assert_eq!(session.history().len(), 2);
    }

    #[tokio::test]
    async fn test_document_mode_plays_returned_audio() {
        let (mut session, harness) = setup(TransportMode::Document, PayloadKind::Audio);
        harness.transport.push_script(Script::Document(DocumentReply {
            reply: "hey there".to_string(),
            segments: Vec::new(),
            audio_content: Some("QUJD".to_string()),
        }));

        let outcome = session.send("hello", None).await.unwrap();
        assert_eq!(
            outcome,
            SendOutcome::Completed {
                reply: "hey there".to_string(),
                played_audio: true,
            }
        );
        assert_eq!(harness.surface.text(), "hey there");
        assert_eq!(session.history().len(), 2);
    }

    #[tokio::test]
    async fn test_document_mode_without_audio_plays_nothing() {
        let (mut session, harness) = setup(TransportMode::Document, PayloadKind::Audio);
        harness.transport.push_script(Script::Document(DocumentReply {
            reply: "hey".to_string(),
            segments: Vec::new(),
            audio_content: None,
        }));

        let outcome = session.send("hello", None).await.unwrap();
        assert!(matches!(
            outcome,
            SendOutcome::Completed {
                played_audio: false,
                ..
            }
        ));
        assert!(harness.plays.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_disabled_speech_skips_resolution_and_persists() {
        let (mut session, harness) = setup(TransportMode::Stream, PayloadKind::Segments);
        session.set_speech_enabled(false).unwrap();
        harness.transport.push_script(chunks(&[
            "hi---YOYO_AUDIO_SEPARATOR---",
            r#"[{"text": "hi"}]"#,
        ]));

        let outcome = session.send("hello", None).await.unwrap();
        assert!(matches!(
            outcome,
            SendOutcome::Completed {
                played_audio: false,
                ..
            }
        ));
        assert!(harness.synth.segment_calls.lock().unwrap().is_empty());
        assert!(harness.plays.lock().unwrap().is_empty());
        assert!(!session.speech_enabled());
    }
}
