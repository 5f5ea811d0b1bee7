//! Yoyo companion - streaming chat client with synthesized speech playback
//!
//! This library provides the core functionality for the Yoyo companion:
//! - Incremental decoding of `text SENTINEL payload` response streams
//! - Turn sequencing (history, rollback, animation, audio resolution)
//! - Paced text reveal over a pluggable output surface
//! - One-clip-at-a-time audio playback with pause/resume
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                      Session                         │
//! │   History  │  In-flight guard  │  Turn lifecycle    │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │              Stream decoding                         │
//! │   Text deltas  │  Sentinel split  │  Side payload   │
//! └──────────┬──────────────────────────────┬───────────┘
//!            │                              │
//! ┌──────────▼───────────┐      ┌───────────▼───────────┐
//! │       Render          │      │        Voice          │
//! │  Animator │ Surface   │      │  Synthesis │ Player   │
//! └───────────────────────┘      └───────────────────────┘
//! ```

pub mod chat;
pub mod config;
pub mod error;
pub mod render;
pub mod store;
pub mod voice;

pub use chat::{
    ChatSession, ChatTransport, ConversationHistory, HttpChatTransport, SendOutcome, SkipReason,
    StreamDecoder, StreamEvent, UploadedFile,
};
pub use config::Config;
pub use error::{Error, Result};
pub use render::{BufferSurface, TerminalSurface, TextAnimator, TextSurface};
pub use store::StateRepo;
pub use voice::{AudioPlayer, CpalSink, NullSink, SpeechClient, SpeechSegment, Synthesizer};
