//! Configuration management for the companion client

pub mod file;

use std::path::PathBuf;
use std::time::Duration;

use crate::{Error, Result};

/// How the chat endpoint delivers its response body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    /// Chunked stream: `<assistant text><SEP><side payload>`
    Stream,
    /// Single JSON document: `{reply, segments, audio_content}` (older backends)
    Document,
}

impl TransportMode {
    /// String form used in config files and env vars
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stream => "stream",
            Self::Document => "document",
        }
    }

    /// Parse from config string
    fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "stream" => Some(Self::Stream),
            "document" => Some(Self::Document),
            _ => None,
        }
    }
}

/// What the bytes after the sentinel contain
///
/// Fixed alongside the sentinel as part of the backend contract, so it is
/// configured rather than sniffed from the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    /// Base64-encoded MP3 audio, playable directly
    Audio,
    /// JSON array of speech segments requiring a synthesis request
    Segments,
}

impl PayloadKind {
    /// String form used in config files and env vars
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Segments => "segments",
        }
    }

    /// Parse from config string
    fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "audio" => Some(Self::Audio),
            "segments" => Some(Self::Segments),
            _ => None,
        }
    }
}

/// How assistant text is revealed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnimatorStrategy {
    /// Paint each extension as soon as it arrives
    Immediate,
    /// Reveal one character per tick
    Typewriter,
}

impl AnimatorStrategy {
    /// String form used in config files and env vars
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Immediate => "immediate",
            Self::Typewriter => "typewriter",
        }
    }

    /// Parse from config string
    fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "immediate" => Some(Self::Immediate),
            "typewriter" => Some(Self::Typewriter),
            _ => None,
        }
    }
}

/// Backend endpoint configuration
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// Chat endpoint URL
    pub chat_url: String,

    /// Speech synthesis endpoint URL
    pub speech_url: String,

    /// Response transport mode
    pub mode: TransportMode,

    /// Sentinel separating assistant text from the side payload.
    /// A shared contract with the backend; never assumed.
    pub sentinel: String,

    /// Side payload kind
    pub payload: PayloadKind,

    /// Whole-request timeout
    pub timeout: Duration,
}

/// Text rendering configuration
#[derive(Debug, Clone)]
pub struct RenderConfig {
    /// Animator strategy
    pub animator: AnimatorStrategy,

    /// Typewriter reveal interval
    pub typewriter_interval: Duration,
}

/// Voice output configuration
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// Enable audio output (hard switch; the persisted speech preference
    /// only applies when this is on)
    pub enabled: bool,
}

/// Companion client configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Backend endpoints and wire contract
    pub endpoint: EndpointConfig,

    /// Text rendering
    pub render: RenderConfig,

    /// Voice output
    pub voice: VoiceConfig,

    /// Path to data directory (state database)
    pub data_dir: PathBuf,

    /// Path to the client state database
    pub state_db_path: PathBuf,
}

impl Config {
    /// Load configuration from the standard file path
    ///
    /// # Errors
    ///
    /// Returns error if a configured value is invalid (e.g. empty sentinel)
    pub fn load() -> Result<Self> {
        Self::load_with_options(None, false)
    }

    /// Load configuration with an explicit config file and voice disable option
    ///
    /// Precedence for every setting: env > config file > default.
    ///
    /// # Errors
    ///
    /// Returns error if a configured value is invalid (e.g. empty sentinel)
    pub fn load_with_options(config_path: Option<PathBuf>, disable_voice: bool) -> Result<Self> {
        let fc = config_path.map_or_else(file::load_config_file, file::load_config_file_at);

        let chat_url = std::env::var("YOYO_CHAT_URL")
            .ok()
            .or(fc.endpoint.chat_url)
            .unwrap_or_else(|| "http://127.0.0.1:5000/api/chat".to_string());

        let speech_url = std::env::var("YOYO_SPEECH_URL")
            .ok()
            .or(fc.endpoint.speech_url)
            .unwrap_or_else(|| "http://127.0.0.1:5000/api/speech".to_string());

        let mode = parse_setting(
            "YOYO_MODE",
            fc.endpoint.mode,
            TransportMode::Stream,
            TransportMode::from_str,
        );

        let sentinel = std::env::var("YOYO_SENTINEL")
            .ok()
            .or(fc.endpoint.sentinel)
            .unwrap_or_else(|| "---YOYO_AUDIO_SEPARATOR---".to_string());
        if sentinel.is_empty() {
            return Err(Error::Config("sentinel must not be empty".to_string()));
        }

        let payload = parse_setting(
            "YOYO_PAYLOAD",
            fc.endpoint.payload,
            PayloadKind::Audio,
            PayloadKind::from_str,
        );

        let timeout_secs = std::env::var("YOYO_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .or(fc.endpoint.timeout_secs)
            .unwrap_or(120);

        let animator = parse_setting(
            "YOYO_ANIMATOR",
            fc.render.animator,
            AnimatorStrategy::Typewriter,
            AnimatorStrategy::from_str,
        );

        let typewriter_ms = std::env::var("YOYO_TYPEWRITER_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .or(fc.render.typewriter_ms)
            .unwrap_or(30);

        let voice_enabled = if disable_voice {
            tracing::info!("voice explicitly disabled via --disable-voice");
            false
        } else {
            fc.voice.enabled.unwrap_or(true)
        };

        // Data directory (~/.local/share/yoyo on Linux)
        let data_dir = std::env::var("YOYO_DATA_DIR").map_or_else(
            |_| {
                directories::BaseDirs::new()
                    .map_or_else(|| PathBuf::from("."), |d| d.data_dir().join("yoyo"))
            },
            PathBuf::from,
        );
        std::fs::create_dir_all(&data_dir).ok();

        let state_db_path = std::env::var("YOYO_STATE_DB")
            .ok()
            .or(fc.state.db_path)
            .map_or_else(|| data_dir.join("companion.db"), PathBuf::from);

        Ok(Self {
            endpoint: EndpointConfig {
                chat_url,
                speech_url,
                mode,
                sentinel,
                payload,
                timeout: Duration::from_secs(timeout_secs),
            },
            render: RenderConfig {
                animator,
                typewriter_interval: Duration::from_millis(typewriter_ms),
            },
            voice: VoiceConfig {
                enabled: voice_enabled,
            },
            data_dir,
            state_db_path,
        })
    }
}

/// Resolve an enum-like setting with env > file > default precedence
///
/// Unrecognized values are logged and fall back to the default.
fn parse_setting<T: Copy>(
    env_key: &str,
    file_value: Option<String>,
    default: T,
    parse: fn(&str) -> Option<T>,
) -> T {
    let raw = std::env::var(env_key).ok().or(file_value);
    match raw {
        Some(s) => parse(&s).unwrap_or_else(|| {
            tracing::warn!(setting = env_key, value = %s, "unrecognized config value, using default");
            default
        }),
        None => default,
    }
}
