//! TOML configuration file loading
//!
//! Supports `~/.config/yoyo/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::PathBuf;

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct YoyoConfigFile {
    /// Backend endpoint configuration
    #[serde(default)]
    pub endpoint: EndpointFileConfig,

    /// Text rendering configuration
    #[serde(default)]
    pub render: RenderFileConfig,

    /// Voice/audio configuration
    #[serde(default)]
    pub voice: VoiceFileConfig,

    /// Client state storage configuration
    #[serde(default)]
    pub state: StateFileConfig,
}

/// Backend endpoint configuration
#[derive(Debug, Default, Deserialize)]
pub struct EndpointFileConfig {
    /// Chat endpoint URL
    pub chat_url: Option<String>,

    /// Speech synthesis endpoint URL
    pub speech_url: Option<String>,

    /// Response transport mode ("stream" or "document")
    pub mode: Option<String>,

    /// Sentinel separating assistant text from the side payload
    pub sentinel: Option<String>,

    /// Side payload kind ("audio" or "segments")
    pub payload: Option<String>,

    /// Request timeout in seconds
    pub timeout_secs: Option<u64>,
}

/// Text rendering configuration
#[derive(Debug, Default, Deserialize)]
pub struct RenderFileConfig {
    /// Animator strategy ("immediate" or "typewriter")
    pub animator: Option<String>,

    /// Typewriter reveal interval in milliseconds
    pub typewriter_ms: Option<u64>,
}

/// Voice processing configuration
#[derive(Debug, Default, Deserialize)]
pub struct VoiceFileConfig {
    /// Enable audio output
    pub enabled: Option<bool>,
}

/// Client state storage configuration
#[derive(Debug, Default, Deserialize)]
pub struct StateFileConfig {
    /// State database path override
    pub db_path: Option<String>,
}

/// Load the TOML config file from the standard path
///
/// Returns `YoyoConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> YoyoConfigFile {
    config_file_path().map_or_else(YoyoConfigFile::default, load_config_file_at)
}

/// Load a TOML config file from an explicit path
///
/// Returns `YoyoConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file_at(path: PathBuf) -> YoyoConfigFile {
    if !path.exists() {
        return YoyoConfigFile::default();
    }

    match std::fs::read_to_string(&path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                YoyoConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            YoyoConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/yoyo/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("yoyo").join("config.toml"))
}
