//! Conversation history model
//!
//! Matches the backend wire form: a turn is `{role, parts}` where a part is
//! either a bare string or `{"inline_data": {"mime_type", "data"}}`.

use std::path::Path;
use std::sync::LazyLock;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Base64 data-URL shape: `data:<mime>;base64,<payload>`
static DATA_URL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^data:([\w.+-]+/[\w.+-]+);base64,(.*)$").expect("valid regex")
});

/// Who produced a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

impl Role {
    /// Wire string for this role
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Model => "model",
        }
    }
}

/// An inline image attachment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineImage {
    /// MIME type; always starts with `image/`
    pub mime_type: String,

    /// Base64-encoded image bytes
    pub data: String,
}

impl InlineImage {
    /// Parse an inline image out of a base64 data-URL
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedUpload`] if the URL is malformed or the
    /// MIME type is not an image
    pub fn from_data_url(url: &str) -> Result<Self> {
        let captures = DATA_URL_REGEX
            .captures(url)
            .ok_or_else(|| Error::UnsupportedUpload("malformed data URL".to_string()))?;

        let mime_type = captures[1].to_string();
        if !mime_type.starts_with("image/") {
            return Err(Error::UnsupportedUpload(format!(
                "{mime_type} is not an image"
            )));
        }

        Ok(Self {
            mime_type,
            data: captures[2].to_string(),
        })
    }
}

/// One piece of a turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Part {
    /// Plain text, serialized as a bare string
    Text(String),
    /// Inline image, serialized as `{"inline_data": {...}}`
    Image { inline_data: InlineImage },
}

impl Part {
    /// Build a text part
    #[must_use]
    pub const fn text(content: String) -> Self {
        Self::Text(content)
    }

    /// Build an image part
    #[must_use]
    pub const fn image(image: InlineImage) -> Self {
        Self::Image { inline_data: image }
    }
}

/// One entry in the conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub parts: Vec<Part>,
}

impl Turn {
    /// Build a user turn from its parts
    #[must_use]
    pub const fn user(parts: Vec<Part>) -> Self {
        Self {
            role: Role::User,
            parts,
        }
    }

    /// Build a model turn holding one text part
    #[must_use]
    pub fn model(text: String) -> Self {
        Self {
            role: Role::Model,
            parts: vec![Part::Text(text)],
        }
    }
}

/// Ordered conversation history
///
/// Append-only, except that the most recent user turn is removed when its
/// request fails so a retry does not duplicate it.
#[derive(Debug, Clone, Default)]
pub struct ConversationHistory {
    turns: Vec<Turn>,
}

impl ConversationHistory {
    /// Create an empty history
    #[must_use]
    pub const fn new() -> Self {
        Self { turns: Vec::new() }
    }

    /// All turns in order
    #[must_use]
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Number of turns
    #[must_use]
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// Whether the history is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Append a turn
    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    /// Remove the most recent turn if it is a user turn
    ///
    /// Returns whether a turn was removed. Used to roll back a failed send.
    pub fn rollback_user_turn(&mut self) -> bool {
        if self.turns.last().is_some_and(|t| t.role == Role::User) {
            self.turns.pop();
            return true;
        }
        false
    }
}

/// A file entering the system, resolved once at the boundary
#[derive(Debug, Clone)]
pub enum UploadedFile {
    /// An image we can attach to a turn
    Image { mime: String, data: Vec<u8> },
    /// Anything else; carries the name for the user-facing notice
    Unsupported { name: String },
}

impl UploadedFile {
    /// Classify a file on disk by extension
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read
    pub fn from_path(path: &Path) -> Result<Self> {
        let name = path
            .file_name()
            .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());

        let Some(mime) = image_mime_for(path) else {
            return Ok(Self::Unsupported { name });
        };

        let data = std::fs::read(path)?;
        Ok(Self::Image {
            mime: mime.to_string(),
            data,
        })
    }

    /// Convert into an inline image for attachment
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedUpload`] for non-image files
    pub fn into_inline_image(self) -> Result<InlineImage> {
        match self {
            Self::Image { mime, data } => Ok(InlineImage {
                mime_type: mime,
                data: BASE64.encode(data),
            }),
            Self::Unsupported { name } => Err(Error::UnsupportedUpload(name)),
        }
    }

    /// Convert into a history part
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedUpload`] for non-image files
    pub fn into_part(self) -> Result<Part> {
        Ok(Part::image(self.into_inline_image()?))
    }
}

/// Image MIME type for a path, by extension
fn image_mime_for(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "bmp" => Some("image/bmp"),
        _ => None,
    }
}
