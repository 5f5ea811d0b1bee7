//! Conversation state, wire transport, and response-stream decoding

mod decoder;
mod history;
mod session;
mod transport;

pub use decoder::{StreamDecoder, StreamEvent};
pub use history::{ConversationHistory, InlineImage, Part, Role, Turn, UploadedFile};
pub use session::{ChatSession, SendOutcome, SkipReason};
pub use transport::{ByteStream, ChatRequest, ChatTransport, DocumentReply, HttpChatTransport};
