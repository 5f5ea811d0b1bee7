//! Voice output module
//!
//! Handles speech synthesis through the companion endpoint and reply
//! playback on the local speaker.

mod player;
mod sink;
mod synth;

pub use player::{AudioPlayer, AudioSink, NullSink, PlaybackState, SinkHandle};
pub use sink::CpalSink;
pub use synth::{SpeechClient, SpeechSegment, Synthesizer};
