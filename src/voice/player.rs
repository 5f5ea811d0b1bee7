//! Reply audio playback
//!
//! [`AudioPlayer`] owns at most one playing clip at a time and tracks its
//! lifecycle. The actual output device sits behind [`AudioSink`], so the
//! player logic runs the same against real hardware and against test sinks.

use std::sync::{Arc, Mutex, PoisonError};

use crate::Result;

/// Lifecycle of the current clip
///
/// `Ended` is transient: a clip that finishes on its own is recorded as ended
/// and immediately folds back to `Idle`, so observers only ever see `Idle`
/// once playback is over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    /// No clip
    Idle,
    /// Clip audible
    Playing,
    /// Clip frozen mid-way, resumable
    Paused,
    /// Clip ran to completion
    Ended,
}

/// Control surface for one started clip
pub trait SinkHandle: Send {
    /// Freeze output, keeping the position
    ///
    /// # Errors
    ///
    /// Returns error if the device rejects the operation
    fn pause(&mut self) -> Result<()>;

    /// Continue from the paused position
    ///
    /// # Errors
    ///
    /// Returns error if the device rejects the operation
    fn resume(&mut self) -> Result<()>;

    /// Tear the clip down early
    ///
    /// # Errors
    ///
    /// Returns error if the device rejects the operation
    fn stop(&mut self) -> Result<()>;
}

/// Output device seam
pub trait AudioSink: Send + Sync {
    /// Start playing an MP3 clip
    ///
    /// `on_done` fires exactly once if the clip runs to completion on its
    /// own; it does not fire for clips torn down through the handle. The
    /// sink may invoke it synchronously for degenerate clips.
    ///
    /// # Errors
    ///
    /// Returns error if the clip cannot be decoded or the device opened
    fn start(&self, clip: Vec<u8>, on_done: Box<dyn FnOnce() + Send>)
        -> Result<Box<dyn SinkHandle>>;
}

/// Sink that swallows clips, for voice-disabled runs
pub struct NullSink;

impl AudioSink for NullSink {
    fn start(
        &self,
        clip: Vec<u8>,
        on_done: Box<dyn FnOnce() + Send>,
    ) -> Result<Box<dyn SinkHandle>> {
        tracing::debug!(bytes = clip.len(), "null sink, discarding clip");
        on_done();
        Ok(Box::new(NullHandle))
    }
}

struct NullHandle;

impl SinkHandle for NullHandle {
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

struct PlayerInner {
    state: PlaybackState,
    handle: Option<Box<dyn SinkHandle>>,
    /// Bumped on every play and stop; completion signals carry the
    /// generation they belong to so a late signal cannot touch a newer clip
    generation: u64,
    /// Generation whose clip completed before its handle was installed
    finished_early: Option<u64>,
}

/// Plays reply audio, one clip at a time
#[derive(Clone)]
pub struct AudioPlayer {
    sink: Arc<dyn AudioSink>,
    inner: Arc<Mutex<PlayerInner>>,
}

impl AudioPlayer {
    /// Create a player over the given sink
    #[must_use]
    pub fn new(sink: Arc<dyn AudioSink>) -> Self {
        Self {
            sink,
            inner: Arc::new(Mutex::new(PlayerInner {
                state: PlaybackState::Idle,
                handle: None,
                generation: 0,
                finished_early: None,
            })),
        }
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> PlaybackState {
        self.lock().state
    }

    /// Start playing a clip, replacing whatever was playing before
    ///
    /// With `speech_enabled` false this is a no-op apart from tearing down
    /// any stale clip, so a disabled preference still silences leftovers.
    /// Empty clips are skipped.
    ///
    /// # Errors
    ///
    /// Returns error if the sink rejects the clip
    pub fn play(&self, clip: Vec<u8>, speech_enabled: bool) -> Result<()> {
        let (previous, generation) = {
            let mut inner = self.lock();
            inner.generation += 1;
            inner.state = PlaybackState::Idle;
            inner.finished_early = None;
            (inner.handle.take(), inner.generation)
        };
        stop_handle(previous);

        if !speech_enabled {
            tracing::debug!("speech disabled, skipping playback");
            return Ok(());
        }
        if clip.is_empty() {
            tracing::debug!("empty clip, skipping playback");
            return Ok(());
        }

        let signal = Arc::clone(&self.inner);
        let on_done = Box::new(move || Self::clip_ended(&signal, generation));

        // The lock is not held across start, so sinks that complete
        // synchronously signal through finished_early instead of deadlocking.
        let handle = self.sink.start(clip, on_done)?;

        let discarded = {
            let mut inner = self.lock();
            if inner.generation != generation {
                // A newer play or stop won the race
                Some(handle)
            } else if inner.finished_early.take() == Some(generation) {
                inner.state = PlaybackState::Idle;
                Some(handle)
            } else {
                inner.state = PlaybackState::Playing;
                inner.handle = Some(handle);
                tracing::debug!("playback started");
                None
            }
        };
        stop_handle(discarded);
        Ok(())
    }

    /// Pause the current clip; no-op unless one is playing
    ///
    /// # Errors
    ///
    /// Returns error if the device rejects the operation
    pub fn pause(&self) -> Result<()> {
        let mut inner = self.lock();
        if inner.state != PlaybackState::Playing {
            return Ok(());
        }
        if let Some(handle) = inner.handle.as_mut() {
            handle.pause()?;
            inner.state = PlaybackState::Paused;
            tracing::debug!("playback paused");
        }
        Ok(())
    }

    /// Resume a paused clip; no-op unless one is paused
    ///
    /// # Errors
    ///
    /// Returns error if the device rejects the operation
    pub fn resume(&self) -> Result<()> {
        let mut inner = self.lock();
        if inner.state != PlaybackState::Paused {
            return Ok(());
        }
        if let Some(handle) = inner.handle.as_mut() {
            handle.resume()?;
            inner.state = PlaybackState::Playing;
            tracing::debug!("playback resumed");
        }
        Ok(())
    }

    /// Flip between playing and paused; no-op without a clip
    ///
    /// A finished clip leaves no handle behind, so toggling after a natural
    /// end cannot resurrect it.
    ///
    /// # Errors
    ///
    /// Returns error if the device rejects the operation
    pub fn toggle(&self) -> Result<()> {
        match self.state() {
            PlaybackState::Playing => self.pause(),
            PlaybackState::Paused => self.resume(),
            PlaybackState::Idle | PlaybackState::Ended => Ok(()),
        }
    }

    /// Tear down the current clip, if any; idempotent
    ///
    /// # Errors
    ///
    /// Returns error if the device rejects the teardown
    pub fn stop(&self) -> Result<()> {
        let previous = {
            let mut inner = self.lock();
            inner.generation += 1;
            inner.state = PlaybackState::Idle;
            inner.finished_early = None;
            inner.handle.take()
        };
        if let Some(mut handle) = previous {
            handle.stop()?;
            tracing::debug!("playback stopped");
        }
        Ok(())
    }

    /// Completion signal from the sink
    fn clip_ended(inner: &Arc<Mutex<PlayerInner>>, generation: u64) {
        let mut inner = inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if inner.generation != generation {
            tracing::trace!(generation, "stale completion signal, ignoring");
            return;
        }
        if inner.handle.is_none() {
            // Completed before play installed the handle
            inner.finished_early = Some(generation);
            return;
        }
        inner.state = PlaybackState::Ended;
        tracing::debug!("playback ended");
        inner.state = PlaybackState::Idle;
        inner.handle = None;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PlayerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Stop and drop a displaced handle outside the player lock
fn stop_handle(handle: Option<Box<dyn SinkHandle>>) {
    if let Some(mut handle) = handle {
        if let Err(e) = handle.stop() {
            tracing::warn!(error = %e, "failed to stop displaced clip");
        }
    }
}
