//! Speaker output through cpal
//!
//! Each clip gets a dedicated playback thread that owns the cpal stream and
//! listens for control commands; the handle returned to the player is just
//! the sending side of that command channel.

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleRate;

use super::player::{AudioSink, SinkHandle};
use crate::{Error, Result};

/// How often the playback thread checks for commands and completion
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Grace period for the device to drain its final buffer
const DRAIN_DELAY: Duration = Duration::from_millis(100);

/// Sample rate used for generated test tones
const TONE_SAMPLE_RATE: u32 = 24_000;

enum SinkCommand {
    Pause,
    Resume,
    Stop,
}

/// Plays MP3 clips on the default output device
pub struct CpalSink;

impl CpalSink {
    /// Probe the default output device
    ///
    /// # Errors
    ///
    /// Returns error if no output device is available
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;
        tracing::debug!(
            device = device.name().unwrap_or_default(),
            "audio output initialized"
        );
        Ok(Self)
    }

    /// Play a short generated sine tone, blocking until it finishes
    ///
    /// # Errors
    ///
    /// Returns error if the device cannot be opened
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn play_tone(&self, frequency: f32, duration: Duration) -> Result<()> {
        let count = (duration.as_secs_f32() * TONE_SAMPLE_RATE as f32) as usize;
        let samples: Vec<f32> = (0..count)
            .map(|i| {
                let t = i as f32 / TONE_SAMPLE_RATE as f32;
                (t * frequency * 2.0 * std::f32::consts::PI).sin() * 0.3
            })
            .collect();

        let (_tx, rx) = mpsc::channel();
        run_clip(samples, TONE_SAMPLE_RATE, &rx).map(|_| ())
    }
}

impl AudioSink for CpalSink {
    fn start(
        &self,
        clip: Vec<u8>,
        on_done: Box<dyn FnOnce() + Send>,
    ) -> Result<Box<dyn SinkHandle>> {
        let (samples, sample_rate) = decode_mp3(&clip)?;
        if samples.is_empty() {
            tracing::debug!("clip decoded to no samples");
            on_done();
            return Ok(Box::new(CpalHandle { tx: None }));
        }

        let (tx, rx) = mpsc::channel();
        std::thread::Builder::new()
            .name("audio-playback".to_string())
            .spawn(move || match run_clip(samples, sample_rate, &rx) {
                Ok(true) => on_done(),
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(error = %e, "playback failed");
                    on_done();
                }
            })
            .map_err(|e| Error::Audio(format!("failed to spawn playback thread: {e}")))?;

        Ok(Box::new(CpalHandle { tx: Some(tx) }))
    }
}

/// Command channel into one clip's playback thread
///
/// Send failures mean the clip already finished; the race with a natural end
/// is benign, so commands degrade to no-ops.
struct CpalHandle {
    tx: Option<mpsc::Sender<SinkCommand>>,
}

impl CpalHandle {
    fn send(&self, command: SinkCommand) {
        if let Some(tx) = &self.tx {
            if tx.send(command).is_err() {
                tracing::trace!("command after clip end, ignoring");
            }
        }
    }
}

impl SinkHandle for CpalHandle {
    fn pause(&mut self) -> Result<()> {
        self.send(SinkCommand::Pause);
        Ok(())
    }

    fn resume(&mut self) -> Result<()> {
        self.send(SinkCommand::Resume);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.send(SinkCommand::Stop);
        Ok(())
    }
}

/// Play mono samples on the default device, honoring control commands
///
/// Returns `Ok(true)` if the clip ran to completion, `Ok(false)` if it was
/// stopped through the handle.
fn run_clip(
    samples: Vec<f32>,
    sample_rate: u32,
    commands: &mpsc::Receiver<SinkCommand>,
) -> Result<bool> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Audio("no output device".to_string()))?;

    let supported_config = device
        .supported_output_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .find(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= SampleRate(sample_rate)
                && c.max_sample_rate() >= SampleRate(sample_rate)
        })
        .or_else(|| {
            // Fallback: try stereo
            device.supported_output_configs().ok()?.find(|c| {
                c.channels() == 2
                    && c.min_sample_rate() <= SampleRate(sample_rate)
                    && c.max_sample_rate() >= SampleRate(sample_rate)
            })
        })
        .ok_or_else(|| Error::Audio(format!("no output config for {sample_rate} Hz")))?;

    let config = supported_config
        .with_sample_rate(SampleRate(sample_rate))
        .config();
    let channels = usize::from(config.channels);

    let finished = Arc::new(AtomicBool::new(false));
    let finished_cb = Arc::clone(&finished);
    let mut pos = 0usize;

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                for frame in data.chunks_mut(channels) {
                    let sample = if pos < samples.len() {
                        samples[pos]
                    } else {
                        finished_cb.store(true, Ordering::Relaxed);
                        0.0
                    };

                    for out in frame.iter_mut() {
                        *out = sample;
                    }

                    if pos < samples.len() {
                        pos += 1;
                    }
                }
            },
            |err| {
                tracing::error!(error = %err, "audio stream error");
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))?;

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;

    loop {
        match commands.recv_timeout(POLL_INTERVAL) {
            Ok(SinkCommand::Pause) => {
                stream.pause().map_err(|e| Error::Audio(e.to_string()))?;
            }
            Ok(SinkCommand::Resume) => {
                stream.play().map_err(|e| Error::Audio(e.to_string()))?;
            }
            Ok(SinkCommand::Stop) => {
                tracing::debug!("clip stopped");
                return Ok(false);
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                if finished.load(Ordering::Relaxed) {
                    std::thread::sleep(DRAIN_DELAY);
                    tracing::debug!("clip complete");
                    return Ok(true);
                }
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                // Handle dropped without a stop; play the clip out
                while !finished.load(Ordering::Relaxed) {
                    std::thread::sleep(POLL_INTERVAL);
                }
                std::thread::sleep(DRAIN_DELAY);
                return Ok(true);
            }
        }
    }
}

/// Decode MP3 bytes to mono f32 samples and their sample rate
fn decode_mp3(data: &[u8]) -> Result<(Vec<f32>, u32)> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(data));
    let mut samples = Vec::new();
    let mut sample_rate = TONE_SAMPLE_RATE;
    let mut first_frame = true;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                if first_frame {
                    #[allow(clippy::cast_sign_loss)]
                    {
                        sample_rate = frame.sample_rate as u32;
                    }
                    first_frame = false;
                }

                // Convert i16 samples to f32 and fold stereo to mono
                let frame_samples: Vec<f32> = if frame.channels == 2 {
                    frame
                        .data
                        .chunks(2)
                        .map(|chunk| {
                            let left = f32::from(chunk[0]) / 32768.0;
                            let right =
                                f32::from(chunk.get(1).copied().unwrap_or(chunk[0])) / 32768.0;
                            f32::midpoint(left, right)
                        })
                        .collect()
                } else {
                    frame.data.iter().map(|&s| f32::from(s) / 32768.0).collect()
                };

                samples.extend(frame_samples);
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
        }
    }

    Ok((samples, sample_rate))
}
