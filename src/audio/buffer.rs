//! # Audio Buffers
//!
//! Two buffer types live here:
//!
//! - **AudioBuffer**: an immutable, validated block of interleaved float samples.
//!   This is what the WAV encoder consumes.
//! - **CaptureBuffer**: a thread-safe accumulator that collects PCM chunks while a
//!   session is recording, bounded by the maximum recording length.
//!
//! ## Sample Layout:
//! Samples are interleaved per frame. A stereo buffer of three frames holds
//! `[L0, R0, L1, R1, L2, R2]`, so `samples.len() == frame_count * channels`.

use crate::audio::AudioError;
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;
use std::sync::Mutex;

/// Fewest frames a recording needs before it is worth encoding.
pub const MIN_RECORDED_FRAMES: usize = 2;

/// Interleaved floating point audio ready for encoding.
///
/// ## Invariants (checked at construction):
/// - `channels >= 1`
/// - `sample_rate >= 1`
/// - `samples.len()` is a multiple of `channels`
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    samples: Vec<f32>,
    channels: u16,
    sample_rate: u32,
}

impl AudioBuffer {
    /// Build a buffer from interleaved samples.
    ///
    /// Sample values outside [-1.0, 1.0] are accepted here; the encoder clamps them.
    pub fn new(samples: Vec<f32>, channels: u16, sample_rate: u32) -> Result<Self, AudioError> {
        if channels == 0 {
            return Err(AudioError::InvalidAudio(
                "channel count must be at least 1".to_string(),
            ));
        }
        if sample_rate == 0 {
            return Err(AudioError::InvalidAudio(
                "sample rate must be greater than 0".to_string(),
            ));
        }
        if samples.len() % channels as usize != 0 {
            return Err(AudioError::InvalidAudio(format!(
                "{} samples cannot be split into whole frames of {} channels",
                samples.len(),
                channels
            )));
        }

        Ok(Self {
            samples,
            channels,
            sample_rate,
        })
    }

    /// Decode raw 16-bit little-endian PCM into a normalized buffer.
    ///
    /// ## Conversion:
    /// Each `i16` is scaled by `1 / 32768` so the full integer range maps onto [-1.0, 1.0).
    pub fn from_pcm16_le(data: &[u8], channels: u16, sample_rate: u32) -> Result<Self, AudioError> {
        let samples = decode_pcm16_le(data)?;
        Self::new(samples, channels, sample_rate)
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of frames (one sample per channel).
    pub fn frame_count(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration of the buffered audio in seconds.
    pub fn duration_seconds(&self) -> f64 {
        self.frame_count() as f64 / self.sample_rate as f64
    }
}

/// Decode a 16-bit little-endian PCM byte stream into normalized floats.
fn decode_pcm16_le(data: &[u8]) -> Result<Vec<f32>, AudioError> {
    if data.len() % 2 != 0 {
        return Err(AudioError::InvalidAudio(
            "PCM data length must be even for 16-bit samples".to_string(),
        ));
    }

    let mut cursor = Cursor::new(data);
    let mut samples = Vec::with_capacity(data.len() / 2);
    while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
        samples.push(sample as f32 / 32768.0);
    }

    Ok(samples)
}

/// Accumulates microphone audio for a single recording.
///
/// ## Capacity:
/// A recording is capped at `max_recording_secs`. Once the cap is hit further
/// samples are dropped and `is_full()` reports true; the data already
/// captured is kept, mirroring a microphone that stops at its maximum length.
///
/// ## Thread Safety:
/// The inner `Mutex` lets HTTP handlers append chunks while another task
/// inspects the length.
#[derive(Debug)]
pub struct CaptureBuffer {
    samples: Mutex<Vec<f32>>,
    channels: u16,
    sample_rate: u32,
    max_samples: usize,
}

impl CaptureBuffer {
    pub fn new(channels: u16, sample_rate: u32, max_recording_secs: u32) -> Self {
        let max_samples =
            max_recording_secs as usize * sample_rate as usize * channels.max(1) as usize;

        Self {
            samples: Mutex::new(Vec::new()),
            channels,
            sample_rate,
            max_samples,
        }
    }

    /// Append raw 16-bit little-endian PCM.
    ///
    /// ## Returns:
    /// The number of samples accepted. Anything past the recording cap is discarded.
    pub fn append_pcm16_le(&self, data: &[u8]) -> Result<usize, AudioError> {
        if data.is_empty() {
            return Err(AudioError::InvalidAudio("No audio data provided".to_string()));
        }
        let incoming = decode_pcm16_le(data)?;
        Ok(self.append_samples(&incoming))
    }

    /// Append already-normalized samples, returning how many were accepted.
    pub fn append_samples(&self, incoming: &[f32]) -> usize {
        let mut samples = self.lock();
        let room = self.max_samples.saturating_sub(samples.len());
        let accepted = incoming.len().min(room);
        samples.extend_from_slice(&incoming[..accepted]);
        accepted
    }

    /// Number of samples captured so far (all channels).
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// True once the maximum recording length has been reached.
    pub fn is_full(&self) -> bool {
        self.lock().len() >= self.max_samples
    }

    pub fn frame_count(&self) -> usize {
        self.len() / self.channels.max(1) as usize
    }

    pub fn duration_seconds(&self) -> f64 {
        self.frame_count() as f64 / self.sample_rate.max(1) as f64
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Drain the captured audio into an `AudioBuffer`.
    ///
    /// A trailing partial frame (possible if a client sent an odd number of
    /// samples for a stereo stream) is dropped so the buffer stays frame aligned.
    pub fn take(&self) -> Result<AudioBuffer, AudioError> {
        let mut samples = std::mem::take(&mut *self.lock());
        let channels = self.channels.max(1) as usize;
        samples.truncate(samples.len() - samples.len() % channels);
        AudioBuffer::new(samples, self.channels, self.sample_rate)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<f32>> {
        // A poisoned lock only means a writer panicked mid-append; the samples are still usable.
        self.samples.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
