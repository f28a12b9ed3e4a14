//! # Audio Module
//!
//! Everything that touches raw audio before it leaves the service:
//!
//! - **buffer**: Interleaved float sample buffers and the per-recording capture accumulator
//! - **wav**: Canonical 16-bit PCM RIFF/WAVE encoding of a buffer
//! - **session**: Per-session pipeline state machine and the session manager
//!
//! ## Audio Format:
//! Clients stream 16-bit little-endian PCM. Internally samples are normalized
//! `f32` values in [-1.0, 1.0], interleaved by channel (frame 0 channel 0,
//! frame 0 channel 1, frame 1 channel 0, ...).

pub mod buffer;
pub mod session;
pub mod wav;

pub use buffer::{AudioBuffer, CaptureBuffer};
pub use session::{PipelineMode, SessionManager, SessionState, TherapySession};
pub use wav::{WavEncoder, WavFile};

/// Errors raised while building or encoding audio.
///
/// Neither variant is retried here; callers decide what to do.
#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    /// Malformed input: no channels, zero sample rate, ragged frames, oversized data
    #[error("Invalid audio: {0}")]
    InvalidAudio(String),

    /// Destination could not be written
    #[error("Audio I/O error: {0}")]
    Io(#[from] std::io::Error),
}
