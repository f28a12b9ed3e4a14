//! # External Providers
//!
//! The pipeline talks to three hosted services. Each sits behind a trait so the
//! pipeline never depends on a concrete vendor:
//!
//! - **Transcriber**: speech-to-text (OpenAI-compatible `/audio/transcriptions`)
//! - **ChatModel**: reply generation (OpenAI-compatible `/chat/completions`)
//! - **SpeechSynthesizer**: text-to-speech (ElevenLabs-compatible)
//!
//! Requests are single-shot. Failures surface as `ProviderError` and are never
//! retried here.

pub mod chat;
pub mod speech;
pub mod transcription;

pub use chat::ChatCompletionsClient;
pub use speech::ElevenLabsSynthesizer;
pub use transcription::WhisperApiTranscriber;

use crate::audio::WavFile;
use crate::config::ProvidersConfig;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Longest slice of an error body kept in `ProviderError::Status`.
const MAX_ERROR_BODY_CHARS: usize = 500;

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Transport failure, timeout, or unreadable body
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    /// The service answered with a non-success status
    #[error("{service} returned HTTP {status}: {body}")]
    Status {
        service: &'static str,
        status: u16,
        body: String,
    },

    /// The service answered 2xx but the body was not what we expected
    #[error("Malformed {service} response: {message}")]
    MalformedResponse {
        service: &'static str,
        message: String,
    },
}

/// An audio file on its way to the transcription service.
#[derive(Debug, Clone)]
pub struct AudioUpload {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl AudioUpload {
    /// Wrap an encoded recording.
    pub fn wav(filename: impl Into<String>, wav: WavFile) -> Self {
        Self {
            filename: filename.into(),
            content_type: "audio/wav".to_string(),
            bytes: wav.into_bytes(),
        }
    }

    /// Wrap an arbitrary uploaded file, guessing its type from the extension
    /// when the client did not send one.
    pub fn from_file(filename: impl Into<String>, bytes: Vec<u8>, content_type: Option<String>) -> Self {
        let filename = filename.into();
        let content_type = content_type
            .filter(|ct| !ct.is_empty() && ct != "application/octet-stream")
            .unwrap_or_else(|| guess_audio_mime(&filename).to_string());

        Self {
            filename,
            content_type,
            bytes,
        }
    }
}

/// Map a filename extension to an audio MIME type.
pub fn guess_audio_mime(filename: &str) -> &'static str {
    let extension = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "wav" => "audio/wav",
        "mp3" | "mpga" | "mpeg" => "audio/mpeg",
        "m4a" | "mp4" => "audio/mp4",
        "ogg" | "oga" => "audio/ogg",
        "webm" => "audio/webm",
        "flac" => "audio/flac",
        _ => "application/octet-stream",
    }
}

/// Audio returned by a speech synthesizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesizedSpeech {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

impl SynthesizedSpeech {
    /// File extension matching the content type.
    pub fn file_extension(&self) -> &'static str {
        match self.content_type.as_str() {
            "audio/mpeg" | "audio/mp3" => "mp3",
            "audio/wav" | "audio/x-wav" | "audio/wave" => "wav",
            "audio/ogg" => "ogg",
            "audio/basic" => "ulaw",
            "audio/pcm" | "audio/l16" => "pcm",
            _ => "bin",
        }
    }
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio: AudioUpload) -> Result<String, ProviderError>;
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn reply(&self, prompt: &str) -> Result<String, ProviderError>;
}

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<SynthesizedSpeech, ProviderError>;
}

/// The three collaborators the pipeline needs.
#[derive(Clone)]
pub struct Providers {
    pub transcriber: Arc<dyn Transcriber>,
    pub chat: Arc<dyn ChatModel>,
    pub speech: Arc<dyn SpeechSynthesizer>,
}

impl Providers {
    /// Build HTTP-backed providers sharing one connection pool.
    pub fn from_config(config: &ProvidersConfig) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .pool_max_idle_per_host(4)
            .build()?;

        Ok(Self {
            transcriber: Arc::new(WhisperApiTranscriber::new(client.clone(), config)),
            chat: Arc::new(ChatCompletionsClient::new(client.clone(), config)),
            speech: Arc::new(ElevenLabsSynthesizer::new(client, config)),
        })
    }
}

/// Turn a non-success response into `ProviderError::Status`, capping the body.
async fn ensure_success(
    service: &'static str,
    response: reqwest::Response,
) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let body: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
    tracing::warn!(service, status = status.as_u16(), body = %body, "Provider request failed");

    Err(ProviderError::Status {
        service,
        status: status.as_u16(),
        body,
    })
}
