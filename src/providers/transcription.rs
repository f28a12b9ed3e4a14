//! Speech-to-text over an OpenAI-compatible `/audio/transcriptions` endpoint.

use super::{ensure_success, AudioUpload, ProviderError, Transcriber};
use crate::config::ProvidersConfig;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;

const SERVICE: &str = "transcription";

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: Option<String>,
}

/// Uploads audio as multipart form data and reads back the `text` field.
pub struct WhisperApiTranscriber {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
}

impl WhisperApiTranscriber {
    pub fn new(client: reqwest::Client, config: &ProvidersConfig) -> Self {
        Self {
            client,
            url: config.transcription_url.clone(),
            api_key: config.api_key.clone(),
            model: config.transcription_model.clone(),
        }
    }
}

#[async_trait]
impl Transcriber for WhisperApiTranscriber {
    async fn transcribe(&self, audio: AudioUpload) -> Result<String, ProviderError> {
        tracing::debug!(
            filename = %audio.filename,
            content_type = %audio.content_type,
            bytes = audio.bytes.len(),
            "Requesting transcription"
        );

        let file = Part::bytes(audio.bytes)
            .file_name(audio.filename)
            .mime_str(&audio.content_type)?;
        let form = Form::new().text("model", self.model.clone()).part("file", file);

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;
        let body = ensure_success(SERVICE, response).await?.text().await?;

        let parsed: TranscriptionResponse =
            serde_json::from_str(&body).map_err(|e| ProviderError::MalformedResponse {
                service: SERVICE,
                message: e.to_string(),
            })?;

        match parsed.text.map(|t| t.trim().to_string()) {
            Some(text) if !text.is_empty() => Ok(text),
            _ => Err(ProviderError::MalformedResponse {
                service: SERVICE,
                message: "'text' field was missing or empty".to_string(),
            }),
        }
    }
}
