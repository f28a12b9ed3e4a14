//! Text-to-speech over an ElevenLabs-compatible endpoint.

use super::{ensure_success, ProviderError, SpeechSynthesizer, SynthesizedSpeech};
use crate::config::ProvidersConfig;
use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::Serialize;

const SERVICE: &str = "speech";

#[derive(Debug, Serialize)]
struct SpeechRequest<'a> {
    text: &'a str,
    model_id: &'a str,
    output_format: &'a str,
}

pub struct ElevenLabsSynthesizer {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model_id: String,
    output_format: String,
}

impl ElevenLabsSynthesizer {
    pub fn new(client: reqwest::Client, config: &ProvidersConfig) -> Self {
        Self {
            client,
            url: format!(
                "{}/{}",
                config.tts_url.trim_end_matches('/'),
                config.tts_voice_id
            ),
            api_key: config.tts_api_key.clone(),
            model_id: config.tts_model_id.clone(),
            output_format: config.tts_output_format.clone(),
        }
    }
}

/// MIME type implied by an output format such as `mp3_44100_128` or `pcm_24000`.
fn content_type_for_format(output_format: &str) -> &'static str {
    match output_format.split('_').next().unwrap_or_default() {
        "mp3" => "audio/mpeg",
        "pcm" => "audio/pcm",
        "ulaw" => "audio/basic",
        "opus" => "audio/ogg",
        "wav" => "audio/wav",
        _ => "application/octet-stream",
    }
}

#[async_trait]
impl SpeechSynthesizer for ElevenLabsSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<SynthesizedSpeech, ProviderError> {
        let request = SpeechRequest {
            text,
            model_id: &self.model_id,
            output_format: &self.output_format,
        };
        let expected_type = content_type_for_format(&self.output_format);

        tracing::debug!(model_id = %self.model_id, chars = text.len(), "Requesting speech synthesis");

        let response = self
            .client
            .post(&self.url)
            .header("xi-api-key", &self.api_key)
            .header(ACCEPT, expected_type)
            .json(&request)
            .send()
            .await?;
        let response = ensure_success(SERVICE, response).await?;

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.split(';').next().unwrap_or(value).trim().to_string())
            .filter(|value| value.starts_with("audio/"))
            .unwrap_or_else(|| expected_type.to_string());

        let bytes = response.bytes().await?.to_vec();
        if bytes.is_empty() {
            return Err(ProviderError::MalformedResponse {
                service: SERVICE,
                message: "empty audio body".to_string(),
            });
        }

        Ok(SynthesizedSpeech {
            bytes,
            content_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::{
        matchers::{body_json, header, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    fn config_for(server: &MockServer) -> ProvidersConfig {
        ProvidersConfig {
            tts_url: format!("{}/v1/text-to-speech/", server.uri()),
            tts_api_key: "xi-test".to_string(),
            tts_voice_id: "voice123".to_string(),
            ..ProvidersConfig::default()
        }
    }

    #[test]
    fn test_content_type_for_format() {
        assert_eq!(content_type_for_format("mp3_44100_128"), "audio/mpeg");
        assert_eq!(content_type_for_format("pcm_24000"), "audio/pcm");
        assert_eq!(content_type_for_format("mystery"), "application/octet-stream");
    }

    #[tokio::test]
    async fn test_synthesize_returns_audio() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/text-to-speech/voice123"))
            .and(header("xi-api-key", "xi-test"))
            .and(body_json(json!({
                "text": "Take a deep breath.",
                "model_id": "eleven_monolingual_v1",
                "output_format": "mp3_44100_128"
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "audio/mpeg")
                    .set_body_bytes(vec![0xFF, 0xFB, 0x90, 0x00]),
            )
            .expect(1)
            .mount(&server)
            .await;

        let tts = ElevenLabsSynthesizer::new(reqwest::Client::new(), &config_for(&server));
        let speech = tts.synthesize("Take a deep breath.").await.unwrap();

        assert_eq!(speech.bytes, vec![0xFF, 0xFB, 0x90, 0x00]);
        assert_eq!(speech.content_type, "audio/mpeg");
        assert_eq!(speech.file_extension(), "mp3");
    }

    #[tokio::test]
    async fn test_synthesize_surfaces_error_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(422).set_body_string("{\"detail\":\"voice not found\"}"))
            .mount(&server)
            .await;

        let tts = ElevenLabsSynthesizer::new(reqwest::Client::new(), &config_for(&server));
        match tts.synthesize("hello").await {
            Err(ProviderError::Status { status, body, .. }) => {
                assert_eq!(status, 422);
                assert!(body.contains("voice not found"));
            }
            other => panic!("expected status error, got {:?}", other),
        }
    }
}
