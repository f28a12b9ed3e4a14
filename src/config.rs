//! # Configuration Management
//!
//! Configuration is layered from three sources:
//! - Built-in defaults (the `Default` impl below)
//! - An optional `config.toml` next to the binary's working directory
//! - Environment variables with the `APP_` prefix
//!
//! ## Configuration Priority (highest to lowest):
//! 1. `HOST`, `PORT` and `ELEVENLABS_API_KEY` (deployment platform conventions)
//! 2. `APP_` variables, nested with a double underscore
//!    (`APP_SERVER__PORT=3000`, `APP_PROVIDERS__API_KEY=...`)
//! 3. `config.toml`
//! 4. Defaults
//!
//! API keys default to empty strings and must be supplied through the file or
//! the environment.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::env;

use crate::audio::session::CaptureSettings;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub audio: AudioConfig,
    pub providers: ProvidersConfig,
    pub pipeline: PipelineConfig,
    pub performance: PerformanceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Format of the PCM stream clients send while recording.
///
/// ## Fields:
/// - `sample_rate`: Hz, 16000 suits speech-to-text services
/// - `channels`: interleaved channel count
/// - `max_recording_secs`: recordings stop accepting audio past this length
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub max_recording_secs: u32,
}

impl AudioConfig {
    pub fn to_capture_settings(&self) -> CaptureSettings {
        CaptureSettings {
            channels: self.channels,
            sample_rate: self.sample_rate,
            max_recording_secs: self.max_recording_secs,
        }
    }
}

/// Endpoints, models and credentials for the hosted services.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvidersConfig {
    /// Bearer token for the transcription and chat endpoints
    pub api_key: String,
    pub transcription_url: String,
    pub transcription_model: String,
    pub chat_url: String,
    pub chat_model: String,
    /// Optional system message sent ahead of every prompt (empty = none)
    pub system_prompt: String,
    /// Base URL; the voice id is appended as the last path segment
    pub tts_url: String,
    pub tts_api_key: String,
    pub tts_voice_id: String,
    pub tts_model_id: String,
    pub tts_output_format: String,
    pub request_timeout_secs: u64,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            transcription_url: "https://api.openai.com/v1/audio/transcriptions".to_string(),
            transcription_model: "whisper-1".to_string(),
            chat_url: "https://api.openai.com/v1/chat/completions".to_string(),
            chat_model: "gpt-3.5-turbo".to_string(),
            system_prompt: String::new(),
            tts_url: "https://api.elevenlabs.io/v1/text-to-speech".to_string(),
            tts_api_key: String::new(),
            tts_voice_id: "21m00Tcm4TlvDq8ikWAM".to_string(),
            tts_model_id: "eleven_monolingual_v1".to_string(),
            tts_output_format: "mp3_44100_128".to_string(),
            request_timeout_secs: 60,
        }
    }
}

/// Pipeline behaviour.
///
/// ## Fields:
/// - `prompt_prefix`: prepended to the transcript before it goes to the chat model
/// - `synthesize_speech`: speak replies aloud (false = text replies only)
/// - `output_dir`: per-session artifacts are written under `<output_dir>/<session_id>/`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub prompt_prefix: String,
    pub synthesize_speech: bool,
    pub output_dir: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceConfig {
    pub max_concurrent_sessions: usize,
    /// Sessions idle longer than this are removed by the cleanup task
    pub session_max_age_secs: u64,
    pub cleanup_interval_secs: u64,
    pub max_upload_bytes: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            audio: AudioConfig {
                sample_rate: 16000,
                channels: 1,
                max_recording_secs: 30,
            },
            providers: ProvidersConfig::default(),
            pipeline: PipelineConfig {
                prompt_prefix:
                    "Hey GPT, give me a short response to this like you are a human therapist: "
                        .to_string(),
                synthesize_speech: true,
                output_dir: "data/sessions".to_string(),
            },
            performance: PerformanceConfig {
                max_concurrent_sessions: 10,
                session_max_age_secs: 3600,
                cleanup_interval_secs: 300,
                max_upload_bytes: 25 * 1024 * 1024,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, `config.toml` and the environment.
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        if let Ok(key) = env::var("ELEVENLABS_API_KEY") {
            settings = settings.set_override("providers.tts_api_key", key)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Check that the configuration values make sense.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow!("Server port cannot be 0"));
        }

        if self.audio.channels == 0 {
            return Err(anyhow!("Audio channel count must be at least 1"));
        }

        if self.audio.sample_rate == 0 {
            return Err(anyhow!("Audio sample rate must be greater than 0"));
        }

        if self.audio.max_recording_secs == 0 {
            return Err(anyhow!("Maximum recording length must be greater than 0"));
        }

        for (name, url) in [
            ("transcription_url", &self.providers.transcription_url),
            ("chat_url", &self.providers.chat_url),
            ("tts_url", &self.providers.tts_url),
        ] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(anyhow!("providers.{} must be an http(s) URL, got '{}'", name, url));
            }
        }

        if self.providers.request_timeout_secs == 0 {
            return Err(anyhow!("Provider request timeout must be greater than 0"));
        }

        if self.pipeline.output_dir.trim().is_empty() {
            return Err(anyhow!("Pipeline output directory cannot be empty"));
        }

        if self.performance.max_concurrent_sessions == 0 {
            return Err(anyhow!("Max concurrent sessions must be greater than 0"));
        }

        if self.performance.max_upload_bytes == 0 {
            return Err(anyhow!("Max upload size must be greater than 0"));
        }

        Ok(())
    }

    /// Apply a partial JSON update, e.g. `{"pipeline": {"synthesize_speech": false}}`.
    ///
    /// Only the fields in `RUNTIME_FIELDS` may change; any other field must be
    /// absent or equal to its current value. Fields not present in the update
    /// keep their current values. The result is validated; on failure `self`
    /// is left unchanged.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let patch: serde_json::Value = serde_json::from_str(json_str)?;
        if !patch.is_object() {
            return Err(anyhow!("Configuration update must be a JSON object"));
        }

        let mut merged = serde_json::to_value(&*self)?;
        check_runtime_fields(&merged, &patch, "")?;
        merge_json(&mut merged, patch);

        let updated: AppConfig = serde_json::from_value(merged)?;
        updated.validate()?;
        *self = updated;
        Ok(())
    }

    /// JSON view with credentials masked.
    pub fn redacted(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or_default();
        if let Some(providers) = value.get_mut("providers").and_then(|p| p.as_object_mut()) {
            for key in ["api_key", "tts_api_key"] {
                if let Some(field) = providers.get_mut(key) {
                    let is_set = field.as_str().map(|s| !s.is_empty()).unwrap_or(false);
                    *field = serde_json::Value::String(if is_set { "***" } else { "" }.to_string());
                }
            }
        }
        value
    }
}

/// Fields that `update_from_json` may change on a running server. Endpoints,
/// credentials, the output directory, capture format and limits are fixed at
/// startup.
const RUNTIME_FIELDS: &[&str] = &[
    "pipeline.prompt_prefix",
    "pipeline.synthesize_speech",
    "providers.system_prompt",
    "providers.transcription_model",
    "providers.chat_model",
    "providers.tts_voice_id",
    "providers.tts_model_id",
    "providers.tts_output_format",
    "providers.request_timeout_secs",
];

fn check_runtime_fields(
    current: &serde_json::Value,
    patch: &serde_json::Value,
    path: &str,
) -> Result<()> {
    let Some(patch) = patch.as_object() else {
        return Ok(());
    };

    for (key, value) in patch {
        let field = if path.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", path, key)
        };
        if RUNTIME_FIELDS.contains(&field.as_str()) {
            continue;
        }

        match current.get(key) {
            Some(existing) if existing.is_object() && value.is_object() => {
                check_runtime_fields(existing, value, &field)?
            }
            Some(existing) if existing == value => {}
            _ => return Err(anyhow!("'{}' cannot be changed at runtime", field)),
        }
    }
    Ok(())
}

/// Recursively overlay `patch` onto `target`; objects merge, everything else replaces.
fn merge_json(target: &mut serde_json::Value, patch: serde_json::Value) {
    match (target, patch) {
        (serde_json::Value::Object(target), serde_json::Value::Object(patch)) => {
            for (key, value) in patch {
                match target.get_mut(&key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        target.insert(key, value);
                    }
                }
            }
        }
        (target, patch) => *target = patch,
    }
}
