//! Reply generation over an OpenAI-compatible `/chat/completions` endpoint.

use super::{ensure_success, ChatModel, ProviderError};
use crate::config::ProvidersConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

const SERVICE: &str = "chat";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReplyMessage,
}

#[derive(Debug, Deserialize)]
struct ChatReplyMessage {
    content: Option<String>,
}

pub struct ChatCompletionsClient {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
    system_prompt: Option<String>,
}

impl ChatCompletionsClient {
    pub fn new(client: reqwest::Client, config: &ProvidersConfig) -> Self {
        Self {
            client,
            url: config.chat_url.clone(),
            api_key: config.api_key.clone(),
            model: config.chat_model.clone(),
            system_prompt: Some(config.system_prompt.trim().to_string()).filter(|p| !p.is_empty()),
        }
    }
}

#[async_trait]
impl ChatModel for ChatCompletionsClient {
    async fn reply(&self, prompt: &str) -> Result<String, ProviderError> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &self.system_prompt {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: prompt,
        });

        let request = ChatRequest {
            model: &self.model,
            messages,
        };

        tracing::debug!(model = %self.model, prompt_chars = prompt.len(), "Requesting chat reply");

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;
        let body = ensure_success(SERVICE, response).await?.text().await?;

        let parsed: ChatResponse =
            serde_json::from_str(&body).map_err(|e| ProviderError::MalformedResponse {
                service: SERVICE,
                message: e.to_string(),
            })?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or_else(|| ProviderError::MalformedResponse {
                service: SERVICE,
                message: "no reply content in choices[0].message".to_string(),
            })
    }
}
