use crate::config::ReasoningConfig;
use crate::error::VoiceError;
use async_trait::async_trait;
use callrelay_types::{PersonaConfig, Role, Turn};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Per-call overrides for a reasoning request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    pub provider: Option<String>,
    pub model: Option<String>,
}

impl RunOptions {
    /// Options carried by a persona's provider/model overrides.
    pub fn from_persona(persona: &PersonaConfig) -> Self {
        Self {
            provider: persona.provider.clone(),
            model: persona.model.clone(),
        }
    }
}

/// Produces the agent's next reply from the conversation so far.
#[async_trait]
pub trait ReasoningEngine: Send + Sync {
    async fn run(
        &self,
        persona: &PersonaConfig,
        history: &[Turn],
        options: &RunOptions,
    ) -> Result<String, VoiceError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// Maps a persona and history onto chat-completion messages.
pub fn build_messages(persona: &PersonaConfig, history: &[Turn]) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 1);
    messages.push(ChatMessage {
        role: "system".to_string(),
        content: persona.instructions(),
    });
    messages.extend(history.iter().map(|turn| ChatMessage {
        role: match turn.role {
            Role::Caller => "user",
            Role::Agent => "assistant",
        }
        .to_string(),
        content: turn.text.clone(),
    }));
    messages
}

/// Reasoning engine backed by an OpenAI-compatible chat completions API.
#[derive(Debug, Clone)]
pub struct ChatCompletionsEngine {
    client: reqwest::Client,
    config: ReasoningConfig,
}

impl ChatCompletionsEngine {
    pub fn new(config: ReasoningConfig) -> Result<Self, VoiceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| {
                VoiceError::Config(format!("failed to build reasoning client: {}", e))
            })?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl ReasoningEngine for ChatCompletionsEngine {
    async fn run(
        &self,
        persona: &PersonaConfig,
        history: &[Turn],
        options: &RunOptions,
    ) -> Result<String, VoiceError> {
        if let Some(provider) = &options.provider {
            if provider != &self.config.provider {
                return Err(VoiceError::Config(format!(
                    "reasoning provider {} is not configured (available: {})",
                    provider, self.config.provider
                )));
            }
        }
        if self.config.api_key.is_empty() {
            return Err(VoiceError::Config(
                "reasoning api key is not configured".to_string(),
            ));
        }

        let model = options.model.as_deref().unwrap_or(&self.config.model);
        let request = ChatRequest {
            model,
            messages: build_messages(persona, history),
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        };

        let response = self
            .client
            .post(&self.config.url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    VoiceError::Timeout {
                        stage: "reasoning request",
                        secs: self.config.timeout_secs,
                    }
                } else {
                    VoiceError::Reasoning(format!("request failed: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VoiceError::Reasoning(format!(
                "provider returned {}: {}",
                status, body
            )));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| VoiceError::Reasoning(format!("invalid response body: {}", e)))?;

        let reply = body
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.trim().to_string())
            .unwrap_or_default();
        if reply.is_empty() {
            return Err(VoiceError::Reasoning("empty reply".to_string()));
        }
        Ok(reply)
    }
}
