use crate::config::TtsConfig;
use crate::error::VoiceError;
use async_trait::async_trait;
use callrelay_types::AudioProfile;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

/// Maximum text input size for TTS (64 KiB). Prevents resource exhaustion from
/// oversized synthesis requests.
const MAX_TTS_INPUT_BYTES: usize = 64 * 1024;

/// A speech synthesis provider.
///
/// An empty result is a valid "not configured" signal, not an error.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesizes `text` as audio encoded for `profile`.
    async fn synthesize(&self, text: &str, profile: AudioProfile) -> Result<Vec<u8>, VoiceError>;
}

#[derive(Serialize)]
struct SynthesisRequest<'a> {
    text: &'a str,
    model_id: &'a str,
}

/// Synthesizes speech through an ElevenLabs-compatible HTTP API.
#[derive(Debug, Clone)]
pub struct HttpSynthesizer {
    client: reqwest::Client,
    config: TtsConfig,
}

impl HttpSynthesizer {
    pub fn new(config: TtsConfig) -> Result<Self, VoiceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| VoiceError::Config(format!("failed to build TTS client: {}", e)))?;
        Ok(Self { client, config })
    }

    pub fn is_configured(&self) -> bool {
        !self.config.api_key.is_empty() && !self.config.voice_id.is_empty()
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1/text-to-speech/{}",
            self.config.url.trim_end_matches('/'),
            self.config.voice_id
        )
    }
}

#[async_trait]
impl SpeechSynthesizer for HttpSynthesizer {
    async fn synthesize(&self, text: &str, profile: AudioProfile) -> Result<Vec<u8>, VoiceError> {
        if text.len() > MAX_TTS_INPUT_BYTES {
            return Err(VoiceError::Tts(format!(
                "text exceeds maximum size: {} bytes (limit: {} bytes)",
                text.len(),
                MAX_TTS_INPUT_BYTES
            )));
        }

        if !self.is_configured() {
            debug!("TTS is not configured; returning empty audio");
            return Ok(Vec::new());
        }

        let response = self
            .client
            .post(self.endpoint())
            .query(&[("output_format", self.config.output_format_for(profile))])
            .header("xi-api-key", &self.config.api_key)
            .json(&SynthesisRequest {
                text,
                model_id: &self.config.model,
            })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    VoiceError::Timeout {
                        stage: "TTS request",
                        secs: self.config.timeout_secs,
                    }
                } else {
                    VoiceError::Tts(format!("TTS request failed: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VoiceError::Tts(format!(
                "TTS provider returned {}: {}",
                status, body
            )));
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| VoiceError::Tts(format!("failed to read TTS audio: {}", e)))?;
        Ok(audio.to_vec())
    }
}
