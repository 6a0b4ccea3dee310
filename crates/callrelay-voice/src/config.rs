use callrelay_types::AudioProfile;
use serde::{Deserialize, Serialize};
use std::fmt;

fn default_stt_url() -> String {
    "wss://api.deepgram.com/v1/listen".to_string()
}

fn default_stt_model() -> String {
    "nova-2-phonecall".to_string()
}

fn default_language() -> String {
    "en-US".to_string()
}

fn default_true() -> bool {
    true
}

fn default_tts_url() -> String {
    "https://api.elevenlabs.io".to_string()
}

fn default_tts_model() -> String {
    "eleven_turbo_v2_5".to_string()
}

fn default_output_format() -> String {
    "ulaw_8000".to_string()
}

fn default_wideband_output_format() -> String {
    "pcm_16000".to_string()
}

fn default_tts_timeout_secs() -> u64 {
    20
}

fn default_reasoning_url() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}

fn default_reasoning_provider() -> String {
    "openai".to_string()
}

fn default_reasoning_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_reasoning_timeout_secs() -> u64 {
    25
}

fn default_max_tokens() -> u32 {
    256
}

fn default_temperature() -> f32 {
    0.4
}

/// Streaming speech-to-text provider settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct SttConfig {
    #[serde(default = "default_stt_url")]
    pub url: String,
    #[serde(default, skip_serializing)]
    pub api_key: String,
    #[serde(default = "default_stt_model")]
    pub model: String,
    #[serde(default = "default_language")]
    pub language: String,
    /// Ask the provider for interim results.
    #[serde(default = "default_true")]
    pub interim_results: bool,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            url: default_stt_url(),
            api_key: String::new(),
            model: default_stt_model(),
            language: default_language(),
            interim_results: true,
        }
    }
}

impl fmt::Debug for SttConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SttConfig")
            .field("url", &self.url)
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("language", &self.language)
            .field("interim_results", &self.interim_results)
            .finish()
    }
}

/// Speech synthesis provider settings.
///
/// An empty `api_key` or `voice_id` means synthesis is not configured; the
/// synthesizer then returns empty audio instead of failing.
#[derive(Clone, Serialize, Deserialize)]
pub struct TtsConfig {
    #[serde(default = "default_tts_url")]
    pub url: String,
    #[serde(default, skip_serializing)]
    pub api_key: String,
    #[serde(default)]
    pub voice_id: String,
    #[serde(default = "default_tts_model")]
    pub model: String,
    /// Provider output format for narrowband (telephony) sessions.
    #[serde(default = "default_output_format")]
    pub output_format: String,
    /// Provider output format for wideband (browser) sessions.
    #[serde(default = "default_wideband_output_format")]
    pub wideband_output_format: String,
    #[serde(default = "default_tts_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            url: default_tts_url(),
            api_key: String::new(),
            voice_id: String::new(),
            model: default_tts_model(),
            output_format: default_output_format(),
            wideband_output_format: default_wideband_output_format(),
            timeout_secs: default_tts_timeout_secs(),
        }
    }
}

impl TtsConfig {
    /// Output format matching the session's media stream.
    pub fn output_format_for(&self, profile: AudioProfile) -> &str {
        match profile {
            AudioProfile::Narrowband => &self.output_format,
            AudioProfile::Wideband => &self.wideband_output_format,
        }
    }
}

impl fmt::Debug for TtsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TtsConfig")
            .field("url", &self.url)
            .field("api_key", &"[REDACTED]")
            .field("voice_id", &self.voice_id)
            .field("model", &self.model)
            .field("output_format", &self.output_format)
            .field("wideband_output_format", &self.wideband_output_format)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// Reasoning engine settings (OpenAI-compatible chat completions endpoint).
#[derive(Clone, Serialize, Deserialize)]
pub struct ReasoningConfig {
    #[serde(default = "default_reasoning_url")]
    pub url: String,
    #[serde(default, skip_serializing)]
    pub api_key: String,
    /// Provider label this endpoint serves. Personas may only request this one.
    #[serde(default = "default_reasoning_provider")]
    pub provider: String,
    #[serde(default = "default_reasoning_model")]
    pub model: String,
    #[serde(default = "default_reasoning_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            url: default_reasoning_url(),
            api_key: String::new(),
            provider: default_reasoning_provider(),
            model: default_reasoning_model(),
            timeout_secs: default_reasoning_timeout_secs(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

impl fmt::Debug for ReasoningConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReasoningConfig")
            .field("url", &self.url)
            .field("api_key", &"[REDACTED]")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("timeout_secs", &self.timeout_secs)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_redacts_secrets() {
        let config = SttConfig {
            api_key: "dg-secret".to_string(),
            ..SttConfig::default()
        };
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("dg-secret"));
        assert!(rendered.contains("[REDACTED]"));

        let config = ReasoningConfig {
            api_key: "sk-secret".to_string(),
            ..ReasoningConfig::default()
        };
        assert!(!format!("{:?}", config).contains("sk-secret"));
    }

    #[test]
    fn api_keys_are_never_serialized() {
        let config = TtsConfig {
            api_key: "xi-secret".to_string(),
            ..TtsConfig::default()
        };
        let json = serde_json::to_string(&config).expect("serialization should not fail");
        assert!(!json.contains("xi-secret"));
    }
}
