//! Server configuration loading from file and environment variables.

use callrelay_types::{CatalogError, PersonaCatalog, PersonaConfig};
use callrelay_voice::{ReasoningConfig, SttConfig, TtsConfig};
use serde::Deserialize;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use thiserror::Error;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server network settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Streaming speech-to-text provider.
    #[serde(default)]
    pub stt: SttConfig,

    /// Speech synthesis provider.
    #[serde(default)]
    pub tts: TtsConfig,

    /// Reasoning engine.
    #[serde(default)]
    pub reasoning: ReasoningConfig,

    /// Per-call timing and fallback policy.
    #[serde(default)]
    pub session: SessionConfig,

    /// Persona/policy configuration keyed by vertical.
    #[serde(default)]
    pub personas: PersonasConfig,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Externally reachable base URL (e.g. `wss://voice.example.com`) used
    /// when telling the signaling layer where to open media streams. When
    /// empty, the request's `Host` header is used.
    #[serde(default)]
    pub public_url: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "callrelay_server=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

/// Timing and fallback policy applied to every call.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Caller silence after which the session is marked idle.
    #[serde(default = "default_silence_timeout_ms")]
    pub silence_timeout_ms: u64,

    /// Upper bound on one agent response before the session unblocks.
    #[serde(default = "default_turn_timeout_ms")]
    pub turn_timeout_ms: u64,

    /// Trailing silence the STT provider waits for before finalizing.
    #[serde(default = "default_finalization_silence_ms")]
    pub finalization_silence_ms: u32,

    /// Caller turns that may wait behind an in-flight response.
    #[serde(default = "default_max_pending_turns")]
    pub max_pending_turns: usize,

    /// Spoken when the reasoning engine or synthesis fails mid-call.
    #[serde(default = "default_fallback_phrase")]
    pub fallback_phrase: String,

    /// Spoken by the signaling fallback endpoint before hanging up.
    #[serde(default = "default_apology_phrase")]
    pub apology_phrase: String,
}

/// Persona catalog as written in the config file.
#[derive(Debug, Clone, Deserialize)]
pub struct PersonasConfig {
    #[serde(default = "default_vertical")]
    pub default_vertical: String,

    #[serde(default = "default_verticals")]
    pub verticals: HashMap<String, PersonaConfig>,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    3000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_silence_timeout_ms() -> u64 {
    4_000
}

fn default_turn_timeout_ms() -> u64 {
    30_000
}

fn default_finalization_silence_ms() -> u32 {
    300
}

fn default_max_pending_turns() -> usize {
    4
}

fn default_fallback_phrase() -> String {
    "I'm sorry, I'm having trouble right now. Could you say that again?".to_string()
}

fn default_apology_phrase() -> String {
    "We're sorry, we are unable to take your call right now. Please try again later."
        .to_string()
}

fn default_vertical() -> String {
    "support".to_string()
}

fn default_verticals() -> HashMap<String, PersonaConfig> {
    let support = PersonaConfig {
        greeting: "Thanks for calling. How can I help you today?".to_string(),
        system_prompt: "You are a friendly customer support agent answering a phone call."
            .to_string(),
        tone: "warm and concise".to_string(),
        tools: Vec::new(),
        compliance_text: None,
        provider: None,
        model: None,
    };
    HashMap::from([(default_vertical(), support)])
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            public_url: String::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            silence_timeout_ms: default_silence_timeout_ms(),
            turn_timeout_ms: default_turn_timeout_ms(),
            finalization_silence_ms: default_finalization_silence_ms(),
            max_pending_turns: default_max_pending_turns(),
            fallback_phrase: default_fallback_phrase(),
            apology_phrase: default_apology_phrase(),
        }
    }
}

impl Default for PersonasConfig {
    fn default() -> Self {
        Self {
            default_vertical: default_vertical(),
            verticals: default_verticals(),
        }
    }
}

impl SessionConfig {
    pub fn silence_timeout(&self) -> Duration {
        Duration::from_millis(self.silence_timeout_ms)
    }

    pub fn turn_timeout(&self) -> Duration {
        Duration::from_millis(self.turn_timeout_ms)
    }
}

impl Config {
    /// Builds the validated persona catalog.
    pub fn persona_catalog(&self) -> Result<PersonaCatalog, ConfigError> {
        Ok(PersonaCatalog::new(
            &self.personas.default_vertical,
            self.personas.verticals.clone(),
        )?)
    }

    /// Checks invariants serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session.silence_timeout_ms == 0 || self.session.turn_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "session timeouts must be greater than zero".to_string(),
            ));
        }
        if self.session.fallback_phrase.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "session.fallback_phrase must not be empty".to_string(),
            ));
        }
        self.persona_catalog()?;
        Ok(())
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// The persona catalog is invalid.
    #[error("invalid persona configuration: {0}")]
    Persona(#[from] CatalogError),

    /// A value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `CALLRELAY_HOST` overrides `server.host`
/// - `CALLRELAY_PORT` overrides `server.port`
/// - `CALLRELAY_PUBLIC_URL` overrides `server.public_url`
/// - `CALLRELAY_LOG_LEVEL` overrides `logging.level`
/// - `CALLRELAY_LOG_JSON` overrides `logging.json` (set to "true" to enable)
/// - `CALLRELAY_STT_API_KEY`, `CALLRELAY_TTS_API_KEY`,
///   `CALLRELAY_REASONING_API_KEY` override the provider credentials
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed, or
/// if the resulting configuration fails validation.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    // Environment variable overrides
    if let Ok(host) = std::env::var("CALLRELAY_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Ok(port) = std::env::var("CALLRELAY_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Ok(url) = std::env::var("CALLRELAY_PUBLIC_URL") {
        config.server.public_url = url;
    }
    if let Ok(level) = std::env::var("CALLRELAY_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Ok(json) = std::env::var("CALLRELAY_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
    if let Ok(key) = std::env::var("CALLRELAY_STT_API_KEY") {
        config.stt.api_key = key;
    }
    if let Ok(key) = std::env::var("CALLRELAY_TTS_API_KEY") {
        config.tts.api_key = key;
    }
    if let Ok(key) = std::env::var("CALLRELAY_REASONING_API_KEY") {
        config.reasoning.api_key = key;
    }

    config.validate()?;
    Ok(config)
}
