//! callrelay server library logic.

pub mod api;
pub mod api_stream;
pub mod api_voice;
pub mod config;
pub mod protocol;
pub mod session;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Extension, Json, Router,
};
use callrelay_voice::{ChatCompletionsEngine, DeepgramTranscriber, HttpSynthesizer, VoiceError};
use config::Config;
use serde_json::{json, Value};
use session::{CallServices, SessionPolicy, SessionRegistry};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Provider clients, persona catalog and session policy.
    pub services: Arc<CallServices>,
    /// Active sessions keyed by call id.
    pub sessions: SessionRegistry,
    /// Externally reachable base URL used in signaling responses.
    pub public_url: Option<String>,
    /// Spoken when a call cannot be connected.
    pub apology_phrase: String,
}

impl AppState {
    /// Builds the production state from configuration.
    pub fn from_config(config: &Config) -> Result<Self, StartupError> {
        let personas = config.persona_catalog()?;
        let services = CallServices {
            transcriber: Arc::new(DeepgramTranscriber::new(config.stt.clone())),
            reasoning: Arc::new(ChatCompletionsEngine::new(config.reasoning.clone())?),
            synthesizer: Arc::new(HttpSynthesizer::new(config.tts.clone())?),
            personas: Arc::new(personas),
            policy: SessionPolicy::from(&config.session),
        };
        Ok(Self::new(
            services,
            Some(config.server.public_url.clone()),
            config.session.apology_phrase.clone(),
        ))
    }

    pub fn new(services: CallServices, public_url: Option<String>, apology_phrase: String) -> Self {
        Self {
            services: Arc::new(services),
            sessions: SessionRegistry::new(),
            public_url: public_url.filter(|url| !url.trim().is_empty()),
            apology_phrase,
        }
    }
}

/// Errors that prevent the server from starting.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("provider setup failed: {0}")]
    Provider(#[from] VoiceError),
}

/// Maximum request body size for signaling posts (64 KiB).
const MAX_REQUEST_BODY_BYTES: usize = 64 * 1024;

/// Health check handler.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/sessions", get(api::list_sessions_handler))
        .route("/api/sessions/{callId}", get(api::get_session_handler))
        .route("/voice/incoming", post(api_voice::incoming_call_handler))
        .route("/voice/outbound", post(api_voice::outbound_call_handler))
        .route("/voice/fallback", post(api_voice::fallback_handler))
        .route("/media-stream/{callId}", get(api_stream::media_stream_handler))
        .route("/browser-stream", get(api_stream::browser_stream_handler))
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(Extension(Arc::new(state)))
}
