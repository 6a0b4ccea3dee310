//! Per-call session core.
//!
//! A session is one actor task ([`orchestrator`]) that owns the call's
//! conversation state and reacts to start/audio/transcript/stop events. It
//! delegates to the transcription [`bridge`], the [`turn`] timers, the
//! response [`pipeline`], and the [`output`] sender.

pub mod bridge;
pub mod orchestrator;
pub mod output;
pub mod pipeline;
pub mod registry;
pub mod turn;

pub use bridge::{BridgeEvent, BridgeStatus, TranscriptionBridge};
pub use orchestrator::{spawn_session, SessionEvent, SessionHandle, SessionSnapshot};
pub use output::{Delivery, OutputSender};
pub use registry::{SessionRegistry, SessionSummary};

use crate::config::SessionConfig;
use callrelay_types::PersonaCatalog;
use callrelay_voice::{ReasoningEngine, SpeechSynthesizer, SpeechToText};
use std::sync::Arc;
use std::time::Duration;

/// Timing and fallback rules applied to every session.
#[derive(Debug, Clone)]
pub struct SessionPolicy {
    pub silence_timeout: Duration,
    pub turn_timeout: Duration,
    pub finalization_silence_ms: u32,
    pub max_pending_turns: usize,
    pub fallback_phrase: String,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self::from(&SessionConfig::default())
    }
}

impl From<&SessionConfig> for SessionPolicy {
    fn from(config: &SessionConfig) -> Self {
        Self {
            silence_timeout: config.silence_timeout(),
            turn_timeout: config.turn_timeout(),
            finalization_silence_ms: config.finalization_silence_ms,
            max_pending_turns: config.max_pending_turns,
            fallback_phrase: config.fallback_phrase.clone(),
        }
    }
}

/// Collaborators shared read-only by every session.
#[derive(Clone)]
pub struct CallServices {
    pub transcriber: Arc<dyn SpeechToText>,
    pub reasoning: Arc<dyn ReasoningEngine>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub personas: Arc<PersonaCatalog>,
    pub policy: SessionPolicy,
}
