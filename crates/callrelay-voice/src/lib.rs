//! Provider adapters for the callrelay session core.
//!
//! Each external collaborator sits behind a trait so the session core can be
//! driven by real providers in production and by mocks in tests:
//!
//! - [`SpeechToText`] opens one streaming transcription connection per call
//!   and relays transcript events through a callback.
//! - [`ReasoningEngine`] turns persona instructions plus the ordered
//!   conversation history into the agent's next reply.
//! - [`SpeechSynthesizer`] renders reply text to encoded audio bytes.

pub mod config;
pub mod error;
pub mod reasoning;
pub mod stt;
pub mod tts;

pub use config::{ReasoningConfig, SttConfig, TtsConfig};
pub use error::VoiceError;
pub use reasoning::{ChatCompletionsEngine, ReasoningEngine, RunOptions};
pub use stt::{DeepgramTranscriber, SpeechToText, TranscriptCallback, TranscriptionStream};
pub use tts::{HttpSynthesizer, SpeechSynthesizer};
