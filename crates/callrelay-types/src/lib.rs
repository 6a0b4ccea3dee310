//! Shared types for the callrelay workspace.
//!
//! This crate holds the domain types that cross crate boundaries: the
//! conversation model (`Role`, `Turn`), transcript events produced by the
//! speech-to-text provider, the audio profiles a streaming session can run
//! with, and the persona catalog keyed by business vertical.
//!
//! Nothing here performs I/O. Provider adapters live in `callrelay-voice`
//! and the session core lives in `callrelay-server`.

pub mod persona;
pub mod voice;

use serde::{Deserialize, Serialize};

pub use persona::{CatalogError, PersonaCatalog, PersonaConfig, ToolKind, VerticalId};
pub use voice::{AudioProfile, TranscriptionParams};

/// The party an utterance is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The person on the phone.
    Caller,
    /// The automated agent.
    Agent,
}

impl Role {
    /// Returns the string label for this role.
    pub fn label(self) -> &'static str {
        match self {
            Self::Caller => "caller",
            Self::Agent => "agent",
        }
    }
}

/// One utterance in a call's conversation history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

impl Turn {
    pub fn caller(text: impl Into<String>) -> Self {
        Self {
            role: Role::Caller,
            text: text.into(),
        }
    }

    pub fn agent(text: impl Into<String>) -> Self {
        Self {
            role: Role::Agent,
            text: text.into(),
        }
    }
}

/// A transcript result relayed from the speech-to-text provider.
///
/// Interim results (`is_final == false`) are part of the contract so that
/// barge-in detection can consume them later; the session core ignores them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptEvent {
    pub text: String,
    pub is_final: bool,
}

impl TranscriptEvent {
    pub fn interim(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: false,
        }
    }

    pub fn finalized(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: true,
        }
    }

    /// Returns the trimmed text if this event may advance a conversation.
    ///
    /// Only final results with non-empty trimmed text qualify.
    pub fn utterance(&self) -> Option<&str> {
        if !self.is_final {
            return None;
        }
        let text = self.text.trim();
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }
}
