//! Streaming-session wire protocol.
//!
//! Frames are JSON text messages tagged by an `event` field. Inbound frames
//! carry the session start metadata, base64 audio, and the stop signal;
//! outbound frames carry synthesized audio back to the caller.

use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Base64 media payload shared by inbound and outbound `media` frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaPayload {
    pub payload: String,
}

impl MediaPayload {
    pub fn encode(audio: &[u8]) -> Self {
        Self {
            payload: base64::engine::general_purpose::STANDARD.encode(audio),
        }
    }

    pub fn decode(&self) -> Result<Vec<u8>, base64::DecodeError> {
        base64::engine::general_purpose::STANDARD.decode(self.payload.as_bytes())
    }
}

/// Nested start block some signaling providers send instead of top-level
/// fields.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StartDetails {
    #[serde(rename = "streamSid", alias = "streamId", default)]
    pub stream_id: Option<String>,
    #[serde(rename = "customParameters", default)]
    pub custom_parameters: HashMap<String, String>,
}

/// Incoming streaming-session frames.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum InboundEvent {
    /// Transport handshake; carries nothing the session needs.
    Connected {},
    Start {
        #[serde(rename = "streamId", alias = "streamSid", default)]
        stream_id: Option<String>,
        #[serde(rename = "customParameters", default)]
        custom_parameters: HashMap<String, String>,
        #[serde(default)]
        start: Option<StartDetails>,
    },
    Media {
        media: MediaPayload,
    },
    /// Playback acknowledgement for an outbound mark; unused by the core.
    Mark {},
    Stop {},
}

/// Session start metadata extracted from a `start` frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartMeta {
    pub stream_id: Option<String>,
    pub vertical: Option<String>,
}

impl InboundEvent {
    /// Returns the start metadata if this is a `start` frame.
    ///
    /// Top-level fields take precedence over the nested `start` block.
    pub fn start_meta(&self) -> Option<StartMeta> {
        let Self::Start {
            stream_id,
            custom_parameters,
            start,
        } = self
        else {
            return None;
        };
        let nested = start.clone().unwrap_or_default();
        Some(StartMeta {
            stream_id: stream_id.clone().or(nested.stream_id),
            vertical: custom_parameters
                .get("vertical")
                .or_else(|| nested.custom_parameters.get("vertical"))
                .cloned(),
        })
    }
}

/// Outgoing streaming-session frames.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum OutboundEvent {
    Media {
        #[serde(rename = "streamId")]
        stream_id: String,
        media: MediaPayload,
    },
    /// Asks the far end to drop buffered audio (barge-in support).
    Clear {
        #[serde(rename = "streamId")]
        stream_id: String,
    },
}

impl OutboundEvent {
    pub fn media(stream_id: impl Into<String>, audio: &[u8]) -> Self {
        Self::Media {
            stream_id: stream_id.into(),
            media: MediaPayload::encode(audio),
        }
    }
}
