//! Audio profile definitions.
//!
//! A streaming session carries audio in one of two encodings: narrowband
//! telephony audio from the phone network, or wideband linear PCM from the
//! browser test client. The profile is chosen when a session is created and
//! never changes for its lifetime.

use serde::{Deserialize, Serialize};

/// Supported inbound audio encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioProfile {
    /// G.711 mu-law, 8 kHz (phone network media streams).
    #[default]
    Narrowband,
    /// Signed 16-bit little-endian PCM, 16 kHz (browser test client).
    Wideband,
}

impl AudioProfile {
    /// Encoding name understood by the speech-to-text provider.
    pub fn encoding(self) -> &'static str {
        match self {
            Self::Narrowband => "mulaw",
            Self::Wideband => "linear16",
        }
    }

    /// Sample rate in Hz.
    pub fn sample_rate(self) -> u32 {
        match self {
            Self::Narrowband => 8_000,
            Self::Wideband => 16_000,
        }
    }
}

/// Parameters a transcription connection is opened with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranscriptionParams {
    pub profile: AudioProfile,
    pub sample_rate: u32,
    /// Always 1; telephony and the browser client are mono.
    pub channels: u16,
    /// Trailing silence after which the provider finalizes an utterance.
    pub finalization_silence_ms: u32,
}

impl TranscriptionParams {
    pub fn for_profile(profile: AudioProfile, finalization_silence_ms: u32) -> Self {
        Self {
            profile,
            sample_rate: profile.sample_rate(),
            channels: 1,
            finalization_silence_ms,
        }
    }
}
