//! Per-session connection to the streaming speech-to-text provider.
//!
//! Connecting happens on a spawned task so a slow or unreachable provider
//! never holds up the session actor. The task reports back through a
//! [`BridgeSink`] and the session hands the result to
//! [`TranscriptionBridge::on_event`].

use callrelay_types::TranscriptionParams;
use callrelay_voice::{SpeechToText, TranscriptCallback, TranscriptionStream};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Frames held while a connection is being opened. One second of 20 ms
/// telephony frames.
const MAX_BUFFERED_FRAMES: usize = 50;

const INITIAL_BACKOFF: Duration = Duration::from_millis(250);
const MAX_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BridgeStatus {
    Idle,
    Connecting,
    Open,
    Stopped,
}

/// Outcome of one connection attempt.
pub enum BridgeEvent {
    Opened {
        attempt: u64,
        stream: Box<dyn TranscriptionStream>,
    },
    Failed {
        attempt: u64,
        error: String,
    },
}

impl fmt::Debug for BridgeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeEvent::Opened { attempt, .. } => {
                f.debug_struct("Opened").field("attempt", attempt).finish()
            }
            BridgeEvent::Failed { attempt, error } => f
                .debug_struct("Failed")
                .field("attempt", attempt)
                .field("error", error)
                .finish(),
        }
    }
}

pub type BridgeSink = Arc<dyn Fn(BridgeEvent) + Send + Sync>;

enum BridgeState {
    Idle,
    Connecting { attempt: u64, task: JoinHandle<()> },
    Open(Box<dyn TranscriptionStream>),
    Stopped,
}

/// Owns at most one provider connection. Opens lazily on the first frame,
/// reopens after a transport error, and refuses frames once stopped.
pub struct TranscriptionBridge {
    call_id: String,
    params: TranscriptionParams,
    provider: Arc<dyn SpeechToText>,
    on_transcript: TranscriptCallback,
    sink: BridgeSink,
    state: BridgeState,
    buffered: VecDeque<Vec<u8>>,
    attempts: u64,
    backoff: Duration,
    retry_at: Option<Instant>,
    frames_forwarded: u64,
    frames_dropped: u64,
}

impl TranscriptionBridge {
    pub fn new(
        call_id: impl Into<String>,
        params: TranscriptionParams,
        provider: Arc<dyn SpeechToText>,
        on_transcript: TranscriptCallback,
        sink: BridgeSink,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            params,
            provider,
            on_transcript,
            sink,
            state: BridgeState::Idle,
            buffered: VecDeque::new(),
            attempts: 0,
            backoff: INITIAL_BACKOFF,
            retry_at: None,
            frames_forwarded: 0,
            frames_dropped: 0,
        }
    }

    pub fn status(&self) -> BridgeStatus {
        match self.state {
            BridgeState::Idle => BridgeStatus::Idle,
            BridgeState::Connecting { .. } => BridgeStatus::Connecting,
            BridgeState::Open(_) => BridgeStatus::Open,
            BridgeState::Stopped => BridgeStatus::Stopped,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, BridgeState::Open(_))
    }

    pub fn frames_forwarded(&self) -> u64 {
        self.frames_forwarded
    }

    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped
    }

    /// Begins opening the provider connection in the background. No-op when
    /// not idle, or while a failed attempt is backing off.
    pub fn start(&mut self) {
        if !matches!(self.state, BridgeState::Idle) {
            return;
        }
        if let Some(retry_at) = self.retry_at {
            if Instant::now() < retry_at {
                return;
            }
        }

        self.attempts += 1;
        let attempt = self.attempts;
        let provider = self.provider.clone();
        let params = self.params;
        let on_transcript = self.on_transcript.clone();
        let sink = self.sink.clone();
        tracing::debug!(call_id = %self.call_id, attempt, "opening transcription stream");

        let task = tokio::spawn(async move {
            let event = match provider.open(&params, on_transcript).await {
                Ok(stream) => BridgeEvent::Opened { attempt, stream },
                Err(e) => BridgeEvent::Failed {
                    attempt,
                    error: e.to_string(),
                },
            };
            sink(event);
        });
        self.state = BridgeState::Connecting { attempt, task };
    }

    /// Forwards one audio frame, opening the connection first if needed.
    /// Frames arriving mid-connect are held and flushed once it opens.
    pub async fn write(&mut self, frame: Vec<u8>) {
        if matches!(self.state, BridgeState::Stopped) {
            self.frames_dropped += 1;
            tracing::debug!(call_id = %self.call_id, "dropping audio frame after stop");
            return;
        }
        self.start();

        match self.state {
            BridgeState::Connecting { .. } => {
                if self.buffered.len() >= MAX_BUFFERED_FRAMES {
                    self.frames_dropped += 1;
                } else {
                    self.buffered.push_back(frame);
                }
            }
            BridgeState::Open(_) => self.forward(frame).await,
            BridgeState::Idle | BridgeState::Stopped => self.frames_dropped += 1,
        }
    }

    /// Applies the result of a connection attempt. Results from attempts
    /// that are no longer current are discarded.
    pub async fn on_event(&mut self, event: BridgeEvent) {
        let current = match self.state {
            BridgeState::Connecting { attempt, .. } => Some(attempt),
            _ => None,
        };

        match event {
            BridgeEvent::Opened { attempt, mut stream } if current != Some(attempt) => {
                tracing::debug!(call_id = %self.call_id, attempt, "discarding stale transcription stream");
                tokio::spawn(async move {
                    let _ = stream.finish().await;
                });
            }
            BridgeEvent::Opened { attempt, stream } => {
                tracing::info!(
                    call_id = %self.call_id,
                    attempt,
                    provider = self.provider.provider_name(),
                    encoding = self.params.profile.encoding(),
                    sample_rate = self.params.sample_rate,
                    "transcription stream opened"
                );
                self.state = BridgeState::Open(stream);
                self.backoff = INITIAL_BACKOFF;
                self.retry_at = None;
                while let Some(frame) = self.buffered.pop_front() {
                    self.forward(frame).await;
                }
            }
            BridgeEvent::Failed { attempt, .. } if current != Some(attempt) => {}
            BridgeEvent::Failed { attempt, error } => {
                tracing::error!(
                    call_id = %self.call_id,
                    attempt,
                    retry_in_ms = self.backoff.as_millis() as u64,
                    "failed to open transcription stream: {}",
                    error
                );
                self.state = BridgeState::Idle;
                self.retry_at = Some(Instant::now() + self.backoff);
                self.backoff = (self.backoff * 2).min(MAX_BACKOFF);
                self.drop_buffered();
            }
        }
    }

    async fn forward(&mut self, frame: Vec<u8>) {
        let BridgeState::Open(stream) = &mut self.state else {
            self.frames_dropped += 1;
            return;
        };
        match stream.send_audio(frame).await {
            Ok(()) => self.frames_forwarded += 1,
            Err(e) => {
                self.frames_dropped += 1;
                tracing::warn!(call_id = %self.call_id, "transcription send failed, resetting: {}", e);
                self.state = BridgeState::Idle;
                self.drop_buffered();
            }
        }
    }

    fn drop_buffered(&mut self) {
        self.frames_dropped += self.buffered.len() as u64;
        self.buffered.clear();
    }

    /// Sends end-of-stream and releases the connection. Idempotent.
    pub async fn stop(&mut self) {
        let previous = std::mem::replace(&mut self.state, BridgeState::Stopped);
        self.drop_buffered();
        match previous {
            BridgeState::Connecting { task, .. } => {
                task.abort();
                tracing::debug!(call_id = %self.call_id, "transcription connect abandoned");
            }
            BridgeState::Open(mut stream) => {
                if let Err(e) = stream.finish().await {
                    tracing::debug!(call_id = %self.call_id, "transcription finish failed: {}", e);
                }
                tracing::info!(
                    call_id = %self.call_id,
                    forwarded = self.frames_forwarded,
                    dropped = self.frames_dropped,
                    "transcription stream closed"
                );
            }
            BridgeState::Idle | BridgeState::Stopped => {}
        }
    }
}
