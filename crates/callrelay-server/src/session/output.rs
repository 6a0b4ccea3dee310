//! Outbound audio framing for one streaming channel.

use crate::protocol::OutboundEvent;
use std::sync::{Mutex, RwLock};
use tokio::sync::mpsc;

/// Result of an attempt to write synthesized audio to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// Nothing to send (synthesis not configured).
    Empty,
    /// The channel was closed (caller hung up or session torn down).
    ChannelClosed,
    /// No stream id has been bound yet.
    StreamUnbound,
}

/// Frames synthesized audio into `media` events and writes them to the
/// session's outbound channel.
///
/// Shared between the session, its greeting task, and its response tasks.
/// All locks are held only for brief field access and never across `.await`.
#[derive(Debug)]
pub struct OutputSender {
    call_id: String,
    stream_id: RwLock<Option<String>>,
    tx: Mutex<Option<mpsc::Sender<String>>>,
}

impl OutputSender {
    pub fn new(call_id: impl Into<String>, tx: mpsc::Sender<String>) -> Self {
        Self {
            call_id: call_id.into(),
            stream_id: RwLock::new(None),
            tx: Mutex::new(Some(tx)),
        }
    }

    pub fn bind_stream(&self, stream_id: impl Into<String>) {
        let stream_id = stream_id.into();
        tracing::debug!(call_id = %self.call_id, stream_id = %stream_id, "bound stream id");
        if let Ok(mut guard) = self.stream_id.write() {
            *guard = Some(stream_id);
        }
    }

    pub fn stream_id(&self) -> Option<String> {
        self.stream_id.read().ok().and_then(|guard| guard.clone())
    }

    pub fn is_open(&self) -> bool {
        self.sender().is_some()
    }

    /// Closes the sender. Later writes are skipped. Idempotent.
    pub fn close(&self) {
        if let Ok(mut guard) = self.tx.lock() {
            guard.take();
        }
    }

    fn sender(&self) -> Option<mpsc::Sender<String>> {
        self.tx
            .lock()
            .ok()
            .and_then(|guard| guard.clone())
            .filter(|tx| !tx.is_closed())
    }

    /// Writes one synthesized utterance as a single `media` event.
    pub async fn send_audio(&self, audio: &[u8]) -> Delivery {
        if audio.is_empty() {
            return Delivery::Empty;
        }
        let Some(tx) = self.sender() else {
            tracing::debug!(call_id = %self.call_id, "skipping audio: channel closed");
            return Delivery::ChannelClosed;
        };
        let Some(stream_id) = self.stream_id() else {
            tracing::debug!(call_id = %self.call_id, "skipping audio: stream id not bound");
            return Delivery::StreamUnbound;
        };

        let frame = match serde_json::to_string(&OutboundEvent::media(stream_id, audio)) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(call_id = %self.call_id, "failed to serialize media frame: {}", e);
                return Delivery::ChannelClosed;
            }
        };

        if tx.send(frame).await.is_err() {
            tracing::warn!(call_id = %self.call_id, "channel closed while writing audio");
            return Delivery::ChannelClosed;
        }
        tracing::debug!(call_id = %self.call_id, bytes = audio.len(), "sent audio frame");
        Delivery::Sent
    }
}
