//! Streaming-session WebSocket endpoints.
//!
//! Each connection owns one session. Inbound JSON frames are decoded and fed
//! to the session; synthesized audio flows back through a bounded channel to
//! a writer task, as with any other outbound socket traffic.

use crate::protocol::InboundEvent;
use crate::session::OutputSender;
use crate::AppState;
use axum::{
    extract::{
        ws::{Message as AxumMessage, WebSocket, WebSocketUpgrade},
        Extension, Path, Query,
    },
    response::IntoResponse,
};
use callrelay_types::AudioProfile;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Outbound frames buffered per connection before writes apply backpressure.
const OUTBOUND_BUFFER: usize = 256;

/// Handler for `GET /media-stream/{callId}` (telephony, narrowband audio).
pub async fn media_stream_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(call_id): Path<String>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_stream(socket, state, call_id, AudioProfile::Narrowband))
}

#[derive(Debug, Deserialize)]
pub struct BrowserStreamParams {
    #[serde(rename = "callId")]
    pub call_id: Option<String>,
}

/// Handler for `GET /browser-stream` (browser clients, wideband audio).
pub async fn browser_stream_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(params): Query<BrowserStreamParams>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let call_id = params
        .call_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| format!("browser-{}", Uuid::new_v4()));
    ws.on_upgrade(move |socket| handle_stream(socket, state, call_id, AudioProfile::Wideband))
}

async fn handle_stream(
    socket: WebSocket,
    state: Arc<AppState>,
    call_id: String,
    profile: AudioProfile,
) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<String>(OUTBOUND_BUFFER);

    let output = Arc::new(OutputSender::new(call_id.clone(), tx));
    let handle = state
        .sessions
        .open(&call_id, profile, state.services.clone(), output)
        .await;

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(AxumMessage::Text(msg.into())).await.is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            msg = receiver.next() => {
                let Some(Ok(msg)) = msg else {
                    tracing::debug!(call_id = %call_id, "stream socket closed by peer");
                    break;
                };
                match msg {
                    AxumMessage::Text(text) => {
                        let event = match serde_json::from_str::<InboundEvent>(text.as_str()) {
                            Ok(event) => event,
                            Err(e) => {
                                tracing::warn!(call_id = %call_id, "dropping malformed stream frame: {}", e);
                                continue;
                            }
                        };
                        if let Some(meta) = event.start_meta() {
                            handle.start(meta);
                            continue;
                        }
                        match event {
                            InboundEvent::Media { media } => match media.decode() {
                                Ok(frame) => handle.audio(frame),
                                Err(e) => {
                                    tracing::warn!(call_id = %call_id, "dropping media frame with bad payload: {}", e);
                                }
                            },
                            InboundEvent::Stop {} => {
                                tracing::info!(call_id = %call_id, "stop event received");
                                break;
                            }
                            InboundEvent::Connected {} | InboundEvent::Mark {} | InboundEvent::Start { .. } => {}
                        }
                    }
                    AxumMessage::Close(_) => break,
                    _ => {}
                }
            }
            _ = handle.closed() => {
                tracing::debug!(call_id = %call_id, "session ended, closing stream socket");
                break;
            }
        }
    }

    handle.stop();
    send_task.abort();
}
