use crate::config::SttConfig;
use crate::error::VoiceError;
use async_trait::async_trait;
use callrelay_types::{TranscriptEvent, TranscriptionParams};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::connect_async;
use tracing::{debug, info, warn};
use url::Url;

/// Timeout for establishing the provider connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// How long `finish` waits for the provider to flush and close.
const FINISH_TIMEOUT: Duration = Duration::from_secs(2);

/// Callback invoked for every transcript the provider emits.
pub type TranscriptCallback = Arc<dyn Fn(TranscriptEvent) + Send + Sync>;

/// A streaming speech-to-text provider.
#[async_trait]
pub trait SpeechToText: Send + Sync {
    /// Opens one streaming connection. Transcripts are delivered through
    /// `on_transcript` until the stream is finished or dropped.
    async fn open(
        &self,
        params: &TranscriptionParams,
        on_transcript: TranscriptCallback,
    ) -> Result<Box<dyn TranscriptionStream>, VoiceError>;

    fn provider_name(&self) -> &'static str;
}

/// An open provider connection for one call.
#[async_trait]
pub trait TranscriptionStream: Send {
    /// Forwards one audio frame.
    async fn send_audio(&mut self, frame: Vec<u8>) -> Result<(), VoiceError>;

    /// Signals end-of-stream and releases the connection.
    async fn finish(&mut self) -> Result<(), VoiceError>;
}

/// Deepgram-compatible live transcription over WebSocket.
#[derive(Debug, Clone)]
pub struct DeepgramTranscriber {
    config: SttConfig,
}

impl DeepgramTranscriber {
    pub fn new(config: SttConfig) -> Self {
        Self { config }
    }

    /// Builds the listen URL carrying the audio format parameters.
    pub fn listen_url(&self, params: &TranscriptionParams) -> Result<Url, VoiceError> {
        let mut url = Url::parse(&self.config.url)
            .map_err(|e| VoiceError::Config(format!("invalid STT url: {}", e)))?;
        url.query_pairs_mut()
            .append_pair("model", &self.config.model)
            .append_pair("language", &self.config.language)
            .append_pair("encoding", params.profile.encoding())
            .append_pair("sample_rate", &params.sample_rate.to_string())
            .append_pair("channels", &params.channels.to_string())
            .append_pair("endpointing", &params.finalization_silence_ms.to_string())
            .append_pair("interim_results", &self.config.interim_results.to_string())
            .append_pair("punctuate", "true")
            .append_pair("smart_format", "true");
        Ok(url)
    }
}

#[async_trait]
impl SpeechToText for DeepgramTranscriber {
    async fn open(
        &self,
        params: &TranscriptionParams,
        on_transcript: TranscriptCallback,
    ) -> Result<Box<dyn TranscriptionStream>, VoiceError> {
        if self.config.api_key.is_empty() {
            return Err(VoiceError::Config(
                "STT api key is not configured".to_string(),
            ));
        }

        let url = self.listen_url(params)?;
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| VoiceError::Stt(format!("failed to build request: {}", e)))?;
        let auth = HeaderValue::from_str(&format!("Token {}", self.config.api_key))
            .map_err(|e| VoiceError::Config(format!("invalid STT api key: {}", e)))?;
        request.headers_mut().insert(header::AUTHORIZATION, auth);

        let (socket, _) = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(request))
            .await
            .map_err(|_| VoiceError::Timeout {
                stage: "STT connect",
                secs: CONNECT_TIMEOUT.as_secs(),
            })?
            .map_err(|e| VoiceError::Transport(format!("STT connect failed: {}", e)))?;

        info!(
            encoding = params.profile.encoding(),
            sample_rate = params.sample_rate,
            "connected to STT provider"
        );

        let (outgoing, rx) = mpsc::unbounded_channel::<Message>();
        let task = tokio::spawn(pump(socket, rx, on_transcript));

        Ok(Box::new(DeepgramStream {
            outgoing: Some(outgoing),
            task,
        }))
    }

    fn provider_name(&self) -> &'static str {
        "deepgram"
    }
}

struct DeepgramStream {
    outgoing: Option<mpsc::UnboundedSender<Message>>,
    task: JoinHandle<()>,
}

#[async_trait]
impl TranscriptionStream for DeepgramStream {
    async fn send_audio(&mut self, frame: Vec<u8>) -> Result<(), VoiceError> {
        let outgoing = self
            .outgoing
            .as_ref()
            .ok_or_else(|| VoiceError::Transport("STT stream already finished".to_string()))?;
        if self.task.is_finished() {
            return Err(VoiceError::Transport(
                "STT connection closed by provider".to_string(),
            ));
        }
        outgoing
            .send(Message::Binary(frame.into()))
            .map_err(|_| VoiceError::Transport("STT connection closed".to_string()))
    }

    async fn finish(&mut self) -> Result<(), VoiceError> {
        let Some(outgoing) = self.outgoing.take() else {
            return Ok(());
        };
        // Ask the provider to flush pending results, then close our side.
        let _ = outgoing.send(Message::Text(r#"{"type":"CloseStream"}"#.into()));
        drop(outgoing);

        if tokio::time::timeout(FINISH_TIMEOUT, &mut self.task)
            .await
            .is_err()
        {
            self.task.abort();
            return Err(VoiceError::Timeout {
                stage: "STT close",
                secs: FINISH_TIMEOUT.as_secs(),
            });
        }
        Ok(())
    }
}

impl Drop for DeepgramStream {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Moves audio out and transcripts in until either side closes.
async fn pump<S>(
    socket: S,
    mut rx: mpsc::UnboundedReceiver<Message>,
    on_transcript: TranscriptCallback,
) where
    S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
        + futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error>
        + Unpin,
{
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            outgoing = rx.recv() => match outgoing {
                Some(message) => {
                    if let Err(e) = sink.send(message).await {
                        warn!("failed to write to STT provider: {}", e);
                        break;
                    }
                }
                None => {
                    let _ = sink.close().await;
                    break;
                }
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => match parse_transcript(text.as_str()) {
                    Ok(Some(event)) => on_transcript(event),
                    Ok(None) => {}
                    Err(e) => warn!("{}", e),
                },
                Some(Ok(Message::Close(frame))) => {
                    info!("STT provider closed connection: {:?}", frame);
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("STT connection error: {}", e);
                    break;
                }
                None => break,
            }
        }
    }
    debug!("STT pump finished");
}

#[derive(Debug, Deserialize)]
struct ProviderMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    channel: Option<ProviderChannel>,
    #[serde(default)]
    is_final: bool,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProviderChannel {
    alternatives: Vec<ProviderAlternative>,
}

#[derive(Debug, Deserialize)]
struct ProviderAlternative {
    transcript: String,
}

/// Parses one provider message.
///
/// Returns `Ok(None)` for messages that carry no transcript (metadata,
/// utterance markers) and an error for provider-reported failures.
pub fn parse_transcript(raw: &str) -> Result<Option<TranscriptEvent>, VoiceError> {
    let message: ProviderMessage = serde_json::from_str(raw)
        .map_err(|e| VoiceError::Stt(format!("unparseable provider message: {}", e)))?;

    match message.kind.as_str() {
        "Results" => Ok(message
            .channel
            .and_then(|c| c.alternatives.into_iter().next())
            .map(|alt| TranscriptEvent {
                text: alt.transcript,
                is_final: message.is_final,
            })),
        "Error" => Err(VoiceError::Stt(
            message
                .description
                .unwrap_or_else(|| "provider reported an error".to_string()),
        )),
        other => {
            debug!(kind = other, "ignoring STT provider message");
            Ok(None)
        }
    }
}
