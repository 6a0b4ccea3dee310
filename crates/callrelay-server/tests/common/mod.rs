//! Mock providers and helpers shared by the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use callrelay_server::protocol::{MediaPayload, StartMeta};
use callrelay_server::session::{
    spawn_session, CallServices, OutputSender, SessionHandle, SessionPolicy, SessionSnapshot,
};
use callrelay_types::{
    AudioProfile, PersonaCatalog, PersonaConfig, ToolKind, TranscriptEvent, TranscriptionParams,
    Turn,
};
use callrelay_voice::{
    ReasoningEngine, RunOptions, SpeechSynthesizer, SpeechToText, TranscriptCallback,
    TranscriptionStream, VoiceError,
};
use futures_util::FutureExt;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

pub const SUPPORT_GREETING: &str = "Thanks for calling support. How can I help?";
pub const SALES_GREETING: &str = "Hi, you've reached sales.";
pub const FALLBACK: &str = "Sorry, I'm having trouble right now. Please hold on.";

// -- Speech to text --------------------------------------------------------

#[derive(Default)]
pub struct MockStt {
    pub attempts: AtomicUsize,
    pub opened: AtomicUsize,
    pub finished: AtomicUsize,
    pub frames: Mutex<Vec<Vec<u8>>>,
    pub params: Mutex<Vec<TranscriptionParams>>,
    /// Connect attempts sleep this long, then fail.
    pub stall_open: Mutex<Option<Duration>>,
    callback: Mutex<Option<TranscriptCallback>>,
}

impl MockStt {
    /// Delivers a transcript as if the provider had produced it.
    pub fn emit(&self, event: TranscriptEvent) {
        let callback = self.callback.lock().unwrap().clone();
        if let Some(callback) = callback {
            callback(event);
        }
    }

    pub fn frame_count(&self) -> usize {
        self.frames.lock().unwrap().len()
    }
}

struct MockStream(Arc<MockStt>);

/// Wrapper so tests can keep an `Arc<MockStt>` while the session holds the
/// provider trait object.
pub struct SharedStt(pub Arc<MockStt>);

#[async_trait]
impl SpeechToText for SharedStt {
    async fn open(
        &self,
        params: &TranscriptionParams,
        on_transcript: TranscriptCallback,
    ) -> Result<Box<dyn TranscriptionStream>, VoiceError> {
        self.0.attempts.fetch_add(1, Ordering::SeqCst);
        let stall = *self.0.stall_open.lock().unwrap();
        if let Some(stall) = stall {
            tokio::time::sleep(stall).await;
            return Err(VoiceError::Transport("connect timed out".to_string()));
        }
        self.0.opened.fetch_add(1, Ordering::SeqCst);
        self.0.params.lock().unwrap().push(*params);
        *self.0.callback.lock().unwrap() = Some(on_transcript);
        Ok(Box::new(MockStream(self.0.clone())))
    }

    fn provider_name(&self) -> &'static str {
        "mock"
    }
}

#[async_trait]
impl TranscriptionStream for MockStream {
    async fn send_audio(&mut self, frame: Vec<u8>) -> Result<(), VoiceError> {
        self.0.frames.lock().unwrap().push(frame);
        Ok(())
    }

    async fn finish(&mut self) -> Result<(), VoiceError> {
        self.0.finished.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// -- Reasoning ---------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum Behavior {
    Reply(String),
    Fail,
    /// Never resolves.
    Stall,
    /// Replies after a delay.
    Delayed(Duration, String),
}

pub struct MockReasoning {
    behavior: Mutex<Behavior>,
    pub histories: Mutex<Vec<Vec<Turn>>>,
}

impl MockReasoning {
    pub fn new(behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            behavior: Mutex::new(behavior),
            histories: Mutex::new(Vec::new()),
        })
    }

    pub fn replying(text: &str) -> Arc<Self> {
        Self::new(Behavior::Reply(text.to_string()))
    }

    pub fn set(&self, behavior: Behavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn calls(&self) -> usize {
        self.histories.lock().unwrap().len()
    }
}

#[async_trait]
impl ReasoningEngine for MockReasoning {
    async fn run(
        &self,
        _persona: &PersonaConfig,
        history: &[Turn],
        _options: &RunOptions,
    ) -> Result<String, VoiceError> {
        self.histories.lock().unwrap().push(history.to_vec());
        let behavior = self.behavior.lock().unwrap().clone();
        match behavior {
            Behavior::Reply(text) => Ok(text),
            Behavior::Fail => Err(VoiceError::Reasoning("mock engine failure".to_string())),
            Behavior::Stall => std::future::pending().await,
            Behavior::Delayed(delay, text) => {
                tokio::time::sleep(delay).await;
                Ok(text)
            }
        }
    }
}

// -- Synthesis ---------------------------------------------------------------

/// Returns the text's bytes as "audio" so tests can decode what was spoken.
#[derive(Default)]
pub struct MockSynth {
    pub calls: Mutex<Vec<String>>,
    pub profiles: Mutex<Vec<AudioProfile>>,
    pub fail_on: Mutex<HashSet<String>>,
}

impl MockSynth {
    pub fn failing_on(texts: &[&str]) -> Arc<Self> {
        let synth = Self::default();
        *synth.fail_on.lock().unwrap() = texts.iter().map(|t| t.to_string()).collect();
        Arc::new(synth)
    }

    pub fn calls_with(&self, text: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|t| *t == text).count()
    }
}

#[async_trait]
impl SpeechSynthesizer for MockSynth {
    async fn synthesize(&self, text: &str, profile: AudioProfile) -> Result<Vec<u8>, VoiceError> {
        self.calls.lock().unwrap().push(text.to_string());
        self.profiles.lock().unwrap().push(profile);
        if self.fail_on.lock().unwrap().contains(text) {
            return Err(VoiceError::Tts("mock synthesis failure".to_string()));
        }
        Ok(text.as_bytes().to_vec())
    }
}

// -- Wiring ------------------------------------------------------------------

pub fn persona(greeting: &str, prompt: &str) -> PersonaConfig {
    PersonaConfig {
        greeting: greeting.to_string(),
        system_prompt: prompt.to_string(),
        tone: "warm and concise".to_string(),
        tools: vec![ToolKind::LookupOrder],
        compliance_text: None,
        provider: None,
        model: None,
    }
}

pub fn catalog() -> PersonaCatalog {
    PersonaCatalog::new(
        "support",
        [
            (
                "support".to_string(),
                persona(SUPPORT_GREETING, "You help customers with their orders."),
            ),
            (
                "sales".to_string(),
                persona(SALES_GREETING, "You help prospects choose a plan."),
            ),
        ],
    )
    .expect("test catalog is valid")
}

pub fn policy() -> SessionPolicy {
    SessionPolicy {
        silence_timeout: Duration::from_secs(4),
        turn_timeout: Duration::from_secs(30),
        finalization_silence_ms: 300,
        max_pending_turns: 4,
        fallback_phrase: FALLBACK.to_string(),
    }
}

pub struct Mocks {
    pub stt: Arc<MockStt>,
    pub reasoning: Arc<MockReasoning>,
    pub synth: Arc<MockSynth>,
}

impl Mocks {
    pub fn new(reasoning: Arc<MockReasoning>) -> Self {
        Self::with_synth(reasoning, Arc::new(MockSynth::default()))
    }

    pub fn with_synth(reasoning: Arc<MockReasoning>, synth: Arc<MockSynth>) -> Self {
        Self {
            stt: Arc::new(MockStt::default()),
            reasoning,
            synth,
        }
    }

    pub fn services(&self, policy: SessionPolicy) -> CallServices {
        CallServices {
            transcriber: Arc::new(SharedStt(self.stt.clone())),
            reasoning: self.reasoning.clone(),
            synthesizer: self.synth.clone(),
            personas: Arc::new(catalog()),
            policy,
        }
    }
}

/// A session wired to mocks, with its outbound frames captured.
pub struct TestCall {
    pub handle: SessionHandle,
    pub frames: mpsc::Receiver<String>,
    pub released: Arc<AtomicUsize>,
}

pub fn open_call(mocks: &Mocks, policy: SessionPolicy) -> TestCall {
    open_call_with_profile(mocks, policy, AudioProfile::Narrowband)
}

pub fn open_call_with_profile(mocks: &Mocks, policy: SessionPolicy, profile: AudioProfile) -> TestCall {
    let (tx, frames) = mpsc::channel(64);
    let output = Arc::new(OutputSender::new("CA-test", tx));
    let released = Arc::new(AtomicUsize::new(0));
    let counter = released.clone();
    let handle = spawn_session(
        "CA-test",
        profile,
        Arc::new(mocks.services(policy)),
        output,
        Some(Box::new(move |_session_id: Uuid| {
            counter.fetch_add(1, Ordering::SeqCst);
            async {}.boxed()
        })),
    );
    TestCall {
        handle,
        frames,
        released,
    }
}

pub fn start_meta(vertical: Option<&str>) -> StartMeta {
    StartMeta {
        stream_id: Some("MZ-test".to_string()),
        vertical: vertical.map(str::to_string),
    }
}

/// Decodes an outbound `media` frame into its raw audio.
pub fn decode_media(frame: &str) -> Vec<u8> {
    let json: serde_json::Value = serde_json::from_str(frame).expect("frame is JSON");
    assert_eq!(json["event"], "media");
    MediaPayload {
        payload: json["media"]["payload"]
            .as_str()
            .expect("payload is a string")
            .to_string(),
    }
    .decode()
    .expect("payload is base64")
}

/// Receives the next outbound frame and decodes it as text.
pub async fn next_spoken(frames: &mut mpsc::Receiver<String>) -> String {
    let frame = tokio::time::timeout(Duration::from_secs(5), frames.recv())
        .await
        .expect("timed out waiting for audio")
        .expect("output channel closed");
    String::from_utf8(decode_media(&frame)).expect("mock audio is utf-8")
}

/// Polls the session until `check` holds, panicking after a bounded wait.
pub async fn wait_for<F>(handle: &SessionHandle, check: F) -> SessionSnapshot
where
    F: Fn(&SessionSnapshot) -> bool,
{
    for _ in 0..500 {
        if let Some(snapshot) = handle.snapshot().await {
            if check(&snapshot) {
                return snapshot;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("session never reached the expected state");
}

/// Lets spawned tasks run without advancing (paused) time much.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}
