//! The per-call session actor.
//!
//! Every input (start, audio, transcripts, connect results, timer firings,
//! pipeline progress, stop) is a [`SessionEvent`] on one channel, handled in arrival order by the
//! task that owns the [`Session`]. Timers, the transcription callback and the
//! response tasks hold only a weak sender, so once every [`SessionHandle`] is
//! dropped the actor tears down on its own.

use super::bridge::{BridgeEvent, BridgeSink, BridgeStatus, TranscriptionBridge};
use super::output::OutputSender;
use super::pipeline::{self, PipelineEvent, PipelineSink, ResponseContext};
use super::turn::{TimerEvent, TimerSink, TurnController};
use super::CallServices;
use crate::protocol::StartMeta;
use callrelay_types::{
    AudioProfile, PersonaConfig, TranscriptEvent, TranscriptionParams, Turn, VerticalId,
};
use callrelay_voice::{RunOptions, TranscriptCallback};
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Called once with the session id when the session has fully torn down.
pub type ReleaseHook = Box<dyn FnOnce(Uuid) -> BoxFuture<'static, ()> + Send>;

#[derive(Debug)]
pub enum SessionEvent {
    Start(StartMeta),
    Audio(Vec<u8>),
    Transcript(TranscriptEvent),
    Bridge(BridgeEvent),
    Timer(TimerEvent),
    Pipeline(PipelineEvent),
    Snapshot(oneshot::Sender<SessionSnapshot>),
    Stop,
}

/// Point-in-time copy of a session's state.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub call_id: String,
    pub session_id: Uuid,
    pub profile: AudioProfile,
    pub stream_id: Option<String>,
    pub vertical: Option<String>,
    pub history: Vec<Turn>,
    pub awaiting_response: bool,
    pub idle: bool,
    pub pending_turns: usize,
    pub bridge: BridgeStatus,
    pub frames_forwarded: u64,
    pub frames_dropped: u64,
    pub reengagements: u64,
    pub started_at: DateTime<Utc>,
    pub last_activity: Option<DateTime<Utc>>,
}

/// Cloneable handle for feeding events to a session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    call_id: Arc<str>,
    session_id: Uuid,
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionHandle {
    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    fn send(&self, event: SessionEvent) {
        if self.tx.send(event).is_err() {
            tracing::debug!(call_id = %self.call_id, "session already closed, event dropped");
        }
    }

    pub fn start(&self, meta: StartMeta) {
        self.send(SessionEvent::Start(meta));
    }

    pub fn audio(&self, frame: Vec<u8>) {
        self.send(SessionEvent::Audio(frame));
    }

    pub fn transcript(&self, event: TranscriptEvent) {
        self.send(SessionEvent::Transcript(event));
    }

    /// Requests teardown. Safe to call any number of times.
    pub fn stop(&self) {
        self.send(SessionEvent::Stop);
    }

    /// Returns `None` once the session has torn down.
    pub async fn snapshot(&self) -> Option<SessionSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(SessionEvent::Snapshot(tx)).ok()?;
        rx.await.ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Resolves once the session has torn down.
    pub async fn closed(&self) {
        self.tx.closed().await;
    }
}

/// Spawns the actor for one call and returns its handle.
pub fn spawn_session(
    call_id: impl Into<String>,
    profile: AudioProfile,
    services: Arc<CallServices>,
    output: Arc<OutputSender>,
    release: Option<ReleaseHook>,
) -> SessionHandle {
    let call_id: String = call_id.into();
    let session_id = Uuid::new_v4();
    let (tx, rx) = mpsc::unbounded_channel();
    let session = Session::new(
        call_id.clone(),
        session_id,
        profile,
        services,
        output,
        &tx,
        release,
    );
    tracing::info!(call_id = %call_id, %session_id, ?profile, "session opened");
    tokio::spawn(session.run(rx));

    SessionHandle {
        call_id: call_id.into(),
        session_id,
        tx,
    }
}

/// Builds a callback that posts into the session without keeping it alive.
fn weak_sink<T, F>(tx: &mpsc::UnboundedSender<SessionEvent>, wrap: F) -> Arc<dyn Fn(T) + Send + Sync>
where
    T: 'static,
    F: Fn(T) -> SessionEvent + Send + Sync + 'static,
{
    let weak = tx.downgrade();
    Arc::new(move |value: T| {
        if let Some(tx) = weak.upgrade() {
            let _ = tx.send(wrap(value));
        }
    })
}

struct Session {
    call_id: String,
    session_id: Uuid,
    profile: AudioProfile,
    services: Arc<CallServices>,
    output: Arc<OutputSender>,
    pipeline_sink: PipelineSink,

    started: bool,
    vertical: Option<VerticalId>,
    persona: Option<Arc<PersonaConfig>>,
    history: Vec<Turn>,
    awaiting_response: bool,
    idle: bool,
    started_at: DateTime<Utc>,
    last_activity: Option<DateTime<Utc>>,
    pending: VecDeque<String>,
    next_turn_id: u64,
    active_turn: Option<u64>,
    reengagements: u64,

    turns: TurnController,
    bridge: TranscriptionBridge,
    greeting: Option<JoinHandle<()>>,
    responses: HashMap<u64, JoinHandle<()>>,
    release: Option<ReleaseHook>,
    closed: bool,
    torn_down: bool,
}

impl Session {
    fn new(
        call_id: String,
        session_id: Uuid,
        profile: AudioProfile,
        services: Arc<CallServices>,
        output: Arc<OutputSender>,
        tx: &mpsc::UnboundedSender<SessionEvent>,
        release: Option<ReleaseHook>,
    ) -> Self {
        let policy = &services.policy;
        let timer_sink: TimerSink = weak_sink(tx, SessionEvent::Timer);
        let transcript_sink: TranscriptCallback = weak_sink(tx, SessionEvent::Transcript);
        let pipeline_sink: PipelineSink = weak_sink(tx, SessionEvent::Pipeline);
        let bridge_sink: BridgeSink = weak_sink(tx, SessionEvent::Bridge);

        let turns = TurnController::new(policy.silence_timeout, policy.turn_timeout, timer_sink);
        let bridge = TranscriptionBridge::new(
            call_id.clone(),
            TranscriptionParams::for_profile(profile, policy.finalization_silence_ms),
            services.transcriber.clone(),
            transcript_sink,
            bridge_sink,
        );

        Self {
            call_id,
            session_id,
            profile,
            output,
            pipeline_sink,
            started: false,
            vertical: None,
            persona: None,
            history: Vec::new(),
            awaiting_response: false,
            idle: false,
            started_at: Utc::now(),
            last_activity: None,
            pending: VecDeque::new(),
            next_turn_id: 0,
            active_turn: None,
            reengagements: 0,
            turns,
            bridge,
            greeting: None,
            responses: HashMap::new(),
            release,
            closed: false,
            torn_down: false,
            services,
        }
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<SessionEvent>) {
        while let Some(event) = rx.recv().await {
            self.handle(event).await;
            if self.closed {
                break;
            }
        }
        self.teardown().await;
    }

    async fn handle(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Start(meta) => self.on_session_start(meta),
            SessionEvent::Audio(frame) => self.on_audio_frame(frame).await,
            SessionEvent::Transcript(event) => self.on_transcript(event),
            SessionEvent::Bridge(event) => self.bridge.on_event(event).await,
            SessionEvent::Timer(TimerEvent::SilenceElapsed { generation }) => {
                self.on_silence(generation)
            }
            SessionEvent::Timer(TimerEvent::TurnElapsed { turn_id }) => {
                self.on_turn_timeout(turn_id)
            }
            SessionEvent::Pipeline(PipelineEvent::Replied { turn_id, text }) => {
                tracing::debug!(call_id = %self.call_id, turn_id, "recording agent turn");
                self.history.push(Turn::agent(text));
            }
            SessionEvent::Pipeline(PipelineEvent::Finished { turn_id }) => {
                self.on_response_finished(turn_id)
            }
            SessionEvent::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            SessionEvent::Stop => self.teardown().await,
        }
    }

    fn on_session_start(&mut self, meta: StartMeta) {
        if self.started {
            tracing::warn!(call_id = %self.call_id, "duplicate start event ignored");
            return;
        }
        self.started = true;

        match &meta.stream_id {
            Some(stream_id) => self.output.bind_stream(stream_id.clone()),
            None => tracing::warn!(call_id = %self.call_id, "start event without stream id"),
        }

        let (vertical, persona) = match self.services.personas.resolve(meta.vertical.as_deref()) {
            Ok(resolved) => resolved,
            Err(e) => {
                tracing::error!(call_id = %self.call_id, "rejecting session: {}", e);
                self.closed = true;
                return;
            }
        };
        tracing::info!(
            call_id = %self.call_id,
            stream_id = meta.stream_id.as_deref().unwrap_or(""),
            vertical = %vertical,
            "session started"
        );

        self.turns.arm_silence();
        self.greeting = Some(tokio::spawn(pipeline::speak_greeting(
            self.call_id.clone(),
            self.profile,
            self.services.synthesizer.clone(),
            self.output.clone(),
            persona.greeting.clone(),
        )));
        self.vertical = Some(vertical);
        self.persona = Some(persona);
    }

    async fn on_audio_frame(&mut self, frame: Vec<u8>) {
        self.bridge.write(frame).await;
        self.turns.arm_silence();
        self.idle = false;
        self.last_activity = Some(Utc::now());
    }

    fn on_transcript(&mut self, event: TranscriptEvent) {
        let Some(text) = event.utterance() else {
            return;
        };
        if self.persona.is_none() {
            tracing::warn!(call_id = %self.call_id, "final transcript before start, dropped");
            return;
        }
        let text = text.to_string();

        if self.awaiting_response {
            if self.pending.len() >= self.services.policy.max_pending_turns {
                tracing::warn!(
                    call_id = %self.call_id,
                    pending = self.pending.len(),
                    "pending turn queue full, dropping utterance"
                );
                return;
            }
            tracing::debug!(call_id = %self.call_id, "turn in flight, queueing utterance");
            self.pending.push_back(text);
            return;
        }
        self.dispatch(text);
    }

    fn dispatch(&mut self, text: String) {
        let Some(persona) = self.persona.clone() else {
            return;
        };
        self.next_turn_id += 1;
        let turn_id = self.next_turn_id;
        tracing::info!(call_id = %self.call_id, turn_id, "caller turn");

        self.history.push(Turn::caller(text));
        self.awaiting_response = true;
        self.active_turn = Some(turn_id);
        self.turns.arm_turn(turn_id);

        let ctx = ResponseContext {
            call_id: self.call_id.clone(),
            turn_id,
            profile: self.profile,
            options: RunOptions::from_persona(&persona),
            persona,
            fallback_phrase: self.services.policy.fallback_phrase.clone(),
            reasoning: self.services.reasoning.clone(),
            synthesizer: self.services.synthesizer.clone(),
            output: self.output.clone(),
        };
        let task = pipeline::run_response(ctx, self.history.clone(), self.pipeline_sink.clone());
        let call_id = self.call_id.clone();
        let handle = tokio::spawn(async move {
            let outcome = task.await;
            tracing::debug!(call_id = %call_id, turn_id, ?outcome, "response finished");
        });
        self.responses.insert(turn_id, handle);
    }

    fn dispatch_next(&mut self) {
        if self.awaiting_response {
            return;
        }
        if let Some(text) = self.pending.pop_front() {
            self.dispatch(text);
        }
    }

    fn on_silence(&mut self, generation: u64) {
        if !self.turns.is_current_silence(generation) {
            return;
        }
        self.idle = true;
        if !self.awaiting_response {
            self.reengage();
        }
    }

    /// Re-engagement hook for a silent caller. Currently only recorded.
    fn reengage(&mut self) {
        self.reengagements += 1;
        tracing::debug!(call_id = %self.call_id, "caller silent");
    }

    fn on_turn_timeout(&mut self, turn_id: u64) {
        if self.active_turn != Some(turn_id) {
            return;
        }
        tracing::warn!(call_id = %self.call_id, turn_id, "turn timed out, unblocking session");
        self.active_turn = None;
        self.awaiting_response = false;
        self.turns.take_turn(turn_id);
        self.dispatch_next();
    }

    fn on_response_finished(&mut self, turn_id: u64) {
        self.responses.remove(&turn_id);
        if self.active_turn != Some(turn_id) {
            return;
        }
        self.active_turn = None;
        self.awaiting_response = false;
        self.turns.take_turn(turn_id);
        self.dispatch_next();
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            call_id: self.call_id.clone(),
            session_id: self.session_id,
            profile: self.profile,
            stream_id: self.output.stream_id(),
            vertical: self.vertical.as_ref().map(|v| v.to_string()),
            history: self.history.clone(),
            awaiting_response: self.awaiting_response,
            idle: self.idle,
            pending_turns: self.pending.len(),
            bridge: self.bridge.status(),
            frames_forwarded: self.bridge.frames_forwarded(),
            frames_dropped: self.bridge.frames_dropped(),
            reengagements: self.reengagements,
            started_at: self.started_at,
            last_activity: self.last_activity,
        }
    }

    /// Releases everything the session owns. Idempotent.
    async fn teardown(&mut self) {
        self.closed = true;
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        self.bridge.stop().await;
        self.turns.cancel_all();
        if let Some(greeting) = self.greeting.take() {
            greeting.abort();
        }
        for (_, task) in self.responses.drain() {
            task.abort();
        }
        self.pending.clear();
        self.output.close();
        if let Some(release) = self.release.take() {
            release(self.session_id).await;
        }
        tracing::info!(
            call_id = %self.call_id,
            session_id = %self.session_id,
            turns = self.history.len(),
            "session closed"
        );
    }
}
