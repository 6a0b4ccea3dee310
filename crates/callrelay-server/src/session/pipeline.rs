//! Reasoning → synthesis → output for one caller turn.

use super::output::{Delivery, OutputSender};
use callrelay_types::{AudioProfile, PersonaConfig, Turn};
use callrelay_voice::{ReasoningEngine, RunOptions, SpeechSynthesizer};
use std::future::Future;
use std::sync::Arc;

/// Everything a response task needs, detached from the session.
#[derive(Clone)]
pub struct ResponseContext {
    pub call_id: String,
    pub turn_id: u64,
    pub profile: AudioProfile,
    pub persona: Arc<PersonaConfig>,
    pub options: RunOptions,
    pub fallback_phrase: String,
    pub reasoning: Arc<dyn ReasoningEngine>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub output: Arc<OutputSender>,
}

/// Progress reported back to the owning session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    /// Text to record as the agent turn (the reply, or the fallback phrase).
    Replied { turn_id: u64, text: String },
    /// The task ended, by any path including abort.
    Finished { turn_id: u64 },
}

pub type PipelineSink = Arc<dyn Fn(PipelineEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseOutcome {
    /// The reply was synthesized and handed to the output sender.
    Replied(Delivery),
    /// The fallback phrase was spoken instead. `None` when its synthesis
    /// failed too.
    Fallback(Option<Delivery>),
}

struct FinishGuard {
    turn_id: u64,
    sink: PipelineSink,
}

impl Drop for FinishGuard {
    fn drop(&mut self) {
        (self.sink)(PipelineEvent::Finished {
            turn_id: self.turn_id,
        });
    }
}

/// Runs one turn. `history` already ends with the caller turn.
///
/// The finish guard is created before the future is first polled, so a task
/// aborted before it starts still reports `Finished`.
pub fn run_response(
    ctx: ResponseContext,
    history: Vec<Turn>,
    sink: PipelineSink,
) -> impl Future<Output = ResponseOutcome> + Send {
    let finish = FinishGuard {
        turn_id: ctx.turn_id,
        sink: sink.clone(),
    };
    async move {
        let _finish = finish;
        respond(ctx, history, sink).await
    }
}

async fn respond(ctx: ResponseContext, history: Vec<Turn>, sink: PipelineSink) -> ResponseOutcome {
    let reply = match ctx
        .reasoning
        .run(&ctx.persona, &history, &ctx.options)
        .await
    {
        Ok(reply) if !reply.trim().is_empty() => reply,
        Ok(_) => {
            tracing::error!(call_id = %ctx.call_id, turn_id = ctx.turn_id, "reasoning returned an empty reply");
            return fall_back(&ctx, &sink).await;
        }
        Err(e) => {
            tracing::error!(call_id = %ctx.call_id, turn_id = ctx.turn_id, "reasoning failed: {}", e);
            return fall_back(&ctx, &sink).await;
        }
    };

    tracing::info!(call_id = %ctx.call_id, turn_id = ctx.turn_id, chars = reply.len(), "agent replied");
    sink(PipelineEvent::Replied {
        turn_id: ctx.turn_id,
        text: reply.clone(),
    });

    match ctx.synthesizer.synthesize(&reply, ctx.profile).await {
        Ok(audio) => ResponseOutcome::Replied(ctx.output.send_audio(&audio).await),
        Err(e) => {
            tracing::error!(call_id = %ctx.call_id, turn_id = ctx.turn_id, "synthesis failed: {}", e);
            ResponseOutcome::Fallback(speak_fallback(&ctx).await)
        }
    }
}

async fn fall_back(ctx: &ResponseContext, sink: &PipelineSink) -> ResponseOutcome {
    sink(PipelineEvent::Replied {
        turn_id: ctx.turn_id,
        text: ctx.fallback_phrase.clone(),
    });
    ResponseOutcome::Fallback(speak_fallback(ctx).await)
}

/// Makes exactly one attempt to speak the fallback phrase. A synthesis
/// failure here is logged and swallowed.
pub async fn speak_fallback(ctx: &ResponseContext) -> Option<Delivery> {
    match ctx
        .synthesizer
        .synthesize(&ctx.fallback_phrase, ctx.profile)
        .await
    {
        Ok(audio) => Some(ctx.output.send_audio(&audio).await),
        Err(e) => {
            tracing::error!(call_id = %ctx.call_id, turn_id = ctx.turn_id, "fallback synthesis failed, staying silent: {}", e);
            None
        }
    }
}

/// Speaks the persona greeting. Failures are logged; nothing is retried.
pub async fn speak_greeting(
    call_id: String,
    profile: AudioProfile,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    output: Arc<OutputSender>,
    greeting: String,
) {
    match synthesizer.synthesize(&greeting, profile).await {
        Ok(audio) => {
            let delivery = output.send_audio(&audio).await;
            tracing::debug!(call_id = %call_id, ?delivery, "greeting delivered");
        }
        Err(e) => {
            tracing::error!(call_id = %call_id, "greeting synthesis failed: {}", e);
        }
    }
}
