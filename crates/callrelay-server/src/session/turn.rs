//! Silence and turn-duration timers for one call.
//!
//! Both timers are explicit cancellable handles. Firing never touches
//! session state directly; it emits a [`TimerEvent`] that the session
//! handles in order with everything else. Each arm bumps a generation (or
//! carries the turn id) so an event emitted just before cancellation is
//! recognizable as stale.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
    SilenceElapsed { generation: u64 },
    TurnElapsed { turn_id: u64 },
}

pub type TimerSink = Arc<dyn Fn(TimerEvent) + Send + Sync>;

pub struct TurnController {
    silence_timeout: Duration,
    turn_timeout: Duration,
    sink: TimerSink,
    silence: Option<JoinHandle<()>>,
    silence_generation: u64,
    turn: Option<(u64, JoinHandle<()>)>,
}

impl TurnController {
    pub fn new(silence_timeout: Duration, turn_timeout: Duration, sink: TimerSink) -> Self {
        Self {
            silence_timeout,
            turn_timeout,
            sink,
            silence: None,
            silence_generation: 0,
            turn: None,
        }
    }

    /// Cancels any pending silence timer and starts a fresh one.
    pub fn arm_silence(&mut self) {
        self.cancel_silence();
        self.silence_generation += 1;
        let generation = self.silence_generation;
        let sink = self.sink.clone();
        let timeout = self.silence_timeout;
        self.silence = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            sink(TimerEvent::SilenceElapsed { generation });
        }));
    }

    pub fn cancel_silence(&mut self) {
        if let Some(handle) = self.silence.take() {
            handle.abort();
        }
    }

    /// True if `generation` belongs to the most recently armed silence timer
    /// and that timer has not been cancelled.
    pub fn is_current_silence(&self, generation: u64) -> bool {
        self.silence.is_some() && generation == self.silence_generation
    }

    /// Cancels any pending turn timer and starts one for `turn_id`.
    pub fn arm_turn(&mut self, turn_id: u64) {
        self.cancel_turn();
        let sink = self.sink.clone();
        let timeout = self.turn_timeout;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            sink(TimerEvent::TurnElapsed { turn_id });
        });
        self.turn = Some((turn_id, handle));
    }

    pub fn cancel_turn(&mut self) {
        if let Some((_, handle)) = self.turn.take() {
            handle.abort();
        }
    }

    /// Clears the turn timer if it belongs to `turn_id`. Returns whether it did.
    pub fn take_turn(&mut self, turn_id: u64) -> bool {
        match &self.turn {
            Some((id, _)) if *id == turn_id => {
                self.cancel_turn();
                true
            }
            _ => false,
        }
    }

    pub fn turn_armed(&self) -> bool {
        self.turn.is_some()
    }

    pub fn cancel_all(&mut self) {
        self.cancel_silence();
        self.cancel_turn();
    }
}

impl Drop for TurnController {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
