mod common;

use callrelay_server::session::BridgeStatus;
use callrelay_types::{AudioProfile, TranscriptEvent, Turn};
use common::*;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::sync::mpsc;

async fn assert_silent(frames: &mut mpsc::Receiver<String>) {
    let extra = tokio::time::timeout(Duration::from_millis(200), frames.recv()).await;
    assert!(
        !matches!(extra, Ok(Some(_))),
        "unexpected extra outbound frame: {:?}",
        extra
    );
}

async fn greeted(mocks: &Mocks, policy: callrelay_server::session::SessionPolicy) -> TestCall {
    let mut call = open_call(mocks, policy);
    call.handle.start(start_meta(Some("support")));
    assert_eq!(next_spoken(&mut call.frames).await, SUPPORT_GREETING);
    call
}

async fn open_bridge(call: &TestCall) {
    call.handle.audio(vec![0x7f; 160]);
    wait_for(&call.handle, |s| s.bridge == BridgeStatus::Open).await;
}

#[tokio::test]
async fn test_start_speaks_configured_greeting_once() {
    let mocks = Mocks::new(MockReasoning::replying("unused"));
    let mut call = open_call(&mocks, policy());

    call.handle.start(start_meta(Some("support")));

    let frame = tokio::time::timeout(Duration::from_secs(5), call.frames.recv())
        .await
        .expect("greeting should be sent")
        .expect("channel open");
    let json: serde_json::Value = serde_json::from_str(&frame).unwrap();
    assert_eq!(json["streamId"], "MZ-test");
    assert_eq!(decode_media(&frame), SUPPORT_GREETING.as_bytes());
    assert_silent(&mut call.frames).await;

    let snapshot = call.handle.snapshot().await.expect("session alive");
    assert_eq!(snapshot.vertical.as_deref(), Some("support"));
    assert_eq!(snapshot.stream_id.as_deref(), Some("MZ-test"));
    // The greeting is spoken but not recorded.
    assert!(snapshot.history.is_empty());
    assert_eq!(mocks.reasoning.calls(), 0);
}

#[tokio::test]
async fn test_missing_vertical_selects_default_persona() {
    let mocks = Mocks::new(MockReasoning::replying("unused"));
    let mut call = open_call(&mocks, policy());

    call.handle.start(start_meta(None));

    assert_eq!(next_spoken(&mut call.frames).await, SUPPORT_GREETING);
    let snapshot = call.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.vertical.as_deref(), Some("support"));
}

#[tokio::test]
async fn test_duplicate_start_is_ignored() {
    let mocks = Mocks::new(MockReasoning::replying("unused"));
    let mut call = open_call(&mocks, policy());

    call.handle.start(start_meta(Some("sales")));
    call.handle.start(start_meta(Some("support")));

    assert_eq!(next_spoken(&mut call.frames).await, SALES_GREETING);
    assert_silent(&mut call.frames).await;
    let snapshot = call.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.vertical.as_deref(), Some("sales"));
}

#[tokio::test]
async fn test_unknown_vertical_tears_session_down() {
    for vertical in ["billing", "Not A Vertical!"] {
        let mocks = Mocks::new(MockReasoning::replying("unused"));
        let mut call = open_call(&mocks, policy());

        call.handle.start(start_meta(Some(vertical)));

        tokio::time::timeout(Duration::from_secs(5), call.handle.closed())
            .await
            .expect("session should close");
        assert!(call.frames.recv().await.is_none());
        assert!(call.handle.snapshot().await.is_none());
        assert_eq!(call.released.load(Ordering::SeqCst), 1);
        assert!(mocks.synth.calls.lock().unwrap().is_empty());
    }
}

#[tokio::test]
async fn test_final_transcript_produces_caller_and_agent_turns() {
    let mocks = Mocks::new(MockReasoning::replying("How can I assist?"));
    let mut call = greeted(&mocks, policy()).await;
    open_bridge(&call).await;

    mocks.stt.emit(TranscriptEvent::interim("I need"));
    mocks.stt.emit(TranscriptEvent::finalized("I need help"));

    assert_eq!(next_spoken(&mut call.frames).await, "How can I assist?");
    let snapshot = wait_for(&call.handle, |s| s.history.len() == 2 && !s.awaiting_response).await;
    assert_eq!(
        snapshot.history,
        vec![Turn::caller("I need help"), Turn::agent("How can I assist?")]
    );
    assert_eq!(mocks.synth.calls_with("How can I assist?"), 1);
    assert_eq!(
        mocks.reasoning.histories.lock().unwrap()[0],
        vec![Turn::caller("I need help")]
    );
    assert_silent(&mut call.frames).await;
}

#[tokio::test]
async fn test_reasoning_failure_speaks_fallback_and_records_it() {
    let mocks = Mocks::new(MockReasoning::new(Behavior::Fail));
    let mut call = greeted(&mocks, policy()).await;

    call.handle.transcript(TranscriptEvent::finalized("What are your hours?"));

    assert_eq!(next_spoken(&mut call.frames).await, FALLBACK);
    assert_silent(&mut call.frames).await;
    let snapshot = wait_for(&call.handle, |s| !s.awaiting_response && s.history.len() == 2).await;
    assert_eq!(
        snapshot.history,
        vec![Turn::caller("What are your hours?"), Turn::agent(FALLBACK)]
    );
    assert_eq!(mocks.synth.calls_with(FALLBACK), 1);
}

#[tokio::test]
async fn test_synthesis_failure_keeps_reply_and_speaks_fallback() {
    let mocks = Mocks::with_synth(
        MockReasoning::replying("Let me check that order."),
        MockSynth::failing_on(&["Let me check that order."]),
    );
    let mut call = greeted(&mocks, policy()).await;

    call.handle.transcript(TranscriptEvent::finalized("Where is my order?"));

    assert_eq!(next_spoken(&mut call.frames).await, FALLBACK);
    let snapshot = wait_for(&call.handle, |s| !s.awaiting_response && s.history.len() == 2).await;
    assert_eq!(
        snapshot.history,
        vec![
            Turn::caller("Where is my order?"),
            Turn::agent("Let me check that order.")
        ]
    );
}

#[tokio::test]
async fn test_failing_fallback_is_tried_once_then_silent() {
    let mocks = Mocks::with_synth(
        MockReasoning::new(Behavior::Fail),
        MockSynth::failing_on(&[FALLBACK]),
    );
    let mut call = greeted(&mocks, policy()).await;

    call.handle.transcript(TranscriptEvent::finalized("Hello?"));

    let snapshot = wait_for(&call.handle, |s| !s.awaiting_response && s.history.len() == 2).await;
    assert_eq!(snapshot.history[1], Turn::agent(FALLBACK));
    assert_eq!(mocks.synth.calls_with(FALLBACK), 1);
    assert_silent(&mut call.frames).await;
}

#[tokio::test]
async fn test_interim_and_blank_transcripts_never_touch_history() {
    let mocks = Mocks::new(MockReasoning::replying("unused"));
    let call = greeted(&mocks, policy()).await;
    open_bridge(&call).await;

    mocks.stt.emit(TranscriptEvent::interim("I"));
    mocks.stt.emit(TranscriptEvent::interim("I want"));
    mocks.stt.emit(TranscriptEvent::finalized("   "));
    mocks.stt.emit(TranscriptEvent::finalized(""));
    call.handle.transcript(TranscriptEvent::interim("I want to cancel"));

    let snapshot = call.handle.snapshot().await.unwrap();
    assert!(snapshot.history.is_empty());
    assert!(!snapshot.awaiting_response);
    assert_eq!(mocks.reasoning.calls(), 0);
}

#[tokio::test]
async fn test_audio_frames_share_one_narrowband_connection() {
    let mocks = Mocks::new(MockReasoning::replying("unused"));
    let call = greeted(&mocks, policy()).await;

    for i in 0..5u8 {
        call.handle.audio(vec![i; 160]);
    }
    let snapshot = wait_for(&call.handle, |s| s.frames_forwarded == 5).await;
    assert_eq!(snapshot.bridge, BridgeStatus::Open);
    assert!(snapshot.last_activity.is_some());

    assert_eq!(mocks.stt.opened.load(Ordering::SeqCst), 1);
    let params = mocks.stt.params.lock().unwrap()[0];
    assert_eq!(params.profile, AudioProfile::Narrowband);
    assert_eq!(params.sample_rate, 8_000);
    assert_eq!(params.finalization_silence_ms, 300);
    assert_eq!(mocks.stt.frames.lock().unwrap()[4], vec![4u8; 160]);
}

#[tokio::test]
async fn test_wideband_session_opens_linear16_stream() {
    let mocks = Mocks::new(MockReasoning::replying("unused"));
    let call = open_call_with_profile(&mocks, policy(), AudioProfile::Wideband);

    call.handle.audio(vec![0; 320]);
    wait_for(&call.handle, |s| s.bridge == BridgeStatus::Open).await;

    let params = mocks.stt.params.lock().unwrap()[0];
    assert_eq!(params.profile.encoding(), "linear16");
    assert_eq!(params.sample_rate, 16_000);
}

#[tokio::test]
async fn test_wideband_session_speaks_wideband_audio() {
    let mocks = Mocks::new(MockReasoning::replying("Happy to help."));
    let mut call = open_call_with_profile(&mocks, policy(), AudioProfile::Wideband);
    call.handle.start(start_meta(None));
    assert_eq!(next_spoken(&mut call.frames).await, SUPPORT_GREETING);

    call.handle.transcript(TranscriptEvent::finalized("Hello"));
    assert_eq!(next_spoken(&mut call.frames).await, "Happy to help.");
    assert_eq!(
        *mocks.synth.profiles.lock().unwrap(),
        vec![AudioProfile::Wideband, AudioProfile::Wideband]
    );
}

#[tokio::test(start_paused = true)]
async fn test_overlapping_finals_are_serialized() {
    let mocks = Mocks::new(MockReasoning::new(Behavior::Delayed(
        Duration::from_secs(1),
        "Got it.".to_string(),
    )));
    let mut call = greeted(&mocks, policy()).await;

    call.handle.transcript(TranscriptEvent::finalized("first"));
    call.handle.transcript(TranscriptEvent::finalized("second"));

    let snapshot = call.handle.snapshot().await.unwrap();
    assert!(snapshot.awaiting_response);
    assert_eq!(snapshot.pending_turns, 1);
    assert_eq!(snapshot.history, vec![Turn::caller("first")]);

    let snapshot = wait_for(&call.handle, |s| s.history.len() == 4 && !s.awaiting_response).await;
    assert_eq!(
        snapshot.history,
        vec![
            Turn::caller("first"),
            Turn::agent("Got it."),
            Turn::caller("second"),
            Turn::agent("Got it."),
        ]
    );
    // The second run saw the first exchange.
    assert_eq!(
        mocks.reasoning.histories.lock().unwrap()[1],
        vec![
            Turn::caller("first"),
            Turn::agent("Got it."),
            Turn::caller("second")
        ]
    );
    assert_eq!(next_spoken(&mut call.frames).await, "Got it.");
    assert_eq!(next_spoken(&mut call.frames).await, "Got it.");
}

#[tokio::test(start_paused = true)]
async fn test_pending_queue_overflow_is_dropped() {
    let mocks = Mocks::new(MockReasoning::new(Behavior::Delayed(
        Duration::from_secs(1),
        "Okay.".to_string(),
    )));
    let policy = callrelay_server::session::SessionPolicy {
        max_pending_turns: 1,
        ..policy()
    };
    let call = greeted(&mocks, policy).await;

    call.handle.transcript(TranscriptEvent::finalized("one"));
    call.handle.transcript(TranscriptEvent::finalized("two"));
    call.handle.transcript(TranscriptEvent::finalized("three"));

    let snapshot = call.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.pending_turns, 1);

    let snapshot = wait_for(&call.handle, |s| s.history.len() == 4 && !s.awaiting_response).await;
    assert_eq!(snapshot.history[0], Turn::caller("one"));
    assert_eq!(snapshot.history[2], Turn::caller("two"));
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(mocks.reasoning.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_turn_timer_unblocks_stalled_reasoning() {
    let mocks = Mocks::new(MockReasoning::new(Behavior::Stall));
    let call = greeted(&mocks, policy()).await;
    let asked_at = tokio::time::Instant::now();

    call.handle.transcript(TranscriptEvent::finalized("Are you there?"));
    let snapshot = call.handle.snapshot().await.unwrap();
    assert!(snapshot.awaiting_response);

    // Queued behind the stalled turn.
    call.handle.transcript(TranscriptEvent::finalized("Hello?"));

    tokio::time::sleep(Duration::from_secs(30)).await;
    let snapshot = wait_for(&call.handle, |s| s.history.len() == 2).await;
    assert!(asked_at.elapsed() <= Duration::from_millis(30_100));
    assert_eq!(
        snapshot.history,
        vec![Turn::caller("Are you there?"), Turn::caller("Hello?")]
    );
    // The queued turn was dispatched once the first one timed out.
    assert!(snapshot.awaiting_response);
    assert_eq!(snapshot.pending_turns, 0);
    assert_eq!(mocks.reasoning.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_turn_timer_clears_awaiting_response() {
    let mocks = Mocks::new(MockReasoning::new(Behavior::Stall));
    let call = greeted(&mocks, policy()).await;

    call.handle.transcript(TranscriptEvent::finalized("Are you there?"));
    assert!(call.handle.snapshot().await.unwrap().awaiting_response);

    tokio::time::sleep(Duration::from_millis(29_900)).await;
    assert!(call.handle.snapshot().await.unwrap().awaiting_response);

    tokio::time::sleep(Duration::from_millis(200)).await;
    let snapshot = call.handle.snapshot().await.unwrap();
    assert!(!snapshot.awaiting_response);
    assert_eq!(snapshot.history, vec![Turn::caller("Are you there?")]);
}

#[tokio::test(start_paused = true)]
async fn test_late_reply_after_turn_timeout_is_still_spoken() {
    let mocks = Mocks::new(MockReasoning::new(Behavior::Delayed(
        Duration::from_secs(3),
        "Sorry for the wait.".to_string(),
    )));
    let policy = callrelay_server::session::SessionPolicy {
        turn_timeout: Duration::from_secs(2),
        ..policy()
    };
    let mut call = greeted(&mocks, policy).await;

    call.handle.transcript(TranscriptEvent::finalized("Hello"));
    tokio::time::sleep(Duration::from_millis(2_100)).await;
    let snapshot = call.handle.snapshot().await.unwrap();
    assert!(!snapshot.awaiting_response);
    assert_eq!(snapshot.history.len(), 1);

    assert_eq!(next_spoken(&mut call.frames).await, "Sorry for the wait.");
    let snapshot = wait_for(&call.handle, |s| s.history.len() == 2).await;
    assert_eq!(snapshot.history[1], Turn::agent("Sorry for the wait."));
}

#[tokio::test(start_paused = true)]
async fn test_frequent_audio_keeps_silence_timer_from_firing() {
    let mocks = Mocks::new(MockReasoning::replying("unused"));
    let call = greeted(&mocks, policy()).await;

    for _ in 0..10 {
        call.handle.audio(vec![0x7f; 160]);
        tokio::time::sleep(Duration::from_secs(3)).await;
    }
    let snapshot = call.handle.snapshot().await.unwrap();
    assert!(!snapshot.idle);
    assert_eq!(snapshot.reengagements, 0);
    assert_eq!(snapshot.frames_forwarded, 10);

    tokio::time::sleep(Duration::from_secs(5)).await;
    let snapshot = call.handle.snapshot().await.unwrap();
    assert!(snapshot.idle);
    assert_eq!(snapshot.reengagements, 1);

    // Audio clears the idle flag again.
    call.handle.audio(vec![0x7f; 160]);
    let snapshot = call.handle.snapshot().await.unwrap();
    assert!(!snapshot.idle);
}

#[tokio::test(start_paused = true)]
async fn test_silence_while_awaiting_response_skips_reengagement() {
    let mocks = Mocks::new(MockReasoning::new(Behavior::Stall));
    let call = greeted(&mocks, policy()).await;

    call.handle.transcript(TranscriptEvent::finalized("Hold on"));
    tokio::time::sleep(Duration::from_secs(5)).await;

    let snapshot = call.handle.snapshot().await.unwrap();
    assert!(snapshot.awaiting_response);
    assert!(snapshot.idle);
    assert_eq!(snapshot.reengagements, 0);
}

#[tokio::test]
async fn test_teardown_is_idempotent_and_ignores_late_events() {
    let mocks = Mocks::new(MockReasoning::replying("Sure."));
    let mut call = greeted(&mocks, policy()).await;
    open_bridge(&call).await;

    call.handle.stop();
    call.handle.stop();
    tokio::time::timeout(Duration::from_secs(5), call.handle.closed())
        .await
        .expect("session should close");
    call.handle.stop();

    assert!(call.handle.is_closed());
    assert!(call.handle.snapshot().await.is_none());
    assert_eq!(call.released.load(Ordering::SeqCst), 1);
    assert_eq!(mocks.stt.finished.load(Ordering::SeqCst), 1);

    mocks.stt.emit(TranscriptEvent::finalized("are you still there?"));
    call.handle.transcript(TranscriptEvent::finalized("hello?"));
    call.handle.audio(vec![1; 160]);
    settle().await;

    assert_eq!(mocks.reasoning.calls(), 0);
    assert_eq!(mocks.stt.frame_count(), 1);
    assert!(call.frames.recv().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_stalled_transcription_connect_does_not_delay_stop() {
    let mocks = Mocks::new(MockReasoning::replying("unused"));
    *mocks.stt.stall_open.lock().unwrap() = Some(Duration::from_secs(5));
    let call = greeted(&mocks, policy()).await;

    let began = tokio::time::Instant::now();
    for _ in 0..50 {
        call.handle.audio(vec![0xff; 160]);
    }
    call.handle.stop();
    tokio::time::timeout(Duration::from_secs(10), call.handle.closed())
        .await
        .expect("session should close");

    assert!(began.elapsed() < Duration::from_secs(1));
    assert_eq!(call.released.load(Ordering::SeqCst), 1);
    assert!(mocks.stt.attempts.load(Ordering::SeqCst) <= 1);
    assert_eq!(mocks.stt.opened.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_turn_timer_fires_while_transcription_is_down() {
    let mocks = Mocks::new(MockReasoning::new(Behavior::Stall));
    *mocks.stt.stall_open.lock().unwrap() = Some(Duration::from_secs(5));
    let call = greeted(&mocks, policy()).await;

    call.handle.transcript(TranscriptEvent::finalized("Are you there?"));
    assert!(call.handle.snapshot().await.unwrap().awaiting_response);

    // Thirty seconds of telephony audio while every connect stalls.
    for _ in 0..30 {
        for _ in 0..50 {
            call.handle.audio(vec![0xff; 160]);
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    let snapshot = call.handle.snapshot().await.unwrap();
    assert!(!snapshot.awaiting_response);
    assert_eq!(snapshot.frames_forwarded, 0);
    assert!(snapshot.frames_dropped > 0);
    // Failed connects back off instead of retrying on every frame.
    assert!(mocks.stt.attempts.load(Ordering::SeqCst) <= 7);
}

#[tokio::test]
async fn test_teardown_aborts_in_flight_response() {
    let mocks = Mocks::new(MockReasoning::new(Behavior::Stall));
    let mut call = greeted(&mocks, policy()).await;

    call.handle.transcript(TranscriptEvent::finalized("Anyone?"));
    wait_for(&call.handle, |s| s.awaiting_response).await;

    call.handle.stop();
    tokio::time::timeout(Duration::from_secs(5), call.handle.closed())
        .await
        .expect("stalled response must not block teardown");
    assert!(call.frames.recv().await.is_none());
    assert_eq!(call.released.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_dropping_every_handle_tears_session_down() {
    let mocks = Mocks::new(MockReasoning::replying("unused"));
    let mut call = greeted(&mocks, policy()).await;
    let released = call.released.clone();

    drop(call.handle);

    assert!(
        tokio::time::timeout(Duration::from_secs(5), call.frames.recv())
            .await
            .expect("output should close")
            .is_none()
    );
    assert_eq!(released.load(Ordering::SeqCst), 1);
}
