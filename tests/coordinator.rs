//! Turn coordinator behavior under virtual time

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use tokio::sync::mpsc;
use voicebridge::session::{APOLOGY, ServerMessage, Turn, TurnCoordinator};
use voicebridge::{Collaborators, Result, SpeechRecognizer, Stage};

mod common;
use common::{
    Fakes, Script, assert_quiet, next, start, test_pool, test_settings, utterance_chunk,
};

const fn kind(msg: &ServerMessage) -> &'static str {
    msg.kind()
}

#[tokio::test(start_paused = true)]
async fn chunks_debounce_into_one_recognition() {
    let fakes = Fakes::new();
    let (handle, mut rx) = start(&fakes);

    for fill in 1..=3 {
        handle.push_audio(vec![fill; 10]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    // 200ms after the last chunk; wait until just short of the quiet interval
    tokio::time::sleep(Duration::from_millis(700)).await;
    assert!(fakes.recognizer.calls().is_empty());

    tokio::time::sleep(Duration::from_millis(200)).await;
    let calls = fakes.recognizer.calls();
    assert_eq!(calls.len(), 1);
    let mut expected = vec![1; 10];
    expected.extend(vec![2; 10]);
    expected.extend(vec![3; 10]);
    assert_eq!(calls[0], expected);

    assert_eq!(
        next(&mut rx).await,
        ServerMessage::AsrResult {
            text: "hello there".to_string()
        }
    );
}

#[tokio::test(start_paused = true)]
async fn small_utterance_never_recognized() {
    let fakes = Fakes::new();
    let (handle, mut rx) = start(&fakes);

    handle.push_audio(vec![0; 100]).await.unwrap();
    assert_quiet(&mut rx, Duration::from_secs(30)).await;

    assert!(fakes.recognizer.calls().is_empty());
    assert_eq!(handle.stage(), Stage::Idle);
}

#[tokio::test(start_paused = true)]
async fn small_audio_completes_once_more_arrives() {
    let fakes = Fakes::new();
    let (handle, mut rx) = start(&fakes);

    handle.push_audio(vec![1; 100]).await.unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(fakes.recognizer.calls().is_empty());

    handle.push_audio(vec![2; 100]).await.unwrap();
    handle.push_audio(vec![3; 100]).await.unwrap();
    assert_eq!(kind(&next(&mut rx).await), "asr_result");

    let calls = fakes.recognizer.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].len(), 300);
}

#[tokio::test(start_paused = true)]
async fn successful_turn_delivers_in_order() {
    let fakes = Fakes::new();
    let (handle, mut rx) = start(&fakes);

    handle.push_audio(utterance_chunk(7)).await.unwrap();

    assert_eq!(
        next(&mut rx).await,
        ServerMessage::AsrResult {
            text: "hello there".to_string()
        }
    );
    assert_eq!(
        next(&mut rx).await,
        ServerMessage::LlmResponse {
            text: "general kenobi".to_string()
        }
    );
    assert_eq!(
        next(&mut rx).await,
        ServerMessage::tts_audio(b"ID3-fake-mp3", "general kenobi")
    );

    assert_quiet(&mut rx, Duration::from_secs(5)).await;
    assert_eq!(handle.stage(), Stage::Idle);
    assert_eq!(fakes.synthesizer.calls(), vec!["general kenobi".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn history_feeds_next_turn() {
    let fakes = Fakes::new();
    let (handle, mut rx) = start(&fakes);

    handle.push_audio(utterance_chunk(1)).await.unwrap();
    for _ in 0..3 {
        next(&mut rx).await;
    }
    fakes.recognizer.set(Script::ok("and then?".to_string()));
    handle.push_audio(utterance_chunk(2)).await.unwrap();
    for _ in 0..3 {
        next(&mut rx).await;
    }

    let calls = fakes.generator.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls[0].1.is_empty());
    assert_eq!(calls[1].0, "and then?");
    assert_eq!(
        calls[1].1,
        vec![Turn::user("hello there"), Turn::assistant("general kenobi")]
    );
}

#[tokio::test(start_paused = true)]
async fn interrupt_during_recognition_abandons_turn() {
    let fakes = Fakes::new();
    fakes
        .recognizer
        .set(Script::ok("too late".to_string()).after(Duration::from_secs(3)));
    let (handle, mut rx) = start(&fakes);

    handle.push_audio(utterance_chunk(1)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(handle.stage(), Stage::Recognizing);

    handle.interrupt().await.unwrap();
    assert_eq!(kind(&next(&mut rx).await), "interruption_confirmed");

    assert_quiet(&mut rx, Duration::from_secs(30)).await;
    assert_eq!(fakes.recognizer.calls().len(), 1);
    assert!(fakes.generator.calls().is_empty());
    assert!(fakes.synthesizer.calls().is_empty());
    assert_eq!(handle.stage(), Stage::Idle);
}

#[tokio::test(start_paused = true)]
async fn interrupt_during_synthesis_suppresses_audio() {
    let fakes = Fakes::new();
    fakes
        .synthesizer
        .set(Script::ok(b"late audio".to_vec()).after(Duration::from_secs(5)));
    let (handle, mut rx) = start(&fakes);

    handle.push_audio(utterance_chunk(1)).await.unwrap();
    assert_eq!(kind(&next(&mut rx).await), "asr_result");
    assert_eq!(kind(&next(&mut rx).await), "llm_response");
    assert_eq!(handle.stage(), Stage::Synthesizing);

    handle.interrupt().await.unwrap();
    assert!(matches!(
        next(&mut rx).await,
        ServerMessage::InterruptionConfirmed { .. }
    ));

    assert_quiet(&mut rx, Duration::from_secs(30)).await;
    assert_eq!(fakes.synthesizer.calls().len(), 1);
    assert_eq!(handle.stage(), Stage::Idle);
}

#[tokio::test(start_paused = true)]
async fn interrupt_drops_buffered_audio() {
    let fakes = Fakes::new();
    let (handle, mut rx) = start(&fakes);

    handle.push_audio(utterance_chunk(1)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    handle.interrupt().await.unwrap();

    assert!(matches!(
        next(&mut rx).await,
        ServerMessage::InterruptionConfirmed { .. }
    ));
    assert_quiet(&mut rx, Duration::from_secs(10)).await;
    assert!(fakes.recognizer.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn interrupt_while_idle_still_confirms() {
    let fakes = Fakes::new();
    let (handle, mut rx) = start(&fakes);

    handle.interrupt().await.unwrap();
    handle.interrupt().await.unwrap();

    for _ in 0..2 {
        assert_eq!(kind(&next(&mut rx).await), "interruption_confirmed");
    }
}

#[tokio::test(start_paused = true)]
async fn interrupt_during_generation_skips_reply() {
    let fakes = Fakes::new();
    fakes
        .generator
        .set(Script::ok("too late".to_string()).after(Duration::from_secs(3)));
    let (handle, mut rx) = start(&fakes);

    handle.push_audio(utterance_chunk(1)).await.unwrap();
    assert_eq!(kind(&next(&mut rx).await), "asr_result");
    handle.interrupt().await.unwrap();
    assert_eq!(kind(&next(&mut rx).await), "interruption_confirmed");

    assert_quiet(&mut rx, Duration::from_secs(20)).await;
    assert!(fakes.synthesizer.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn generation_failure_apologizes_aloud() {
    let fakes = Fakes::new();
    fakes.generator.set(Script::fail("503 from upstream"));
    let (handle, mut rx) = start(&fakes);

    handle.push_audio(utterance_chunk(1)).await.unwrap();
    assert_eq!(kind(&next(&mut rx).await), "asr_result");
    assert_eq!(
        next(&mut rx).await,
        ServerMessage::LlmResponse {
            text: APOLOGY.to_string()
        }
    );
    let ServerMessage::TtsAudio { audio, text } = next(&mut rx).await else {
        panic!("expected tts_audio");
    };
    assert!(!audio.is_empty());
    assert_eq!(text, APOLOGY);
    assert_eq!(fakes.synthesizer.calls(), vec![APOLOGY.to_string()]);
}

#[tokio::test(start_paused = true)]
async fn failed_reply_stays_out_of_history() {
    let fakes = Fakes::new();
    fakes.generator.set(Script::fail("boom"));
    let (handle, mut rx) = start(&fakes);

    handle.push_audio(utterance_chunk(1)).await.unwrap();
    for _ in 0..3 {
        next(&mut rx).await;
    }
    handle.push_audio(utterance_chunk(2)).await.unwrap();
    for _ in 0..3 {
        next(&mut rx).await;
    }

    let calls = fakes.generator.calls();
    assert_eq!(calls[1].1, vec![Turn::user("hello there")]);
}

#[tokio::test(start_paused = true)]
async fn generation_timeout_apologizes() {
    let fakes = Fakes::new();
    fakes
        .generator
        .set(Script::ok("eventually".to_string()).after(Duration::from_secs(60)));
    let (handle, mut rx) = start(&fakes);

    handle.push_audio(utterance_chunk(1)).await.unwrap();
    assert_eq!(kind(&next(&mut rx).await), "asr_result");

    let started = tokio::time::Instant::now();
    assert_eq!(
        next(&mut rx).await,
        ServerMessage::LlmResponse {
            text: APOLOGY.to_string()
        }
    );
    assert!(started.elapsed() <= Duration::from_secs(16));
    assert_eq!(kind(&next(&mut rx).await), "tts_audio");
}

#[tokio::test(start_paused = true)]
async fn synthesis_failure_sends_fallback_tone() {
    let fakes = Fakes::new();
    fakes.synthesizer.set(Script::fail("quota exceeded"));
    let (handle, mut rx) = start(&fakes);

    handle.push_audio(utterance_chunk(1)).await.unwrap();
    next(&mut rx).await;
    next(&mut rx).await;

    let ServerMessage::TtsAudio { audio, text } = next(&mut rx).await else {
        panic!("expected tts_audio");
    };
    assert_eq!(text, "general kenobi");
    let wav = base64::engine::general_purpose::STANDARD
        .decode(audio)
        .unwrap();
    assert_eq!(&wav[..4], b"RIFF");
}

#[tokio::test(start_paused = true)]
async fn synthesis_timeout_sends_fallback_tone() {
    let fakes = Fakes::new();
    fakes
        .synthesizer
        .set(Script::ok(b"never".to_vec()).after(Duration::from_secs(60)));
    let (handle, mut rx) = start(&fakes);

    handle.push_audio(utterance_chunk(1)).await.unwrap();
    assert_eq!(kind(&next(&mut rx).await), "asr_result");
    assert_eq!(kind(&next(&mut rx).await), "llm_response");

    let started = tokio::time::Instant::now();
    let ServerMessage::TtsAudio { audio, text } = next(&mut rx).await else {
        panic!("expected tts_audio");
    };
    assert!(started.elapsed() <= Duration::from_secs(11));
    assert_eq!(text, "general kenobi");
    let wav = base64::engine::general_purpose::STANDARD
        .decode(audio)
        .unwrap();
    assert_eq!(&wav[..4], b"RIFF");
    assert_quiet(&mut rx, Duration::from_secs(5)).await;
    assert_eq!(handle.stage(), Stage::Idle);
}

#[tokio::test(start_paused = true)]
async fn recognition_timeout_reports_asr_error() {
    let fakes = Fakes::new();
    fakes
        .recognizer
        .set(Script::ok("never".to_string()).after(Duration::from_secs(60)));
    let (handle, mut rx) = start(&fakes);

    handle.push_audio(utterance_chunk(1)).await.unwrap();
    let started = tokio::time::Instant::now();
    assert_eq!(kind(&next(&mut rx).await), "asr_error");
    assert!(started.elapsed() <= Duration::from_secs(10));

    assert_quiet(&mut rx, Duration::from_secs(5)).await;
    assert!(fakes.generator.calls().is_empty());
    assert_eq!(handle.stage(), Stage::Idle);
}

#[tokio::test(start_paused = true)]
async fn recognition_failure_reports_and_stops() {
    let fakes = Fakes::new();
    fakes.recognizer.set(Script::fail("speech quality error"));
    let (handle, mut rx) = start(&fakes);

    handle.push_audio(utterance_chunk(1)).await.unwrap();
    assert_eq!(kind(&next(&mut rx).await), "asr_error");

    assert_quiet(&mut rx, Duration::from_secs(5)).await;
    assert!(fakes.generator.calls().is_empty());
    assert_eq!(handle.stage(), Stage::Idle);
}

#[tokio::test(start_paused = true)]
async fn blank_transcript_is_a_recognition_failure() {
    let fakes = Fakes::new();
    fakes.recognizer.set(Script::ok("   ".to_string()));
    let (handle, mut rx) = start(&fakes);

    handle.push_audio(utterance_chunk(1)).await.unwrap();
    assert_eq!(kind(&next(&mut rx).await), "asr_error");

    assert_quiet(&mut rx, Duration::from_secs(5)).await;
    assert!(fakes.generator.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn one_pipeline_at_a_time() {
    let fakes = Fakes::new();
    fakes
        .recognizer
        .set(Script::ok("first".to_string()).after(Duration::from_secs(3)));
    let (handle, mut rx) = start(&fakes);

    handle.push_audio(utterance_chunk(1)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(handle.stage(), Stage::Recognizing);

    // second utterance completes its quiet period while the first is live
    handle.push_audio(utterance_chunk(2)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(2000)).await;
    assert_eq!(fakes.recognizer.calls().len(), 1);

    for _ in 0..3 {
        next(&mut rx).await;
    }
    assert_eq!(kind(&next(&mut rx).await), "asr_result");

    let calls = fakes.recognizer.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1], utterance_chunk(2));
}

#[tokio::test(start_paused = true)]
async fn text_input_skips_recognition() {
    let fakes = Fakes::new();
    let (handle, mut rx) = start(&fakes);

    handle.submit_text("  what's up  ").await.unwrap();

    assert_eq!(kind(&next(&mut rx).await), "llm_response");
    assert_eq!(kind(&next(&mut rx).await), "tts_audio");
    assert!(fakes.recognizer.calls().is_empty());
    assert_eq!(fakes.generator.calls()[0].0, "what's up");
}

#[tokio::test(start_paused = true)]
async fn text_while_busy_is_rejected() {
    let fakes = Fakes::new();
    fakes
        .generator
        .set(Script::ok("slow".to_string()).after(Duration::from_secs(2)));
    let (handle, mut rx) = start(&fakes);

    handle.submit_text("first").await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    handle.submit_text("second").await.unwrap();

    assert!(matches!(next(&mut rx).await, ServerMessage::Error { .. }));
    assert_eq!(kind(&next(&mut rx).await), "llm_response");
    assert_eq!(fakes.generator.calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn reset_clears_history() {
    let fakes = Fakes::new();
    let (handle, mut rx) = start(&fakes);

    handle.submit_text("remember this").await.unwrap();
    next(&mut rx).await;
    next(&mut rx).await;

    handle.reset().await.unwrap();
    assert_eq!(kind(&next(&mut rx).await), "history_cleared");

    handle.submit_text("what did I say?").await.unwrap();
    next(&mut rx).await;
    assert!(fakes.generator.calls()[1].1.is_empty());
}

#[tokio::test(start_paused = true)]
async fn disconnect_mid_pipeline_tears_down() {
    let fakes = Fakes::new();
    fakes
        .generator
        .set(Script::ok("unheard".to_string()).after(Duration::from_secs(5)));
    let (handle, mut rx) = start(&fakes);

    handle.push_audio(utterance_chunk(1)).await.unwrap();
    assert_eq!(kind(&next(&mut rx).await), "asr_result");

    handle.disconnect();
    handle.disconnect();

    let rest = tokio::time::timeout(Duration::from_secs(30), rx.recv())
        .await
        .unwrap();
    assert!(rest.is_none());
    assert!(handle.is_closed());
    assert!(handle.push_audio(vec![0; 10]).await.is_err());
    assert!(fakes.synthesizer.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn stage_transitions_are_observable() {
    let fakes = Fakes::new();
    fakes
        .recognizer
        .set(Script::ok("hi".to_string()).after(Duration::from_secs(1)));
    fakes
        .generator
        .set(Script::ok("hello".to_string()).after(Duration::from_secs(1)));
    fakes
        .synthesizer
        .set(Script::ok(vec![1]).after(Duration::from_secs(1)));
    let (handle, mut rx) = start(&fakes);
    let mut stages = handle.watch_stage();

    handle.push_audio(utterance_chunk(1)).await.unwrap();

    let mut seen = Vec::new();
    while seen.last() != Some(&Stage::Idle) {
        stages.changed().await.unwrap();
        seen.push(*stages.borrow_and_update());
    }
    // delivery and completion can land in the same wakeup
    assert_eq!(
        &seen[..3],
        &[Stage::Recognizing, Stage::Generating, Stage::Synthesizing]
    );
    assert_eq!(seen.last(), Some(&Stage::Idle));
    for _ in 0..3 {
        next(&mut rx).await;
    }
}

/// Panics on its first call, then recognizes normally
struct PanicsOnce {
    panicked: AtomicBool,
}

#[async_trait]
impl SpeechRecognizer for PanicsOnce {
    async fn recognize(&self, _audio: &[u8]) -> Result<String> {
        assert!(
            self.panicked.swap(true, Ordering::SeqCst),
            "recognizer blew up"
        );
        Ok("second try".to_string())
    }
}

#[tokio::test(start_paused = true)]
async fn panicking_collaborator_releases_the_turn() {
    let fakes = Fakes::new();
    let collaborators = Collaborators {
        recognizer: Arc::new(PanicsOnce {
            panicked: AtomicBool::new(false),
        }),
        ..fakes.collaborators()
    };
    let (tx, mut rx) = mpsc::channel(64);
    let handle = TurnCoordinator::spawn("panics", test_settings(), collaborators, test_pool(), tx);

    handle.push_audio(utterance_chunk(1)).await.unwrap();
    assert_eq!(kind(&next(&mut rx).await), "error");
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(handle.stage(), Stage::Idle);

    handle.push_audio(utterance_chunk(2)).await.unwrap();
    assert_eq!(
        next(&mut rx).await,
        ServerMessage::AsrResult {
            text: "second try".to_string()
        }
    );
    assert_eq!(kind(&next(&mut rx).await), "llm_response");
    assert_eq!(kind(&next(&mut rx).await), "tts_audio");
}
