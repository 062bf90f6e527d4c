//! Session state machine integration tests
//!
//! Drives a full session through fake microphones, codec, transport and
//! output.

use std::sync::Arc;
use std::time::Duration;

use beacon_voice::voice::{DetectorEvent, PlaybackEvent, SpeechSegment, UnsupportedBackend};
use beacon_voice::{
    ControlCommand, Mode, ModeCause, OutboundEvent, RemoteEvent, SessionEvent, SessionState,
};
use tokio::time::Instant;

mod common;
use common::{Harness, StaticClipLoader, loud, quiet, test_config};

fn remote(event: RemoteEvent) -> SessionEvent {
    SessionEvent::Remote(event)
}

fn transcript(text: &str) -> SessionEvent {
    remote(RemoteEvent::TranscriptReady {
        text: text.to_string(),
    })
}

fn response(audio_ref: Option<&str>, text: Option<&str>) -> SessionEvent {
    remote(RemoteEvent::Response {
        audio_ref: audio_ref.map(str::to_string),
        text: text.map(str::to_string),
    })
}

fn segment() -> SessionEvent {
    SessionEvent::Detector(DetectorEvent::SpeechEnd(SpeechSegment {
        samples: vec![0.1; 1600],
        sample_rate: 16_000,
    }))
}

fn duplex_config() -> beacon_voice::Config {
    let mut config = test_config();
    config.voice.mode = Mode::Duplex;
    config
}

/// Drive a command session to `Thinking` with "play music"
fn to_thinking(h: &mut Harness) {
    h.session.activate().unwrap();
    h.session.handle(SessionEvent::Detector(DetectorEvent::SpeechStart));
    h.session.handle(segment());
    h.session.handle(transcript("computer play music"));
    assert_eq!(h.state(), SessionState::Thinking);
}

/// One 80 ms duplex capture frame at 24 kHz
fn duplex_frame() -> Vec<f32> {
    vec![0.1; 1920]
}

#[tokio::test]
async fn test_wake_word_command_end_to_end() {
    let mut h = Harness::new(&test_config());

    h.session.activate().unwrap();
    assert_eq!(h.state(), SessionState::Listening);
    assert!(h.command_mic.is_open());

    h.command_mic.push(&quiet(2));
    h.command_mic.push(&loud(4));
    h.pump();
    assert_eq!(h.state(), SessionState::Capturing);

    h.command_mic.push(&quiet(3));
    h.pump();
    assert_eq!(h.state(), SessionState::Processing);
    assert!(h.session.detector_paused());

    let uploads = h.outbound.binary();
    assert_eq!(uploads.len(), 1);
    assert_eq!(&uploads[0][..4], b"RIFF");

    h.session
        .handle(transcript("Hey computer turn on the lights"));
    assert_eq!(h.state(), SessionState::Thinking);
    assert_eq!(
        h.outbound.events(),
        vec![
            OutboundEvent::SessionStart {
                mode: Mode::Command
            },
            OutboundEvent::Command {
                text: "turn on the lights".to_string()
            },
        ]
    );
}

#[tokio::test]
async fn test_wake_word_prefix_does_not_match() {
    let mut h = Harness::new(&test_config());

    h.session.activate().unwrap();
    h.session.handle(SessionEvent::Detector(DetectorEvent::SpeechStart));
    h.session.handle(segment());
    assert_eq!(h.state(), SessionState::Processing);

    h.session.handle(transcript("hey computerize this"));

    assert_eq!(h.state(), SessionState::Listening);
    assert!(!h.session.detector_paused());
    assert!(
        !h.outbound
            .events()
            .iter()
            .any(|e| matches!(e, OutboundEvent::Command { .. }))
    );
}

#[tokio::test]
async fn test_wake_word_alone_returns_to_listening() {
    let mut h = Harness::new(&test_config());

    h.session.activate().unwrap();
    h.session.handle(SessionEvent::Detector(DetectorEvent::SpeechStart));
    h.session.handle(segment());
    h.session.handle(transcript("Computer."));

    assert_eq!(h.state(), SessionState::Listening);
}

#[tokio::test]
async fn test_short_utterance_misfires_back_to_listening() {
    let mut h = Harness::new(&test_config());

    h.session.activate().unwrap();
    h.command_mic.push(&loud(1));
    h.pump();
    assert_eq!(h.state(), SessionState::Capturing);

    h.command_mic.push(&quiet(3));
    h.pump();
    assert_eq!(h.state(), SessionState::Listening);
    assert!(h.outbound.binary().is_empty());
}

#[tokio::test]
async fn test_barge_in_interrupts_queue_once() {
    let clips = StaticClipLoader::default()
        .with("a.wav", vec![0.2; 2400])
        .with("b.wav", vec![0.2; 2400])
        .with("c.wav", vec![0.2; 2400]);
    let mut h = Harness::with_clips(&test_config(), clips);
    to_thinking(&mut h);

    h.session.handle(response(Some("a.wav"), Some("Playing music")));
    h.session.handle(response(Some("b.wav"), None));
    h.session.handle(response(Some("c.wav"), None));
    assert_eq!(h.state(), SessionState::Speaking);
    assert_eq!(h.session.playback_queued(), 2);

    h.settle().await;
    assert_eq!(h.timeline.active_voices(), 1);

    // Onset reaches the session even though the detector is paused for playback
    h.command_mic.push(&loud(2));

    let mut drained = 0;
    while let Ok(event) = h.events.try_recv() {
        if matches!(event, SessionEvent::Playback(PlaybackEvent::Drained)) {
            drained += 1;
        }
        h.session.handle(event);
    }

    assert_eq!(drained, 1);
    assert_eq!(h.state(), SessionState::Capturing);
    assert_eq!(h.session.playback_queued(), 0);
    assert!(!h.session.playback_active());
    assert_eq!(h.timeline.active_voices(), 0);

    // The interrupted utterance carries on to upload
    h.command_mic.push(&loud(2));
    h.command_mic.push(&quiet(3));
    h.pump();
    assert_eq!(h.state(), SessionState::Processing);
    assert_eq!(h.outbound.binary().len(), 2);
}

#[tokio::test]
async fn test_no_barge_in_keeps_detector_closed_while_speaking() {
    let mut config = test_config();
    config.voice.barge_in = false;
    let clips = StaticClipLoader::default().with("a.wav", vec![0.2; 2400]);
    let mut h = Harness::with_clips(&config, clips);
    to_thinking(&mut h);

    h.session.handle(response(Some("a.wav"), None));
    h.settle().await;
    assert_eq!(h.state(), SessionState::Speaking);

    h.command_mic.push(&loud(4));
    h.pump();
    assert_eq!(h.state(), SessionState::Speaking);
}

#[tokio::test]
async fn test_playback_drain_returns_to_listening() {
    let clips = StaticClipLoader::default()
        .with("a.wav", vec![0.2; 480])
        .with("b.wav", vec![0.2; 480]);
    let mut h = Harness::with_clips(&test_config(), clips);
    to_thinking(&mut h);

    h.session.handle(response(Some("a.wav"), None));
    h.session.handle(response(Some("b.wav"), None));
    h.settle().await;
    assert_eq!(h.state(), SessionState::Speaking);

    // First clip ends, second starts loading
    h.render(480);
    h.settle().await;
    assert_eq!(h.state(), SessionState::Speaking);
    assert_eq!(h.timeline.active_voices(), 1);

    h.render(480);
    h.settle().await;
    assert_eq!(h.state(), SessionState::Listening);
    assert!(!h.session.detector_paused());
}

#[tokio::test]
async fn test_drain_behind_new_response_keeps_speaking() {
    let clips = StaticClipLoader::default()
        .with("a.wav", vec![0.2; 480])
        .with("b.wav", vec![0.2; 480]);
    let mut h = Harness::with_clips(&test_config(), clips);
    to_thinking(&mut h);

    h.session.handle(response(Some("a.wav"), None));
    h.settle().await;
    assert_eq!(h.timeline.active_voices(), 1);

    // First clip ends; its drain is queued behind the next response
    h.render(480);
    let finished = h.events.try_recv().unwrap();
    assert!(matches!(
        finished,
        SessionEvent::Playback(PlaybackEvent::VoiceFinished(_))
    ));
    h.session.handle(finished);
    h.session.handle(response(Some("b.wav"), None));
    h.pump();

    assert_eq!(h.state(), SessionState::Speaking);
    assert!(h.session.playback_active());
    assert!(h.session.detector_paused());

    h.settle().await;
    assert_eq!(h.timeline.active_voices(), 1);
    h.render(480);
    h.settle().await;
    assert_eq!(h.state(), SessionState::Listening);
    assert!(!h.session.detector_paused());
}

#[tokio::test]
async fn test_failed_clip_is_skipped() {
    let clips = StaticClipLoader::default().with("b.wav", vec![0.2; 480]);
    let mut h = Harness::with_clips(&test_config(), clips);
    to_thinking(&mut h);

    h.session.handle(response(Some("missing.wav"), None));
    h.session.handle(response(Some("b.wav"), None));
    h.settle().await;

    assert_eq!(h.state(), SessionState::Speaking);
    assert_eq!(h.timeline.active_voices(), 1);
}

#[tokio::test]
async fn test_text_only_response_returns_to_listening() {
    let mut h = Harness::new(&test_config());
    to_thinking(&mut h);

    h.session.handle(response(None, Some("It is sunny")));

    assert_eq!(h.state(), SessionState::Listening);
    assert!(h.notifier.statuses().contains(&"It is sunny".to_string()));
}

#[tokio::test]
async fn test_response_done_without_audio_returns_to_listening() {
    let mut h = Harness::new(&test_config());
    to_thinking(&mut h);

    h.session.handle(remote(RemoteEvent::ThinkingStarted));
    assert_eq!(h.state(), SessionState::Thinking);

    h.session.handle(remote(RemoteEvent::ResponseDone));
    assert_eq!(h.state(), SessionState::Listening);
}

#[tokio::test]
async fn test_disabled_playback_treats_audio_as_text() {
    let clips = StaticClipLoader::default().with("a.wav", vec![0.2; 480]);
    let mut h = Harness::with_clips(&test_config(), clips);
    h.session
        .handle(SessionEvent::Control(ControlCommand::SetPlayback(false)));
    to_thinking(&mut h);

    h.session.handle(response(Some("a.wav"), Some("Done")));
    h.settle().await;

    assert_eq!(h.state(), SessionState::Listening);
    assert_eq!(h.timeline.active_voices(), 0);
}

#[tokio::test]
async fn test_speech_start_ignored_outside_listening_and_speaking() {
    let mut h = Harness::new(&test_config());

    h.session.activate().unwrap();
    h.session.handle(SessionEvent::Detector(DetectorEvent::SpeechStart));
    h.session.handle(segment());
    assert_eq!(h.state(), SessionState::Processing);

    h.session.handle(SessionEvent::Detector(DetectorEvent::SpeechStart));
    assert_eq!(h.state(), SessionState::Processing);

    h.session.handle(transcript("computer what time is it"));
    assert_eq!(h.state(), SessionState::Thinking);

    h.session.handle(SessionEvent::Detector(DetectorEvent::SpeechStart));
    assert_eq!(h.state(), SessionState::Thinking);
}

#[tokio::test]
async fn test_transcript_error_and_remote_error_recover() {
    let mut h = Harness::new(&test_config());

    h.session.activate().unwrap();
    h.session.handle(SessionEvent::Detector(DetectorEvent::SpeechStart));
    h.session.handle(segment());
    h.session.handle(remote(RemoteEvent::TranscriptError {
        reason: "timeout".to_string(),
    }));
    assert_eq!(h.state(), SessionState::Listening);

    to_thinking_from_listening(&mut h);
    h.session.handle(remote(RemoteEvent::Error {
        reason: "model overloaded".to_string(),
    }));
    assert_eq!(h.state(), SessionState::Listening);
    assert!(
        h.notifier
            .statuses()
            .iter()
            .any(|s| s.contains("model overloaded"))
    );
}

fn to_thinking_from_listening(h: &mut Harness) {
    h.session.handle(SessionEvent::Detector(DetectorEvent::SpeechStart));
    h.session.handle(segment());
    h.session.handle(transcript("computer lights off"));
    assert_eq!(h.state(), SessionState::Thinking);
}

#[tokio::test]
async fn test_deactivate_is_idempotent() {
    let mut h = Harness::new(&test_config());

    h.session.deactivate();
    assert_eq!(h.state(), SessionState::Idle);
    assert!(h.outbound.events().is_empty());
    assert!(h.notifier.states().is_empty());

    h.session.activate().unwrap();
    h.session.deactivate();
    h.session.deactivate();

    assert_eq!(h.state(), SessionState::Idle);
    assert!(!h.command_mic.is_open());
    assert!(!h.session.detector_running());
    let cancels = h
        .outbound
        .events()
        .into_iter()
        .filter(|e| *e == OutboundEvent::SessionCancel)
        .count();
    assert_eq!(cancels, 1);
}

#[tokio::test]
async fn test_activate_twice_is_noop() {
    let mut h = Harness::new(&test_config());

    h.session.activate().unwrap();
    h.session.activate().unwrap();

    assert_eq!(h.state(), SessionState::Listening);
    assert_eq!(h.outbound.events().len(), 1);
}

#[tokio::test]
async fn test_deactivate_mid_playback_stops_everything() {
    let clips = StaticClipLoader::default().with("a.wav", vec![0.2; 2400]);
    let mut h = Harness::with_clips(&test_config(), clips);
    to_thinking(&mut h);
    h.session.handle(response(Some("a.wav"), None));
    h.settle().await;

    h.session.deactivate();
    h.settle().await;

    assert_eq!(h.state(), SessionState::Idle);
    assert_eq!(h.timeline.active_voices(), 0);
    assert!(!h.session.playback_active());
}

#[test]
fn test_permission_denied_enters_error_then_reverts() {
    let mut h = Harness::new(&test_config());
    h.command_mic.deny();

    let result = h.session.activate();

    assert!(matches!(result, Err(beacon_voice::Error::PermissionDenied(_))));
    assert_eq!(h.state(), SessionState::Error);
    assert!(!h.session.snapshot().active);
    assert!(
        h.notifier
            .statuses()
            .iter()
            .any(|s| s.to_lowercase().contains("microphone"))
    );

    let deadline = h.session.next_deadline().unwrap();
    h.session.on_deadline(deadline - Duration::from_secs(1));
    assert_eq!(h.state(), SessionState::Error);

    h.session.on_deadline(deadline);
    assert_eq!(h.state(), SessionState::Idle);
    assert!(h.session.next_deadline().is_none());
}

#[test]
fn test_deactivate_clears_pending_error_revert() {
    let mut h = Harness::new(&test_config());
    h.command_mic.deny();
    let _ = h.session.activate();

    h.session.deactivate();

    assert_eq!(h.state(), SessionState::Idle);
    assert!(h.session.next_deadline().is_none());
    h.session.on_deadline(Instant::now() + Duration::from_secs(60));
    assert_eq!(h.state(), SessionState::Idle);
}

#[tokio::test]
async fn test_missing_codec_falls_back_to_command_mode() {
    let mut h = Harness::with_codec(&duplex_config(), Arc::new(UnsupportedBackend));

    h.session.activate().unwrap();

    assert_eq!(h.state(), SessionState::Listening);
    assert_eq!(h.session.mode(), Mode::Command);
    assert!(h.session.detector_running());
    assert!(!h.session.streamer_running());
    assert!(!h.duplex_mic.is_open());
    assert_eq!(
        h.outbound.events(),
        vec![OutboundEvent::SessionStart {
            mode: Mode::Command
        }]
    );
}

#[tokio::test]
async fn test_duplex_frames_wait_for_handshake() {
    let mut h = Harness::new(&duplex_config());

    h.session.activate().unwrap();
    assert_eq!(h.state(), SessionState::DuplexActive);
    assert!(h.duplex_mic.is_open());
    assert!(!h.command_mic.is_open());

    h.duplex_mic.push(&duplex_frame());
    h.pump();
    assert!(h.outbound.binary().is_empty());

    h.session.handle(remote(RemoteEvent::DuplexHandshake {
        config: serde_json::json!({"sample_rate": 24000}),
    }));
    assert!(h.session.duplex_ready());

    h.duplex_mic.push(&duplex_frame());
    h.pump();

    let sent = h.outbound.binary();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0][0], 0x01);
    assert_eq!(&sent[0][1..], &1920u32.to_le_bytes());
}

#[tokio::test]
async fn test_duplex_wake_word_suspends_and_resumes_emission() {
    let mut h = Harness::new(&duplex_config());
    h.session.activate().unwrap();
    h.session
        .handle(remote(RemoteEvent::DuplexHandshake { config: serde_json::Value::Null }));

    h.session.handle(remote(RemoteEvent::ModeChanged {
        mode: Mode::Duplex,
        cause: ModeCause::WakeWord,
    }));
    assert_eq!(h.state(), SessionState::Thinking);
    assert!(h.session.streamer_paused());

    h.duplex_mic.push(&duplex_frame());
    h.pump();
    assert!(h.outbound.binary().is_empty());

    h.session.handle(remote(RemoteEvent::ModeChanged {
        mode: Mode::Duplex,
        cause: ModeCause::CommandComplete,
    }));
    assert_eq!(h.state(), SessionState::DuplexActive);
    assert!(!h.session.streamer_paused());

    h.duplex_mic.push(&duplex_frame());
    h.pump();
    assert_eq!(h.outbound.binary().len(), 1);
}

#[tokio::test]
async fn test_duplex_inbound_frames_schedule_back_to_back() {
    let mut h = Harness::new(&duplex_config());
    h.session.activate().unwrap();

    let packet = 1920u32.to_le_bytes().to_vec();
    h.session
        .handle(remote(RemoteEvent::DuplexAudioFrame(packet.clone())));
    h.session.handle(remote(RemoteEvent::DuplexAudioFrame(packet)));
    assert_eq!(h.timeline.active_voices(), 2);

    // Corrupt packet is dropped without disturbing playback
    h.session
        .handle(remote(RemoteEvent::DuplexAudioFrame(vec![0xff])));
    assert_eq!(h.timeline.active_voices(), 2);

    h.render(1920);
    assert_eq!(h.timeline.active_voices(), 1);
    h.render(1920);
    assert_eq!(h.timeline.active_voices(), 0);
}

#[tokio::test]
async fn test_duplex_resampled_frames_join_without_edges() {
    let mut config = duplex_config();
    config.duplex.sample_rate = 16_000;
    let mut h = Harness::new(&config);
    h.session.activate().unwrap();

    // 80 ms at 16 kHz; each frame comes out as 1920 samples at the output rate
    let packet = 1280u32.to_le_bytes().to_vec();
    for _ in 0..6 {
        h.session
            .handle(remote(RemoteEvent::DuplexAudioFrame(packet.clone())));
    }
    assert_eq!(h.timeline.active_voices(), 6);

    let mut out = vec![0.0; 1920 * 6];
    h.timeline.render(&mut out, 1);

    // Past the filter warm-up a constant input stays constant across frame edges
    for (i, sample) in out.iter().enumerate().skip(1920 * 2) {
        assert!((sample - 0.25).abs() < 0.02, "sample {i} is {sample}");
    }
}

#[tokio::test]
async fn test_duplex_transcript_accumulates_and_clears() {
    let mut h = Harness::new(&duplex_config());
    h.session.activate().unwrap();

    h.session
        .handle(remote(RemoteEvent::DuplexTextFrame("Hel".to_string())));
    h.session
        .handle(remote(RemoteEvent::DuplexTextFrame("lo".to_string())));

    assert_eq!(h.session.transcript(), ["Hel", "lo"]);
    assert_eq!(h.notifier.transcripts(), vec!["Hel", "Hello"]);

    h.session.deactivate();
    assert!(h.session.transcript().is_empty());

    h.session.activate().unwrap();
    h.session
        .handle(remote(RemoteEvent::DuplexTextFrame("Hi".to_string())));
    assert_eq!(h.session.transcript(), ["Hi"]);
}

#[tokio::test]
async fn test_duplex_error_falls_back_to_command_mode() {
    let mut h = Harness::new(&duplex_config());
    h.session.activate().unwrap();

    h.session.handle(remote(RemoteEvent::DuplexError {
        reason: "bridge crashed".to_string(),
    }));

    assert_eq!(h.state(), SessionState::Listening);
    assert_eq!(h.session.mode(), Mode::Command);
    assert!(h.session.detector_running());
    assert!(!h.session.streamer_running());
    assert!(!h.duplex_mic.is_open());
    assert!(h.outbound.events().contains(&OutboundEvent::ModeRequest {
        mode: Mode::Command
    }));
}

#[tokio::test]
async fn test_remote_disconnect_falls_back_to_command_mode() {
    let mut h = Harness::new(&duplex_config());
    h.session.activate().unwrap();

    h.session.handle(remote(RemoteEvent::ModeChanged {
        mode: Mode::Command,
        cause: ModeCause::RemoteDisconnected,
    }));

    assert_eq!(h.state(), SessionState::Listening);
    assert_eq!(h.session.mode(), Mode::Command);
}

#[tokio::test]
async fn test_toggle_mode_while_active_swaps_components() {
    let mut h = Harness::new(&test_config());
    h.session.activate().unwrap();

    h.session
        .handle(SessionEvent::Control(ControlCommand::ToggleMode));

    assert_eq!(h.session.mode(), Mode::Duplex);
    assert_eq!(h.state(), SessionState::DuplexActive);
    assert!(!h.session.detector_running());
    assert!(h.session.streamer_running());
    assert!(h.outbound.events().contains(&OutboundEvent::ModeRequest {
        mode: Mode::Duplex
    }));

    h.session
        .handle(SessionEvent::Control(ControlCommand::SetMode(Mode::Command)));
    assert_eq!(h.state(), SessionState::Listening);
    assert!(h.session.detector_running());
    assert!(!h.session.streamer_running());
}

#[tokio::test]
async fn test_set_mode_while_idle_applies_to_next_activation() {
    let mut h = Harness::new(&test_config());

    h.session
        .handle(SessionEvent::Control(ControlCommand::SetMode(Mode::Duplex)));
    assert_eq!(h.state(), SessionState::Idle);
    assert!(!h.session.streamer_running());
    assert!(h.outbound.events().is_empty());

    h.session
        .handle(SessionEvent::Control(ControlCommand::Activate));
    assert_eq!(h.state(), SessionState::DuplexActive);
    assert_eq!(
        h.outbound.events(),
        vec![OutboundEvent::SessionStart { mode: Mode::Duplex }]
    );
}

#[tokio::test]
async fn test_panel_switch_forwarded_while_idle() {
    let mut h = Harness::new(&test_config());

    h.session.handle(remote(RemoteEvent::PanelSwitch {
        panel: "weather".to_string(),
    }));
    h.session.handle(transcript("computer hello"));

    assert_eq!(h.notifier.panels(), vec!["weather"]);
    assert_eq!(h.state(), SessionState::Idle);
}

#[tokio::test]
async fn test_transport_closed_deactivates() {
    let mut h = Harness::new(&test_config());
    h.session.activate().unwrap();

    h.session.handle(SessionEvent::TransportClosed);

    assert_eq!(h.state(), SessionState::Idle);
    assert!(!h.command_mic.is_open());
}

#[tokio::test]
async fn test_state_notifications_follow_transitions() {
    let mut h = Harness::new(&test_config());
    to_thinking(&mut h);

    assert_eq!(
        h.notifier.states(),
        vec![
            SessionState::Listening,
            SessionState::Capturing,
            SessionState::Processing,
            SessionState::Thinking,
        ]
    );
}
