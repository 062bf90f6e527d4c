//! Voice session state machine

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use super::notify::Notifier;
use super::{ControlCommand, Mode, SessionEvent, SessionSnapshot, SessionState};
use crate::config::Config;
use crate::transport::{ModeCause, Outbound, OutboundEvent, RemoteEvent};
use crate::voice::clip::StreamResampler;
use crate::voice::{
    AudioFrame, AudioOutput, ClipLoader, CodecBackend, DetectorEvent, DuplexAudioStreamer,
    Emitter, Microphone, PlaybackEvent, PlaybackScheduler, SpeechBoundaryDetector,
    SpeechClassifier, SpeechSegment, TaggedFrame, WakeMatch, WakeWordMatcher, samples_to_wav,
};
use crate::{Error, Result};

/// Hardware and codec resources a session drives
pub struct SessionParts {
    /// Microphone for the speech boundary detector
    pub command_microphone: Box<dyn Microphone>,
    /// Microphone for the duplex streamer
    pub duplex_microphone: Box<dyn Microphone>,
    /// Per-frame speech classifier
    pub classifier: Box<dyn SpeechClassifier>,
    /// Codec backend for duplex frames
    pub codec: Arc<dyn CodecBackend>,
    /// Speaker
    pub output: Box<dyn AudioOutput>,
    /// Resolves response clips
    pub clips: Arc<dyn ClipLoader>,
}

/// Orchestrates detector, streamer and playback for one microphone/speaker pair
///
/// All inputs go through [`VoiceSession::handle`]; the session never blocks.
pub struct VoiceSession {
    state: SessionState,
    mode: Mode,
    transcript: Vec<String>,
    handshake_seen: bool,
    barge_in: bool,
    error_revert: Duration,
    error_deadline: Option<Instant>,
    matcher: WakeWordMatcher,
    detector: SpeechBoundaryDetector,
    streamer: DuplexAudioStreamer,
    playback: PlaybackScheduler,
    duplex_resampler: Option<StreamResampler>,
    outbound: Arc<dyn Outbound>,
    notifier: Arc<dyn Notifier>,
}

impl VoiceSession {
    /// Build a session whose components report into `events`
    pub fn new(
        config: &Config,
        parts: SessionParts,
        outbound: Arc<dyn Outbound>,
        notifier: Arc<dyn Notifier>,
        events: &mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        let detector = SpeechBoundaryDetector::new(
            config.vad.clone(),
            parts.command_microphone,
            parts.classifier,
            forward(events, SessionEvent::Detector),
        );
        let streamer = DuplexAudioStreamer::new(
            config.duplex.clone(),
            parts.duplex_microphone,
            parts.codec,
            forward(events, SessionEvent::DuplexFrame),
        );
        let mut playback = PlaybackScheduler::new(
            parts.output,
            parts.clips,
            forward(events, SessionEvent::Playback),
        );
        if !config.voice.playback_enabled {
            playback.set_enabled(false);
        }

        Self {
            state: SessionState::Idle,
            mode: config.voice.mode,
            transcript: Vec::new(),
            handshake_seen: false,
            barge_in: config.voice.barge_in,
            error_revert: config.session.error_revert,
            error_deadline: None,
            matcher: WakeWordMatcher::new(&config.voice.wake_word),
            detector,
            streamer,
            playback,
            duplex_resampler: None,
            outbound,
            notifier,
        }
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Mode of the current (or next) activation
    #[must_use]
    pub const fn mode(&self) -> Mode {
        self.mode
    }

    /// Accumulated duplex transcript fragments
    #[must_use]
    pub fn transcript(&self) -> &[String] {
        &self.transcript
    }

    /// Whether the duplex bridge has completed its handshake
    #[must_use]
    pub const fn duplex_ready(&self) -> bool {
        self.handshake_seen
    }

    /// Whether the detector is withholding events
    #[must_use]
    pub fn detector_paused(&self) -> bool {
        self.detector.is_paused()
    }

    /// Whether duplex frame emission is suspended
    #[must_use]
    pub fn streamer_paused(&self) -> bool {
        self.streamer.is_paused()
    }

    /// Whether the detector holds the microphone
    #[must_use]
    pub const fn detector_running(&self) -> bool {
        self.detector.is_running()
    }

    /// Whether the duplex streamer holds the microphone
    #[must_use]
    pub const fn streamer_running(&self) -> bool {
        self.streamer.is_running()
    }

    /// Whether response audio is loading, playing or queued
    #[must_use]
    pub fn playback_active(&self) -> bool {
        self.playback.is_active()
    }

    /// Clips waiting behind the current one
    #[must_use]
    pub fn playback_queued(&self) -> usize {
        self.playback.queued()
    }

    /// Snapshot for observers
    #[must_use]
    pub const fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            mode: self.mode,
            active: self.state.is_active(),
        }
    }

    /// When the error state reverts to idle, if pending
    #[must_use]
    pub const fn next_deadline(&self) -> Option<Instant> {
        self.error_deadline
    }

    /// Fire the error revert if its deadline has passed
    pub fn on_deadline(&mut self, now: Instant) {
        let Some(deadline) = self.error_deadline else {
            return;
        };
        if now < deadline {
            return;
        }
        self.error_deadline = None;
        if self.state == SessionState::Error {
            self.transition(SessionState::Idle, "error timeout");
        }
    }

    /// Single dispatch point for every session input
    pub fn handle(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Control(command) => self.handle_control(command),
            SessionEvent::Detector(event) => self.handle_detector(event),
            SessionEvent::DuplexFrame(frame) => self.handle_outgoing_frame(frame),
            SessionEvent::Playback(PlaybackEvent::Drained) => self.handle_drained(),
            SessionEvent::Playback(event) => self.playback.handle(event),
            SessionEvent::Remote(event) => self.handle_remote(event),
            SessionEvent::TransportClosed => {
                tracing::warn!("transport closed");
                self.deactivate();
            }
        }
    }

    fn handle_control(&mut self, command: ControlCommand) {
        match command {
            ControlCommand::Activate => {
                // failure is already reported through state and status
                let _ = self.activate();
            }
            ControlCommand::Deactivate => self.deactivate(),
            ControlCommand::ToggleMode => self.toggle_mode(),
            ControlCommand::SetMode(mode) => self.set_mode(mode),
            ControlCommand::SetPlayback(enabled) => self.set_playback_enabled(enabled),
        }
    }

    /// Start the capture component for the current mode
    ///
    /// No-op while already active. In duplex mode a missing codec falls back
    /// to command mode; other start failures move the session to `Error`.
    ///
    /// # Errors
    ///
    /// Returns the initialization error that moved the session to `Error`
    pub fn activate(&mut self) -> Result<()> {
        if self.state.is_active() {
            tracing::debug!(state = %self.state, "already active");
            return Ok(());
        }

        self.error_deadline = None;
        self.transcript.clear();

        match self.start_capture("activate") {
            Ok(()) => {
                tracing::info!(mode = %self.mode, "voice session activated");
                self.outbound
                    .send_event(OutboundEvent::SessionStart { mode: self.mode });
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Release every resource and return to `Idle`; safe from any state
    pub fn deactivate(&mut self) {
        let was_active = self.state.is_active();

        self.detector.stop();
        self.streamer.stop();
        self.playback.stop();
        self.transcript.clear();
        self.handshake_seen = false;
        self.error_deadline = None;

        if was_active {
            self.outbound.send_event(OutboundEvent::SessionCancel);
            tracing::info!("voice session deactivated");
        }
        if self.state != SessionState::Idle {
            self.transition(SessionState::Idle, "deactivate");
        }
    }

    /// Switch to the other interaction mode
    pub fn toggle_mode(&mut self) {
        self.set_mode(self.mode.toggled());
    }

    /// Select the interaction mode
    ///
    /// While active the current capture component is torn down and the
    /// other one started; otherwise the mode applies to the next activation.
    pub fn set_mode(&mut self, mode: Mode) {
        if mode == self.mode {
            return;
        }

        if !self.state.is_active() {
            self.mode = mode;
            tracing::info!(mode = %mode, "mode selected");
            self.notifier.state(self.snapshot());
            return;
        }

        tracing::info!(from = %self.mode, to = %mode, "switching mode");
        self.detector.stop();
        self.streamer.stop();
        self.playback.stop();
        self.transcript.clear();
        self.handshake_seen = false;
        self.mode = mode;

        match self.start_capture("mode change") {
            Ok(()) => self
                .outbound
                .send_event(OutboundEvent::ModeRequest { mode: self.mode }),
            Err(e) => {
                let _ = self.fail(e);
            }
        }
    }

    /// Enable or disable response audio
    pub fn set_playback_enabled(&mut self, enabled: bool) {
        self.playback.set_enabled(enabled);
    }

    fn start_capture(&mut self, trigger: &'static str) -> Result<()> {
        if self.mode == Mode::Duplex {
            match self.streamer.start() {
                Ok(()) => {
                    self.handshake_seen = false;
                    self.duplex_resampler = None;
                    self.transition(SessionState::DuplexActive, trigger);
                    return Ok(());
                }
                Err(e) if !e.is_fatal_init() => {
                    tracing::warn!(error = %e, "duplex unavailable, falling back to command mode");
                    self.streamer.stop();
                    self.notifier.status(&e.user_message());
                    self.mode = Mode::Command;
                }
                Err(e) => return Err(e),
            }
        }

        self.detector.start()?;
        self.transition(SessionState::Listening, trigger);
        Ok(())
    }

    fn fail(&mut self, error: Error) -> Error {
        tracing::error!(error = %error, "voice activation failed");

        self.detector.stop();
        self.streamer.stop();
        self.playback.stop();
        self.handshake_seen = false;

        self.error_deadline = Some(Instant::now() + self.error_revert);
        self.transition(SessionState::Error, "init failure");
        self.notifier.status(&error.user_message());
        error
    }

    fn fallback_to_command(&mut self, reason: &str) {
        tracing::warn!(reason, "duplex bridge lost, falling back to command mode");

        self.streamer.stop();
        self.playback.stop();
        self.transcript.clear();
        self.handshake_seen = false;
        self.mode = Mode::Command;
        self.notifier.status(&format!(
            "Conversation mode stopped ({reason}). Switched to wake-word mode."
        ));

        match self.detector.start() {
            Ok(()) => {
                self.transition(SessionState::Listening, "duplex fallback");
                self.outbound
                    .send_event(OutboundEvent::ModeRequest { mode: Mode::Command });
            }
            Err(e) => {
                let _ = self.fail(e);
            }
        }
    }

    const fn resting_state(&self) -> SessionState {
        match self.mode {
            Mode::Command => SessionState::Listening,
            Mode::Duplex => SessionState::DuplexActive,
        }
    }

    fn transition(&mut self, to: SessionState, trigger: &'static str) {
        let from = self.state;
        if from == to {
            return;
        }
        tracing::debug!(from = %from, to = %to, trigger, "state transition");
        self.state = to;

        match (self.mode, to) {
            (Mode::Command, SessionState::Speaking) => {
                self.detector.pause_for_playback(self.barge_in);
            }
            (Mode::Command, SessionState::Processing | SessionState::Thinking) => {
                self.detector.pause();
            }
            (Mode::Command, SessionState::Listening) => self.detector.resume(),
            (Mode::Duplex, SessionState::Speaking | SessionState::Thinking) => {
                self.streamer.pause();
            }
            (Mode::Duplex, SessionState::DuplexActive) => self.streamer.resume(),
            _ => {}
        }

        self.notifier.state(self.snapshot());
        self.notifier.status(to.description());
    }

    fn handle_detector(&mut self, event: DetectorEvent) {
        if self.mode != Mode::Command || !self.detector.is_running() {
            return;
        }

        match (event, self.state) {
            (DetectorEvent::SpeechStart, SessionState::Listening) => {
                self.transition(SessionState::Capturing, "speech start");
            }
            (DetectorEvent::SpeechStart, SessionState::Speaking) => {
                tracing::info!("barge-in, interrupting playback");
                self.playback.interrupt();
                self.detector.resume();
                self.transition(SessionState::Capturing, "barge-in");
            }
            (DetectorEvent::SpeechEnd(segment), SessionState::Capturing) => {
                self.upload_segment(&segment);
            }
            (DetectorEvent::Misfire, SessionState::Capturing) => {
                self.transition(SessionState::Listening, "misfire");
            }
            (event, state) => {
                tracing::debug!(?event, state = %state, "ignoring boundary event");
            }
        }
    }

    fn upload_segment(&mut self, segment: &SpeechSegment) {
        match samples_to_wav(&segment.samples, segment.sample_rate) {
            Ok(wav) => {
                tracing::debug!(
                    duration_ms = segment.duration_ms(),
                    bytes = wav.len(),
                    "uploading utterance"
                );
                self.outbound.send_binary(wav);
                self.transition(SessionState::Processing, "speech end");
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode utterance");
                self.transition(SessionState::Listening, "encode failure");
            }
        }
    }

    fn handle_outgoing_frame(&self, frame: AudioFrame) {
        if self.mode != Mode::Duplex
            || self.state != SessionState::DuplexActive
            || !self.handshake_seen
        {
            return;
        }
        tracing::trace!(timestamp_us = frame.timestamp_us, len = frame.bytes.len(), "duplex frame");
        self.outbound
            .send_binary(TaggedFrame::Audio(frame.bytes).to_bytes());
    }

    fn handle_drained(&mut self) {
        // A drain queued before a newer clip was accepted is stale
        if self.playback.is_active() {
            tracing::debug!("ignoring drain while a clip is pending");
            return;
        }
        if self.state == SessionState::Speaking {
            let to = self.resting_state();
            self.transition(to, "playback drained");
        }
    }

    #[allow(clippy::too_many_lines)]
    fn handle_remote(&mut self, event: RemoteEvent) {
        if !self.state.is_active() {
            if let RemoteEvent::PanelSwitch { panel } = &event {
                self.notifier.panel_switch(panel);
            } else {
                tracing::debug!(event = event.name(), "ignoring remote event while inactive");
            }
            return;
        }

        match event {
            RemoteEvent::TranscriptReady { text } => {
                if self.state != SessionState::Processing {
                    tracing::debug!(state = %self.state, "ignoring unexpected transcript");
                    return;
                }
                match self.matcher.match_transcript(&text) {
                    WakeMatch::Command(command) => {
                        tracing::info!(command = %command, "wake word command");
                        self.outbound
                            .send_event(OutboundEvent::Command { text: command });
                        self.transition(SessionState::Thinking, "command");
                    }
                    WakeMatch::Empty => {
                        self.transition(SessionState::Listening, "wake word only");
                    }
                    WakeMatch::NoMatch => {
                        tracing::debug!(transcript = %text, "no wake word");
                        self.transition(SessionState::Listening, "no wake word");
                    }
                }
            }
            RemoteEvent::TranscriptError { reason } => {
                if self.state == SessionState::Processing {
                    tracing::warn!(reason = %reason, "transcription failed");
                    self.notifier
                        .status("Sorry, I couldn't make that out. Listening again.");
                    self.transition(SessionState::Listening, "transcript error");
                }
            }
            RemoteEvent::ThinkingStarted => {
                tracing::debug!(state = %self.state, "remote is thinking");
            }
            RemoteEvent::Response { audio_ref, text } => {
                if !matches!(self.state, SessionState::Thinking | SessionState::Speaking) {
                    tracing::debug!(state = %self.state, "ignoring unexpected response");
                    return;
                }
                if let Some(text) = text.as_deref().filter(|t| !t.is_empty()) {
                    self.notifier.status(text);
                }
                let queued = audio_ref.is_some_and(|clip| self.playback.enqueue(clip));
                if queued {
                    self.transition(SessionState::Speaking, "response audio");
                } else if self.state == SessionState::Thinking {
                    let to = self.resting_state();
                    self.transition(to, "text response");
                }
            }
            RemoteEvent::ResponseDone => {
                if self.state == SessionState::Thinking {
                    let to = self.resting_state();
                    self.transition(to, "response done");
                }
            }
            RemoteEvent::Error { reason } => {
                tracing::warn!(reason = %reason, "remote error");
                self.notifier
                    .status(&format!("The assistant hit a problem: {reason}"));
                if matches!(
                    self.state,
                    SessionState::Processing | SessionState::Thinking
                ) {
                    let to = self.resting_state();
                    self.transition(to, "remote error");
                }
            }
            RemoteEvent::ModeChanged { mode, cause } => self.handle_mode_changed(mode, cause),
            RemoteEvent::DuplexHandshake { config } => {
                if self.mode == Mode::Duplex && !self.handshake_seen {
                    tracing::info!(%config, "duplex bridge ready");
                    self.handshake_seen = true;
                    self.notifier.status("Conversation mode connected");
                }
            }
            RemoteEvent::DuplexError { reason } => {
                if self.mode == Mode::Duplex {
                    self.fallback_to_command(&reason);
                }
            }
            RemoteEvent::PanelSwitch { panel } => self.notifier.panel_switch(&panel),
            RemoteEvent::DuplexAudioFrame(bytes) => self.play_duplex_frame(&bytes),
            RemoteEvent::DuplexTextFrame(token) => {
                if self.mode == Mode::Duplex {
                    self.transcript.push(token);
                    self.notifier.transcript(&self.transcript.concat());
                }
            }
        }
    }

    fn handle_mode_changed(&mut self, mode: Mode, cause: ModeCause) {
        tracing::debug!(mode = %mode, ?cause, state = %self.state, "remote mode change");
        match cause {
            ModeCause::WakeWord => {
                if self.state == SessionState::DuplexActive {
                    self.transition(SessionState::Thinking, "duplex wake word");
                }
            }
            ModeCause::CommandComplete => {
                if self.mode == Mode::Duplex && self.state == SessionState::Thinking {
                    self.transition(SessionState::DuplexActive, "command complete");
                }
            }
            ModeCause::RemoteDisconnected => {
                if self.mode == Mode::Duplex {
                    self.fallback_to_command("remote disconnected");
                }
            }
        }
    }

    fn play_duplex_frame(&mut self, bytes: &[u8]) {
        if self.mode != Mode::Duplex || !self.streamer.is_running() {
            return;
        }
        let Some(pcm) = self.streamer.decode(bytes) else {
            return;
        };

        let from = self.streamer.sample_rate();
        let to = self.playback.sample_rate();
        let pcm = if from == to {
            pcm
        } else {
            match self.resample_duplex(&pcm, from, to) {
                Ok(pcm) if pcm.is_empty() => return,
                Ok(pcm) => pcm,
                Err(e) => {
                    tracing::warn!(error = %e, "dropping frame that failed to resample");
                    return;
                }
            }
        };
        self.playback.schedule_stream(pcm);
    }

    /// Resample inbound duplex audio with one resampler per stream
    fn resample_duplex(&mut self, pcm: &[f32], from: u32, to: u32) -> Result<Vec<f32>> {
        if !self
            .duplex_resampler
            .as_ref()
            .is_some_and(|r| r.converts(from, to))
        {
            let resampler = StreamResampler::new(from, to, self.streamer.frame_samples())?;
            self.duplex_resampler = Some(resampler);
        }
        match self.duplex_resampler.as_mut() {
            Some(resampler) => resampler.process(pcm),
            None => Ok(Vec::new()),
        }
    }
}

/// Map component events onto the session queue
fn forward<E: 'static>(
    events: &mpsc::UnboundedSender<SessionEvent>,
    wrap: fn(E) -> SessionEvent,
) -> Emitter<E> {
    let events = events.clone();
    Arc::new(move |event: E| {
        let _ = events.send(wrap(event));
    })
}
