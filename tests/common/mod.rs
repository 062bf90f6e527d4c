//! Shared test utilities
//!
//! Fake hardware, codec, transport and notifier so sessions run without
//! audio devices or a network.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use beacon_voice::config::VadConfig;
use beacon_voice::voice::{
    ClipLoader, CodecBackend, CodecParams, EnergyClassifier, FrameDecoder, FrameEncoder,
    Microphone, SampleSink, Timeline,
};
use beacon_voice::{
    Config, Error, Notification, Notifier, Outbound, OutboundEvent, Result, SessionEvent,
    SessionParts, SessionState, VoiceSession,
};
use tokio::sync::mpsc;

/// Handle through which a test drives a [`FakeMicrophone`]
#[derive(Clone, Default)]
pub struct MicHandle {
    sink: Arc<Mutex<Option<SampleSink>>>,
    deny: Arc<AtomicBool>,
}

impl MicHandle {
    /// Deliver samples as if captured; returns `false` if the mic is closed
    pub fn push(&self, samples: &[f32]) -> bool {
        let mut sink = self.sink.lock().unwrap();
        match sink.as_mut() {
            Some(sink) => {
                sink(samples);
                true
            }
            None => false,
        }
    }

    /// Refuse the next `open` with a permission error
    pub fn deny(&self) {
        self.deny.store(true, Ordering::SeqCst);
    }

    pub fn is_open(&self) -> bool {
        self.sink.lock().unwrap().is_some()
    }

    pub fn microphone(&self) -> Box<dyn Microphone> {
        Box::new(FakeMicrophone {
            handle: self.clone(),
        })
    }
}

/// Microphone whose samples come from a [`MicHandle`]
pub struct FakeMicrophone {
    handle: MicHandle,
}

impl Microphone for FakeMicrophone {
    fn open(&mut self, _sample_rate: u32, sink: SampleSink) -> Result<()> {
        if self.handle.deny.load(Ordering::SeqCst) {
            return Err(Error::PermissionDenied("microphone access refused".to_string()));
        }
        *self.handle.sink.lock().unwrap() = Some(sink);
        Ok(())
    }

    fn close(&mut self) {
        self.handle.sink.lock().unwrap().take();
    }

    fn is_open(&self) -> bool {
        self.handle.is_open()
    }
}

/// Codec that packs the frame length into four bytes
///
/// Decoding yields that many samples of 0.25; an empty packet is corrupt.
pub struct FakeCodec;

struct FakeEncoder;
struct FakeDecoder;

impl FrameEncoder for FakeEncoder {
    fn configure(&mut self, _params: &CodecParams) -> Result<()> {
        Ok(())
    }

    fn encode(&mut self, pcm: &[f32]) -> Result<Vec<u8>> {
        let len = u32::try_from(pcm.len()).map_err(|e| Error::Codec(e.to_string()))?;
        Ok(len.to_le_bytes().to_vec())
    }

    fn close(&mut self) {}
}

impl FrameDecoder for FakeDecoder {
    fn configure(&mut self, _params: &CodecParams) -> Result<()> {
        Ok(())
    }

    fn decode(&mut self, packet: &[u8]) -> Result<Vec<f32>> {
        let bytes: [u8; 4] = packet
            .try_into()
            .map_err(|_| Error::Codec("corrupt packet".to_string()))?;
        Ok(vec![0.25; u32::from_le_bytes(bytes) as usize])
    }

    fn close(&mut self) {}
}

impl CodecBackend for FakeCodec {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn encoder(&self) -> Result<Box<dyn FrameEncoder>> {
        Ok(Box::new(FakeEncoder))
    }

    fn decoder(&self) -> Result<Box<dyn FrameDecoder>> {
        Ok(Box::new(FakeDecoder))
    }
}

/// Records everything the session sends
#[derive(Default)]
pub struct RecordingOutbound {
    events: Mutex<Vec<OutboundEvent>>,
    binary: Mutex<Vec<Vec<u8>>>,
}

impl RecordingOutbound {
    pub fn events(&self) -> Vec<OutboundEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn binary(&self) -> Vec<Vec<u8>> {
        self.binary.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
        self.binary.lock().unwrap().clear();
    }
}

impl Outbound for RecordingOutbound {
    fn send_event(&self, event: OutboundEvent) {
        self.events.lock().unwrap().push(event);
    }

    fn send_binary(&self, bytes: Vec<u8>) {
        self.binary.lock().unwrap().push(bytes);
    }
}

/// Records every notification
#[derive(Default)]
pub struct RecordingNotifier {
    notifications: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn all(&self) -> Vec<Notification> {
        self.notifications.lock().unwrap().clone()
    }

    pub fn statuses(&self) -> Vec<String> {
        self.all()
            .into_iter()
            .filter_map(|n| match n {
                Notification::Status { text } => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn states(&self) -> Vec<SessionState> {
        self.all()
            .into_iter()
            .filter_map(|n| match n {
                Notification::State { state, .. } => Some(state),
                _ => None,
            })
            .collect()
    }

    pub fn transcripts(&self) -> Vec<String> {
        self.all()
            .into_iter()
            .filter_map(|n| match n {
                Notification::Transcript { text } => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn panels(&self) -> Vec<String> {
        self.all()
            .into_iter()
            .filter_map(|n| match n {
                Notification::PanelSwitch { panel } => Some(panel),
                _ => None,
            })
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: Notification) {
        self.notifications.lock().unwrap().push(notification);
    }
}

/// Clip loader serving fixed sample buffers by reference
#[derive(Default)]
pub struct StaticClipLoader {
    clips: HashMap<String, Vec<f32>>,
}

impl StaticClipLoader {
    pub fn with(mut self, reference: &str, samples: Vec<f32>) -> Self {
        self.clips.insert(reference.to_string(), samples);
        self
    }
}

#[async_trait]
impl ClipLoader for StaticClipLoader {
    async fn load(&self, reference: &str) -> Result<Vec<f32>> {
        self.clips
            .get(reference)
            .cloned()
            .ok_or_else(|| Error::Clip(format!("unknown clip: {reference}")))
    }
}

/// Output sample rate used by the harness
pub const OUTPUT_RATE: u32 = 24_000;

/// Config with short frames so tests stay small
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.vad = VadConfig {
        sample_rate: 16_000,
        frame_ms: 10,
        speech_on_prob: 0.5,
        speech_off_prob: 0.2,
        end_silence_frames: 3,
        lead_pad_frames: 2,
        min_segment_frames: 2,
    };
    config.voice.output_sample_rate = OUTPUT_RATE;
    config.session.error_revert = Duration::from_secs(8);
    config
}

/// Samples per detector frame in [`test_config`]
pub const VAD_FRAME: usize = 160;

/// `frames` detector frames of loud audio
pub fn loud(frames: usize) -> Vec<f32> {
    vec![0.5; frames * VAD_FRAME]
}

/// `frames` detector frames of silence
pub fn quiet(frames: usize) -> Vec<f32> {
    vec![0.0; frames * VAD_FRAME]
}

/// A session wired to fakes, plus handles to observe it
pub struct Harness {
    pub session: VoiceSession,
    pub events: mpsc::UnboundedReceiver<SessionEvent>,
    pub outbound: Arc<RecordingOutbound>,
    pub notifier: Arc<RecordingNotifier>,
    pub command_mic: MicHandle,
    pub duplex_mic: MicHandle,
    pub timeline: Timeline,
}

impl Harness {
    pub fn new(config: &Config) -> Self {
        Self::build(config, Arc::new(FakeCodec), StaticClipLoader::default())
    }

    pub fn with_clips(config: &Config, clips: StaticClipLoader) -> Self {
        Self::build(config, Arc::new(FakeCodec), clips)
    }

    pub fn with_codec(config: &Config, codec: Arc<dyn CodecBackend>) -> Self {
        Self::build(config, codec, StaticClipLoader::default())
    }

    fn build(config: &Config, codec: Arc<dyn CodecBackend>, clips: StaticClipLoader) -> Self {
        let (tx, events) = mpsc::unbounded_channel();
        let outbound = Arc::new(RecordingOutbound::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let command_mic = MicHandle::default();
        let duplex_mic = MicHandle::default();
        let timeline = Timeline::new(OUTPUT_RATE);

        let parts = SessionParts {
            command_microphone: command_mic.microphone(),
            duplex_microphone: duplex_mic.microphone(),
            classifier: Box::new(EnergyClassifier::default()),
            codec,
            output: Box::new(timeline.clone()),
            clips: Arc::new(clips),
        };

        let session = VoiceSession::new(config, parts, outbound.clone(), notifier.clone(), &tx);

        Self {
            session,
            events,
            outbound,
            notifier,
            command_mic,
            duplex_mic,
            timeline,
        }
    }

    /// Feed every queued component event into the session
    pub fn pump(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            self.session.handle(event);
        }
    }

    /// Let spawned clip loads finish, then pump
    pub async fn settle(&mut self) {
        for _ in 0..10 {
            tokio::task::yield_now().await;
            self.pump();
        }
    }

    /// Advance the output clock, rendering `samples` mono samples
    pub fn render(&self, samples: usize) {
        let mut out = vec![0.0; samples];
        self.timeline.render(&mut out, 1);
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }
}
