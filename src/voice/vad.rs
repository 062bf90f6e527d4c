//! Speech boundary detection
//!
//! Converts a continuous microphone stream into discrete speech segments.
//! Each fixed-size frame is scored by a [`SpeechClassifier`]; a hysteresis
//! tracker turns the per-frame probabilities into onset and offset events.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use super::Emitter;
use super::capture::{FrameChunker, Microphone};
use crate::config::VadConfig;
use crate::{Error, Result};

/// Scores a frame with the probability that it contains speech
pub trait SpeechClassifier: Send {
    /// Load models or runtimes; called once per `start`
    ///
    /// # Errors
    ///
    /// Returns `Error::Vad` if the classifier cannot run
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }

    /// Speech probability in [0, 1] for one frame
    fn probability(&mut self, frame: &[f32]) -> f32;

    /// Clear any recurrent state
    fn reset(&mut self) {}
}

/// Classifier mapping frame loudness to a speech probability
///
/// RMS level in dBFS is mapped linearly from `floor_db` (0.0) to `ceiling_db` (1.0).
#[derive(Debug, Clone, Copy)]
pub struct EnergyClassifier {
    floor_db: f32,
    ceiling_db: f32,
}

impl Default for EnergyClassifier {
    /// Midpoint sits at -30 dBFS (RMS ≈ 0.03)
    fn default() -> Self {
        Self {
            floor_db: -45.0,
            ceiling_db: -15.0,
        }
    }
}

impl EnergyClassifier {
    /// Create a classifier with explicit dB bounds
    ///
    /// # Errors
    ///
    /// Returns error if `floor_db` is not below `ceiling_db`
    pub fn new(floor_db: f32, ceiling_db: f32) -> Result<Self> {
        if floor_db >= ceiling_db {
            return Err(Error::Vad(format!(
                "energy floor {floor_db} dB must be below ceiling {ceiling_db} dB"
            )));
        }
        Ok(Self {
            floor_db,
            ceiling_db,
        })
    }
}

impl SpeechClassifier for EnergyClassifier {
    fn probability(&mut self, frame: &[f32]) -> f32 {
        let level = rms(frame);
        if level <= f32::EPSILON {
            return 0.0;
        }
        let db = 20.0 * level.log10();
        ((db - self.floor_db) / (self.ceiling_db - self.floor_db)).clamp(0.0, 1.0)
    }
}

/// Calculate RMS energy of audio samples
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// One captured utterance
#[derive(Debug, Clone, PartialEq)]
pub struct SpeechSegment {
    /// Mono samples: lead pad, speech, trailing silence up to the offset
    pub samples: Vec<f32>,
    /// Sample rate of `samples`
    pub sample_rate: u32,
}

impl SpeechSegment {
    /// Segment duration in milliseconds
    #[must_use]
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        self.samples.len() as u64 * 1000 / u64::from(self.sample_rate)
    }
}

/// Boundary events emitted by the detector
#[derive(Debug, Clone, PartialEq)]
pub enum DetectorEvent {
    /// Rising edge: speech began
    SpeechStart,
    /// Closing edge with the accumulated segment
    SpeechEnd(SpeechSegment),
    /// The segment that began was too short and was discarded
    Misfire,
}

/// Hysteresis state machine over per-frame speech probabilities
#[derive(Debug)]
pub struct BoundaryTracker {
    on_prob: f32,
    off_prob: f32,
    end_silence_frames: u32,
    lead_pad_frames: usize,
    min_segment_frames: u32,
    sample_rate: u32,
    lead: VecDeque<Vec<f32>>,
    segment: Vec<f32>,
    speaking: bool,
    speech_frames: u32,
    silence_run: u32,
    trim_at: Option<usize>,
}

impl BoundaryTracker {
    /// Create a tracker from detector thresholds
    #[must_use]
    pub fn new(config: &VadConfig) -> Self {
        Self {
            on_prob: config.speech_on_prob,
            off_prob: config.speech_off_prob,
            end_silence_frames: config.end_silence_frames,
            lead_pad_frames: config.lead_pad_frames as usize,
            min_segment_frames: config.min_segment_frames,
            sample_rate: config.sample_rate,
            lead: VecDeque::with_capacity(config.lead_pad_frames as usize + 1),
            segment: Vec::new(),
            speaking: false,
            speech_frames: 0,
            silence_run: 0,
            trim_at: None,
        }
    }

    /// Feed one frame and its speech probability
    pub fn process(&mut self, frame: &[f32], prob: f32) -> Option<DetectorEvent> {
        if !self.speaking {
            if prob >= self.on_prob {
                self.speaking = true;
                self.segment = self.lead.drain(..).flatten().collect();
                self.segment.extend_from_slice(frame);
                self.speech_frames = 1;
                self.silence_run = 0;
                self.trim_at = None;
                tracing::trace!(prob, "speech onset");
                return Some(DetectorEvent::SpeechStart);
            }

            if self.lead_pad_frames > 0 {
                self.lead.push_back(frame.to_vec());
                while self.lead.len() > self.lead_pad_frames {
                    self.lead.pop_front();
                }
            }
            return None;
        }

        let frame_start = self.segment.len();
        self.segment.extend_from_slice(frame);

        if prob >= self.on_prob {
            self.speech_frames += 1;
            self.silence_run = 0;
            self.trim_at = None;
        } else if prob < self.off_prob {
            if self.silence_run == 0 {
                self.trim_at = Some(frame_start);
            }
            self.silence_run += 1;

            if self.silence_run >= self.end_silence_frames {
                return Some(self.close());
            }
        }

        None
    }

    fn close(&mut self) -> DetectorEvent {
        let mut samples = std::mem::take(&mut self.segment);
        if let Some(at) = self.trim_at.take() {
            samples.truncate(at);
        }
        let speech_frames = self.speech_frames;

        self.speaking = false;
        self.speech_frames = 0;
        self.silence_run = 0;

        if speech_frames < self.min_segment_frames {
            tracing::debug!(speech_frames, "segment too short, discarded");
            return DetectorEvent::Misfire;
        }

        tracing::debug!(samples = samples.len(), speech_frames, "speech segment complete");
        DetectorEvent::SpeechEnd(SpeechSegment {
            samples,
            sample_rate: self.sample_rate,
        })
    }

    /// Drop any partial segment and lead pad
    pub fn reset(&mut self) {
        self.lead.clear();
        self.segment.clear();
        self.speaking = false;
        self.speech_frames = 0;
        self.silence_run = 0;
        self.trim_at = None;
    }

    /// Whether a segment is in progress
    #[must_use]
    pub const fn is_speaking(&self) -> bool {
        self.speaking
    }
}

/// Which detector events reach the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DeliveryGate {
    /// All events delivered
    Open = 0,
    /// Only speech onsets delivered (barge-in while speaking)
    OnsetOnly = 1,
    /// Nothing delivered
    Closed = 2,
}

impl DeliveryGate {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Open,
            1 => Self::OnsetOnly,
            _ => Self::Closed,
        }
    }
}

struct DetectorCore {
    chunker: FrameChunker,
    classifier: Box<dyn SpeechClassifier>,
    tracker: BoundaryTracker,
}

impl DetectorCore {
    fn reset(&mut self) {
        self.chunker.clear();
        self.classifier.reset();
        self.tracker.reset();
    }
}

/// Microphone-driven speech boundary detector
///
/// Frames are classified on the capture thread; events are handed to the
/// emitter, which forwards them to the session's control queue.
pub struct SpeechBoundaryDetector {
    config: VadConfig,
    microphone: Box<dyn Microphone>,
    core: Arc<Mutex<DetectorCore>>,
    gate: Arc<AtomicU8>,
    emit: Emitter<DetectorEvent>,
    running: bool,
}

impl SpeechBoundaryDetector {
    /// Create a detector (nothing is acquired until `start`)
    pub fn new(
        config: VadConfig,
        microphone: Box<dyn Microphone>,
        classifier: Box<dyn SpeechClassifier>,
        emit: Emitter<DetectorEvent>,
    ) -> Self {
        let core = DetectorCore {
            chunker: FrameChunker::new(config.frame_samples()),
            classifier,
            tracker: BoundaryTracker::new(&config),
        };

        Self {
            config,
            microphone,
            core: Arc::new(Mutex::new(core)),
            gate: Arc::new(AtomicU8::new(DeliveryGate::Open as u8)),
            emit,
            running: false,
        }
    }

    /// Acquire the microphone and begin classifying frames
    ///
    /// No-op if already running.
    ///
    /// # Errors
    ///
    /// Returns `Error::PermissionDenied` if the microphone is refused and
    /// `Error::Vad` if the classifier cannot initialize
    pub fn start(&mut self) -> Result<()> {
        if self.running {
            return Ok(());
        }

        self.config
            .validate()
            .map_err(|e| Error::Vad(e.to_string()))?;

        {
            let mut core = self
                .core
                .lock()
                .map_err(|_| Error::Vad("detector state poisoned".to_string()))?;
            core.classifier.warm_up()?;
            core.reset();
        }

        self.gate.store(DeliveryGate::Open as u8, Ordering::SeqCst);

        let core = Arc::clone(&self.core);
        let gate = Arc::clone(&self.gate);
        let emit = Arc::clone(&self.emit);
        self.microphone.open(
            self.config.sample_rate,
            Box::new(move |samples: &[f32]| {
                let Ok(mut core) = core.lock() else {
                    return;
                };
                let DetectorCore {
                    chunker,
                    classifier,
                    tracker,
                } = &mut *core;

                chunker.push(samples, |frame| {
                    let prob = classifier.probability(frame);
                    if let Some(event) = tracker.process(frame, prob) {
                        deliver(&gate, &emit, event);
                    }
                });
            }),
        )?;

        self.running = true;
        tracing::info!(
            sample_rate = self.config.sample_rate,
            frame_ms = self.config.frame_ms,
            "speech detector started"
        );
        Ok(())
    }

    /// Suppress all event delivery (capture keeps running)
    pub fn pause(&self) {
        self.gate.store(DeliveryGate::Closed as u8, Ordering::SeqCst);
        tracing::debug!("speech detector paused");
    }

    /// Suppress everything except speech onsets, used while playback is active
    pub fn pause_for_playback(&self, barge_in: bool) {
        let gate = if barge_in {
            DeliveryGate::OnsetOnly
        } else {
            DeliveryGate::Closed
        };
        self.gate.store(gate as u8, Ordering::SeqCst);
        tracing::debug!(?gate, "speech detector paused for playback");
    }

    /// Restore event delivery
    ///
    /// Resuming from a full pause drops any segment captured meanwhile.
    pub fn resume(&self) {
        let previous = DeliveryGate::from_u8(self.gate.swap(DeliveryGate::Open as u8, Ordering::SeqCst));
        if previous == DeliveryGate::Closed {
            if let Ok(mut core) = self.core.lock() {
                core.reset();
            }
        }
        if previous != DeliveryGate::Open {
            tracing::debug!(?previous, "speech detector resumed");
        }
    }

    /// Release the microphone; idempotent
    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        self.microphone.close();
        if let Ok(mut core) = self.core.lock() {
            core.reset();
        }
        self.gate.store(DeliveryGate::Open as u8, Ordering::SeqCst);
        self.running = false;
        tracing::info!("speech detector stopped");
    }

    /// Whether the detector holds the microphone
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.running
    }

    /// Current delivery gate
    #[must_use]
    pub fn gate(&self) -> DeliveryGate {
        DeliveryGate::from_u8(self.gate.load(Ordering::SeqCst))
    }

    /// Whether delivery is restricted
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.gate() != DeliveryGate::Open
    }
}

impl Drop for SpeechBoundaryDetector {
    fn drop(&mut self) {
        self.stop();
    }
}

fn deliver(gate: &AtomicU8, emit: &Emitter<DetectorEvent>, event: DetectorEvent) {
    match DeliveryGate::from_u8(gate.load(Ordering::SeqCst)) {
        DeliveryGate::Open => emit(event),
        DeliveryGate::OnsetOnly => {
            if event == DetectorEvent::SpeechStart {
                // The session owns this segment from here on
                let _ = gate.compare_exchange(
                    DeliveryGate::OnsetOnly as u8,
                    DeliveryGate::Open as u8,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                );
                emit(event);
            }
        }
        DeliveryGate::Closed => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> VadConfig {
        VadConfig {
            sample_rate: 1000,
            frame_ms: 4,
            end_silence_frames: 3,
            lead_pad_frames: 2,
            min_segment_frames: 2,
            ..VadConfig::default()
        }
    }

    fn frame(value: f32) -> Vec<f32> {
        vec![value; 4]
    }

    #[test]
    fn energy_classifier_orders_levels() {
        let mut classifier = EnergyClassifier::default();
        assert!(classifier.probability(&[0.0; 64]) < 0.01);
        assert!(classifier.probability(&[0.001; 64]) < 0.2);
        assert!(classifier.probability(&[0.3; 64]) > 0.9);
        assert!(EnergyClassifier::new(-10.0, -20.0).is_err());
    }

    #[test]
    fn test_energy_calculation() {
        assert!(rms(&[0.0f32; 100]) < 0.001);
        assert!(rms(&[0.5f32; 100]) > 0.4);
        assert!(rms(&[]).abs() < f32::EPSILON);
    }

    #[test]
    fn onset_includes_lead_pad() {
        let mut tracker = BoundaryTracker::new(&config());
        for v in [0.1, 0.2, 0.3] {
            assert_eq!(tracker.process(&frame(v), 0.0), None);
        }
        assert_eq!(tracker.process(&frame(0.9), 0.9), Some(DetectorEvent::SpeechStart));
        assert!(tracker.is_speaking());

        tracker.process(&frame(0.9), 0.9);
        for _ in 0..2 {
            assert_eq!(tracker.process(&frame(0.0), 0.0), None);
        }
        let Some(DetectorEvent::SpeechEnd(segment)) = tracker.process(&frame(0.0), 0.0) else {
            panic!("expected segment end");
        };

        // two lead frames (0.2, 0.3) + two speech frames, trailing silence trimmed
        assert_eq!(segment.samples.len(), 16);
        assert!((segment.samples[0] - 0.2).abs() < f32::EPSILON);
        assert!((segment.samples[15] - 0.9).abs() < f32::EPSILON);
        assert!(!tracker.is_speaking());
    }

    #[test]
    fn hysteresis_band_does_not_close() {
        let mut tracker = BoundaryTracker::new(&config());
        tracker.process(&frame(0.9), 0.9);
        tracker.process(&frame(0.9), 0.9);
        for _ in 0..10 {
            assert_eq!(tracker.process(&frame(0.3), 0.35), None);
        }
        assert!(tracker.is_speaking());
    }

    #[test]
    fn speech_resets_silence_run() {
        let mut tracker = BoundaryTracker::new(&config());
        tracker.process(&frame(0.9), 0.9);
        tracker.process(&frame(0.0), 0.0);
        tracker.process(&frame(0.0), 0.0);
        tracker.process(&frame(0.9), 0.9);
        assert_eq!(tracker.process(&frame(0.0), 0.0), None);
        assert_eq!(tracker.process(&frame(0.0), 0.0), None);
        assert!(matches!(
            tracker.process(&frame(0.0), 0.0),
            Some(DetectorEvent::SpeechEnd(_))
        ));
    }

    #[test]
    fn short_segment_misfires() {
        let mut tracker = BoundaryTracker::new(&config());
        assert_eq!(tracker.process(&frame(0.9), 0.9), Some(DetectorEvent::SpeechStart));
        tracker.process(&frame(0.0), 0.0);
        tracker.process(&frame(0.0), 0.0);
        assert_eq!(tracker.process(&frame(0.0), 0.0), Some(DetectorEvent::Misfire));
    }

    #[test]
    fn onset_only_gate_opens_after_delivery() {
        let gate = AtomicU8::new(DeliveryGate::OnsetOnly as u8);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let emit: Emitter<DetectorEvent> = Arc::new(move |e: DetectorEvent| sink.lock().unwrap().push(e));

        deliver(&gate, &emit, DetectorEvent::Misfire);
        assert!(seen.lock().unwrap().is_empty());

        deliver(&gate, &emit, DetectorEvent::SpeechStart);
        assert_eq!(DeliveryGate::from_u8(gate.load(Ordering::SeqCst)), DeliveryGate::Open);

        deliver(&gate, &emit, DetectorEvent::Misfire);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![DetectorEvent::SpeechStart, DetectorEvent::Misfire]
        );
    }
}
