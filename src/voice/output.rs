//! Audio output with a sample-accurate playback clock
//!
//! The [`Timeline`] mixes scheduled voices into the output buffer and counts
//! rendered samples; that count is the playback clock used for gapless
//! scheduling. [`CpalOutput`] drives a timeline from the default output device.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig};

use super::Emitter;
use crate::{Error, Result};

/// Identifier of a scheduled voice
pub type VoiceId = u64;

/// Destination for scheduled PCM
///
/// Times are absolute sample positions on the output clock.
pub trait AudioOutput {
    /// Output sample rate
    fn sample_rate(&self) -> u32;

    /// Current playback position in samples
    fn now(&self) -> u64;

    /// Schedule mono samples to start at `at`
    ///
    /// When `notify` is set the finished callback fires once the voice has
    /// been fully rendered.
    fn schedule(&mut self, at: u64, samples: Vec<f32>, notify: bool) -> VoiceId;

    /// Silence every scheduled voice immediately
    fn clear(&mut self);

    /// Register the callback for finished voices
    fn set_on_finished(&mut self, on_finished: Emitter<VoiceId>);
}

struct Voice {
    id: VoiceId,
    start: u64,
    samples: Vec<f32>,
    notify: bool,
}

#[derive(Default)]
struct TimelineInner {
    voices: Vec<Voice>,
    next_id: VoiceId,
    on_finished: Option<Emitter<VoiceId>>,
}

/// Mixer whose rendered sample count is the playback clock
#[derive(Clone)]
pub struct Timeline {
    sample_rate: u32,
    position: Arc<AtomicU64>,
    inner: Arc<Mutex<TimelineInner>>,
}

impl Timeline {
    /// Create an empty timeline at position zero
    #[must_use]
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            position: Arc::new(AtomicU64::new(0)),
            inner: Arc::new(Mutex::new(TimelineInner::default())),
        }
    }

    /// Render interleaved output and advance the clock
    ///
    /// Each output frame carries the same mono sample on every channel.
    pub fn render(&self, out: &mut [f32], channels: usize) {
        let channels = channels.max(1);
        let frames = out.len() / channels;
        let start = self.position.load(Ordering::SeqCst);
        let end = start + frames as u64;

        out.fill(0.0);

        let mut finished = Vec::new();
        let on_finished = {
            let Ok(mut inner) = self.inner.lock() else {
                self.position.store(end, Ordering::SeqCst);
                return;
            };

            for voice in &inner.voices {
                let voice_end = voice.start + voice.samples.len() as u64;
                if voice_end <= start || voice.start >= end {
                    continue;
                }
                let from = voice.start.max(start);
                let to = voice_end.min(end);
                for t in from..to {
                    #[allow(clippy::cast_possible_truncation)]
                    let sample = voice.samples[(t - voice.start) as usize];
                    #[allow(clippy::cast_possible_truncation)]
                    let frame = (t - start) as usize;
                    for out_sample in &mut out[frame * channels..(frame + 1) * channels] {
                        *out_sample += sample;
                    }
                }
            }

            inner.voices.retain(|voice| {
                let done = voice.start + voice.samples.len() as u64 <= end;
                if done && voice.notify {
                    finished.push(voice.id);
                }
                !done
            });
            inner.on_finished.clone()
        };

        for sample in out.iter_mut() {
            *sample = sample.clamp(-1.0, 1.0);
        }

        self.position.store(end, Ordering::SeqCst);

        if let Some(on_finished) = on_finished {
            for id in finished {
                on_finished(id);
            }
        }
    }

    /// Number of voices still scheduled
    #[must_use]
    pub fn active_voices(&self) -> usize {
        self.inner.lock().map(|inner| inner.voices.len()).unwrap_or(0)
    }
}

impl AudioOutput for Timeline {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn now(&self) -> u64 {
        self.position.load(Ordering::SeqCst)
    }

    fn schedule(&mut self, at: u64, samples: Vec<f32>, notify: bool) -> VoiceId {
        let Ok(mut inner) = self.inner.lock() else {
            return 0;
        };
        inner.next_id += 1;
        let id = inner.next_id;
        inner.voices.push(Voice {
            id,
            start: at,
            samples,
            notify,
        });
        id
    }

    fn clear(&mut self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.voices.clear();
        }
    }

    fn set_on_finished(&mut self, on_finished: Emitter<VoiceId>) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.on_finished = Some(on_finished);
        }
    }
}

/// Plays a [`Timeline`] on the default output device
pub struct CpalOutput {
    timeline: Timeline,
    _stream: Stream,
}

impl CpalOutput {
    /// Open the default output device at `sample_rate`
    ///
    /// # Errors
    ///
    /// Returns error if no output device supports the rate
    pub fn open(sample_rate: u32) -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        let supported = device
            .supported_output_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .filter(|c| {
                c.channels() <= 2
                    && c.min_sample_rate() <= SampleRate(sample_rate)
                    && c.max_sample_rate() >= SampleRate(sample_rate)
            })
            .min_by_key(cpal::SupportedStreamConfigRange::channels)
            .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?;

        let config: StreamConfig = supported.with_sample_rate(SampleRate(sample_rate)).config();
        let channels = usize::from(config.channels);

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate,
            channels,
            "audio playback initialized"
        );

        let timeline = Timeline::new(sample_rate);
        let render = timeline.clone();
        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    render.render(data, channels);
                },
                |err| {
                    tracing::error!(error = %err, "audio playback error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;

        Ok(Self {
            timeline,
            _stream: stream,
        })
    }

    /// The underlying timeline
    #[must_use]
    pub const fn timeline(&self) -> &Timeline {
        &self.timeline
    }
}

impl AudioOutput for CpalOutput {
    fn sample_rate(&self) -> u32 {
        self.timeline.sample_rate()
    }

    fn now(&self) -> u64 {
        self.timeline.now()
    }

    fn schedule(&mut self, at: u64, samples: Vec<f32>, notify: bool) -> VoiceId {
        self.timeline.schedule(at, samples, notify)
    }

    fn clear(&mut self) {
        self.timeline.clear();
    }

    fn set_on_finished(&mut self, on_finished: Emitter<VoiceId>) {
        self.timeline.set_on_finished(on_finished);
    }
}
