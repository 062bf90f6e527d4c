//! Playback scheduling
//!
//! Two disciplines share one [`AudioOutput`]:
//! - command mode plays queued clips strictly in order, one at a time;
//! - duplex mode places decoded frames back-to-back on the output clock.

use std::collections::VecDeque;
use std::sync::Arc;

use super::Emitter;
use super::clip::ClipLoader;
use super::output::{AudioOutput, VoiceId};
use crate::Result;

/// Events flowing back into the scheduler or out to the session
#[derive(Debug)]
pub enum PlaybackEvent {
    /// A queued clip finished loading
    ClipLoaded {
        /// Load generation the clip belongs to
        generation: u64,
        /// Decoded samples or the load failure
        result: Result<Vec<f32>>,
    },
    /// The output finished rendering a voice
    VoiceFinished(VoiceId),
    /// The clip queue emptied
    Drained,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Current {
    Loading(u64),
    Playing(VoiceId),
}

/// Queue and gapless scheduler over an audio output
pub struct PlaybackScheduler {
    output: Box<dyn AudioOutput>,
    loader: Arc<dyn ClipLoader>,
    emit: Emitter<PlaybackEvent>,
    queue: VecDeque<String>,
    current: Option<Current>,
    generation: u64,
    next_play_time: u64,
    stream_active: bool,
    enabled: bool,
}

impl PlaybackScheduler {
    /// Create a scheduler; `emit` receives load results, finished voices and drains
    pub fn new(
        mut output: Box<dyn AudioOutput>,
        loader: Arc<dyn ClipLoader>,
        emit: Emitter<PlaybackEvent>,
    ) -> Self {
        let on_finished = Arc::clone(&emit);
        output.set_on_finished(Arc::new(move |id: VoiceId| on_finished(PlaybackEvent::VoiceFinished(id))));

        Self {
            output,
            loader,
            emit,
            queue: VecDeque::new(),
            current: None,
            generation: 0,
            next_play_time: 0,
            stream_active: false,
            enabled: true,
        }
    }

    /// Append a clip; playback starts immediately if idle
    ///
    /// Returns `false` when playback is disabled and the clip was dropped.
    pub fn enqueue(&mut self, reference: impl Into<String>) -> bool {
        if !self.enabled {
            return false;
        }
        let reference = reference.into();
        tracing::debug!(clip = %reference, queued = self.queue.len(), "clip enqueued");
        self.queue.push_back(reference);
        if self.current.is_none() {
            self.play_next();
        }
        true
    }

    fn play_next(&mut self) {
        let Some(reference) = self.queue.pop_front() else {
            self.current = None;
            tracing::debug!("playback queue drained");
            (self.emit)(PlaybackEvent::Drained);
            return;
        };

        let generation = self.generation;
        self.current = Some(Current::Loading(generation));

        let loader = Arc::clone(&self.loader);
        let emit = Arc::clone(&self.emit);
        tokio::spawn(async move {
            let result = loader.load(&reference).await;
            emit(PlaybackEvent::ClipLoaded { generation, result });
        });
    }

    /// Route a scheduler event
    ///
    /// `Drained` is for the session and is ignored here.
    pub fn handle(&mut self, event: PlaybackEvent) {
        match event {
            PlaybackEvent::ClipLoaded { generation, result } => {
                if self.current != Some(Current::Loading(generation)) {
                    return;
                }
                match result {
                    Ok(samples) if !samples.is_empty() => {
                        let at = self.output.now();
                        let voice = self.output.schedule(at, samples, true);
                        self.current = Some(Current::Playing(voice));
                    }
                    Ok(_) => {
                        tracing::debug!("skipping empty clip");
                        self.play_next();
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "clip failed to load, skipping");
                        self.play_next();
                    }
                }
            }
            PlaybackEvent::VoiceFinished(id) => {
                if self.current == Some(Current::Playing(id)) {
                    self.play_next();
                }
            }
            PlaybackEvent::Drained => {}
        }
    }

    /// Schedule a decoded frame right after the previous one
    ///
    /// Returns the start time in output samples, or `None` when disabled.
    pub fn schedule_stream(&mut self, samples: Vec<f32>) -> Option<u64> {
        if !self.enabled || samples.is_empty() {
            return None;
        }

        let now = self.output.now();
        if self.next_play_time < now {
            if self.stream_active {
                tracing::trace!(behind = now - self.next_play_time, "stream underrun, snapping to now");
            }
            self.next_play_time = now;
        }

        let start = self.next_play_time;
        self.next_play_time += samples.len() as u64;
        self.output.schedule(start, samples, false);
        self.stream_active = true;
        Some(start)
    }

    /// Clear the queue, cut the current clip and report `Drained`
    ///
    /// `Drained` fires only if something was playing or queued.
    pub fn interrupt(&mut self) {
        let was_active = self.is_active();
        self.halt();
        if was_active {
            tracing::debug!("playback interrupted");
            (self.emit)(PlaybackEvent::Drained);
        }
    }

    /// Clear the queue and cut the current clip without reporting `Drained`
    pub fn stop(&mut self) {
        self.halt();
    }

    fn halt(&mut self) {
        self.queue.clear();
        self.current = None;
        self.generation += 1;
        self.output.clear();
        self.next_play_time = 0;
        self.stream_active = false;
    }

    /// Enable or disable playback
    ///
    /// Disabling cuts in-flight audio as `interrupt` does.
    pub fn set_enabled(&mut self, enabled: bool) {
        if self.enabled == enabled {
            return;
        }
        self.enabled = enabled;
        tracing::info!(enabled, "playback toggled");
        if !enabled {
            self.interrupt();
        }
    }

    /// Whether playback is enabled
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Whether a clip is loading, playing or queued
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.current.is_some() || !self.queue.is_empty()
    }

    /// Clips waiting behind the current one
    #[must_use]
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Output sample rate
    #[must_use]
    pub fn sample_rate(&self) -> u32 {
        self.output.sample_rate()
    }
}
