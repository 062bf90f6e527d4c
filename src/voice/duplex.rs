//! Full-duplex audio streaming
//!
//! Capture path: microphone → fixed 80 ms frames → encoder → emitter.
//! Receive path: encoded packet → decoder → PCM for the playback scheduler.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::Emitter;
use super::capture::{FrameChunker, Microphone};
use super::codec::{CodecBackend, CodecParams, FrameDecoder, FrameEncoder};
use crate::Result;
use crate::config::DuplexConfig;

/// One encoded outbound frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    /// Encoded packet
    pub bytes: Vec<u8>,
    /// Stream time of the first sample, in microseconds
    pub timestamp_us: u64,
}

struct EncodeState {
    chunker: FrameChunker,
    encoder: Box<dyn FrameEncoder>,
    frame_duration_us: u64,
    emitted: u64,
}

impl Drop for EncodeState {
    fn drop(&mut self) {
        self.encoder.close();
    }
}

/// Continuous capture/encode and decode pipeline for duplex mode
pub struct DuplexAudioStreamer {
    config: DuplexConfig,
    microphone: Box<dyn Microphone>,
    backend: Arc<dyn CodecBackend>,
    decoder: Option<Box<dyn FrameDecoder>>,
    paused: Arc<AtomicBool>,
    emit: Emitter<AudioFrame>,
    running: bool,
}

impl DuplexAudioStreamer {
    /// Create a streamer (nothing is acquired until `start`)
    pub fn new(
        config: DuplexConfig,
        microphone: Box<dyn Microphone>,
        backend: Arc<dyn CodecBackend>,
        emit: Emitter<AudioFrame>,
    ) -> Self {
        Self {
            config,
            microphone,
            backend,
            decoder: None,
            paused: Arc::new(AtomicBool::new(false)),
            emit,
            running: false,
        }
    }

    /// Configure the codec, acquire the microphone and start emitting frames
    ///
    /// No-op if already streaming.
    ///
    /// # Errors
    ///
    /// Returns `Error::CodecUnsupported` if no encoder/decoder is available and
    /// `Error::PermissionDenied` if the microphone is refused
    pub fn start(&mut self) -> Result<()> {
        if self.running {
            return Ok(());
        }

        let params = CodecParams::from_config(&self.config);

        let mut encoder = self.backend.encoder()?;
        encoder.configure(&params)?;
        let mut decoder = self.backend.decoder()?;
        decoder.configure(&params)?;

        let mut state = EncodeState {
            chunker: FrameChunker::new(params.frame_samples),
            encoder,
            frame_duration_us: u64::from(self.config.frame_ms) * 1000,
            emitted: 0,
        };

        self.paused.store(false, Ordering::SeqCst);
        let paused = Arc::clone(&self.paused);
        let emit = Arc::clone(&self.emit);

        if let Err(e) = self.microphone.open(
            self.config.sample_rate,
            Box::new(move |samples: &[f32]| {
                let EncodeState {
                    chunker,
                    encoder,
                    frame_duration_us,
                    emitted,
                } = &mut state;

                chunker.push(samples, |frame| {
                    if paused.load(Ordering::SeqCst) {
                        return;
                    }
                    match encoder.encode(frame) {
                        Ok(bytes) => {
                            let timestamp_us = *emitted * *frame_duration_us;
                            *emitted += 1;
                            emit(AudioFrame {
                                bytes,
                                timestamp_us,
                            });
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "dropping frame that failed to encode");
                        }
                    }
                });
            }),
        ) {
            decoder.close();
            return Err(e);
        }

        self.decoder = Some(decoder);
        self.running = true;
        tracing::info!(
            codec = self.backend.name(),
            sample_rate = self.config.sample_rate,
            frame_samples = params.frame_samples,
            "duplex streaming started"
        );
        Ok(())
    }

    /// Stop emitting frames; the capture graph keeps running
    pub fn pause(&self) {
        if !self.paused.swap(true, Ordering::SeqCst) {
            tracing::debug!("duplex send paused");
        }
    }

    /// Resume emitting frames
    pub fn resume(&self) {
        if self.paused.swap(false, Ordering::SeqCst) {
            tracing::debug!("duplex send resumed");
        }
    }

    /// Decode an inbound packet
    ///
    /// Corrupt packets are dropped with a warning so later frames still play.
    pub fn decode(&mut self, bytes: &[u8]) -> Option<Vec<f32>> {
        let decoder = self.decoder.as_mut()?;
        match decoder.decode(bytes) {
            Ok(pcm) => Some(pcm),
            Err(e) => {
                tracing::warn!(error = %e, len = bytes.len(), "dropping undecodable frame");
                None
            }
        }
    }

    /// Tear down encoder, decoder and microphone; idempotent
    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        self.microphone.close();
        if let Some(mut decoder) = self.decoder.take() {
            decoder.close();
        }
        self.paused.store(false, Ordering::SeqCst);
        self.running = false;
        tracing::info!("duplex streaming stopped");
    }

    /// Whether the streamer holds the microphone
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.running
    }

    /// Whether frame emission is suspended
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Sample rate of decoded PCM
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }

    /// Samples per frame
    #[must_use]
    pub const fn frame_samples(&self) -> usize {
        self.config.frame_samples()
    }
}

impl Drop for DuplexAudioStreamer {
    fn drop(&mut self) {
        self.stop();
    }
}
