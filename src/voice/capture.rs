//! Audio capture from microphone

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BuildStreamError, SampleRate, Stream, StreamConfig};

use super::wav::downmix;
use crate::{Error, Result};

/// Receives captured mono samples on the capture thread
pub type SampleSink = Box<dyn FnMut(&[f32]) + Send + 'static>;

/// A microphone that delivers mono f32 samples to a sink
///
/// `open` acquires the device; `close` releases it and must be idempotent.
pub trait Microphone {
    /// Open the device at `sample_rate` and start delivering samples
    ///
    /// # Errors
    ///
    /// Returns `Error::PermissionDenied` if access is refused or no input
    /// device exists, `Error::Audio` for other device failures
    fn open(&mut self, sample_rate: u32, sink: SampleSink) -> Result<()>;

    /// Stop capturing and release the device
    fn close(&mut self);

    /// Whether the device is currently open
    fn is_open(&self) -> bool;
}

/// Captures audio from the default input device
#[derive(Default)]
pub struct CpalMicrophone {
    stream: Option<Stream>,
}

impl CpalMicrophone {
    /// Create a new microphone handle (the device is acquired on `open`)
    #[must_use]
    pub const fn new() -> Self {
        Self { stream: None }
    }
}

impl Microphone for CpalMicrophone {
    fn open(&mut self, sample_rate: u32, mut sink: SampleSink) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| Error::PermissionDenied("no input device available".to_string()))?;

        let supported = device
            .supported_input_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .filter(|c| {
                c.min_sample_rate() <= SampleRate(sample_rate)
                    && c.max_sample_rate() >= SampleRate(sample_rate)
            })
            .min_by_key(cpal::SupportedStreamConfigRange::channels)
            .ok_or_else(|| {
                Error::Audio(format!("no input config supports {sample_rate} Hz"))
            })?;

        let config: StreamConfig = supported.with_sample_rate(SampleRate(sample_rate)).config();
        let channels = usize::from(config.channels);

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate,
            channels,
            "audio capture initialized"
        );

        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if channels == 1 {
                        sink(data);
                    } else {
                        sink(&downmix(data, channels));
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio capture error");
                },
                None,
            )
            .map_err(map_build_error)?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;
        self.stream = Some(stream);

        tracing::debug!("audio capture started");
        Ok(())
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            tracing::debug!("audio capture stopped");
        }
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }
}

fn map_build_error(err: BuildStreamError) -> Error {
    match err {
        BuildStreamError::DeviceNotAvailable => {
            Error::PermissionDenied("input device not available".to_string())
        }
        BuildStreamError::BackendSpecific { err } => {
            let msg = err.to_string();
            if msg.to_lowercase().contains("permission") || msg.to_lowercase().contains("denied") {
                Error::PermissionDenied(msg)
            } else {
                Error::Audio(msg)
            }
        }
        other => Error::Audio(other.to_string()),
    }
}

/// Splits an arbitrary sample stream into fixed-length frames
#[derive(Debug, Clone)]
pub struct FrameChunker {
    frame_len: usize,
    pending: Vec<f32>,
}

impl FrameChunker {
    /// Create a chunker producing frames of `frame_len` samples
    #[must_use]
    pub fn new(frame_len: usize) -> Self {
        Self {
            frame_len: frame_len.max(1),
            pending: Vec::with_capacity(frame_len * 2),
        }
    }

    /// Append samples, calling `on_frame` for every completed frame
    pub fn push(&mut self, samples: &[f32], mut on_frame: impl FnMut(&[f32])) {
        self.pending.extend_from_slice(samples);
        let complete = self.pending.len() / self.frame_len * self.frame_len;
        for frame in self.pending[..complete].chunks_exact(self.frame_len) {
            on_frame(frame);
        }
        self.pending.drain(..complete);
    }

    /// Discard a partially filled frame
    pub fn clear(&mut self) {
        self.pending.clear();
    }

    /// Samples waiting for the next frame
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}
