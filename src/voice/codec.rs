//! Frame codec capability interfaces
//!
//! The duplex pipeline only depends on [`FrameEncoder`] and [`FrameDecoder`];
//! a [`CodecBackend`] is chosen at startup. The Opus backend is compiled in
//! with the `opus` feature, otherwise every construction reports
//! `Error::CodecUnsupported` and the session falls back to command mode.

use crate::{Error, Result};

/// Parameters shared by encoder and decoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecParams {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Samples per frame
    pub frame_samples: usize,
    /// Target bitrate in bits per second
    pub bitrate: i32,
}

impl CodecParams {
    /// Parameters from duplex configuration
    #[must_use]
    pub const fn from_config(config: &crate::config::DuplexConfig) -> Self {
        Self {
            sample_rate: config.sample_rate,
            frame_samples: config.frame_samples(),
            bitrate: config.bitrate,
        }
    }
}

/// Encodes fixed-size PCM frames into compact packets
pub trait FrameEncoder: Send {
    /// Apply parameters; must be called before `encode`
    ///
    /// # Errors
    ///
    /// Returns `Error::CodecUnsupported` if the parameters cannot be honoured
    fn configure(&mut self, params: &CodecParams) -> Result<()>;

    /// Encode one frame of mono PCM
    ///
    /// # Errors
    ///
    /// Returns `Error::Codec` if the frame cannot be encoded
    fn encode(&mut self, pcm: &[f32]) -> Result<Vec<u8>>;

    /// Release codec resources
    fn close(&mut self);
}

/// Decodes packets back into mono PCM
pub trait FrameDecoder: Send {
    /// Apply parameters; must be called before `decode`
    ///
    /// # Errors
    ///
    /// Returns `Error::CodecUnsupported` if the parameters cannot be honoured
    fn configure(&mut self, params: &CodecParams) -> Result<()>;

    /// Decode one packet
    ///
    /// # Errors
    ///
    /// Returns `Error::Codec` for corrupt packets
    fn decode(&mut self, frame: &[u8]) -> Result<Vec<f32>>;

    /// Release codec resources
    fn close(&mut self);
}

/// Factory for codec instances
pub trait CodecBackend: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &'static str;

    /// Create an encoder
    ///
    /// # Errors
    ///
    /// Returns `Error::CodecUnsupported` if this platform has no encoder
    fn encoder(&self) -> Result<Box<dyn FrameEncoder>>;

    /// Create a decoder
    ///
    /// # Errors
    ///
    /// Returns `Error::CodecUnsupported` if this platform has no decoder
    fn decoder(&self) -> Result<Box<dyn FrameDecoder>>;
}

/// Backend used when no codec is compiled in
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedBackend;

impl CodecBackend for UnsupportedBackend {
    fn name(&self) -> &'static str {
        "none"
    }

    fn encoder(&self) -> Result<Box<dyn FrameEncoder>> {
        Err(Error::CodecUnsupported(
            "built without an audio encoder".to_string(),
        ))
    }

    fn decoder(&self) -> Result<Box<dyn FrameDecoder>> {
        Err(Error::CodecUnsupported(
            "built without an audio decoder".to_string(),
        ))
    }
}

/// Best available backend for this build
#[must_use]
pub fn default_backend() -> std::sync::Arc<dyn CodecBackend> {
    #[cfg(feature = "opus")]
    {
        std::sync::Arc::new(opus::OpusBackend)
    }
    #[cfg(not(feature = "opus"))]
    {
        std::sync::Arc::new(UnsupportedBackend)
    }
}

#[cfg(feature = "opus")]
pub use opus::{OpusBackend, OpusDecoder, OpusEncoder};

#[cfg(feature = "opus")]
mod opus {
    use audiopus::coder::{Decoder, Encoder};
    use audiopus::{Application, Bitrate, Channels, SampleRate};

    use super::{CodecBackend, CodecParams, FrameDecoder, FrameEncoder};
    use crate::{Error, Result};

    /// Largest packet libopus produces for a single frame
    const MAX_PACKET: usize = 4000;

    /// Longest frame libopus decodes (120 ms at 48 kHz)
    const MAX_FRAME_SAMPLES: usize = 5760;

    fn sample_rate(hz: u32) -> Result<SampleRate> {
        i32::try_from(hz)
            .ok()
            .and_then(|hz| SampleRate::try_from(hz).ok())
            .ok_or_else(|| Error::CodecUnsupported(format!("opus cannot run at {hz} Hz")))
    }

    /// Opus via libopus
    #[derive(Debug, Default, Clone, Copy)]
    pub struct OpusBackend;

    impl CodecBackend for OpusBackend {
        fn name(&self) -> &'static str {
            "opus"
        }

        fn encoder(&self) -> Result<Box<dyn FrameEncoder>> {
            Ok(Box::new(OpusEncoder::default()))
        }

        fn decoder(&self) -> Result<Box<dyn FrameDecoder>> {
            Ok(Box::new(OpusDecoder::default()))
        }
    }

    /// Mono Opus encoder tuned for speech
    #[derive(Default)]
    pub struct OpusEncoder {
        inner: Option<Encoder>,
        packet: Vec<u8>,
    }

    impl FrameEncoder for OpusEncoder {
        fn configure(&mut self, params: &CodecParams) -> Result<()> {
            let mut encoder = Encoder::new(
                sample_rate(params.sample_rate)?,
                Channels::Mono,
                Application::Voip,
            )
            .map_err(|e| Error::CodecUnsupported(e.to_string()))?;
            encoder
                .set_bitrate(Bitrate::BitsPerSecond(params.bitrate))
                .map_err(|e| Error::CodecUnsupported(e.to_string()))?;

            self.inner = Some(encoder);
            self.packet = vec![0; MAX_PACKET];
            tracing::debug!(
                sample_rate = params.sample_rate,
                bitrate = params.bitrate,
                "opus encoder configured"
            );
            Ok(())
        }

        fn encode(&mut self, pcm: &[f32]) -> Result<Vec<u8>> {
            let encoder = self
                .inner
                .as_ref()
                .ok_or_else(|| Error::Codec("encoder not configured".to_string()))?;
            let len = encoder
                .encode_float(pcm, &mut self.packet)
                .map_err(|e| Error::Codec(e.to_string()))?;
            Ok(self.packet[..len].to_vec())
        }

        fn close(&mut self) {
            self.inner = None;
        }
    }

    /// Mono Opus decoder
    #[derive(Default)]
    pub struct OpusDecoder {
        inner: Option<Decoder>,
        pcm: Vec<f32>,
    }

    impl FrameDecoder for OpusDecoder {
        fn configure(&mut self, params: &CodecParams) -> Result<()> {
            let decoder = Decoder::new(sample_rate(params.sample_rate)?, Channels::Mono)
                .map_err(|e| Error::CodecUnsupported(e.to_string()))?;
            self.inner = Some(decoder);
            self.pcm = vec![0.0; MAX_FRAME_SAMPLES];
            Ok(())
        }

        fn decode(&mut self, frame: &[u8]) -> Result<Vec<f32>> {
            let decoder = self
                .inner
                .as_mut()
                .ok_or_else(|| Error::Codec("decoder not configured".to_string()))?;
            let packet = frame
                .try_into()
                .map_err(|e: audiopus::Error| Error::Codec(e.to_string()))?;
            let output = (&mut self.pcm[..])
                .try_into()
                .map_err(|e: audiopus::Error| Error::Codec(e.to_string()))?;
            let len = decoder
                .decode_float(Some(packet), output, false)
                .map_err(|e| Error::Codec(e.to_string()))?;
            Ok(self.pcm[..len].to_vec())
        }

        fn close(&mut self) {
            self.inner = None;
        }
    }

}
