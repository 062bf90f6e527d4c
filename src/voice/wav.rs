//! WAV container encoding and parsing
//!
//! Captured utterances are uploaded as 16-bit little-endian mono PCM in a
//! standard 44-byte-header container so any transcription consumer can read them.

use std::io::Cursor;

use crate::{Error, Result};

/// Size of the canonical PCM WAV header
pub const WAV_HEADER_LEN: usize = 44;

/// Decoded WAV payload
#[derive(Debug, Clone, PartialEq)]
pub struct WavAudio {
    /// Mono samples in [-1.0, 1.0]
    pub samples: Vec<f32>,
    /// Sample rate of the container
    pub sample_rate: u32,
    /// Channel count of the container (samples are already downmixed)
    pub channels: u16,
}

/// Convert f32 samples to WAV bytes for transcription
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::with_capacity(WAV_HEADER_LEN + samples.len() * 2));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for &sample in samples {
            writer.write_sample(f32_to_i16(sample))?;
        }
        writer.finalize()?;
    }

    Ok(cursor.into_inner())
}

/// Parse WAV bytes into mono f32 samples
///
/// Integer and float containers are accepted; multi-channel audio is averaged.
///
/// # Errors
///
/// Returns error if the container is malformed or uses an unsupported format
pub fn wav_to_samples(bytes: &[u8]) -> Result<WavAudio> {
    let mut reader = hound::WavReader::new(Cursor::new(bytes))?;
    let spec = reader.spec();

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect::<std::result::Result<_, _>>()?,
        hound::SampleFormat::Int => {
            if spec.bits_per_sample == 0 || spec.bits_per_sample > 32 {
                return Err(Error::Clip(format!(
                    "unsupported bit depth: {}",
                    spec.bits_per_sample
                )));
            }
            #[allow(clippy::cast_precision_loss)]
            let scale = (1_i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| int_to_f32(v, scale)))
                .collect::<std::result::Result<_, _>>()?
        }
    };

    Ok(WavAudio {
        samples: downmix(&interleaved, usize::from(spec.channels)),
        sample_rate: spec.sample_rate,
        channels: spec.channels,
    })
}

/// Convert a sample in [-1.0, 1.0] to i16
///
/// Uses the same 32768 scale as decoding, rounded to the nearest step.
#[allow(clippy::cast_possible_truncation)]
#[must_use]
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample * 32768.0).round().clamp(-32768.0, 32767.0) as i16
}

#[allow(clippy::cast_precision_loss)]
fn int_to_f32(value: i32, scale: f32) -> f32 {
    value as f32 / scale
}

/// Average interleaved channels into mono
#[must_use]
pub fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }

    #[allow(clippy::cast_precision_loss)]
    let divisor = channels as f32;
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / divisor)
        .collect()
}
