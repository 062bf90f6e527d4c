//! Response clip loading
//!
//! Command-mode responses reference pre-rendered clips. A [`ClipLoader`]
//! resolves the reference, decodes WAV or MP3, and resamples to the output rate.

use std::path::Path;

use async_trait::async_trait;
use url::Url;

use super::wav::wav_to_samples;
use crate::{Error, Result};

/// Resolves a clip reference to mono PCM at the output sample rate
#[async_trait]
pub trait ClipLoader: Send + Sync {
    /// Fetch and decode a clip
    ///
    /// # Errors
    ///
    /// Returns error if the clip cannot be fetched or decoded
    async fn load(&self, reference: &str) -> Result<Vec<f32>>;
}

/// Loads clips over HTTP(S) or from the local filesystem
pub struct HttpClipLoader {
    client: reqwest::Client,
    base: Option<Url>,
    target_rate: u32,
}

impl HttpClipLoader {
    /// Create a loader; relative references are joined against `base`
    #[must_use]
    pub fn new(base: Option<Url>, target_rate: u32) -> Self {
        Self {
            client: reqwest::Client::new(),
            base,
            target_rate,
        }
    }

    async fn fetch(&self, reference: &str) -> Result<Vec<u8>> {
        match resolve(reference, self.base.as_ref())? {
            ClipSource::Remote(url) => {
                tracing::debug!(url = %url, "downloading clip");
                let response = self.client.get(url.clone()).send().await?;

                if !response.status().is_success() {
                    return Err(Error::Clip(format!(
                        "download of {url} failed: {}",
                        response.status()
                    )));
                }

                Ok(response.bytes().await?.to_vec())
            }
            ClipSource::File(path) => Ok(tokio::fs::read(&path).await?),
        }
    }
}

#[async_trait]
impl ClipLoader for HttpClipLoader {
    async fn load(&self, reference: &str) -> Result<Vec<f32>> {
        let bytes = self.fetch(reference).await?;
        let (samples, sample_rate) = decode_clip(&bytes)?;

        if sample_rate == self.target_rate {
            return Ok(samples);
        }
        resample(&samples, sample_rate, self.target_rate)
    }
}

/// Where a clip reference points
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClipSource {
    /// HTTP(S) URL
    Remote(Url),
    /// Local file
    File(std::path::PathBuf),
}

/// Resolve a clip reference
///
/// # Errors
///
/// Returns error if the reference is relative and no base URL is known
pub fn resolve(reference: &str, base: Option<&Url>) -> Result<ClipSource> {
    if let Ok(url) = Url::parse(reference) {
        return match url.scheme() {
            "http" | "https" => Ok(ClipSource::Remote(url)),
            "file" => url
                .to_file_path()
                .map(ClipSource::File)
                .map_err(|()| Error::Clip(format!("invalid file url: {reference}"))),
            other => Err(Error::Clip(format!("unsupported clip scheme: {other}"))),
        };
    }

    if Path::new(reference).is_absolute() {
        return Ok(ClipSource::File(reference.into()));
    }

    let base = base.ok_or_else(|| {
        Error::Clip(format!("relative clip reference without base url: {reference}"))
    })?;
    base.join(reference)
        .map(ClipSource::Remote)
        .map_err(|e| Error::Clip(format!("invalid clip reference {reference}: {e}")))
}

/// Decode a WAV or MP3 payload to mono samples and its sample rate
///
/// # Errors
///
/// Returns error if the payload is neither
pub fn decode_clip(bytes: &[u8]) -> Result<(Vec<f32>, u32)> {
    if bytes.starts_with(b"RIFF") {
        let wav = wav_to_samples(bytes)?;
        return Ok((wav.samples, wav.sample_rate));
    }
    decode_mp3(bytes)
}

/// Decode MP3 bytes to mono f32 samples
#[allow(clippy::cast_sign_loss)]
fn decode_mp3(mp3_data: &[u8]) -> Result<(Vec<f32>, u32)> {
    let mut decoder = minimp3::Decoder::new(mp3_data);
    let mut samples = Vec::new();
    let mut sample_rate = 0_u32;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                sample_rate = frame.sample_rate as u32;
                if frame.channels == 2 {
                    for chunk in frame.data.chunks(2) {
                        let right = chunk.get(1).copied().unwrap_or(chunk[0]);
                        samples.push(f32::midpoint(f32::from(chunk[0]), f32::from(right)) / 32768.0);
                    }
                } else {
                    samples.extend(frame.data.iter().map(|&s| f32::from(s) / 32768.0));
                }
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Clip(format!("MP3 decode error: {e}"))),
        }
    }

    if sample_rate == 0 {
        return Err(Error::Clip("clip is neither WAV nor MP3".to_string()));
    }
    Ok((samples, sample_rate))
}

/// Resample a whole clip with rubato
///
/// # Errors
///
/// Returns error if the resampler cannot be built
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    use rubato::{FftFixedIn, Resampler};

    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let chunk_size = 1024;
    let sub_chunks = 2;

    let mut resampler =
        FftFixedIn::<f64>::new(from_rate as usize, to_rate as usize, chunk_size, sub_chunks, 1)
            .map_err(|e| Error::Clip(format!("resampler init failed: {e}")))?;
    let delay = resampler.output_delay();
    let expected = (samples.len() as f64 * f64::from(to_rate) / f64::from(from_rate)).round() as usize;

    let mut output = Vec::with_capacity(expected + delay);
    let mut input: Vec<f64> = samples.iter().map(|&s| f64::from(s)).collect();

    // zero tail flushes the partial last chunk and the filter delay
    let needed = ((expected + delay) as f64 * f64::from(from_rate) / f64::from(to_rate)).ceil() as usize;
    let padded = needed.max(input.len()).div_ceil(chunk_size) * chunk_size + chunk_size;
    input.resize(padded, 0.0);

    for chunk in input.chunks(chunk_size) {
        let result = resampler
            .process(&[chunk], None)
            .map_err(|e| Error::Clip(format!("resample failed: {e}")))?;
        output.extend(result[0].iter().map(|&s| s as f32));
        if output.len() >= expected + delay {
            break;
        }
    }

    output.drain(..delay.min(output.len()));
    output.truncate(expected);
    Ok(output)
}

/// Resamples a continuous stream chunk by chunk
///
/// Filter state carries across calls, so consecutive chunks join without
/// edge artifacts. Input that does not fill a resampler chunk waits for the next call.
pub struct StreamResampler {
    resampler: rubato::FftFixedIn<f32>,
    pending: Vec<f32>,
    from_rate: u32,
    to_rate: u32,
}

impl StreamResampler {
    /// Build a resampler consuming `chunk_size` input samples per step
    ///
    /// # Errors
    ///
    /// Returns error if the resampler cannot be built
    pub fn new(from_rate: u32, to_rate: u32, chunk_size: usize) -> Result<Self> {
        let resampler = rubato::FftFixedIn::<f32>::new(
            from_rate as usize,
            to_rate as usize,
            chunk_size.max(1),
            1,
            1,
        )
        .map_err(|e| Error::Clip(format!("resampler init failed: {e}")))?;

        Ok(Self {
            resampler,
            pending: Vec::with_capacity(chunk_size * 2),
            from_rate,
            to_rate,
        })
    }

    /// Whether this resampler converts between the given rates
    #[must_use]
    pub const fn converts(&self, from_rate: u32, to_rate: u32) -> bool {
        self.from_rate == from_rate && self.to_rate == to_rate
    }

    /// Feed input and return every output sample now available
    ///
    /// # Errors
    ///
    /// Returns error if the resampler rejects a chunk
    pub fn process(&mut self, samples: &[f32]) -> Result<Vec<f32>> {
        use rubato::Resampler;

        self.pending.extend_from_slice(samples);

        let mut output = Vec::new();
        loop {
            let needed = self.resampler.input_frames_next();
            if self.pending.len() < needed {
                break;
            }
            let chunk: Vec<f32> = self.pending.drain(..needed).collect();
            let result = self
                .resampler
                .process(&[chunk], None)
                .map_err(|e| Error::Clip(format!("resample failed: {e}")))?;
            output.extend_from_slice(&result[0]);
        }
        Ok(output)
    }
}
