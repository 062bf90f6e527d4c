//! Configuration management for beacon-voice

pub mod file;

use std::time::Duration;

use url::Url;

use crate::session::Mode;
use crate::{Error, Result};

/// Default wake token
pub const DEFAULT_WAKE_WORD: &str = "computer";

/// beacon-voice configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Wake word and playback behaviour
    pub voice: VoiceConfig,

    /// Speech boundary detector thresholds
    pub vad: VadConfig,

    /// Full-duplex streaming settings
    pub duplex: DuplexConfig,

    /// Transport connection
    pub transport: TransportConfig,

    /// Control API server
    pub api_server: ApiServerConfig,

    /// Session timing
    pub session: SessionConfig,
}

/// Voice configuration
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// Wake token that must precede a spoken command
    pub wake_word: String,

    /// Interaction mode used on activation
    pub mode: Mode,

    /// Play response audio
    pub playback_enabled: bool,

    /// Deliver speech onsets while the assistant is speaking
    pub barge_in: bool,

    /// Output device sample rate
    pub output_sample_rate: u32,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            wake_word: DEFAULT_WAKE_WORD.to_string(),
            mode: Mode::Command,
            playback_enabled: true,
            barge_in: true,
            output_sample_rate: 24_000,
        }
    }
}

/// Speech boundary detector configuration
///
/// All thresholds are tunable; the defaults correspond to 30 ms frames at 16 kHz.
#[derive(Debug, Clone, PartialEq)]
pub struct VadConfig {
    /// Capture sample rate
    pub sample_rate: u32,

    /// Classification frame length in milliseconds
    pub frame_ms: u32,

    /// Probability above which a frame counts as speech
    pub speech_on_prob: f32,

    /// Probability below which a frame counts as silence
    pub speech_off_prob: f32,

    /// Consecutive silent frames that close a segment
    pub end_silence_frames: u32,

    /// Frames retained before the onset
    pub lead_pad_frames: u32,

    /// Segments with fewer speech frames are discarded
    pub min_segment_frames: u32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            frame_ms: 30,
            speech_on_prob: 0.5,
            speech_off_prob: 0.2,
            end_silence_frames: 12,
            lead_pad_frames: 8,
            min_segment_frames: 3,
        }
    }
}

impl VadConfig {
    /// Samples per classification frame
    #[must_use]
    pub const fn frame_samples(&self) -> usize {
        (self.sample_rate as usize * self.frame_ms as usize) / 1000
    }

    /// Check threshold consistency
    ///
    /// # Errors
    ///
    /// Returns error if probabilities are out of range, lack hysteresis, or
    /// frame counts are zero
    pub fn validate(&self) -> Result<()> {
        let in_range = |p: f32| (0.0..=1.0).contains(&p);
        if !in_range(self.speech_on_prob) || !in_range(self.speech_off_prob) {
            return Err(Error::Config(
                "vad probabilities must be within [0, 1]".to_string(),
            ));
        }
        if self.speech_off_prob >= self.speech_on_prob {
            return Err(Error::Config(format!(
                "vad speech_off_prob ({}) must be below speech_on_prob ({})",
                self.speech_off_prob, self.speech_on_prob
            )));
        }
        if self.end_silence_frames == 0 || self.min_segment_frames == 0 {
            return Err(Error::Config(
                "vad frame counts must be non-zero".to_string(),
            ));
        }
        if self.frame_samples() == 0 {
            return Err(Error::Config("vad frame is empty".to_string()));
        }
        Ok(())
    }
}

/// Full-duplex streaming configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplexConfig {
    /// Capture and playback sample rate
    pub sample_rate: u32,

    /// Frame duration in milliseconds
    pub frame_ms: u32,

    /// Encoder bitrate in bits per second
    pub bitrate: i32,
}

impl Default for DuplexConfig {
    fn default() -> Self {
        Self {
            sample_rate: 24_000,
            frame_ms: 80,
            bitrate: 32_000,
        }
    }
}

impl DuplexConfig {
    /// Samples per frame (1920 at 24 kHz / 80 ms)
    #[must_use]
    pub const fn frame_samples(&self) -> usize {
        (self.sample_rate as usize * self.frame_ms as usize) / 1000
    }
}

/// Transport configuration
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// WebSocket URL of the assistant backend
    pub url: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:8765/voice".to_string(),
        }
    }
}

impl TransportConfig {
    /// HTTP base URL matching the WebSocket endpoint (for relative clip references)
    #[must_use]
    pub fn http_base(&self) -> Option<Url> {
        let mut url = Url::parse(&self.url).ok()?;
        let scheme = match url.scheme() {
            "wss" => "https",
            "ws" => "http",
            other => other,
        }
        .to_string();
        url.set_scheme(&scheme).ok()?;
        url.set_path("/");
        url.set_query(None);
        Some(url)
    }
}

/// Control API server configuration
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// Port to listen on
    pub port: u16,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self { port: 18_791 }
    }
}

/// Session timing configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Delay before the error state reverts to idle
    pub error_revert: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            error_revert: Duration::from_secs(8),
        }
    }
}

/// Values supplied on the command line (highest priority)
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub transport_url: Option<String>,
    pub port: Option<u16>,
    pub mode: Option<Mode>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            voice: VoiceConfig::default(),
            vad: VadConfig::default(),
            duplex: DuplexConfig::default(),
            transport: TransportConfig::default(),
            api_server: ApiServerConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration (env > toml > default)
    ///
    /// # Errors
    ///
    /// Returns error if the resulting configuration is invalid
    pub fn load() -> Result<Self> {
        Self::load_with_overrides(&Overrides::default())
    }

    /// Load configuration with command-line overrides applied on top
    ///
    /// # Errors
    ///
    /// Returns error if the resulting configuration is invalid
    pub fn load_with_overrides(overrides: &Overrides) -> Result<Self> {
        let fc = file::load_config_file();
        let mut config = Self::from_file(fc)?;

        if let Ok(url) = std::env::var("BEACON_VOICE_TRANSPORT_URL") {
            config.transport.url = url;
        }
        if let Some(port) = std::env::var("BEACON_VOICE_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            config.api_server.port = port;
        }
        if let Ok(wake_word) = std::env::var("BEACON_VOICE_WAKE_WORD") {
            config.voice.wake_word = wake_word;
        }
        if let Ok(mode) = std::env::var("BEACON_VOICE_MODE") {
            config.voice.mode = mode.parse()?;
        }
        if let Ok(v) = std::env::var("BEACON_VOICE_PLAYBACK") {
            config.voice.playback_enabled = v == "1" || v.eq_ignore_ascii_case("true");
        }

        if let Some(url) = &overrides.transport_url {
            config.transport.url.clone_from(url);
        }
        if let Some(port) = overrides.port {
            config.api_server.port = port;
        }
        if let Some(mode) = overrides.mode {
            config.voice.mode = mode;
        }

        config.validate()?;
        Ok(config)
    }

    /// Build configuration from a parsed file overlaid on defaults
    ///
    /// # Errors
    ///
    /// Returns error if a value in the file cannot be interpreted
    pub fn from_file(fc: file::VoiceConfigFile) -> Result<Self> {
        let defaults = Self::default();

        let mode = match fc.voice.mode {
            Some(m) => m.parse()?,
            None => defaults.voice.mode,
        };

        let voice = VoiceConfig {
            wake_word: fc.voice.wake_word.unwrap_or(defaults.voice.wake_word),
            mode,
            playback_enabled: fc.voice.playback.unwrap_or(defaults.voice.playback_enabled),
            barge_in: fc.voice.barge_in.unwrap_or(defaults.voice.barge_in),
            output_sample_rate: fc
                .voice
                .output_sample_rate
                .unwrap_or(defaults.voice.output_sample_rate),
        };

        let vad = VadConfig {
            sample_rate: fc.vad.sample_rate.unwrap_or(defaults.vad.sample_rate),
            frame_ms: fc.vad.frame_ms.unwrap_or(defaults.vad.frame_ms),
            speech_on_prob: fc.vad.speech_on_prob.unwrap_or(defaults.vad.speech_on_prob),
            speech_off_prob: fc.vad.speech_off_prob.unwrap_or(defaults.vad.speech_off_prob),
            end_silence_frames: fc
                .vad
                .end_silence_frames
                .unwrap_or(defaults.vad.end_silence_frames),
            lead_pad_frames: fc.vad.lead_pad_frames.unwrap_or(defaults.vad.lead_pad_frames),
            min_segment_frames: fc
                .vad
                .min_segment_frames
                .unwrap_or(defaults.vad.min_segment_frames),
        };

        let duplex = DuplexConfig {
            sample_rate: fc.duplex.sample_rate.unwrap_or(defaults.duplex.sample_rate),
            frame_ms: fc.duplex.frame_ms.unwrap_or(defaults.duplex.frame_ms),
            bitrate: fc.duplex.bitrate.unwrap_or(defaults.duplex.bitrate),
        };

        Ok(Self {
            voice,
            vad,
            duplex,
            transport: TransportConfig {
                url: fc.transport.url.unwrap_or(defaults.transport.url),
            },
            api_server: ApiServerConfig {
                port: fc.server.port.unwrap_or(defaults.api_server.port),
            },
            session: SessionConfig {
                error_revert: fc
                    .session
                    .error_revert_secs
                    .map_or(defaults.session.error_revert, Duration::from_secs),
            },
        })
    }

    /// Validate cross-field constraints
    ///
    /// # Errors
    ///
    /// Returns error describing the first invalid setting
    pub fn validate(&self) -> Result<()> {
        self.vad.validate()?;
        if self.voice.wake_word.trim().is_empty() {
            return Err(Error::Config("wake word must not be empty".to_string()));
        }
        if self.duplex.frame_samples() == 0 {
            return Err(Error::Config("duplex frame is empty".to_string()));
        }
        Url::parse(&self.transport.url)
            .map_err(|e| Error::Config(format!("invalid transport url: {e}")))?;
        Ok(())
    }
}
