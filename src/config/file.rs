//! TOML configuration file loading
//!
//! Supports `~/.config/omni/beacon-voice/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct VoiceConfigFile {
    /// Wake word and playback behaviour
    #[serde(default)]
    pub voice: VoiceFileConfig,

    /// Speech boundary detector thresholds
    #[serde(default)]
    pub vad: VadFileConfig,

    /// Full-duplex streaming settings
    #[serde(default)]
    pub duplex: DuplexFileConfig,

    /// Transport connection
    #[serde(default)]
    pub transport: TransportFileConfig,

    /// Control API server
    #[serde(default)]
    pub server: ServerFileConfig,

    /// Session timing
    #[serde(default)]
    pub session: SessionFileConfig,
}

/// Voice configuration
#[derive(Debug, Default, Deserialize)]
pub struct VoiceFileConfig {
    /// Wake token (e.g. "computer")
    pub wake_word: Option<String>,

    /// Interaction mode used on activation ("command" or "duplex")
    pub mode: Option<String>,

    /// Enable audio playback of responses
    pub playback: Option<bool>,

    /// Allow user speech to interrupt playback
    pub barge_in: Option<bool>,

    /// Output device sample rate
    pub output_sample_rate: Option<u32>,
}

/// Speech boundary detector configuration
#[derive(Debug, Default, Deserialize)]
pub struct VadFileConfig {
    pub sample_rate: Option<u32>,
    pub frame_ms: Option<u32>,
    pub speech_on_prob: Option<f32>,
    pub speech_off_prob: Option<f32>,
    pub end_silence_frames: Option<u32>,
    pub lead_pad_frames: Option<u32>,
    pub min_segment_frames: Option<u32>,
}

/// Duplex streaming configuration
#[derive(Debug, Default, Deserialize)]
pub struct DuplexFileConfig {
    pub sample_rate: Option<u32>,
    pub frame_ms: Option<u32>,
    pub bitrate: Option<i32>,
}

/// Transport configuration
#[derive(Debug, Default, Deserialize)]
pub struct TransportFileConfig {
    /// WebSocket URL of the assistant backend
    pub url: Option<String>,
}

/// Control API server configuration
#[derive(Debug, Default, Deserialize)]
pub struct ServerFileConfig {
    /// API server port
    pub port: Option<u16>,
}

/// Session timing configuration
#[derive(Debug, Default, Deserialize)]
pub struct SessionFileConfig {
    /// Seconds before the error state reverts to idle
    pub error_revert_secs: Option<u64>,
}

/// Load the TOML config file from the standard path
///
/// Returns `VoiceConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> VoiceConfigFile {
    config_file_path().map_or_else(VoiceConfigFile::default, |path| load_config_file_from(&path))
}

/// Load a TOML config file from an explicit path
///
/// Returns defaults if the file is missing or malformed.
pub fn load_config_file_from(path: &Path) -> VoiceConfigFile {
    if !path.exists() {
        return VoiceConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                VoiceConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            VoiceConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/omni/beacon-voice/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| {
        d.config_dir()
            .join("omni")
            .join("beacon-voice")
            .join("config.toml")
    })
}
