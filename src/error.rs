//! Error types for beacon-voice

use thiserror::Error;

/// Result type alias for beacon-voice operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the voice core
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Microphone access was refused by the OS or no input device exists
    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),

    /// Required encoder or decoder is not available on this platform
    #[error("codec unsupported: {0}")]
    CodecUnsupported(String),

    /// Audio device or stream error
    #[error("audio error: {0}")]
    Audio(String),

    /// Encoding or decoding of a single frame failed
    #[error("codec error: {0}")]
    Codec(String),

    /// Malformed wire frame
    #[error("malformed frame: {0}")]
    Frame(String),

    /// Speech boundary detector failed to initialize
    #[error("vad error: {0}")]
    Vad(String),

    /// Playback clip could not be loaded or decoded
    #[error("clip error: {0}")]
    Clip(String),

    /// Transport channel error
    #[error("transport error: {0}")]
    Transport(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// WAV container error
    #[error("wav error: {0}")]
    Wav(#[from] hound::Error),
}

impl Error {
    /// Whether this error aborts the current activation attempt
    ///
    /// Permission and initialization failures are fatal; everything else is
    /// absorbed by the session and resolved to a resting state.
    #[must_use]
    pub const fn is_fatal_init(&self) -> bool {
        matches!(self, Self::PermissionDenied(_) | Self::Audio(_) | Self::Vad(_))
    }

    /// Plain-language description suitable for a status line
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::PermissionDenied(_) => {
                "Microphone access was denied. Allow microphone access and try again.".to_string()
            }
            Self::CodecUnsupported(_) => {
                "Full-duplex audio is not supported here. Switched to wake-word mode.".to_string()
            }
            Self::Audio(msg) => format!("Audio device problem: {msg}"),
            Self::Vad(msg) => format!("Speech detector failed to start: {msg}"),
            Self::Transport(msg) => format!("Connection problem: {msg}"),
            other => other.to_string(),
        }
    }
}
