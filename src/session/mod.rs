//! Voice session orchestration
//!
//! The [`VoiceSession`] is the only writer of session state. Every input
//! (detector boundaries, encoded frames, playback completion, remote events
//! and UI commands) arrives as a [`SessionEvent`] on one queue.

mod machine;
pub mod notify;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::Error;
use crate::transport::RemoteEvent;
use crate::voice::{AudioFrame, DetectorEvent, PlaybackEvent};

pub use machine::{SessionParts, VoiceSession};
pub use notify::{BroadcastNotifier, Notification, Notifier};

/// Interaction model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Wake-word gated commands
    #[default]
    Command,
    /// Continuous speech-to-speech streaming
    Duplex,
}

impl Mode {
    /// The other mode
    #[must_use]
    pub const fn toggled(self) -> Self {
        match self {
            Self::Command => Self::Duplex,
            Self::Duplex => Self::Command,
        }
    }

    /// Lowercase name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Command => "command",
            Self::Duplex => "duplex",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "command" | "wake" | "wake_word" => Ok(Self::Command),
            "duplex" | "full_duplex" | "full-duplex" => Ok(Self::Duplex),
            other => Err(Error::Config(format!("unknown voice mode: {other}"))),
        }
    }
}

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Not active
    #[default]
    Idle,
    /// Waiting for speech (command mode)
    Listening,
    /// Speech in progress
    Capturing,
    /// Utterance uploaded, awaiting transcript
    Processing,
    /// Command sent, awaiting response
    Thinking,
    /// Playing response audio
    Speaking,
    /// Activation failed; reverts to idle
    Error,
    /// Streaming full-duplex audio
    DuplexActive,
}

impl SessionState {
    /// Whether a session is running (capture resources held)
    #[must_use]
    pub const fn is_active(self) -> bool {
        !matches!(self, Self::Idle | Self::Error)
    }

    /// Short human-readable description
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::Idle => "Voice off",
            Self::Listening => "Listening for the wake word",
            Self::Capturing => "Hearing you",
            Self::Processing => "Transcribing",
            Self::Thinking => "Thinking",
            Self::Speaking => "Speaking",
            Self::Error => "Voice error",
            Self::DuplexActive => "Conversation mode",
        }
    }

    /// Snake-case name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Listening => "listening",
            Self::Capturing => "capturing",
            Self::Processing => "processing",
            Self::Thinking => "thinking",
            Self::Speaking => "speaking",
            Self::Error => "error",
            Self::DuplexActive => "duplex_active",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of the session for observers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub mode: Mode,
    pub active: bool,
}

/// Commands from the UI side channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Activate,
    Deactivate,
    ToggleMode,
    SetMode(Mode),
    SetPlayback(bool),
}

/// Everything the session reacts to
#[derive(Debug)]
pub enum SessionEvent {
    /// Speech boundary from the detector
    Detector(DetectorEvent),
    /// Encoded outbound duplex frame
    DuplexFrame(AudioFrame),
    /// Playback scheduler progress
    Playback(PlaybackEvent),
    /// Inbound transport event
    Remote(RemoteEvent),
    /// UI command
    Control(ControlCommand),
    /// Transport connection ended
    TransportClosed,
}
