//! Transport protocol
//!
//! Structured events travel as JSON envelopes `{"event": name, "data": {...}}`.
//! Binary messages are tagged duplex frames inbound, and tagged duplex frames
//! or untagged WAV uploads outbound.

mod client;

use serde::{Deserialize, Serialize};

use crate::session::Mode;
use crate::voice::TaggedFrame;

pub use client::TransportClient;

/// Why the remote changed the interaction mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModeCause {
    /// Wake word heard inside the duplex stream
    WakeWord,
    /// The command serviced from duplex mode has completed
    CommandComplete,
    /// The duplex bridge dropped
    RemoteDisconnected,
}

/// Events the transport delivers to the session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum RemoteEvent {
    TranscriptReady {
        text: String,
    },
    TranscriptError {
        reason: String,
    },
    ThinkingStarted,
    Response {
        #[serde(default, rename = "audioRef", alias = "audio_ref")]
        audio_ref: Option<String>,
        #[serde(default)]
        text: Option<String>,
    },
    ResponseDone,
    Error {
        reason: String,
    },
    ModeChanged {
        mode: Mode,
        cause: ModeCause,
    },
    DuplexHandshake {
        #[serde(default)]
        config: serde_json::Value,
    },
    DuplexError {
        reason: String,
    },
    PanelSwitch {
        panel: String,
    },
    /// Encoded duplex audio (binary `0x01` frame)
    #[serde(skip)]
    DuplexAudioFrame(Vec<u8>),
    /// Incremental duplex transcript token (binary `0x02` frame)
    #[serde(skip)]
    DuplexTextFrame(String),
}

impl RemoteEvent {
    /// Parse a JSON text message
    ///
    /// # Errors
    ///
    /// Returns error if the envelope is malformed or the event unknown
    pub fn from_text(text: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Parse a tagged binary message; malformed frames yield `None`
    #[must_use]
    pub fn from_binary(bytes: &[u8]) -> Option<Self> {
        match TaggedFrame::parse(bytes) {
            Ok(TaggedFrame::Audio(payload)) => Some(Self::DuplexAudioFrame(payload)),
            Ok(TaggedFrame::Text(text)) => Some(Self::DuplexTextFrame(text)),
            Err(e) => {
                tracing::debug!(error = %e, len = bytes.len(), "dropping binary message");
                None
            }
        }
    }

    /// Event name for logs
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::TranscriptReady { .. } => "transcript_ready",
            Self::TranscriptError { .. } => "transcript_error",
            Self::ThinkingStarted => "thinking_started",
            Self::Response { .. } => "response",
            Self::ResponseDone => "response_done",
            Self::Error { .. } => "error",
            Self::ModeChanged { .. } => "mode_changed",
            Self::DuplexHandshake { .. } => "duplex_handshake",
            Self::DuplexError { .. } => "duplex_error",
            Self::PanelSwitch { .. } => "panel_switch",
            Self::DuplexAudioFrame(_) => "duplex_audio_frame",
            Self::DuplexTextFrame(_) => "duplex_text_frame",
        }
    }
}

/// Events the session sends to the transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum OutboundEvent {
    SessionStart { mode: Mode },
    SessionCancel,
    Command { text: String },
    ModeRequest { mode: Mode },
}

/// Outgoing half of the transport
///
/// Sends are fire-and-forget: implementations queue and never block the caller.
pub trait Outbound: Send + Sync {
    /// Send a structured event
    fn send_event(&self, event: OutboundEvent);

    /// Send a binary message (tagged duplex frame or WAV upload)
    fn send_binary(&self, bytes: Vec<u8>);
}
