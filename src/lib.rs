//! Beacon Voice - voice interaction orchestrator for AI assistants
//!
//! Drives one microphone/speaker pair in either of two interaction models:
//! - wake-word gated commands (speech boundary detection, WAV upload, clip playback)
//! - full-duplex speech-to-speech streaming (80 ms codec frames both ways)
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │          UI (control API, events socket)             │
//! └────────────────────┬────────────────────────────────┘
//!                      │ ControlCommand / Notification
//! ┌────────────────────▼────────────────────────────────┐
//! │                  VoiceSession                        │
//! │  Detector │ Duplex streamer │ Playback scheduler    │
//! └────────────────────┬────────────────────────────────┘
//!                      │ RemoteEvent / OutboundEvent
//! ┌────────────────────▼────────────────────────────────┐
//! │            Transport (WebSocket)                     │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod config;
pub mod daemon;
pub mod error;
pub mod session;
pub mod transport;
pub mod voice;

pub use config::Config;
pub use daemon::Daemon;
pub use error::{Error, Result};
pub use session::{
    BroadcastNotifier, ControlCommand, Mode, Notification, Notifier, SessionEvent, SessionParts,
    SessionSnapshot, SessionState, VoiceSession,
};
pub use transport::{ModeCause, Outbound, OutboundEvent, RemoteEvent, TransportClient};
