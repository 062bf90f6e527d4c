//! One-way notifications to the UI layer
//!
//! The session reports status text, panel switches, duplex transcripts and
//! state changes. Delivery never blocks: slow subscribers lose messages.

use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::{Mode, SessionSnapshot, SessionState};

/// Channel capacity for notifications
const CHANNEL_CAPACITY: usize = 64;

/// Notification for UI subscribers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// Plain-language status line
    Status { text: String },
    /// Remote asked the UI to show a panel
    PanelSwitch { panel: String },
    /// Accumulated duplex transcript
    Transcript { text: String },
    /// Session state changed
    State {
        state: SessionState,
        mode: Mode,
        active: bool,
    },
}

/// Sink for session notifications
pub trait Notifier: Send + Sync {
    /// Deliver a notification; must not block
    fn notify(&self, notification: Notification);

    /// Report a status line
    fn status(&self, text: &str) {
        self.notify(Notification::Status {
            text: text.to_string(),
        });
    }

    /// Ask the UI to switch panels
    fn panel_switch(&self, panel: &str) {
        self.notify(Notification::PanelSwitch {
            panel: panel.to_string(),
        });
    }

    /// Report the accumulated duplex transcript
    fn transcript(&self, text: &str) {
        self.notify(Notification::Transcript {
            text: text.to_string(),
        });
    }

    /// Report a state change
    fn state(&self, snapshot: SessionSnapshot) {
        self.notify(Notification::State {
            state: snapshot.state,
            mode: snapshot.mode,
            active: snapshot.active,
        });
    }
}

/// Fans notifications out to any number of subscribers
///
/// Also remembers the latest state so late observers can query it.
#[derive(Clone)]
pub struct BroadcastNotifier {
    tx: broadcast::Sender<Notification>,
    latest: Arc<RwLock<SessionSnapshot>>,
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl BroadcastNotifier {
    /// Create a notifier with no subscribers
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            tx,
            latest: Arc::new(RwLock::new(SessionSnapshot::default())),
        }
    }

    /// Subscribe to notifications
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    /// Latest reported session state
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        self.latest.read().map(|s| *s).unwrap_or_default()
    }
}

impl Notifier for BroadcastNotifier {
    fn notify(&self, notification: Notification) {
        if let Notification::State {
            state,
            mode,
            active,
        } = &notification
        {
            if let Ok(mut latest) = self.latest.write() {
                *latest = SessionSnapshot {
                    state: *state,
                    mode: *mode,
                    active: *active,
                };
            }
        }

        // Ignore errors if no subscribers
        let _ = self.tx.send(notification);
    }
}
