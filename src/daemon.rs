//! Daemon - the voice service
//!
//! Wires hardware, transport and control API to a single [`VoiceSession`]
//! and drives it from one event loop on the main task.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::api::{ApiServer, ApiState};
use crate::session::{BroadcastNotifier, SessionEvent, SessionParts, VoiceSession};
use crate::transport::TransportClient;
use crate::voice::codec::default_backend;
use crate::voice::{CpalMicrophone, CpalOutput, EnergyClassifier, HttpClipLoader};
use crate::{Config, Error, Result};

/// The voice daemon
pub struct Daemon {
    config: Config,
    activate_on_start: bool,
}

impl Daemon {
    /// Create a new daemon instance
    #[must_use]
    pub const fn new(config: Config) -> Self {
        Self {
            config,
            activate_on_start: false,
        }
    }

    /// Activate the session as soon as the daemon is up
    #[must_use]
    pub const fn activate_on_start(mut self, activate: bool) -> Self {
        self.activate_on_start = activate;
        self
    }

    /// Run the daemon until interrupted or the transport closes
    ///
    /// # Errors
    ///
    /// Returns error if the transport or audio output cannot be opened, or
    /// the transport connection is lost
    #[allow(clippy::future_not_send)]
    pub async fn run(self) -> Result<()> {
        let (events_tx, mut events_rx) = mpsc::unbounded_channel::<SessionEvent>();
        let notifier = BroadcastNotifier::new();

        // Start HTTP API server
        let api_server = ApiServer::new(
            ApiState::new(events_tx.clone(), notifier.clone()),
            self.config.api_server.port,
        );
        let _api_handle = api_server.spawn();

        let (transport, _transport_handle) =
            TransportClient::connect(&self.config.transport.url, events_tx.clone()).await?;

        let output = CpalOutput::open(self.config.voice.output_sample_rate)?;
        let parts = SessionParts {
            command_microphone: Box::new(CpalMicrophone::new()),
            duplex_microphone: Box::new(CpalMicrophone::new()),
            classifier: Box::new(EnergyClassifier::default()),
            codec: default_backend(),
            output: Box::new(output),
            clips: Arc::new(HttpClipLoader::new(
                self.config.transport.http_base(),
                self.config.voice.output_sample_rate,
            )),
        };

        // Session stays on this task (cpal streams aren't Send)
        let mut session = VoiceSession::new(
            &self.config,
            parts,
            Arc::new(transport),
            Arc::new(notifier),
            &events_tx,
        );

        // Set up shutdown signal
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = shutdown_tx.send(()).await;
            }
        });

        tracing::info!(
            mode = %session.mode(),
            wake_word = %self.config.voice.wake_word,
            port = self.config.api_server.port,
            "voice daemon running"
        );

        if self.activate_on_start {
            if let Err(e) = session.activate() {
                tracing::warn!(error = %e, "initial activation failed");
            }
        }

        let result = loop {
            let deadline = session.next_deadline();
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("shutdown requested");
                    break Ok(());
                }
                event = events_rx.recv() => {
                    let Some(event) = event else {
                        break Ok(());
                    };
                    let closed = matches!(event, SessionEvent::TransportClosed);
                    session.handle(event);
                    if closed {
                        break Err(Error::Transport("connection closed".to_string()));
                    }
                }
                () = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    session.on_deadline(Instant::now());
                }
            }
        };

        session.deactivate();
        result
    }
}
