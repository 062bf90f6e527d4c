//! WebSocket transport client

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use super::{Outbound, OutboundEvent, RemoteEvent};
use crate::session::SessionEvent;
use crate::{Error, Result};

/// Bidirectional message channel to the assistant backend
///
/// Outgoing messages are queued to a writer task; inbound messages are
/// parsed and pushed onto the session queue.
#[derive(Clone)]
pub struct TransportClient {
    tx: mpsc::UnboundedSender<Message>,
}

impl TransportClient {
    /// Connect and start the reader and writer tasks
    ///
    /// The returned handle finishes when the connection closes, after
    /// `SessionEvent::TransportClosed` has been queued.
    ///
    /// # Errors
    ///
    /// Returns error if the connection cannot be established
    pub async fn connect(
        url: &str,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<(Self, JoinHandle<()>)> {
        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| Error::Transport(format!("connection to {url} failed: {e}")))?;
        tracing::info!(url, "transport connected");

        let (mut write, mut read) = ws_stream.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

        let writer = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if let Err(e) = write.send(msg).await {
                    tracing::warn!(error = %e, "transport send failed");
                    break;
                }
            }
            let _ = write.close().await;
        });

        let reader = tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                let event = match msg {
                    Ok(Message::Text(text)) => match RemoteEvent::from_text(&text) {
                        Ok(event) => event,
                        Err(e) => {
                            tracing::warn!(error = %e, "ignoring malformed transport event");
                            continue;
                        }
                    },
                    Ok(Message::Binary(bytes)) => match RemoteEvent::from_binary(&bytes) {
                        Some(event) => event,
                        None => continue,
                    },
                    Ok(Message::Close(_)) => {
                        tracing::info!("transport closed by server");
                        break;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        tracing::warn!(error = %e, "transport receive failed");
                        break;
                    }
                };

                tracing::trace!(event = event.name(), "transport event");
                if events.send(SessionEvent::Remote(event)).is_err() {
                    break;
                }
            }

            writer.abort();
            let _ = events.send(SessionEvent::TransportClosed);
        });

        Ok((Self { tx }, reader))
    }

    fn send(&self, msg: Message) {
        if self.tx.send(msg).is_err() {
            tracing::debug!("transport closed, dropping outgoing message");
        }
    }
}

impl Outbound for TransportClient {
    fn send_event(&self, event: OutboundEvent) {
        match serde_json::to_string(&event) {
            Ok(json) => {
                tracing::debug!(event = %json, "sending transport event");
                self.send(Message::Text(json));
            }
            Err(e) => tracing::warn!(error = %e, "failed to serialize transport event"),
        }
    }

    fn send_binary(&self, bytes: Vec<u8>) {
        self.send(Message::Binary(bytes));
    }
}
