//! HTTP control API for the UI side channel

pub mod health;
pub mod voice;
pub mod websocket;

use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::Result;
use crate::session::{BroadcastNotifier, ControlCommand, SessionEvent};

/// Shared state for API handlers
#[derive(Clone)]
pub struct ApiState {
    /// Session event queue (control commands are pushed here)
    pub events: mpsc::UnboundedSender<SessionEvent>,
    /// Notification fan-out and latest state
    pub notifier: BroadcastNotifier,
}

impl ApiState {
    /// Create API state
    #[must_use]
    pub const fn new(events: mpsc::UnboundedSender<SessionEvent>, notifier: BroadcastNotifier) -> Self {
        Self { events, notifier }
    }

    /// Forward a control command to the session
    ///
    /// Returns `false` if the session is gone.
    pub fn send(&self, command: ControlCommand) -> bool {
        self.events.send(SessionEvent::Control(command)).is_ok()
    }
}

/// Build the full router with all routes and layers
pub fn router(state: Arc<ApiState>) -> Router {
    let router = Router::new()
        .nest(
            "/voice",
            voice::router(state.clone()).merge(websocket::router(state)),
        )
        .merge(health::router());

    // CORS layer for cross-origin requests from frontend
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    router.layer(cors).layer(TraceLayer::new_for_http())
}

/// API server
pub struct ApiServer {
    state: Arc<ApiState>,
    port: u16,
}

impl ApiServer {
    /// Create a server for the given state
    #[must_use]
    pub fn new(state: ApiState, port: u16) -> Self {
        Self {
            state: Arc::new(state),
            port,
        }
    }

    /// Run the API server
    ///
    /// # Errors
    ///
    /// Returns error if server fails to bind or run
    pub async fn run(self) -> Result<()> {
        let addr = format!("0.0.0.0:{}", self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| crate::Error::Config(format!("failed to bind API server: {e}")))?;

        tracing::info!(port = self.port, "API server listening");

        axum::serve(listener, router(self.state))
            .await
            .map_err(|e| crate::Error::Config(format!("API server error: {e}")))?;

        Ok(())
    }

    /// Run the API server in a background task
    #[must_use]
    pub fn spawn(self) -> tokio::task::JoinHandle<Result<()>> {
        tokio::spawn(async move { self.run().await })
    }
}
