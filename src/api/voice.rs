//! Voice session control endpoints
//!
//! Commands are queued for the session and answered with 202; the outcome
//! is observable through `GET /voice/state` and the events socket.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use super::ApiState;
use crate::session::{ControlCommand, Mode, SessionSnapshot};

/// Build voice control router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/state", get(get_state))
        .route("/activate", post(activate))
        .route("/deactivate", post(deactivate))
        .route("/mode", post(set_mode))
        .route("/mode/toggle", post(toggle_mode))
        .route("/playback", post(set_playback))
        .with_state(state)
}

/// Accepted command response
#[derive(Debug, Serialize)]
pub struct Accepted {
    pub accepted: bool,
}

/// Mode change request
#[derive(Debug, Deserialize)]
pub struct ModeRequest {
    pub mode: Mode,
}

/// Playback toggle request
#[derive(Debug, Deserialize)]
pub struct PlaybackRequest {
    pub enabled: bool,
}

/// Current session state
async fn get_state(State(state): State<Arc<ApiState>>) -> Json<SessionSnapshot> {
    Json(state.notifier.snapshot())
}

async fn activate(State(state): State<Arc<ApiState>>) -> Result<Response, VoiceError> {
    forward(&state, ControlCommand::Activate)
}

async fn deactivate(State(state): State<Arc<ApiState>>) -> Result<Response, VoiceError> {
    forward(&state, ControlCommand::Deactivate)
}

async fn set_mode(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<ModeRequest>,
) -> Result<Response, VoiceError> {
    forward(&state, ControlCommand::SetMode(request.mode))
}

async fn toggle_mode(State(state): State<Arc<ApiState>>) -> Result<Response, VoiceError> {
    forward(&state, ControlCommand::ToggleMode)
}

async fn set_playback(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<PlaybackRequest>,
) -> Result<Response, VoiceError> {
    forward(&state, ControlCommand::SetPlayback(request.enabled))
}

fn forward(state: &ApiState, command: ControlCommand) -> Result<Response, VoiceError> {
    tracing::debug!(?command, "control command");
    if !state.send(command) {
        return Err(VoiceError::SessionUnavailable);
    }
    Ok((StatusCode::ACCEPTED, Json(Accepted { accepted: true })).into_response())
}

/// Voice API errors
#[derive(Debug)]
pub enum VoiceError {
    SessionUnavailable,
}

impl IntoResponse for VoiceError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: ErrorBody,
        }

        #[derive(Serialize)]
        struct ErrorBody {
            code: &'static str,
            message: String,
        }

        let (status, code, message) = match self {
            Self::SessionUnavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                "session_unavailable",
                "voice session is not running".to_string(),
            ),
        };

        (status, Json(ErrorResponse { error: ErrorBody { code, message } })).into_response()
    }
}
