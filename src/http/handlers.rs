use super::state::AppState;
use crate::controller::ControllerStatus;
use crate::voices::{self, VoiceOption};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use tracing::info;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SelectDeviceRequest {
    pub device_id: String,
}

#[derive(Debug, Deserialize)]
pub struct SelectVoiceRequest {
    pub voice_id: String,
}

#[derive(Debug, Serialize)]
pub struct AcceptedResponse {
    pub status: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct DevicesResponse {
    pub devices: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct VoicesResponse {
    pub voices: &'static [VoiceOption],
    pub default_voice_id: &'static str,
}

fn accepted(message: impl Into<String>) -> axum::response::Response {
    (
        StatusCode::ACCEPTED,
        Json(AcceptedResponse {
            status: "accepted".to_string(),
            message: message.into(),
        }),
    )
        .into_response()
}

fn bad_request(error: impl Into<String>) -> axum::response::Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
        .into_response()
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /listen/start
/// Arm continuous mode and start listening
pub async fn start_listening(State(state): State<AppState>) -> impl IntoResponse {
    info!("HTTP: start continuous listening");
    state.controller.start_continuous_listening();
    accepted("Continuous listening requested")
}

/// POST /listen/stop
/// Stop listening and cancel any turn in flight
pub async fn stop_listening(State(state): State<AppState>) -> impl IntoResponse {
    info!("HTTP: stop listening");
    state.controller.stop_listening();
    accepted("Stop requested")
}

/// PUT /device
pub async fn select_device(
    State(state): State<AppState>,
    Json(req): Json<SelectDeviceRequest>,
) -> impl IntoResponse {
    if req.device_id.trim().is_empty() {
        return bad_request("device_id must not be empty");
    }
    state.controller.select_device(req.device_id.clone());
    accepted(format!("Input device {} selected", req.device_id))
}

/// PUT /voice
pub async fn select_voice(
    State(state): State<AppState>,
    Json(req): Json<SelectVoiceRequest>,
) -> impl IntoResponse {
    if req.voice_id.trim().is_empty() {
        return bad_request("voice_id must not be empty");
    }
    state.controller.select_voice(req.voice_id.clone());
    accepted(format!("Voice {} selected", req.voice_id))
}

/// GET /status
pub async fn get_status(State(state): State<AppState>) -> Json<ControllerStatus> {
    Json(state.controller.status())
}

/// GET /devices
pub async fn list_devices(State(state): State<AppState>) -> impl IntoResponse {
    let devices = (state.devices)();
    (StatusCode::OK, Json(DevicesResponse { devices }))
}

/// GET /voices
pub async fn list_voices() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(VoicesResponse {
            voices: voices::VOICES,
            default_voice_id: voices::default_voice().id,
        }),
    )
}

/// GET /health
/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    if state.controller.is_running() {
        (StatusCode::OK, "OK")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "controller stopped")
    }
}
