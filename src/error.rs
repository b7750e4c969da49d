//! Error taxonomy for the voice turn-taking controller
//!
//! Collaborator-local errors (`AudioError`, `EngineError`, `ResponderError`)
//! are converted into `ControllerError` at the lifecycle-manager and
//! controller seams. Only fatal variants ever reach the user.

use thiserror::Error;

/// Result type alias for controller operations
pub type ControllerResult<T> = Result<T, ControllerError>;

/// Errors surfaced by the recognition lifecycle manager and the orchestrator
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ControllerError {
    #[error("Audio input unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Microphone permission denied: {0}")]
    PermissionDenied(String),

    #[error("Recognition engine error: {0}")]
    TransientEngine(String),

    #[error("Recognition failed after {attempts} attempts: {last}")]
    RecognitionUnrecoverable { attempts: u32, last: String },

    #[error("Responder failed: {0}")]
    Responder(String),

    #[error("Playback failed: {0}")]
    Playback(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ControllerError {
    /// Whether this error ends the listening session (state goes to `Idle`)
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ControllerError::DeviceUnavailable(_)
                | ControllerError::PermissionDenied(_)
                | ControllerError::RecognitionUnrecoverable { .. }
                | ControllerError::Config(_)
        )
    }

    /// Text shown to the user for this error
    pub fn user_message(&self) -> String {
        match self {
            ControllerError::PermissionDenied(_) => {
                "Please grant microphone permission to use voice input".to_string()
            }
            ControllerError::DeviceUnavailable(detail) => {
                format!("No usable microphone found ({})", detail)
            }
            ControllerError::RecognitionUnrecoverable { .. } => {
                "Recognition error occurred. Please restart listening.".to_string()
            }
            other => other.to_string(),
        }
    }
}

/// Errors from an audio input backend
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("No matching input device: {0}")]
    DeviceNotFound(String),

    #[error("Input device access denied: {0}")]
    PermissionDenied(String),

    #[error("Audio stream error: {0}")]
    Stream(String),

    #[error("Audio file error: {0}")]
    File(String),

    #[error("Backend already capturing")]
    AlreadyCapturing,
}

impl From<AudioError> for ControllerError {
    fn from(err: AudioError) -> Self {
        match err {
            AudioError::PermissionDenied(msg) => ControllerError::PermissionDenied(msg),
            other => ControllerError::DeviceUnavailable(other.to_string()),
        }
    }
}

impl From<cpal::DevicesError> for AudioError {
    fn from(err: cpal::DevicesError) -> Self {
        AudioError::DeviceNotFound(err.to_string())
    }
}

impl From<cpal::DefaultStreamConfigError> for AudioError {
    fn from(err: cpal::DefaultStreamConfigError) -> Self {
        AudioError::DeviceNotFound(err.to_string())
    }
}

impl From<cpal::BuildStreamError> for AudioError {
    fn from(err: cpal::BuildStreamError) -> Self {
        match err {
            cpal::BuildStreamError::DeviceNotAvailable => {
                AudioError::DeviceNotFound("device not available".to_string())
            }
            cpal::BuildStreamError::BackendSpecific { err } if looks_like_permission(&err.description) => {
                AudioError::PermissionDenied(err.description)
            }
            other => AudioError::Stream(other.to_string()),
        }
    }
}

impl From<cpal::PlayStreamError> for AudioError {
    fn from(err: cpal::PlayStreamError) -> Self {
        AudioError::Stream(err.to_string())
    }
}

fn looks_like_permission(description: &str) -> bool {
    let lower = description.to_ascii_lowercase();
    lower.contains("permission") || lower.contains("not allowed") || lower.contains("denied")
}

/// Errors from a recognition engine instance
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Failed to create recognition engine: {0}")]
    Create(String),

    #[error("Failed to start recognition engine: {0}")]
    Start(String),
}

impl From<EngineError> for ControllerError {
    fn from(err: EngineError) -> Self {
        ControllerError::TransientEngine(err.to_string())
    }
}

/// Errors from the remote responder
#[derive(Error, Debug)]
pub enum ResponderError {
    #[error("Responder request failed: {0}")]
    Request(String),

    #[error("Responder returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Invalid responder reply: {0}")]
    InvalidReply(String),
}

impl From<ResponderError> for ControllerError {
    fn from(err: ResponderError) -> Self {
        ControllerError::Responder(err.to_string())
    }
}
