use chrono::{DateTime, Utc};
use serde::Serialize;

/// Where the conversation currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    /// Microphone off, nothing in flight
    Idle,
    /// Capturing and recognizing the user
    Listening,
    /// Waiting for the responder; microphone off
    Processing,
    /// Playing the reply (and settling afterwards); microphone off
    Speaking,
}

impl TurnState {
    /// Whether the microphone may be hot in this state
    pub fn captures_audio(&self) -> bool {
        matches!(self, TurnState::Listening)
    }
}

/// Counters for the controller's lifetime
#[derive(Debug, Clone, Serialize)]
pub struct ControllerStats {
    /// When the controller started
    pub started_at: DateTime<Utc>,

    /// Replies received from the responder
    pub turns_completed: u64,

    /// Responder calls that failed and fell back
    pub responder_failures: u64,

    /// Forced engine reinitializations so far
    pub reinitializations: u64,

    /// Consecutive recognition recovery failures right now
    pub retries: u32,
}

impl Default for ControllerStats {
    fn default() -> Self {
        Self {
            started_at: Utc::now(),
            turns_completed: 0,
            responder_failures: 0,
            reinitializations: 0,
            retries: 0,
        }
    }
}

/// Snapshot published after every handled event
#[derive(Debug, Clone, Serialize)]
pub struct ControllerStatus {
    pub state: TurnState,
    pub continuous: bool,
    pub device_id: Option<String>,
    pub voice_id: String,
    /// Silence threshold once calibrated
    pub threshold: Option<f32>,
    pub last_error: Option<String>,
    pub stats: ControllerStats,
}
