use crate::error::ResponderError;
use crate::playback::PlaybackEvent;
use crate::responder::ResponderReply;
use crate::timer::TimerKind;

use super::state::TurnState;

/// Triggers from the UI layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    StartContinuousListening,
    StopListening,
    SelectDevice(String),
    SelectVoice(String),
    Shutdown,
}

/// Everything the controller loop consumes
///
/// `turn` tags let the loop drop replies and playback events that belong to
/// a turn which was cancelled in the meantime.
#[derive(Debug)]
pub enum ControllerEvent {
    Command(Command),
    Reply {
        turn: u64,
        result: Result<ResponderReply, ResponderError>,
    },
    Playback {
        turn: u64,
        event: PlaybackEvent,
    },
    Timer {
        kind: TimerKind,
        seq: u64,
    },
}

/// Observable output for UI layers
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerNotice {
    StateChanged(TurnState),
    /// A completed utterance, as sent to the responder
    UserMessage(String),
    /// Reply text (or the fallback message)
    AssistantMessage(String),
    /// Live volume while listening
    Volume(f32),
    Calibrated { baseline: f32 },
    /// User-facing error text
    Error(String),
}
