//! Turn-taking orchestration
//!
//! - `Controller`: the single event loop that owns all turn state
//! - `ControllerHandle`: cloneable triggers plus status and notice streams
//! - `TurnState`, `ControllerStatus`, `ControllerStats`: what observers see

mod controller;
mod event;
mod handle;
mod state;

pub use controller::{Collaborators, Controller};
pub use event::{Command, ControllerEvent, ControllerNotice};
pub use handle::ControllerHandle;
pub use state::{ControllerStats, ControllerStatus, TurnState};
