//! Reply playback

mod output;

pub use output::RodioPlayback;

use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    Started,
    Ended,
    Error(String),
}

/// Plays encoded reply audio
///
/// Every `play()` returns its own event channel; `stop()` silences whatever
/// is playing without emitting further events for it.
pub trait Playback: Send {
    fn play(&mut self, audio: Vec<u8>) -> mpsc::UnboundedReceiver<PlaybackEvent>;
    fn stop(&mut self);
}
