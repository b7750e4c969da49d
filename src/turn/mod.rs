//! Turn detection
//!
//! - `TranscriptBuffer`: the utterance in progress and duplicate suppression
//! - `SilenceDetector`: volume-based end-of-utterance decision

mod detector;
mod transcript;

pub use detector::{BoundaryTrigger, SilenceDetector, TurnBoundary};
pub use transcript::TranscriptBuffer;
