use tokio::sync::{broadcast, mpsc};

use crate::audio::AudioFrame;
use crate::error::EngineError;

/// Events reported by a running recognition engine
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// Interim hypothesis for the utterance in progress
    Partial(String),
    /// Final result for an utterance
    Final(String),
    /// Engine-reported error, identified by its kind (e.g. "no-speech", "network")
    Error(String),
    /// The engine stopped on its own
    End,
}

/// A streaming speech recognition engine instance
///
/// One instance may be started, aborted and started again. The lifecycle
/// manager replaces the instance wholesale when it reinitializes.
#[async_trait::async_trait]
pub trait RecognitionEngine: Send {
    /// Start recognizing `audio`; results arrive on the returned channel
    async fn start(
        &mut self,
        audio: broadcast::Receiver<AudioFrame>,
    ) -> Result<mpsc::Receiver<EngineEvent>, EngineError>;

    /// Stop immediately, discarding any pending result
    async fn abort(&mut self);

    /// Engine name for logging
    fn name(&self) -> &str;
}

/// Constructs fresh engine instances
pub trait EngineFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn RecognitionEngine>, EngineError>;
}
