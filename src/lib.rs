pub mod audio;
pub mod config;
pub mod controller;
pub mod error;
pub mod http;
pub mod nats;
pub mod playback;
pub mod preferences;
pub mod recognition;
pub mod responder;
pub mod timer;
pub mod turn;
pub mod voices;

pub use audio::{
    AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioFile, AudioFrame, AudioSample,
    AudioSource, BackendProvider, FileBackend, MicrophoneBackend, VolumeAnalyzer,
};
pub use config::Config;
pub use controller::{
    Collaborators, Controller, ControllerHandle, ControllerNotice, ControllerStatus, TurnState,
};
pub use error::{ControllerError, ControllerResult};
pub use http::{create_router, AppState};
pub use recognition::{EngineEvent, EngineFactory, RecognitionEngine, RecognitionManager};
pub use responder::{HttpResponder, Responder, ResponderReply, ResponderRequest};
