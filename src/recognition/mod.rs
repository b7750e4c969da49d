//! Speech recognition
//!
//! - `RecognitionEngine` / `EngineFactory`: the engine seam
//! - `ErrorPolicy`: benign / fatal / transient classification of engine errors
//! - `RecognitionManager`: session lifecycle, reinitialization and retries
//! - `NatsRecognitionEngine`: engine backed by an STT service on NATS

pub mod engine;
pub mod manager;
pub mod nats_engine;
pub mod policy;

pub use engine::{EngineEvent, EngineFactory, RecognitionEngine};
pub use manager::{CaptureEvent, ManagerEvent, ManagerSignal, ManagerStats, RecognitionManager};
pub use nats_engine::{NatsEngineFactory, NatsRecognitionEngine};
pub use policy::{ErrorClass, ErrorPolicy};
