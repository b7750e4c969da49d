pub mod analyzer;
pub mod backend;
pub mod file;
pub mod microphone;

pub use analyzer::{calibrate, compute_baseline, AudioSample, Calibration, SampleStream, VolumeAnalyzer, VolumeMeter};
pub use backend::{AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioFrame, AudioSource, BackendProvider};
pub use file::{AudioFile, FileBackend};
pub use microphone::MicrophoneBackend;
