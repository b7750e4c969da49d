use crate::error::AudioError;
use tokio::sync::mpsc;

/// Audio sample data (16-bit PCM, interleaved)
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Raw audio samples (i16 PCM, interleaved)
    pub samples: Vec<i16>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
    /// Timestamp in milliseconds since capture started
    pub timestamp_ms: u64,
}

impl AudioFrame {
    /// Duration covered by this frame
    pub fn duration_ms(&self) -> u64 {
        let per_channel = self.samples.len() as u64 / self.channels.max(1) as u64;
        per_channel * 1000 / self.sample_rate.max(1) as u64
    }
}

/// Configuration for audio backend
#[derive(Debug, Clone)]
pub struct AudioBackendConfig {
    /// Target sample rate
    pub target_sample_rate: u32,
    /// Target channel count (1 = mono)
    pub target_channels: u16,
    /// Buffer size in milliseconds (affects latency and sample rate of the volume signal)
    pub buffer_duration_ms: u64,
    /// Input device to pin; `None` uses the system default
    pub device_id: Option<String>,
}

impl Default for AudioBackendConfig {
    fn default() -> Self {
        Self {
            target_sample_rate: 16000, // 16kHz for the recognizer
            target_channels: 1,        // Mono
            buffer_duration_ms: 30,    // ~one animation frame
            device_id: None,
        }
    }
}

impl AudioBackendConfig {
    /// Samples per frame for the configured rate, channel count and buffer duration
    pub fn samples_per_frame(&self) -> usize {
        (self.target_sample_rate as u64 * self.buffer_duration_ms / 1000) as usize
            * self.target_channels as usize
    }
}

/// Audio capture backend trait
///
/// Implementations:
/// - Microphone: cpal input stream (all platforms)
/// - File: replay a WAV file as if it were live (demos and tests)
///
/// A started backend holds its device until `stop()` is called or it is dropped.
#[async_trait::async_trait]
pub trait AudioBackend: Send {
    /// Start capturing audio
    ///
    /// Returns a channel receiver that will receive audio frames
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>, AudioError>;

    /// Stop capturing audio and release the device
    async fn stop(&mut self) -> Result<(), AudioError>;

    /// Check if backend is currently capturing
    fn is_capturing(&self) -> bool;

    /// Get backend name for logging
    fn name(&self) -> &str;
}

/// Audio source type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioSource {
    /// Microphone input (all platforms)
    Microphone,
    /// File input (for demos/testing); replayed in real time, looping
    File(String),
}

/// Builds a backend for a given device id
///
/// The lifecycle manager asks for a fresh backend on every capture session so
/// a device change or reinitialize never reuses a stale handle.
pub trait BackendProvider: Send + Sync {
    fn open(&self, device_id: Option<&str>) -> Result<Box<dyn AudioBackend>, AudioError>;
}

/// Audio backend factory
#[derive(Debug, Clone)]
pub struct AudioBackendFactory {
    source: AudioSource,
    config: AudioBackendConfig,
}

impl AudioBackendFactory {
    pub fn new(source: AudioSource, config: AudioBackendConfig) -> Self {
        Self { source, config }
    }

    /// Create audio backend based on source and configuration
    pub fn create(
        source: &AudioSource,
        config: AudioBackendConfig,
    ) -> Result<Box<dyn AudioBackend>, AudioError> {
        match source {
            AudioSource::Microphone => {
                use super::microphone::MicrophoneBackend;
                Ok(Box::new(MicrophoneBackend::new(config)))
            }

            AudioSource::File(path) => {
                use super::file::FileBackend;
                let backend = FileBackend::open(path, config)?.looping(true);
                Ok(Box::new(backend))
            }
        }
    }
}

impl BackendProvider for AudioBackendFactory {
    fn open(&self, device_id: Option<&str>) -> Result<Box<dyn AudioBackend>, AudioError> {
        let config = AudioBackendConfig {
            device_id: device_id.map(str::to_string).or_else(|| self.config.device_id.clone()),
            ..self.config.clone()
        };
        AudioBackendFactory::create(&self.source, config)
    }
}
