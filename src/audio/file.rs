use hound::{SampleFormat, WavReader};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::backend::{AudioBackend, AudioBackendConfig, AudioFrame};
use crate::error::AudioError;

pub struct AudioFile {
    pub path: String,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<i16>,
}

impl AudioFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AudioError> {
        let path = path.as_ref();
        info!("Opening audio file: {}", path.display());

        let reader = WavReader::open(path)
            .map_err(|e| AudioError::File(format!("failed to open {}: {}", path.display(), e)))?;

        let spec = reader.spec();
        let samples = read_samples(reader)?;

        let duration_seconds = samples.len() as f64 /
            (spec.sample_rate as f64 * spec.channels as f64);

        info!(
            "Audio file loaded: {:.1}s, {}Hz, {} channels, {} samples",
            duration_seconds,
            spec.sample_rate,
            spec.channels,
            samples.len()
        );

        Ok(Self {
            path: path.display().to_string(),
            duration_seconds,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            samples,
        })
    }

    /// Average interleaved channels down to mono
    pub fn to_mono(&self) -> Vec<i16> {
        if self.channels <= 1 {
            return self.samples.clone();
        }

        self.samples
            .chunks(self.channels as usize)
            .map(|chunk| {
                let sum: i32 = chunk.iter().map(|&s| s as i32).sum();
                (sum / chunk.len() as i32) as i16
            })
            .collect()
    }
}

/// Decode any PCM or float WAV into 16-bit samples
fn read_samples<R: std::io::Read>(reader: WavReader<R>) -> Result<Vec<i16>, AudioError> {
    let spec = reader.spec();
    let read_err = |e: hound::Error| AudioError::File(format!("failed to read samples: {}", e));

    match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Int, 16) => reader
            .into_samples::<i16>()
            .collect::<Result<Vec<_>, _>>()
            .map_err(read_err),
        (SampleFormat::Int, bits @ 1..=32) => {
            let shift = bits as i32 - 16;
            reader
                .into_samples::<i32>()
                .map(|s| {
                    s.map(|v| {
                        if shift > 0 {
                            (v >> shift) as i16
                        } else {
                            (v << -shift) as i16
                        }
                    })
                })
                .collect::<Result<Vec<_>, _>>()
                .map_err(read_err)
        }
        (SampleFormat::Float, 32) => reader
            .into_samples::<f32>()
            .map(|s| s.map(|v| (v.clamp(-1.0, 1.0) * i16::MAX as f32) as i16))
            .collect::<Result<Vec<_>, _>>()
            .map_err(read_err),
        (format, bits) => Err(AudioError::File(format!(
            "unsupported WAV encoding: {}-bit {:?}",
            bits, format
        ))),
    }
}

/// Replays a WAV file in real time as a stand-in for a microphone
pub struct FileBackend {
    config: AudioBackendConfig,
    samples: Arc<Vec<i16>>,
    sample_rate: u32,
    looping: bool,
    task: Option<JoinHandle<()>>,
}

impl FileBackend {
    pub fn open(path: impl AsRef<Path>, config: AudioBackendConfig) -> Result<Self, AudioError> {
        let file = AudioFile::open(path)?;
        Ok(Self::from_samples(file.to_mono(), file.sample_rate, config))
    }

    /// Build a backend from mono samples already in memory
    pub fn from_samples(samples: Vec<i16>, sample_rate: u32, config: AudioBackendConfig) -> Self {
        Self {
            config,
            samples: Arc::new(samples),
            sample_rate,
            looping: false,
            task: None,
        }
    }

    /// Restart from the beginning when the file runs out
    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }
}

#[async_trait::async_trait]
impl AudioBackend for FileBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>, AudioError> {
        if self.task.is_some() {
            return Err(AudioError::AlreadyCapturing);
        }
        if self.samples.is_empty() {
            return Err(AudioError::File("audio file contains no samples".to_string()));
        }

        let (tx, rx) = mpsc::channel(100);
        let samples = Arc::clone(&self.samples);
        let sample_rate = self.sample_rate;
        let looping = self.looping;
        let frame_ms = self.config.buffer_duration_ms.max(1);
        let frame_len = ((sample_rate as u64 * frame_ms / 1000) as usize).max(1);

        info!(
            "Starting file playback capture ({}Hz, {}ms frames, looping={})",
            sample_rate, frame_ms, looping
        );

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(frame_ms));
            let mut offset = 0usize;
            let mut timestamp_ms = 0u64;

            loop {
                ticker.tick().await;

                if offset >= samples.len() {
                    if !looping {
                        break;
                    }
                    offset = 0;
                }

                let end = (offset + frame_len).min(samples.len());
                let frame = AudioFrame {
                    samples: samples[offset..end].to_vec(),
                    sample_rate,
                    channels: 1,
                    timestamp_ms,
                };
                offset = end;
                timestamp_ms += frame_ms;

                if tx.send(frame).await.is_err() {
                    break;
                }
            }

            debug!("File capture task finished");
        });

        self.task = Some(task);
        Ok(rx)
    }

    async fn stop(&mut self) -> Result<(), AudioError> {
        if let Some(task) = self.task.take() {
            task.abort();
            info!("File capture stopped");
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.task.as_ref().map(|t| !t.is_finished()).unwrap_or(false)
    }

    fn name(&self) -> &str {
        "wav file"
    }
}

impl Drop for FileBackend {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
