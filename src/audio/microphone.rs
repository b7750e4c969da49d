// Microphone backend using cpal
//
// The cpal stream is !Send on some platforms, so it lives on a dedicated
// thread for its whole life. The backend only keeps a stop signal and the
// thread handle; dropping either one releases the device. Losing the device
// releases it too, which closes the frame channel for the reader.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use std::sync::mpsc as std_mpsc;
use std::thread::{self, JoinHandle};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use super::backend::{AudioBackend, AudioBackendConfig, AudioFrame};
use crate::error::AudioError;

/// Live microphone capture
pub struct MicrophoneBackend {
    config: AudioBackendConfig,
    stop_tx: Option<std_mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl MicrophoneBackend {
    pub fn new(config: AudioBackendConfig) -> Self {
        Self {
            config,
            stop_tx: None,
            thread: None,
        }
    }

    /// List available input devices by name
    pub fn list_input_devices() -> Result<Vec<String>, AudioError> {
        let host = cpal::default_host();
        let devices = host.input_devices()?;

        let mut device_names = Vec::new();
        for device in devices {
            if let Ok(name) = device.name() {
                device_names.push(name);
            }
        }

        Ok(device_names)
    }

    fn find_device(device_id: Option<&str>) -> Result<cpal::Device, AudioError> {
        let host = cpal::default_host();
        match device_id {
            None => host
                .default_input_device()
                .ok_or_else(|| AudioError::DeviceNotFound("no default input device".to_string())),
            Some(id) => host
                .input_devices()?
                .find(|d| d.name().map(|n| n == id).unwrap_or(false))
                .ok_or_else(|| AudioError::DeviceNotFound(id.to_string())),
        }
    }
}

#[async_trait::async_trait]
impl AudioBackend for MicrophoneBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>, AudioError> {
        if self.thread.is_some() {
            return Err(AudioError::AlreadyCapturing);
        }

        info!(
            "Starting microphone capture (device: {})",
            self.config.device_id.as_deref().unwrap_or("default")
        );

        let (frame_tx, frame_rx) = mpsc::channel(100);
        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let config = self.config.clone();
        let lost_tx = stop_tx.clone();

        let handle = thread::Builder::new()
            .name("mic-capture".to_string())
            .spawn(move || {
                let stream = match open_stream(&config, frame_tx, lost_tx) {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                // Blocks until stop(), a lost device or the backend is dropped
                let _ = stop_rx.recv();
                drop(stream);
                debug!("Microphone stream released");
            })
            .map_err(|e| AudioError::Stream(format!("failed to spawn capture thread: {}", e)))?;

        match ready_rx.await {
            Ok(Ok(())) => {
                self.stop_tx = Some(stop_tx);
                self.thread = Some(handle);
                info!("Microphone capture started successfully");
                Ok(frame_rx)
            }
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(AudioError::Stream("capture thread exited during startup".to_string()))
            }
        }
    }

    async fn stop(&mut self) -> Result<(), AudioError> {
        let Some(stop_tx) = self.stop_tx.take() else {
            return Ok(());
        };

        info!("Stopping microphone capture");
        let _ = stop_tx.send(());

        if let Some(handle) = self.thread.take() {
            tokio::task::spawn_blocking(move || handle.join())
                .await
                .map_err(|e| AudioError::Stream(e.to_string()))?
                .map_err(|_| AudioError::Stream("capture thread panicked".to_string()))?;
        }

        info!("Microphone capture stopped");
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.thread.as_ref().map_or(false, |t| !t.is_finished())
    }

    fn name(&self) -> &str {
        "cpal microphone"
    }
}

impl Drop for MicrophoneBackend {
    fn drop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
    }
}

fn open_stream(
    config: &AudioBackendConfig,
    frame_tx: mpsc::Sender<AudioFrame>,
    lost_tx: std_mpsc::Sender<()>,
) -> Result<cpal::Stream, AudioError> {
    let device = MicrophoneBackend::find_device(config.device_id.as_deref())?;
    info!(
        "Using input device: {}",
        device.name().unwrap_or_else(|_| "Unknown".to_string())
    );

    let supported = device.default_input_config()?;
    let sample_format = supported.sample_format();
    let stream_config: cpal::StreamConfig = supported.into();

    let stream = match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(&device, &stream_config, config, frame_tx, lost_tx)?,
        cpal::SampleFormat::I16 => build_stream::<i16>(&device, &stream_config, config, frame_tx, lost_tx)?,
        cpal::SampleFormat::U16 => build_stream::<u16>(&device, &stream_config, config, frame_tx, lost_tx)?,
        other => {
            return Err(AudioError::Stream(format!("unsupported sample format {:?}", other)));
        }
    };

    stream.play()?;
    Ok(stream)
}

fn build_stream<T>(
    device: &cpal::Device,
    stream_config: &cpal::StreamConfig,
    config: &AudioBackendConfig,
    frame_tx: mpsc::Sender<AudioFrame>,
    lost_tx: std_mpsc::Sender<()>,
) -> Result<cpal::Stream, AudioError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let sample_rate = stream_config.sample_rate.0;
    let channels = stream_config.channels.max(1) as usize;
    let frame_len = (sample_rate as u64 * config.buffer_duration_ms / 1000).max(1) as usize;

    let mut pending: Vec<i16> = Vec::with_capacity(frame_len);
    let mut emitted: u64 = 0;

    let stream = device.build_input_stream(
        stream_config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            // Downmix to mono as we go
            for chunk in data.chunks(channels) {
                let sum: f32 = chunk.iter().map(|s| s.to_sample::<f32>()).sum();
                let mono = (sum / chunk.len() as f32).clamp(-1.0, 1.0);
                pending.push((mono * i16::MAX as f32) as i16);

                if pending.len() >= frame_len {
                    let frame = AudioFrame {
                        samples: std::mem::replace(&mut pending, Vec::with_capacity(frame_len)),
                        sample_rate,
                        channels: 1,
                        timestamp_ms: emitted * 1000 / sample_rate as u64,
                    };
                    emitted += frame_len as u64;

                    if let Err(e) = frame_tx.try_send(frame) {
                        debug!("Dropping microphone frame: {}", e);
                    }
                }
            }
        },
        move |err| {
            if is_device_lost(&err) {
                error!("Microphone lost: {}", err);
                let _ = lost_tx.send(());
            } else {
                warn!("Microphone stream error: {}", err);
            }
        },
        None,
    )?;

    if sample_rate != config.target_sample_rate {
        warn!(
            "Input device runs at {}Hz (target {}Hz); frames carry the device rate",
            sample_rate, config.target_sample_rate
        );
    }

    Ok(stream)
}

/// Errors after which the stream will never deliver again
fn is_device_lost(err: &cpal::StreamError) -> bool {
    matches!(err, cpal::StreamError::DeviceNotAvailable)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unplugged_device_releases_stream() {
        assert!(is_device_lost(&cpal::StreamError::DeviceNotAvailable));
    }

    #[test]
    fn test_backend_glitch_keeps_stream() {
        let err = cpal::StreamError::BackendSpecific {
            err: cpal::BackendSpecificError {
                description: "buffer overrun".to_string(),
            },
        };
        assert!(!is_device_lost(&err));
    }

    #[tokio::test]
    async fn test_stop_without_start_is_harmless() {
        let mut backend = MicrophoneBackend::new(AudioBackendConfig::default());
        assert!(!backend.is_capturing());
        assert!(backend.stop().await.is_ok());
    }
}
