//! Volume analysis: turns raw capture frames into a loudness signal
//!
//! Each frame is pushed into a sliding window of the most recent `fft_size`
//! samples. The window is transformed with a real FFT, every bin is mapped
//! from decibels onto a 0..255 scale, and the mean is raised to a
//! compression exponent below 1 so normal speech in a quiet room still
//! clears the silence threshold.
//!
//! ```text
//! AudioBackend ──frames──▶ SampleStream ──AudioSample──▶ calibrate() ─▶ Baseline
//!                               │                              │
//!                               └──tap──▶ recognition engine   └─▶ SilenceDetector
//! ```

use futures::stream::{Stream, StreamExt};
use realfft::num_complex::Complex32;
use realfft::{RealFftPlanner, RealToComplex};
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::backend::{AudioBackend, AudioFrame, BackendProvider};
use crate::config::AnalyzerConfig;
use crate::error::AudioError;

/// One volume reading
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioSample {
    /// Compressed loudness, roughly 0..48 for the default curve
    pub volume: f32,
    /// When the underlying frame was captured
    pub at: Instant,
}

/// Result of a calibration window
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    pub baseline: f32,
    pub samples_used: usize,
}

/// Mean of the lowest `percentile` slice of `samples`, never below `floor`
///
/// Using a low percentile instead of the minimum rejects the odd all-zero
/// dropout while still tracking the real noise floor.
pub fn compute_baseline(samples: &[f32], percentile: f32, floor: f32) -> f32 {
    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let count = (sorted.len() as f32 * percentile).floor() as usize;
    if count == 0 {
        return floor;
    }

    let mean = sorted[..count].iter().sum::<f32>() / count as f32;
    mean.max(floor)
}

/// Collect samples for `window` (measured on sample timestamps) and derive the baseline
///
/// Returns `None` if the stream ends before producing a single sample.
pub async fn calibrate<S>(
    samples: &mut S,
    window: Duration,
    percentile: f32,
    floor: f32,
) -> Option<Calibration>
where
    S: Stream<Item = AudioSample> + Unpin,
{
    let mut volumes = Vec::new();
    let mut started: Option<Instant> = None;

    while let Some(sample) = samples.next().await {
        let start = *started.get_or_insert(sample.at);
        volumes.push(sample.volume);

        if sample.at.duration_since(start) >= window {
            break;
        }
    }

    if volumes.is_empty() {
        return None;
    }

    let baseline = compute_baseline(&volumes, percentile, floor);
    debug!(
        "Calibration: {} samples, baseline {:.2}",
        volumes.len(),
        baseline
    );

    Some(Calibration {
        baseline,
        samples_used: volumes.len(),
    })
}

/// Frequency-domain loudness meter
pub struct VolumeMeter {
    config: AnalyzerConfig,
    fft: Arc<dyn RealToComplex<f32>>,
    window: Vec<f32>,
    history: VecDeque<f32>,
    input: Vec<f32>,
    spectrum: Vec<Complex32>,
}

impl VolumeMeter {
    pub fn new(config: AnalyzerConfig) -> Self {
        let n = config.fft_size;

        let mut planner = RealFftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(n);

        // Hann window
        let window: Vec<f32> = (0..n)
            .map(|i| {
                let x = std::f32::consts::PI * i as f32 / (n - 1) as f32;
                0.5 * (1.0 - (2.0 * x).cos())
            })
            .collect();

        let input = fft.make_input_vec();
        let spectrum = fft.make_output_vec();

        Self {
            history: VecDeque::from(vec![0.0; n]),
            config,
            fft,
            window,
            input,
            spectrum,
        }
    }

    /// Push a frame and return the loudness of the most recent `fft_size` samples
    pub fn measure(&mut self, frame: &AudioFrame) -> f32 {
        let n = self.config.fft_size;
        let channels = frame.channels.max(1) as usize;

        for chunk in frame.samples.chunks(channels) {
            let sum: f32 = chunk.iter().map(|&s| s as f32 / i16::MAX as f32).sum();
            let sample = (sum / chunk.len() as f32) * self.config.input_gain;
            if self.history.len() == n {
                self.history.pop_front();
            }
            self.history.push_back(sample);
        }

        for (i, (slot, &sample)) in self.input.iter_mut().zip(self.history.iter()).enumerate() {
            *slot = sample * self.window[i];
        }

        if let Err(e) = self.fft.process(&mut self.input, &mut self.spectrum) {
            warn!("FFT failed: {}", e);
            return 0.0;
        }

        // Skip the Nyquist bin so the bin count matches n / 2
        let bins = &self.spectrum[..n / 2];
        let range = self.config.max_decibels - self.config.min_decibels;
        let total: f32 = bins
            .iter()
            .map(|c| {
                let magnitude = c.norm() / n as f32;
                let db = 20.0 * magnitude.max(1e-12).log10();
                ((db - self.config.min_decibels) / range * 255.0).clamp(0.0, 255.0).floor()
            })
            .sum();

        let mean = total / bins.len() as f32;
        mean.powf(self.config.compression_exponent)
    }
}

/// Lazy, non-restartable sequence of volume samples from one capture
pub struct SampleStream {
    frames: mpsc::Receiver<AudioFrame>,
    meter: VolumeMeter,
    origin: Instant,
    tap: Option<broadcast::Sender<AudioFrame>>,
}

impl SampleStream {
    pub fn new(frames: mpsc::Receiver<AudioFrame>, config: AnalyzerConfig, origin: Instant) -> Self {
        Self {
            frames,
            meter: VolumeMeter::new(config),
            origin,
            tap: None,
        }
    }

    /// Forward every raw frame to `tap` before it is measured
    pub fn with_tap(mut self, tap: broadcast::Sender<AudioFrame>) -> Self {
        self.tap = Some(tap);
        self
    }
}

impl Stream for SampleStream {
    type Item = AudioSample;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match this.frames.poll_recv(cx) {
            Poll::Ready(Some(frame)) => {
                if let Some(tap) = &this.tap {
                    // No subscribers is fine: the engine may not be running yet
                    let _ = tap.send(frame.clone());
                }
                let volume = this.meter.measure(&frame);
                let at = this.origin + Duration::from_millis(frame.timestamp_ms);
                Poll::Ready(Some(AudioSample { volume, at }))
            }
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Owns one acquired input device and hands out its sample stream once
pub struct VolumeAnalyzer {
    backend: Option<Box<dyn AudioBackend>>,
    frames: Option<mpsc::Receiver<AudioFrame>>,
    config: AnalyzerConfig,
    origin: Instant,
}

impl VolumeAnalyzer {
    /// Open an input (optionally pinned to `device_id`) and start capturing
    pub async fn acquire(
        provider: &dyn BackendProvider,
        device_id: Option<&str>,
        config: AnalyzerConfig,
    ) -> Result<Self, AudioError> {
        let mut backend = provider.open(device_id)?;
        let frames = backend.start().await?;

        info!("Volume analyzer acquired input ({})", backend.name());

        Ok(Self {
            backend: Some(backend),
            frames: Some(frames),
            config,
            origin: Instant::now(),
        })
    }

    /// Take the sample stream; `None` on every call after the first
    pub fn sample(&mut self) -> Option<SampleStream> {
        self.frames
            .take()
            .map(|frames| SampleStream::new(frames, self.config.clone(), self.origin))
    }

    pub fn is_acquired(&self) -> bool {
        self.backend.as_ref().map(|b| b.is_capturing()).unwrap_or(false)
    }

    /// Close the device; safe to call more than once
    pub async fn release(&mut self) {
        self.frames = None;
        if let Some(mut backend) = self.backend.take() {
            if let Err(e) = backend.stop().await {
                warn!("Failed to stop {} cleanly: {}", backend.name(), e);
            }
            info!("Volume analyzer released input ({})", backend.name());
        }
    }
}
