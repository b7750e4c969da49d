//! Silence-based end-of-utterance detection
//!
//! The recognition engine's own end-of-speech signal may never arrive, so the
//! controller watches the volume signal itself: once the volume stays under
//! `max(minimum_floor, baseline * damping_factor)` for a full silence window
//! and there is transcript text to forward, the utterance is complete.

use tokio::time::Instant;
use tracing::{debug, info};

use super::transcript::TranscriptBuffer;
use crate::audio::AudioSample;
use crate::config::DetectionConfig;

/// What closed the utterance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryTrigger {
    /// The volume signal stayed below threshold for the silence window
    Silence,
    /// The recognition engine delivered a final result
    EngineFinal,
}

/// A completed utterance ready to forward
#[derive(Debug, Clone, PartialEq)]
pub struct TurnBoundary {
    pub text: String,
    pub at: Instant,
    pub trigger: BoundaryTrigger,
}

pub struct SilenceDetector {
    config: DetectionConfig,
    baseline: Option<f32>,
    silence_started_at: Option<Instant>,
}

impl SilenceDetector {
    pub fn new(config: DetectionConfig) -> Self {
        Self {
            config,
            baseline: None,
            silence_started_at: None,
        }
    }

    /// Install the calibrated ambient baseline; detection stays inert until then
    pub fn set_baseline(&mut self, baseline: f32) {
        info!(
            "Silence detector armed: baseline {:.2}, threshold {:.2}",
            baseline,
            self.threshold_for(baseline)
        );
        self.baseline = Some(baseline);
        self.silence_started_at = None;
    }

    pub fn is_calibrated(&self) -> bool {
        self.baseline.is_some()
    }

    /// Current dynamic threshold, or `None` before calibration
    pub fn threshold(&self) -> Option<f32> {
        self.baseline.map(|b| self.threshold_for(b))
    }

    pub fn silence_started_at(&self) -> Option<Instant> {
        self.silence_started_at
    }

    fn threshold_for(&self, baseline: f32) -> f32 {
        self.config
            .minimum_floor
            .max(baseline * self.config.damping_factor)
    }

    /// Feed one sample; returns a boundary when the utterance is complete
    pub fn observe(
        &mut self,
        sample: &AudioSample,
        transcript: &mut TranscriptBuffer,
    ) -> Option<TurnBoundary> {
        let threshold = self.threshold()?;
        let now = sample.at;

        if sample.volume >= threshold {
            if self.silence_started_at.take().is_some() {
                debug!("Speech resumed at volume {:.2}", sample.volume);
            }
            return None;
        }

        let Some(started) = self.silence_started_at else {
            self.silence_started_at = Some(now);
            return None;
        };

        if now.saturating_duration_since(started) < self.config.silence_window() {
            return None;
        }

        if transcript.is_empty()
            || !transcript.outside_duplicate_window(now, self.config.duplicate_window())
        {
            return None;
        }

        self.silence_started_at = None;
        let text = transcript.finalize(now);
        info!("Turn boundary after silence: \"{}\"", text);

        Some(TurnBoundary {
            text,
            at: now,
            trigger: BoundaryTrigger::Silence,
        })
    }

    /// Forget a pending silence run without touching calibration
    pub fn clear_silence(&mut self) {
        self.silence_started_at = None;
    }

    /// Drop calibration and any pending silence
    pub fn reset(&mut self) {
        self.baseline = None;
        self.silence_started_at = None;
    }
}
