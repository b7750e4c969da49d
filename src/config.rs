use anyhow::{bail, Result};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub audio: AudioConfig,
    pub analyzer: AnalyzerConfig,
    pub detection: DetectionConfig,
    pub recognition: RecognitionConfig,
    pub responder: ResponderConfig,
    pub turn: TurnConfig,
    pub preferences: PreferencesConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "loqa-converse".to_string(),
            http: HttpConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 3030,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub buffer_duration_ms: u64,
    /// Input device pinned when no stored preference exists
    pub device_id: Option<String>,
    /// WAV file replayed instead of the microphone
    pub input_file: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            channels: 1,
            buffer_duration_ms: 30,
            device_id: None,
            input_file: None,
        }
    }
}

/// Volume analysis and calibration tuning
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    pub fft_size: usize,
    pub input_gain: f32,
    pub min_decibels: f32,
    pub max_decibels: f32,
    /// Exponent below 1 so quiet speech is lifted relative to loud sounds
    pub compression_exponent: f32,
    pub calibration_ms: u64,
    pub calibration_percentile: f32,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            fft_size: 2048,
            input_gain: 1.5,
            min_decibels: -90.0,
            max_decibels: -10.0,
            compression_exponent: 0.7,
            calibration_ms: 1000,
            calibration_percentile: 0.15,
        }
    }
}

impl AnalyzerConfig {
    pub fn calibration_window(&self) -> Duration {
        Duration::from_millis(self.calibration_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub silence_window_ms: u64,
    pub duplicate_window_ms: u64,
    pub minimum_floor: f32,
    pub damping_factor: f32,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            silence_window_ms: 1500,
            duplicate_window_ms: 800,
            minimum_floor: 3.0,
            damping_factor: 0.8,
        }
    }
}

impl DetectionConfig {
    pub fn silence_window(&self) -> Duration {
        Duration::from_millis(self.silence_window_ms)
    }

    pub fn duplicate_window(&self) -> Duration {
        Duration::from_millis(self.duplicate_window_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecognitionConfig {
    pub reinit_interval_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    /// An engine that ends sooner than this after starting counts as a failure
    pub min_engine_run_ms: u64,
    /// Engine error kinds that are expected and ignored
    pub benign_errors: Vec<String>,
    /// Engine error kinds that end the session with `PermissionDenied`
    pub fatal_errors: Vec<String>,
    pub nats_url: String,
    pub language: String,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            reinit_interval_ms: 30_000,
            max_retries: 3,
            retry_delay_ms: 500,
            min_engine_run_ms: 1_000,
            benign_errors: vec!["no-speech".to_string(), "aborted".to_string()],
            fatal_errors: vec![
                "not-allowed".to_string(),
                "permission-denied".to_string(),
                "service-not-allowed".to_string(),
            ],
            nats_url: "nats://localhost:4222".to_string(),
            language: "en-US".to_string(),
        }
    }
}

impl RecognitionConfig {
    pub fn reinit_interval(&self) -> Duration {
        Duration::from_millis(self.reinit_interval_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn min_engine_run(&self) -> Duration {
        Duration::from_millis(self.min_engine_run_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ResponderConfig {
    pub url: String,
    pub timeout_secs: u64,
    pub fallback_message: String,
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:3000/api/chat".to_string(),
            timeout_secs: 30,
            fallback_message: "Sorry, I encountered an error processing your request.".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TurnConfig {
    /// Pause after playback before the microphone is re-armed
    pub settle_delay_ms: u64,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: 1000,
        }
    }
}

impl TurnConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PreferencesConfig {
    pub path: String,
}

impl Default for PreferencesConfig {
    fn default() -> Self {
        Self {
            path: "loqa-converse-preferences.json".to_string(),
        }
    }
}

impl Config {
    /// Load from `<path>.toml` (if present) overlaid with `LOQA_CONVERSE__*` env vars
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix("LOQA_CONVERSE").separator("__"))
            .build()?;

        let cfg: Config = settings.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        let analyzer = &self.analyzer;
        if !analyzer.fft_size.is_power_of_two() || analyzer.fft_size < 32 {
            bail!("analyzer.fft_size must be a power of two >= 32, got {}", analyzer.fft_size);
        }
        if !(analyzer.compression_exponent > 0.0 && analyzer.compression_exponent < 1.0) {
            bail!(
                "analyzer.compression_exponent must be in (0, 1), got {}",
                analyzer.compression_exponent
            );
        }
        if !(analyzer.calibration_percentile > 0.0 && analyzer.calibration_percentile <= 1.0) {
            bail!(
                "analyzer.calibration_percentile must be in (0, 1], got {}",
                analyzer.calibration_percentile
            );
        }
        if analyzer.min_decibels >= analyzer.max_decibels {
            bail!("analyzer.min_decibels must be below analyzer.max_decibels");
        }
        if self.detection.silence_window_ms == 0 {
            bail!("detection.silence_window_ms must be positive");
        }
        if self.detection.damping_factor <= 0.0 {
            bail!("detection.damping_factor must be positive");
        }
        if self.audio.buffer_duration_ms == 0 || self.audio.sample_rate == 0 {
            bail!("audio.sample_rate and audio.buffer_duration_ms must be positive");
        }
        Ok(())
    }
}
