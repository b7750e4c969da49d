// Shared fakes for integration tests
//
// Each fake stands in for one external capability of the controller and
// records what it was asked to do.

#![allow(dead_code)]

use loqa_converse::audio::{AudioBackend, AudioBackendConfig, AudioFrame, BackendProvider, FileBackend};
use loqa_converse::error::{AudioError, EngineError, ResponderError};
use loqa_converse::playback::{Playback, PlaybackEvent};
use loqa_converse::preferences::{MemoryPreferences, PreferenceStore};
use loqa_converse::recognition::{EngineEvent, EngineFactory, RecognitionEngine};
use loqa_converse::responder::{Responder, ResponderReply, ResponderRequest};
use loqa_converse::Config;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

pub const SAMPLE_RATE: u32 = 16000;

// ============================================================================
// Audio
// ============================================================================

pub fn silence(ms: u64) -> Vec<i16> {
    vec![0; (SAMPLE_RATE as u64 * ms / 1000) as usize]
}

/// Deterministic full-band noise, loud enough to read as speech
pub fn noise(ms: u64, seed: u32) -> Vec<i16> {
    let mut state = seed.wrapping_mul(2_654_435_761).wrapping_add(1);
    (0..(SAMPLE_RATE as u64 * ms / 1000))
        .map(|_| {
            state = state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            ((state >> 16) % 32_000) as i16 - 16_000
        })
        .collect()
}

/// Quiet room, a short utterance, then a long pause
pub fn utterance_script() -> Vec<i16> {
    let mut samples = silence(1200);
    samples.extend(noise(600, 7));
    samples.extend(silence(4000));
    samples
}

pub fn write_wav(path: &Path, samples: &[i16], sample_rate: u32, channels: u16) -> anyhow::Result<()> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;
    for &s in samples {
        writer.write_sample(s)?;
    }
    writer.finalize()?;
    Ok(())
}

/// Replays a fixed script for every capture and counts live device handles
#[derive(Clone)]
pub struct ScriptedBackends {
    samples: Arc<Vec<i16>>,
    open_handles: Arc<AtomicUsize>,
    opened_devices: Arc<Mutex<Vec<Option<String>>>>,
    deny_permission: Arc<AtomicBool>,
    unplugged: Arc<AtomicBool>,
}

impl ScriptedBackends {
    pub fn new(samples: Vec<i16>) -> Self {
        Self {
            samples: Arc::new(samples),
            open_handles: Arc::new(AtomicUsize::new(0)),
            opened_devices: Arc::new(Mutex::new(Vec::new())),
            deny_permission: Arc::new(AtomicBool::new(false)),
            unplugged: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn open_handles(&self) -> usize {
        self.open_handles.load(Ordering::SeqCst)
    }

    pub fn opened_devices(&self) -> Vec<Option<String>> {
        self.opened_devices.lock().unwrap().clone()
    }

    pub fn deny_permission(&self, deny: bool) {
        self.deny_permission.store(deny, Ordering::SeqCst);
    }

    /// Make every later open fail as if the device was removed
    pub fn unplug(&self, unplugged: bool) {
        self.unplugged.store(unplugged, Ordering::SeqCst);
    }
}

impl BackendProvider for ScriptedBackends {
    fn open(&self, device_id: Option<&str>) -> Result<Box<dyn AudioBackend>, AudioError> {
        if self.deny_permission.load(Ordering::SeqCst) {
            return Err(AudioError::PermissionDenied("microphone access denied".to_string()));
        }
        if self.unplugged.load(Ordering::SeqCst) {
            return Err(AudioError::DeviceNotFound(
                device_id.unwrap_or("default").to_string(),
            ));
        }
        self.opened_devices
            .lock()
            .unwrap()
            .push(device_id.map(str::to_string));

        let inner = FileBackend::from_samples(
            self.samples.to_vec(),
            SAMPLE_RATE,
            AudioBackendConfig::default(),
        );
        Ok(Box::new(CountingBackend {
            inner,
            open_handles: Arc::clone(&self.open_handles),
            started: false,
        }))
    }
}

struct CountingBackend {
    inner: FileBackend,
    open_handles: Arc<AtomicUsize>,
    started: bool,
}

impl CountingBackend {
    fn release(&mut self) {
        if self.started {
            self.started = false;
            self.open_handles.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[async_trait::async_trait]
impl AudioBackend for CountingBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>, AudioError> {
        let rx = self.inner.start().await?;
        self.started = true;
        self.open_handles.fetch_add(1, Ordering::SeqCst);
        Ok(rx)
    }

    async fn stop(&mut self) -> Result<(), AudioError> {
        self.inner.stop().await?;
        self.release();
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.inner.is_capturing()
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

impl Drop for CountingBackend {
    fn drop(&mut self) {
        self.release();
    }
}

// ============================================================================
// Recognition engine
// ============================================================================

#[derive(Default)]
struct EngineShared {
    created: AtomicUsize,
    starts: AtomicUsize,
    aborts: AtomicUsize,
    fail_create: AtomicBool,
    script: Mutex<Vec<(Duration, EngineEvent)>>,
    latest: Mutex<Option<mpsc::Sender<EngineEvent>>>,
}

/// Engine factory whose engines replay a script after every start
#[derive(Clone, Default)]
pub struct FakeEngines {
    shared: Arc<EngineShared>,
}

impl FakeEngines {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events each started engine emits, delays relative to the previous event
    pub fn with_script(self, script: Vec<(Duration, EngineEvent)>) -> Self {
        *self.shared.script.lock().unwrap() = script;
        self
    }

    pub fn fail_create(&self, fail: bool) {
        self.shared.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn created(&self) -> usize {
        self.shared.created.load(Ordering::SeqCst)
    }

    pub fn starts(&self) -> usize {
        self.shared.starts.load(Ordering::SeqCst)
    }

    pub fn aborts(&self) -> usize {
        self.shared.aborts.load(Ordering::SeqCst)
    }

    /// Push an event into the most recently started engine
    pub fn inject(&self, event: EngineEvent) -> bool {
        match self.shared.latest.lock().unwrap().as_ref() {
            Some(tx) => tx.try_send(event).is_ok(),
            None => false,
        }
    }
}

impl EngineFactory for FakeEngines {
    fn create(&self) -> Result<Box<dyn RecognitionEngine>, EngineError> {
        if self.shared.fail_create.load(Ordering::SeqCst) {
            return Err(EngineError::Create("engine unavailable".to_string()));
        }
        self.shared.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeEngine {
            shared: Arc::clone(&self.shared),
            task: None,
        }))
    }
}

struct FakeEngine {
    shared: Arc<EngineShared>,
    task: Option<JoinHandle<()>>,
}

#[async_trait::async_trait]
impl RecognitionEngine for FakeEngine {
    async fn start(
        &mut self,
        _audio: broadcast::Receiver<AudioFrame>,
    ) -> Result<mpsc::Receiver<EngineEvent>, EngineError> {
        self.shared.starts.fetch_add(1, Ordering::SeqCst);

        let (tx, rx) = mpsc::channel(32);
        *self.shared.latest.lock().unwrap() = Some(tx.clone());

        let script = self.shared.script.lock().unwrap().clone();
        self.task = Some(tokio::spawn(async move {
            for (delay, event) in script {
                tokio::time::sleep(delay).await;
                if tx.send(event).await.is_err() {
                    return;
                }
            }
            // Stay alive like a real engine until aborted
            std::future::pending::<()>().await;
        }));

        Ok(rx)
    }

    async fn abort(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            self.shared.aborts.fetch_add(1, Ordering::SeqCst);
        }
        *self.shared.latest.lock().unwrap() = None;
    }

    fn name(&self) -> &str {
        "fake"
    }
}

// ============================================================================
// Responder
// ============================================================================

#[derive(Clone)]
pub enum ReplyBehavior {
    Reply { text: String, audio: Option<Vec<u8>> },
    Fail(String),
}

#[derive(Clone)]
pub struct FakeResponder {
    behavior: Arc<Mutex<ReplyBehavior>>,
    delay: Duration,
    requests: Arc<Mutex<Vec<ResponderRequest>>>,
}

impl FakeResponder {
    pub fn replying(text: &str, audio: Option<Vec<u8>>) -> Self {
        Self {
            behavior: Arc::new(Mutex::new(ReplyBehavior::Reply {
                text: text.to_string(),
                audio,
            })),
            delay: Duration::from_millis(50),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn failing(message: &str) -> Self {
        let responder = Self::replying("", None);
        *responder.behavior.lock().unwrap() = ReplyBehavior::Fail(message.to_string());
        responder
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn requests(&self) -> Vec<ResponderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Responder for FakeResponder {
    async fn respond(&self, request: ResponderRequest) -> Result<ResponderReply, ResponderError> {
        self.requests.lock().unwrap().push(request);
        tokio::time::sleep(self.delay).await;

        let behavior = self.behavior.lock().unwrap().clone();
        match behavior {
            ReplyBehavior::Reply { text, audio } => Ok(ResponderReply { text, audio }),
            ReplyBehavior::Fail(message) => Err(ResponderError::Status {
                status: 500,
                message,
            }),
        }
    }
}

// ============================================================================
// Playback
// ============================================================================

/// Pretends to play for a fixed duration
#[derive(Clone)]
pub struct FakePlayback {
    duration: Duration,
    fail: Option<String>,
    played: Arc<Mutex<Vec<Vec<u8>>>>,
    stops: Arc<AtomicUsize>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl FakePlayback {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            fail: None,
            played: Arc::new(Mutex::new(Vec::new())),
            stops: Arc::new(AtomicUsize::new(0)),
            task: Arc::new(Mutex::new(None)),
        }
    }

    pub fn failing(message: &str) -> Self {
        let mut playback = Self::new(Duration::from_millis(10));
        playback.fail = Some(message.to_string());
        playback
    }

    pub fn played(&self) -> Vec<Vec<u8>> {
        self.played.lock().unwrap().clone()
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

impl Playback for FakePlayback {
    fn play(&mut self, audio: Vec<u8>) -> mpsc::UnboundedReceiver<PlaybackEvent> {
        self.played.lock().unwrap().push(audio);

        let (tx, rx) = mpsc::unbounded_channel();
        let duration = self.duration;
        let fail = self.fail.clone();

        let task = tokio::spawn(async move {
            if let Some(message) = fail {
                let _ = tx.send(PlaybackEvent::Error(message));
                return;
            }
            let _ = tx.send(PlaybackEvent::Started);
            tokio::time::sleep(duration).await;
            let _ = tx.send(PlaybackEvent::Ended);
        });
        *self.task.lock().unwrap() = Some(task);

        rx
    }

    fn stop(&mut self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        if let Some(task) = self.task.lock().unwrap().take() {
            task.abort();
        }
    }
}

// ============================================================================
// Preferences
// ============================================================================

/// Preference store the test can still inspect after handing it over
#[derive(Clone, Default)]
pub struct SharedPreferences {
    inner: Arc<Mutex<MemoryPreferences>>,
}

impl SharedPreferences {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, key: &str, value: &str) -> Self {
        let _ = self.inner.lock().unwrap().set(key, value);
        self
    }
}

impl PreferenceStore for SharedPreferences {
    fn get(&self, key: &str) -> Option<String> {
        self.inner.lock().unwrap().get(key)
    }

    fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        self.inner.lock().unwrap().set(key, value)
    }
}

/// Defaults with a short retry delay
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.recognition.retry_delay_ms = 100;
    config
}
