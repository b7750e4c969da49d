//! Recognition lifecycle management
//!
//! `RecognitionManager` owns everything that lives for one listening
//! session: the acquired input device, the volume pump, the engine's event
//! forwarder, the transcript buffer and the silence detector. Spawned tasks
//! never touch that state; they send tagged `ManagerEvent`s into the
//! manager's queue and the owner feeds them back through `handle_event()`.
//! Every teardown bumps the tag, so events from a torn-down session are
//! dropped on arrival.
//!
//! Engine instances degrade over long sessions, so the manager replaces the
//! instance once `reinit_interval` has passed since the current one was
//! created. Transient engine failures trigger the same full reinitialization.
//! Failures are counted from the last delivered utterance or explicit start:
//! the first one in a chain is recovered immediately, every later one (and
//! every failed recovery) waits out a growing delay, and the one after
//! `max_retries` ends the session with `RecognitionUnrecoverable`.

use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::engine::{EngineEvent, EngineFactory, RecognitionEngine};
use super::policy::{ErrorClass, ErrorPolicy};
use crate::audio::{calibrate, AudioFrame, AudioSample, BackendProvider, Calibration, SampleStream, VolumeAnalyzer};
use crate::config::{AnalyzerConfig, Config, DetectionConfig, RecognitionConfig};
use crate::error::{ControllerError, ControllerResult};
use crate::timer::{TimerKind, Timers};
use crate::turn::{BoundaryTrigger, SilenceDetector, TranscriptBuffer, TurnBoundary};

const FEED_CAPACITY: usize = 64;

/// What a capture pump reports
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureEvent {
    Calibrated(Calibration),
    Sample(AudioSample),
    /// The frame stream closed (device lost or file exhausted)
    Ended,
}

/// Work queued for the manager by its own helper tasks
#[derive(Debug, Clone, PartialEq)]
pub enum ManagerEvent {
    Capture { tag: u64, event: CaptureEvent },
    Engine { tag: u64, event: EngineEvent },
    RetryDue { seq: u64 },
}

/// What the owner needs to act on after an event was handled
#[derive(Debug, Clone, PartialEq)]
pub enum ManagerSignal {
    Calibrated(f32),
    Volume(f32),
    Utterance(TurnBoundary),
    /// The session is gone; capture has already been stopped
    Fatal(ControllerError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ManagerStats {
    pub sessions_started: u64,
    pub reinitializations: u64,
    pub engine_restarts: u64,
    pub failed_recoveries: u64,
}

struct CaptureSession {
    tag: u64,
    analyzer: VolumeAnalyzer,
    pump: JoinHandle<()>,
    feed: broadcast::Sender<AudioFrame>,
}

pub struct RecognitionManager {
    analyzer_config: AnalyzerConfig,
    detection: DetectionConfig,
    recognition: RecognitionConfig,
    policy: ErrorPolicy,

    backends: Arc<dyn BackendProvider>,
    engines: Arc<dyn EngineFactory>,

    events_tx: mpsc::UnboundedSender<ManagerEvent>,
    events_rx: mpsc::UnboundedReceiver<ManagerEvent>,

    engine: Option<Box<dyn RecognitionEngine>>,
    engine_tag: u64,
    engine_started_at: Option<Instant>,
    forwarder: Option<JoinHandle<()>>,
    capture: Option<CaptureSession>,
    next_tag: u64,

    session_started_at: Option<Instant>,
    listening: bool,
    device_id: Option<String>,

    transcript: TranscriptBuffer,
    detector: SilenceDetector,
    timers: Timers,
    retries: u32,
    stats: ManagerStats,
}

impl RecognitionManager {
    pub fn new(
        config: &Config,
        backends: Arc<dyn BackendProvider>,
        engines: Arc<dyn EngineFactory>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        Self {
            analyzer_config: config.analyzer.clone(),
            detection: config.detection.clone(),
            recognition: config.recognition.clone(),
            policy: ErrorPolicy::from_config(&config.recognition),
            backends,
            engines,
            events_tx,
            events_rx,
            engine: None,
            engine_tag: 0,
            engine_started_at: None,
            forwarder: None,
            capture: None,
            next_tag: 0,
            session_started_at: None,
            listening: false,
            device_id: config.audio.device_id.clone(),
            transcript: TranscriptBuffer::new(),
            detector: SilenceDetector::new(config.detection.clone()),
            timers: Timers::new(),
            retries: 0,
            stats: ManagerStats::default(),
        }
    }

    /// Wait for the next queued event; pair with `handle_event()`
    pub async fn next_event(&mut self) -> Option<ManagerEvent> {
        self.events_rx.recv().await
    }

    /// Begin capture and recognition, tearing down any session already running
    ///
    /// Device and permission failures are returned directly. An engine that
    /// fails to start is handled like any other transient failure: a retry is
    /// scheduled and `Ok` is returned while attempts remain.
    pub async fn start(&mut self, device_id: Option<String>) -> ControllerResult<()> {
        if device_id.is_some() {
            self.device_id = device_id;
        }
        self.listening = true;
        self.timers.cancel(TimerKind::Retry);
        self.stats.sessions_started += 1;

        info!(
            "Starting recognition (device: {})",
            self.device_id.as_deref().unwrap_or("default")
        );

        match self.open_session().await {
            Ok(()) => Ok(()),
            Err(e) if e.is_fatal() => {
                self.stop().await;
                Err(e)
            }
            Err(e) => self.register_failure(e.to_string()).await,
        }
    }

    /// Stop everything; the engine instance is kept for the next `start()`
    pub async fn stop(&mut self) {
        if self.listening || self.capture.is_some() {
            info!("Stopping recognition");
        }
        self.listening = false;
        self.timers.clear();
        self.halt_engine().await;
        self.close_capture().await;
        self.transcript.reset();
        self.detector.reset();
    }

    /// Replace the engine instance and drop all per-session state
    ///
    /// Callbacks are detached before the old instance is aborted. Safe to
    /// call repeatedly.
    pub async fn force_reinitialize(&mut self) -> ControllerResult<()> {
        info!("Reinitializing recognition engine");
        self.halt_engine().await;
        self.engine = None;
        self.close_capture().await;
        self.transcript.reset();
        self.detector.reset();

        self.session_started_at = Some(Instant::now());
        self.stats.reinitializations += 1;
        self.engine = Some(self.engines.create()?);
        Ok(())
    }

    /// Classify an engine error and act on it
    pub async fn handle_engine_error(&mut self, kind: &str) -> ControllerResult<()> {
        match self.policy.classify(kind) {
            ErrorClass::Benign => {
                debug!("Ignoring benign recognition error: {}", kind);
                Ok(())
            }
            ErrorClass::Fatal => {
                error!("Recognition permission error: {}", kind);
                self.stop().await;
                Err(ControllerError::PermissionDenied(kind.to_string()))
            }
            ErrorClass::Transient => {
                warn!("Transient recognition error: {}", kind);
                if !self.listening {
                    return Ok(());
                }
                self.on_session_failure(kind.to_string()).await
            }
        }
    }

    /// The engine ended on its own while we still want to listen
    ///
    /// An engine that ends within `min_engine_run` of starting counts as a
    /// failure, the same as a transient error.
    pub async fn handle_engine_end(&mut self) -> ControllerResult<()> {
        if !self.listening {
            return Ok(());
        }

        let short_lived = self
            .engine_started_at
            .map_or(false, |started| started.elapsed() < self.recognition.min_engine_run());
        if short_lived {
            warn!("Recognition engine ended right after starting");
            return self
                .on_session_failure("engine ended right after starting".to_string())
                .await;
        }

        if self.reinit_due() || self.engine.is_none() || self.capture.is_none() {
            debug!("Engine ended; restarting full session");
            return self.recover().await;
        }

        debug!("Engine ended; restarting engine only");
        self.stats.engine_restarts += 1;
        match self.start_engine().await {
            Ok(()) => Ok(()),
            Err(e) => self.register_failure(e.to_string()).await,
        }
    }

    /// Process one queued event
    pub async fn handle_event(&mut self, event: ManagerEvent) -> Vec<ManagerSignal> {
        let mut signals = Vec::new();

        match event {
            ManagerEvent::Capture { tag, event } => {
                if self.capture.as_ref().map(|c| c.tag) != Some(tag) {
                    debug!("Dropping stale capture event (tag {})", tag);
                    return signals;
                }
                self.on_capture(event, &mut signals).await;
            }
            ManagerEvent::Engine { tag, event } => {
                if tag != self.engine_tag || self.forwarder.is_none() {
                    debug!("Dropping stale engine event (tag {})", tag);
                    return signals;
                }
                self.on_engine(event, &mut signals).await;
            }
            ManagerEvent::RetryDue { seq } => {
                if !self.timers.fire(TimerKind::Retry, seq) || !self.listening {
                    return signals;
                }
                info!("Retrying recognition (attempt {})", self.retries);
                if let Err(e) = self.recover().await {
                    signals.push(ManagerSignal::Fatal(e));
                }
            }
        }

        signals
    }

    async fn on_capture(&mut self, event: CaptureEvent, signals: &mut Vec<ManagerSignal>) {
        match event {
            CaptureEvent::Calibrated(calibration) => {
                self.detector.set_baseline(calibration.baseline);
                signals.push(ManagerSignal::Calibrated(calibration.baseline));
            }
            CaptureEvent::Sample(sample) => {
                signals.push(ManagerSignal::Volume(sample.volume));
                if let Some(boundary) = self.detector.observe(&sample, &mut self.transcript) {
                    self.retries = 0;
                    signals.push(ManagerSignal::Utterance(boundary));
                }
            }
            CaptureEvent::Ended => {
                if !self.listening {
                    return;
                }
                warn!("Audio capture ended unexpectedly");
                if let Err(e) = self.on_session_failure("audio capture ended".to_string()).await {
                    signals.push(ManagerSignal::Fatal(e));
                }
            }
        }
    }

    async fn on_engine(&mut self, event: EngineEvent, signals: &mut Vec<ManagerSignal>) {
        match event {
            EngineEvent::Partial(text) => {
                self.transcript.update_partial(&text);
            }
            EngineEvent::Final(text) => {
                let now = Instant::now();
                match self
                    .transcript
                    .accept_final(&text, now, self.detection.duplicate_window())
                {
                    Some(text) => {
                        self.detector.clear_silence();
                        self.retries = 0;
                        info!("Turn boundary from engine: \"{}\"", text);
                        signals.push(ManagerSignal::Utterance(TurnBoundary {
                            text,
                            at: now,
                            trigger: BoundaryTrigger::EngineFinal,
                        }));
                    }
                    None => debug!("Suppressed duplicate final result"),
                }
            }
            EngineEvent::Error(kind) => {
                if let Err(e) = self.handle_engine_error(&kind).await {
                    signals.push(ManagerSignal::Fatal(e));
                }
            }
            EngineEvent::End => {
                if let Err(e) = self.handle_engine_end().await {
                    signals.push(ManagerSignal::Fatal(e));
                }
            }
        }
    }

    /// Full reinitialize followed by a fresh session
    async fn recover(&mut self) -> ControllerResult<()> {
        match self.reinitialize_and_open().await {
            Ok(()) => Ok(()),
            Err(e) if e.is_fatal() => {
                self.stop().await;
                Err(e)
            }
            Err(e) => {
                self.stats.failed_recoveries += 1;
                self.register_failure(e.to_string()).await
            }
        }
    }

    /// Count a failure of a running session and restart it
    ///
    /// The first failure since the last utterance or explicit start is
    /// recovered right away; later ones tear the session down and restart
    /// after a delay.
    async fn on_session_failure(&mut self, reason: String) -> ControllerResult<()> {
        if self.retries >= self.recognition.max_retries {
            return self.give_up(reason).await;
        }
        self.retries += 1;

        if self.retries == 1 {
            return match self.reinitialize_and_open().await {
                Ok(()) => Ok(()),
                Err(e) if e.is_fatal() => {
                    self.stop().await;
                    Err(e)
                }
                Err(e) => {
                    self.stats.failed_recoveries += 1;
                    self.schedule_retry(&e.to_string());
                    Ok(())
                }
            };
        }

        self.halt_engine().await;
        self.close_capture().await;
        self.schedule_retry(&reason);
        Ok(())
    }

    async fn reinitialize_and_open(&mut self) -> ControllerResult<()> {
        self.force_reinitialize().await?;
        self.open_session().await
    }

    /// Count a failed recovery; schedule a retry or give up
    async fn register_failure(&mut self, reason: String) -> ControllerResult<()> {
        if self.retries >= self.recognition.max_retries {
            return self.give_up(reason).await;
        }
        self.retries += 1;
        self.schedule_retry(&reason);
        Ok(())
    }

    async fn give_up(&mut self, reason: String) -> ControllerResult<()> {
        let attempts = self.retries + 1;
        error!(
            "Recognition failed {} times in a row, giving up: {}",
            attempts, reason
        );
        self.stop().await;
        Err(ControllerError::RecognitionUnrecoverable {
            attempts,
            last: reason,
        })
    }

    /// Arm the retry timer for the current failure count
    fn schedule_retry(&mut self, reason: &str) {
        let delay = self.recognition.retry_delay() * self.retries.max(1);
        warn!(
            "Recognition failed ({}), retry {}/{} in {:?}",
            reason, self.retries, self.recognition.max_retries, delay
        );
        self.timers.schedule(
            TimerKind::Retry,
            delay,
            self.events_tx.clone(),
            |seq| ManagerEvent::RetryDue { seq },
        );
    }

    fn reinit_due(&self) -> bool {
        match self.session_started_at {
            Some(started) => started.elapsed() > self.recognition.reinit_interval(),
            None => true,
        }
    }

    /// Open capture and start the engine; at most one session exists afterwards
    async fn open_session(&mut self) -> ControllerResult<()> {
        self.halt_engine().await;
        self.close_capture().await;

        if self.engine.is_none() {
            self.session_started_at = Some(Instant::now());
            self.engine = Some(self.engines.create()?);
        } else if self.reinit_due() {
            self.force_reinitialize().await?;
        }

        let mut analyzer = VolumeAnalyzer::acquire(
            self.backends.as_ref(),
            self.device_id.as_deref(),
            self.analyzer_config.clone(),
        )
        .await?;

        let Some(stream) = analyzer.sample() else {
            analyzer.release().await;
            return Err(ControllerError::DeviceUnavailable(
                "sample stream already taken".to_string(),
            ));
        };

        let (feed, _) = broadcast::channel(FEED_CAPACITY);
        let stream = stream.with_tap(feed.clone());

        self.next_tag += 1;
        let tag = self.next_tag;
        let pump = tokio::spawn(run_pump(
            tag,
            stream,
            self.analyzer_config.clone(),
            self.detection.minimum_floor,
            self.events_tx.clone(),
        ));

        self.capture = Some(CaptureSession {
            tag,
            analyzer,
            pump,
            feed,
        });

        if let Err(e) = self.start_engine().await {
            self.close_capture().await;
            return Err(e);
        }

        Ok(())
    }

    async fn start_engine(&mut self) -> ControllerResult<()> {
        self.halt_engine().await;

        let audio = match &self.capture {
            Some(capture) => capture.feed.subscribe(),
            None => {
                return Err(ControllerError::TransientEngine(
                    "no capture session to feed the engine".to_string(),
                ))
            }
        };
        let Some(engine) = self.engine.as_mut() else {
            return Err(ControllerError::TransientEngine(
                "no engine instance".to_string(),
            ));
        };

        let events = engine.start(audio).await?;
        debug!("Recognition engine {} started", engine.name());

        self.next_tag += 1;
        self.engine_tag = self.next_tag;
        self.engine_started_at = Some(Instant::now());
        self.forwarder = Some(tokio::spawn(forward_engine_events(
            self.engine_tag,
            events,
            self.events_tx.clone(),
        )));
        Ok(())
    }

    /// Detach the forwarder, then abort the running engine
    async fn halt_engine(&mut self) {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
            self.engine_tag = 0;
            self.engine_started_at = None;
            if let Some(engine) = self.engine.as_mut() {
                engine.abort().await;
            }
        }
    }

    async fn close_capture(&mut self) {
        if let Some(mut capture) = self.capture.take() {
            capture.pump.abort();
            capture.analyzer.release().await;
        }
    }

    pub fn is_listening(&self) -> bool {
        self.listening
    }

    pub fn is_capturing(&self) -> bool {
        self.capture.is_some()
    }

    pub fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref()
    }

    pub fn set_device(&mut self, device_id: Option<String>) {
        self.device_id = device_id;
    }

    pub fn transcript(&self) -> &str {
        self.transcript.text()
    }

    pub fn threshold(&self) -> Option<f32> {
        self.detector.threshold()
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn reset_retries(&mut self) {
        self.retries = 0;
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.pending()
    }

    pub fn stats(&self) -> ManagerStats {
        self.stats
    }

    pub fn session_started_at(&self) -> Option<Instant> {
        self.session_started_at
    }
}

/// Calibrate, then stream samples until the capture closes
async fn run_pump(
    tag: u64,
    mut stream: SampleStream,
    config: AnalyzerConfig,
    floor: f32,
    tx: mpsc::UnboundedSender<ManagerEvent>,
) {
    let send = |event: CaptureEvent| tx.send(ManagerEvent::Capture { tag, event }).is_ok();

    match calibrate(
        &mut stream,
        config.calibration_window(),
        config.calibration_percentile,
        floor,
    )
    .await
    {
        Some(calibration) => {
            if !send(CaptureEvent::Calibrated(calibration)) {
                return;
            }
        }
        None => {
            send(CaptureEvent::Ended);
            return;
        }
    }

    while let Some(sample) = stream.next().await {
        if !send(CaptureEvent::Sample(sample)) {
            return;
        }
    }

    send(CaptureEvent::Ended);
}

async fn forward_engine_events(
    tag: u64,
    mut events: mpsc::Receiver<EngineEvent>,
    tx: mpsc::UnboundedSender<ManagerEvent>,
) {
    let mut ended = false;
    while let Some(event) = events.recv().await {
        ended = event == EngineEvent::End;
        if tx.send(ManagerEvent::Engine { tag, event }).is_err() {
            return;
        }
        if ended {
            return;
        }
    }

    if !ended {
        let _ = tx.send(ManagerEvent::Engine {
            tag,
            event: EngineEvent::End,
        });
    }
}
