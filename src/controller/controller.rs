//! The turn-taking loop
//!
//! ```text
//! Idle ──start──▶ Listening ──utterance──▶ Processing ──reply with audio──▶ Speaking
//!                    ▲                        │                               │
//!                    │                 no audio / failure               ended / error
//!                    │                        │                               ▼
//!                    └──── continuous ◀───────┴─────────────────────── settle delay
//!
//! stop / fatal error from any state ──▶ Idle (continuous mode cleared)
//! ```
//!
//! Capture is stopped before the state leaves `Listening` and is only
//! restarted after playback plus the settle delay, so the microphone never
//! hears the reply.

use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::event::{Command, ControllerEvent, ControllerNotice};
use super::handle::ControllerHandle;
use super::state::{ControllerStats, ControllerStatus, TurnState};
use crate::audio::BackendProvider;
use crate::config::Config;
use crate::error::ControllerError;
use crate::playback::{Playback, PlaybackEvent};
use crate::preferences::{PreferenceStore, DEVICE_KEY, VOICE_KEY};
use crate::recognition::{EngineFactory, ManagerEvent, ManagerSignal, RecognitionManager};
use crate::responder::{Responder, ResponderReply, ResponderRequest};
use crate::timer::{TimerKind, Timers};
use crate::turn::TurnBoundary;
use crate::voices;

const NOTICE_CAPACITY: usize = 256;

/// External capabilities the controller drives
pub struct Collaborators {
    pub backends: Arc<dyn BackendProvider>,
    pub engines: Arc<dyn EngineFactory>,
    pub responder: Arc<dyn Responder>,
    pub playback: Box<dyn Playback>,
    pub preferences: Box<dyn PreferenceStore>,
}

pub struct Controller {
    settle_delay: std::time::Duration,
    fallback_message: String,

    manager: RecognitionManager,
    responder: Arc<dyn Responder>,
    playback: Box<dyn Playback>,
    preferences: Box<dyn PreferenceStore>,

    events_tx: mpsc::UnboundedSender<ControllerEvent>,
    events_rx: mpsc::UnboundedReceiver<ControllerEvent>,
    status_tx: watch::Sender<ControllerStatus>,
    notices: broadcast::Sender<ControllerNotice>,

    state: TurnState,
    continuous: bool,
    voice_id: String,
    turn: u64,
    responder_task: Option<JoinHandle<()>>,
    playback_forwarder: Option<JoinHandle<()>>,
    timers: Timers,
    stats: ControllerStats,
    last_error: Option<String>,
}

impl Controller {
    /// Build a controller and the handle that drives it
    ///
    /// Saved device and voice preferences are applied here.
    pub fn new(config: &Config, collaborators: Collaborators) -> (Self, ControllerHandle) {
        let Collaborators {
            backends,
            engines,
            responder,
            playback,
            preferences,
        } = collaborators;

        let mut manager = RecognitionManager::new(config, backends, engines);
        if let Some(device_id) = preferences.get(DEVICE_KEY) {
            info!("Using saved input device: {}", device_id);
            manager.set_device(Some(device_id));
        }

        let voice_id = preferences
            .get(VOICE_KEY)
            .unwrap_or_else(|| voices::default_voice().id.to_string());

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);

        let stats = ControllerStats::default();
        let initial = ControllerStatus {
            state: TurnState::Idle,
            continuous: false,
            device_id: manager.device_id().map(str::to_string),
            voice_id: voice_id.clone(),
            threshold: None,
            last_error: None,
            stats: stats.clone(),
        };
        let (status_tx, status_rx) = watch::channel(initial);

        let handle = ControllerHandle::new(events_tx.clone(), status_rx, notices.clone());

        let controller = Self {
            settle_delay: config.turn.settle_delay(),
            fallback_message: config.responder.fallback_message.clone(),
            manager,
            responder,
            playback,
            preferences,
            events_tx,
            events_rx,
            status_tx,
            notices,
            state: TurnState::Idle,
            continuous: false,
            voice_id,
            turn: 0,
            responder_task: None,
            playback_forwarder: None,
            timers: Timers::new(),
            stats,
            last_error: None,
        };

        (controller, handle)
    }

    /// Capture from `device_id` for this run only, ahead of any saved preference
    pub fn use_device(&mut self, device_id: String) {
        info!("Using input device override: {}", device_id);
        self.manager.set_device(Some(device_id));
        self.publish_status();
    }

    /// Build and run on a fresh task
    pub fn spawn(config: &Config, collaborators: Collaborators) -> (ControllerHandle, JoinHandle<()>) {
        let (controller, handle) = Self::new(config, collaborators);
        let task = tokio::spawn(controller.run());
        (handle, task)
    }

    /// Process events until `Command::Shutdown`
    pub async fn run(mut self) {
        info!("Turn-taking controller started");

        loop {
            tokio::select! {
                event = self.events_rx.recv() => {
                    let Some(event) = event else { break };
                    if !self.handle_event(event).await {
                        break;
                    }
                }
                Some(event) = self.manager.next_event() => {
                    self.handle_manager_event(event).await;
                }
            }
            self.publish_status();
        }

        self.teardown().await;
        self.publish_status();
        info!("Turn-taking controller stopped");
    }

    /// Returns false when the loop should exit
    async fn handle_event(&mut self, event: ControllerEvent) -> bool {
        match event {
            ControllerEvent::Command(command) => return self.handle_command(command).await,
            ControllerEvent::Reply { turn, result } => {
                if turn != self.turn || self.state != TurnState::Processing {
                    debug!("Dropping stale responder reply for turn {}", turn);
                    return true;
                }
                self.responder_task = None;
                match result {
                    Ok(reply) => self.on_reply(reply).await,
                    Err(e) => self.on_responder_failure(ControllerError::from(e)).await,
                }
            }
            ControllerEvent::Playback { turn, event } => {
                if turn != self.turn || self.state != TurnState::Speaking {
                    debug!("Dropping stale playback event for turn {}", turn);
                    return true;
                }
                self.on_playback(event);
            }
            ControllerEvent::Timer { kind, seq } => {
                if !self.timers.fire(kind, seq) {
                    return true;
                }
                if kind == TimerKind::Settle && self.state == TurnState::Speaking {
                    self.playback_forwarder = None;
                    self.resume_after_turn().await;
                }
            }
        }
        true
    }

    async fn handle_command(&mut self, command: Command) -> bool {
        debug!("Command: {:?}", command);

        match command {
            Command::StartContinuousListening => {
                self.continuous = true;
                if self.state != TurnState::Idle {
                    debug!("Already active ({:?}); continuous mode armed", self.state);
                    return true;
                }
                self.last_error = None;
                self.manager.reset_retries();
                self.begin_listening().await;
            }
            Command::StopListening => {
                info!("Stop requested");
                self.continuous = false;
                self.cancel_turn().await;
                self.set_state(TurnState::Idle);
            }
            Command::SelectDevice(device_id) => {
                info!("Selecting input device: {}", device_id);
                if let Err(e) = self.preferences.set(DEVICE_KEY, &device_id) {
                    warn!("Failed to save device preference: {}", e);
                }
                self.manager.set_device(Some(device_id));

                if self.state == TurnState::Listening {
                    self.manager.stop().await;
                    self.begin_listening().await;
                }
            }
            Command::SelectVoice(voice_id) => {
                match voices::find_voice(&voice_id) {
                    Some(voice) => info!("Selecting voice: {} ({})", voice.name, voice.id),
                    None => warn!("Selecting voice outside the catalog: {}", voice_id),
                }
                if let Err(e) = self.preferences.set(VOICE_KEY, &voice_id) {
                    warn!("Failed to save voice preference: {}", e);
                }
                self.voice_id = voice_id;
            }
            Command::Shutdown => return false,
        }
        true
    }

    async fn handle_manager_event(&mut self, event: ManagerEvent) {
        for signal in self.manager.handle_event(event).await {
            match signal {
                ManagerSignal::Calibrated(baseline) => {
                    self.notify(ControllerNotice::Calibrated { baseline });
                }
                ManagerSignal::Volume(volume) => {
                    if self.state.captures_audio() {
                        self.notify(ControllerNotice::Volume(volume));
                    }
                }
                ManagerSignal::Utterance(boundary) => self.on_utterance(boundary).await,
                ManagerSignal::Fatal(e) => self.fail(e).await,
            }
        }
    }

    async fn begin_listening(&mut self) {
        match self.manager.start(None).await {
            Ok(()) => self.set_state(TurnState::Listening),
            Err(e) => self.fail(e).await,
        }
    }

    async fn on_utterance(&mut self, boundary: TurnBoundary) {
        if self.state != TurnState::Listening {
            debug!("Ignoring utterance outside Listening: \"{}\"", boundary.text);
            return;
        }

        // Microphone goes cold before anything else happens
        self.manager.stop().await;

        self.turn += 1;
        self.set_state(TurnState::Processing);
        info!("Utterance ({:?}): \"{}\"", boundary.trigger, boundary.text);
        self.notify(ControllerNotice::UserMessage(boundary.text.clone()));

        let request = ResponderRequest {
            text: boundary.text,
            voice_id: Some(self.voice_id.clone()),
        };
        let responder = Arc::clone(&self.responder);
        let tx = self.events_tx.clone();
        let turn = self.turn;

        self.responder_task = Some(tokio::spawn(async move {
            let result = responder.respond(request).await;
            let _ = tx.send(ControllerEvent::Reply { turn, result });
        }));
    }

    async fn on_reply(&mut self, reply: ResponderReply) {
        self.stats.turns_completed += 1;
        self.notify(ControllerNotice::AssistantMessage(reply.text));

        match reply.audio {
            Some(audio) if !audio.is_empty() => {
                self.set_state(TurnState::Speaking);
                let mut events = self.playback.play(audio);
                let tx = self.events_tx.clone();
                let turn = self.turn;

                self.playback_forwarder = Some(tokio::spawn(async move {
                    while let Some(event) = events.recv().await {
                        if tx.send(ControllerEvent::Playback { turn, event }).is_err() {
                            break;
                        }
                    }
                }));
            }
            _ => {
                debug!("Reply has no audio; skipping playback");
                self.resume_after_turn().await;
            }
        }
    }

    async fn on_responder_failure(&mut self, err: ControllerError) {
        error!("Responder failed: {}", err);
        self.stats.responder_failures += 1;
        self.last_error = Some(err.user_message());

        self.notify(ControllerNotice::AssistantMessage(self.fallback_message.clone()));
        self.notify(ControllerNotice::Error(err.user_message()));
        self.resume_after_turn().await;
    }

    fn on_playback(&mut self, event: PlaybackEvent) {
        match event {
            PlaybackEvent::Started => debug!("Playback started for turn {}", self.turn),
            PlaybackEvent::Ended => {
                debug!("Playback ended; settling for {:?}", self.settle_delay);
                self.schedule_settle();
            }
            PlaybackEvent::Error(message) => {
                let err = ControllerError::Playback(message);
                warn!("{}", err);
                self.last_error = Some(err.user_message());
                self.notify(ControllerNotice::Error(err.user_message()));
                self.schedule_settle();
            }
        }
    }

    fn schedule_settle(&mut self) {
        self.timers.schedule(
            TimerKind::Settle,
            self.settle_delay,
            self.events_tx.clone(),
            |seq| ControllerEvent::Timer {
                kind: TimerKind::Settle,
                seq,
            },
        );
    }

    async fn resume_after_turn(&mut self) {
        if self.continuous {
            self.begin_listening().await;
        } else {
            self.set_state(TurnState::Idle);
        }
    }

    /// Surface a session-ending error and go idle
    async fn fail(&mut self, err: ControllerError) {
        error!("Session ended: {}", err);
        self.last_error = Some(err.user_message());
        self.notify(ControllerNotice::Error(err.user_message()));
        self.continuous = false;
        self.cancel_turn().await;
        self.set_state(TurnState::Idle);
    }

    /// Abort whatever the current turn has in flight
    async fn cancel_turn(&mut self) {
        self.turn += 1;
        self.timers.clear();
        if let Some(task) = self.responder_task.take() {
            task.abort();
        }
        self.playback.stop();
        if let Some(task) = self.playback_forwarder.take() {
            task.abort();
        }
        self.manager.stop().await;
    }

    async fn teardown(&mut self) {
        self.continuous = false;
        self.cancel_turn().await;
        self.set_state(TurnState::Idle);
    }

    fn set_state(&mut self, state: TurnState) {
        if self.state == state {
            return;
        }
        info!("State {:?} -> {:?}", self.state, state);
        self.state = state;
        self.notify(ControllerNotice::StateChanged(state));
        self.publish_status();
    }

    fn notify(&self, notice: ControllerNotice) {
        // No subscribers is fine
        let _ = self.notices.send(notice);
    }

    fn publish_status(&mut self) {
        let manager_stats = self.manager.stats();
        self.stats.reinitializations = manager_stats.reinitializations;
        self.stats.retries = self.manager.retries();

        self.status_tx.send_replace(ControllerStatus {
            state: self.state,
            continuous: self.continuous,
            device_id: self.manager.device_id().map(str::to_string),
            voice_id: self.voice_id.clone(),
            threshold: self.manager.threshold(),
            last_error: self.last_error.clone(),
            stats: self.stats.clone(),
        });
    }
}
