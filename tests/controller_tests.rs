// End-to-end turn-taking tests
//
// The controller runs on its own task against scripted audio, a scripted
// engine, a fake responder and a fake player. Time is paused, so the 1.5 s
// silence window and the 1 s settle delay elapse instantly but in order.

mod common;

use anyhow::{bail, Result};
use common::{
    test_config, utterance_script, FakeEngines, FakePlayback, FakeResponder, ScriptedBackends,
    SharedPreferences,
};
use loqa_converse::controller::{Collaborators, Controller, ControllerHandle, ControllerNotice, TurnState};
use loqa_converse::preferences::{PreferenceStore, DEVICE_KEY, VOICE_KEY};
use loqa_converse::recognition::EngineEvent;
use loqa_converse::voices;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;

struct Harness {
    handle: ControllerHandle,
    task: JoinHandle<()>,
    notices: broadcast::Receiver<ControllerNotice>,
    backends: ScriptedBackends,
    engines: FakeEngines,
    responder: FakeResponder,
    playback: FakePlayback,
    preferences: SharedPreferences,
}

impl Harness {
    fn new(responder: FakeResponder, playback: FakePlayback) -> Self {
        Self::with_preferences(responder, playback, SharedPreferences::new())
    }

    fn with_preferences(
        responder: FakeResponder,
        playback: FakePlayback,
        preferences: SharedPreferences,
    ) -> Self {
        let backends = ScriptedBackends::new(utterance_script());
        let engines = FakeEngines::new().with_script(vec![(
            Duration::from_millis(1300),
            EngineEvent::Partial("hello".to_string()),
        )]);

        let (handle, task) = Controller::spawn(
            &test_config(),
            Collaborators {
                backends: Arc::new(backends.clone()),
                engines: Arc::new(engines.clone()),
                responder: Arc::new(responder.clone()),
                playback: Box::new(playback.clone()),
                preferences: Box::new(preferences.clone()),
            },
        );
        let notices = handle.subscribe();

        Self {
            handle,
            task,
            notices,
            backends,
            engines,
            responder,
            playback,
            preferences,
        }
    }

    /// Wait for the first notice matching `pred`, skipping everything else
    async fn expect<F>(&mut self, what: &str, mut pred: F) -> Result<ControllerNotice>
    where
        F: FnMut(&ControllerNotice) -> bool,
    {
        let deadline = Duration::from_secs(30);
        let result = tokio::time::timeout(deadline, async {
            loop {
                match self.notices.recv().await {
                    Ok(notice) if pred(&notice) => return Ok(notice),
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => bail!("controller closed"),
                }
            }
        })
        .await;

        match result {
            Ok(notice) => notice,
            Err(_) => bail!("timed out waiting for {}", what),
        }
    }

    async fn expect_state(&mut self, state: TurnState) -> Result<()> {
        self.expect(&format!("{:?}", state), |n| {
            *n == ControllerNotice::StateChanged(state)
        })
        .await?;
        Ok(())
    }

    async fn shutdown(self) -> Result<()> {
        self.handle.shutdown();
        self.task.await?;
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn test_full_turn_resumes_listening_after_settle() -> Result<()> {
    let mut h = Harness::new(
        FakeResponder::replying("hi there", Some(vec![1, 2, 3])),
        FakePlayback::new(Duration::from_millis(200)),
    );

    h.handle.start_continuous_listening();
    h.expect_state(TurnState::Listening).await?;
    assert_eq!(h.backends.open_handles(), 1);

    h.expect_state(TurnState::Processing).await?;
    // Capture is already released when processing starts
    assert_eq!(h.backends.open_handles(), 0);

    let user = h
        .expect("user message", |n| matches!(n, ControllerNotice::UserMessage(_)))
        .await?;
    assert_eq!(user, ControllerNotice::UserMessage("hello".to_string()));

    let reply = h
        .expect("assistant message", |n| matches!(n, ControllerNotice::AssistantMessage(_)))
        .await?;
    assert_eq!(reply, ControllerNotice::AssistantMessage("hi there".to_string()));

    h.expect_state(TurnState::Speaking).await?;
    let speaking_at = Instant::now();
    assert_eq!(h.backends.open_handles(), 0);

    h.expect_state(TurnState::Listening).await?;
    // 200 ms of playback plus the 1 s settle delay
    assert!(speaking_at.elapsed() >= Duration::from_millis(1200));
    assert_eq!(h.backends.open_handles(), 1);

    let requests = h.responder.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].text, "hello");
    assert_eq!(requests[0].voice_id.as_deref(), Some(voices::default_voice().id));
    assert_eq!(h.playback.played(), vec![vec![1, 2, 3]]);

    let status = h.handle.status();
    assert_eq!(status.state, TurnState::Listening);
    assert!(status.continuous);
    assert_eq!(status.stats.turns_completed, 1);

    h.shutdown().await
}

#[tokio::test(start_paused = true)]
async fn test_reply_without_audio_skips_speaking() -> Result<()> {
    let mut h = Harness::new(
        FakeResponder::replying("text only", None),
        FakePlayback::new(Duration::from_millis(200)),
    );

    h.handle.start_continuous_listening();
    h.expect_state(TurnState::Listening).await?;
    h.expect_state(TurnState::Processing).await?;

    let next = h
        .expect("next state", |n| matches!(n, ControllerNotice::StateChanged(_)))
        .await?;
    assert_eq!(next, ControllerNotice::StateChanged(TurnState::Listening));
    assert!(h.playback.played().is_empty());

    h.shutdown().await
}

#[tokio::test(start_paused = true)]
async fn test_responder_failure_falls_back_and_resumes() -> Result<()> {
    let mut h = Harness::new(
        FakeResponder::failing("upstream timeout"),
        FakePlayback::new(Duration::from_millis(200)),
    );
    let fallback = test_config().responder.fallback_message;

    h.handle.start_continuous_listening();
    h.expect_state(TurnState::Listening).await?;
    h.expect_state(TurnState::Processing).await?;

    let reply = h
        .expect("fallback", |n| matches!(n, ControllerNotice::AssistantMessage(_)))
        .await?;
    assert_eq!(reply, ControllerNotice::AssistantMessage(fallback));
    h.expect("error notice", |n| matches!(n, ControllerNotice::Error(_)))
        .await?;

    h.expect_state(TurnState::Listening).await?;
    let status = h.handle.status();
    assert_eq!(status.stats.responder_failures, 1);
    assert!(status.last_error.is_some());

    h.shutdown().await
}

#[tokio::test(start_paused = true)]
async fn test_playback_error_still_resumes() -> Result<()> {
    let mut h = Harness::new(
        FakeResponder::replying("hi there", Some(vec![9])),
        FakePlayback::failing("no output device"),
    );

    h.handle.start_continuous_listening();
    h.expect_state(TurnState::Speaking).await?;
    h.expect("playback error", |n| matches!(n, ControllerNotice::Error(_)))
        .await?;
    h.expect_state(TurnState::Listening).await?;

    h.shutdown().await
}

#[tokio::test(start_paused = true)]
async fn test_permission_denied_goes_idle() -> Result<()> {
    let mut h = Harness::new(
        FakeResponder::replying("hi there", None),
        FakePlayback::new(Duration::from_millis(200)),
    );
    h.backends.deny_permission(true);

    h.handle.start_continuous_listening();
    let error = h
        .expect("error notice", |n| matches!(n, ControllerNotice::Error(_)))
        .await?;
    assert_eq!(
        error,
        ControllerNotice::Error("Please grant microphone permission to use voice input".to_string())
    );

    // Give the loop a moment to publish its snapshot
    tokio::time::sleep(Duration::from_millis(10)).await;
    let status = h.handle.status();
    assert_eq!(status.state, TurnState::Idle);
    assert!(!status.continuous);
    assert_eq!(h.backends.open_handles(), 0);

    h.shutdown().await
}

#[tokio::test(start_paused = true)]
async fn test_stop_while_processing_drops_reply() -> Result<()> {
    let mut h = Harness::new(
        FakeResponder::replying("too late", Some(vec![1])).with_delay(Duration::from_secs(5)),
        FakePlayback::new(Duration::from_millis(200)),
    );

    h.handle.start_continuous_listening();
    h.expect_state(TurnState::Processing).await?;

    h.handle.stop_listening();
    h.expect_state(TurnState::Idle).await?;

    tokio::time::sleep(Duration::from_secs(6)).await;
    let status = h.handle.status();
    assert_eq!(status.state, TurnState::Idle);
    assert!(!status.continuous);
    assert!(h.playback.played().is_empty());
    assert_eq!(h.backends.open_handles(), 0);

    h.shutdown().await
}

#[tokio::test(start_paused = true)]
async fn test_start_twice_is_a_no_op() -> Result<()> {
    let mut h = Harness::new(
        FakeResponder::replying("hi", None),
        FakePlayback::new(Duration::from_millis(200)),
    );

    h.handle.start_continuous_listening();
    h.expect_state(TurnState::Listening).await?;
    h.handle.start_continuous_listening();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(h.backends.opened_devices().len(), 1);
    assert_eq!(h.engines.starts(), 1);

    h.shutdown().await
}

#[tokio::test(start_paused = true)]
async fn test_device_change_while_listening_restarts_capture() -> Result<()> {
    let mut h = Harness::new(
        FakeResponder::replying("hi", None),
        FakePlayback::new(Duration::from_millis(200)),
    );

    h.handle.start_continuous_listening();
    h.expect_state(TurnState::Listening).await?;

    h.handle.select_device("USB Microphone");
    tokio::time::sleep(Duration::from_millis(10)).await;

    let opened = h.backends.opened_devices();
    assert_eq!(opened.len(), 2);
    assert_eq!(opened[1].as_deref(), Some("USB Microphone"));
    assert_eq!(h.backends.open_handles(), 1);

    let status = h.handle.status();
    assert_eq!(status.state, TurnState::Listening);
    assert!(status.continuous);
    assert_eq!(status.device_id.as_deref(), Some("USB Microphone"));
    assert_eq!(h.preferences.get(DEVICE_KEY).as_deref(), Some("USB Microphone"));

    h.shutdown().await
}

#[tokio::test(start_paused = true)]
async fn test_saved_preferences_apply_on_startup() -> Result<()> {
    let prefs = SharedPreferences::new()
        .with(DEVICE_KEY, "Desk Mic")
        .with(VOICE_KEY, "21m00Tcm4TlvDq8ikWAM");
    let mut h = Harness::with_preferences(
        FakeResponder::replying("hi", None),
        FakePlayback::new(Duration::from_millis(200)),
        prefs,
    );

    let status = h.handle.status();
    assert_eq!(status.device_id.as_deref(), Some("Desk Mic"));
    assert_eq!(status.voice_id, "21m00Tcm4TlvDq8ikWAM");

    h.handle.select_voice("TxGEqnHWrfWFTfGW9XjX");
    h.handle.start_continuous_listening();
    h.expect_state(TurnState::Processing).await?;
    h.expect("reply", |n| matches!(n, ControllerNotice::AssistantMessage(_)))
        .await?;

    let requests = h.responder.requests();
    assert_eq!(requests[0].voice_id.as_deref(), Some("TxGEqnHWrfWFTfGW9XjX"));
    assert_eq!(h.backends.opened_devices()[0].as_deref(), Some("Desk Mic"));
    assert_eq!(
        h.preferences.get(VOICE_KEY).as_deref(),
        Some("TxGEqnHWrfWFTfGW9XjX")
    );

    h.shutdown().await
}

#[tokio::test(start_paused = true)]
async fn test_startup_device_override_is_not_saved() -> Result<()> {
    let backends = ScriptedBackends::new(utterance_script());
    let preferences = SharedPreferences::new().with(DEVICE_KEY, "Desk Mic");

    let (mut controller, handle) = Controller::new(
        &test_config(),
        Collaborators {
            backends: Arc::new(backends.clone()),
            engines: Arc::new(FakeEngines::new()),
            responder: Arc::new(FakeResponder::replying("hi", None)),
            playback: Box::new(FakePlayback::new(Duration::from_millis(200))),
            preferences: Box::new(preferences.clone()),
        },
    );
    controller.use_device("USB Microphone".to_string());
    assert_eq!(handle.status().device_id.as_deref(), Some("USB Microphone"));

    let task = tokio::spawn(controller.run());
    handle.start_continuous_listening();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(handle.status().state, TurnState::Listening);
    assert_eq!(backends.opened_devices(), vec![Some("USB Microphone".to_string())]);
    assert_eq!(preferences.get(DEVICE_KEY).as_deref(), Some("Desk Mic"));

    handle.shutdown();
    task.await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_releases_capture() -> Result<()> {
    let mut h = Harness::new(
        FakeResponder::replying("hi", None),
        FakePlayback::new(Duration::from_millis(200)),
    );

    h.handle.start_continuous_listening();
    h.expect_state(TurnState::Listening).await?;

    let backends = h.backends.clone();
    let handle = h.handle.clone();
    h.shutdown().await?;

    assert_eq!(backends.open_handles(), 0);
    assert!(!handle.is_running());
    assert_eq!(handle.status().state, TurnState::Idle);
    Ok(())
}
