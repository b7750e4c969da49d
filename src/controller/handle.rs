use tokio::sync::{broadcast, mpsc, watch};
use tracing::warn;

use super::event::{Command, ControllerEvent, ControllerNotice};
use super::state::ControllerStatus;

/// Cloneable front door to a running controller
///
/// The trigger methods never block: they enqueue a command and return.
#[derive(Clone)]
pub struct ControllerHandle {
    events: mpsc::UnboundedSender<ControllerEvent>,
    status: watch::Receiver<ControllerStatus>,
    notices: broadcast::Sender<ControllerNotice>,
}

impl ControllerHandle {
    pub(crate) fn new(
        events: mpsc::UnboundedSender<ControllerEvent>,
        status: watch::Receiver<ControllerStatus>,
        notices: broadcast::Sender<ControllerNotice>,
    ) -> Self {
        Self {
            events,
            status,
            notices,
        }
    }

    pub fn start_continuous_listening(&self) {
        self.send(Command::StartContinuousListening);
    }

    pub fn stop_listening(&self) {
        self.send(Command::StopListening);
    }

    pub fn select_device(&self, device_id: impl Into<String>) {
        self.send(Command::SelectDevice(device_id.into()));
    }

    pub fn select_voice(&self, voice_id: impl Into<String>) {
        self.send(Command::SelectVoice(voice_id.into()));
    }

    /// Ask the loop to tear everything down and exit
    pub fn shutdown(&self) {
        self.send(Command::Shutdown);
    }

    /// Latest published snapshot
    pub fn status(&self) -> ControllerStatus {
        self.status.borrow().clone()
    }

    /// Receiver that wakes on every published snapshot
    pub fn watch_status(&self) -> watch::Receiver<ControllerStatus> {
        self.status.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ControllerNotice> {
        self.notices.subscribe()
    }

    pub fn is_running(&self) -> bool {
        !self.events.is_closed()
    }

    fn send(&self, command: Command) {
        if self.events.send(ControllerEvent::Command(command)).is_err() {
            warn!("Controller is not running; command dropped");
        }
    }
}
