use crate::controller::ControllerHandle;
use std::sync::Arc;

/// Lists input devices for `GET /devices`
pub type DeviceLister = Arc<dyn Fn() -> Vec<String> + Send + Sync>;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Front door to the running controller
    pub controller: ControllerHandle,

    /// Input device enumeration (cpal in production, fixed lists in tests)
    pub devices: DeviceLister,
}

impl AppState {
    pub fn new(controller: ControllerHandle, devices: DeviceLister) -> Self {
        Self {
            controller,
            devices,
        }
    }
}
