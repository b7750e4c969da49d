//! HTTP API server for external control (UI front ends)
//!
//! This module provides a REST API over the controller's triggers:
//! - POST /listen/start - Arm continuous mode and start listening
//! - POST /listen/stop - Stop listening
//! - PUT /device - Select the input device
//! - PUT /voice - Select the reply voice
//! - GET /status - Current state snapshot
//! - GET /devices - Available input devices
//! - GET /voices - Voice catalog
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::{AppState, DeviceLister};
