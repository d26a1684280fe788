//! Shared state handed to every handler.

use std::sync::Arc;

use edgelink_devices::DeviceService;

/// Server state.
#[derive(Clone)]
pub struct ServerState {
    pub service: Arc<DeviceService>,
    /// Unix seconds at which the router was built.
    pub started_at: i64,
}

impl ServerState {
    pub fn new(service: Arc<DeviceService>) -> Self {
        Self {
            service,
            started_at: chrono::Utc::now().timestamp(),
        }
    }
}

/// Largest request body accepted.
pub const MAX_REQUEST_BODY_SIZE: usize = 1024 * 1024;
