//! Runtime state of the device-service entity.

use parking_lot::RwLock;

use edgelink_core::models::{AdminState, DeviceServiceInfo};

/// Admin state and labels of this service, as last seen in metadata.
pub struct ServiceState {
    info: RwLock<DeviceServiceInfo>,
}

impl ServiceState {
    pub fn new(info: DeviceServiceInfo) -> Self {
        Self {
            info: RwLock::new(info),
        }
    }

    pub fn info(&self) -> DeviceServiceInfo {
        self.info.read().clone()
    }

    pub fn name(&self) -> String {
        self.info.read().name.clone()
    }

    pub fn admin_state(&self) -> AdminState {
        self.info.read().admin_state
    }

    pub fn is_locked(&self) -> bool {
        self.admin_state() == AdminState::Locked
    }

    pub fn set_admin_state(&self, state: AdminState) {
        self.info.write().admin_state = state;
    }

    /// Applies admin state and labels from an updated entity.
    pub fn apply_update(&self, update: &DeviceServiceInfo) {
        let mut info = self.info.write();
        info.admin_state = update.admin_state;
        info.labels = update.labels.clone();
        if !update.base_address.is_empty() {
            info.base_address = update.base_address.clone();
        }
    }

    /// Replaces the whole entity, e.g. after loading it from metadata.
    pub fn replace(&self, info: DeviceServiceInfo) {
        *self.info.write() = info;
    }
}
