//! Device cache.

use std::collections::HashMap;

use parking_lot::RwLock;

use edgelink_core::models::{AdminState, Device, OperatingState};
use edgelink_core::{edge_err, Error, Result};

use crate::metrics::DeviceMetrics;

/// Cached devices keyed by name.
pub struct DeviceCache {
    devices: RwLock<HashMap<String, Device>>,
    metrics: Option<DeviceMetrics>,
}

impl DeviceCache {
    pub fn new(metrics: Option<DeviceMetrics>) -> Self {
        Self {
            devices: RwLock::new(HashMap::new()),
            metrics,
        }
    }

    pub fn for_name(&self, name: &str) -> Option<Device> {
        self.devices.read().get(name).cloned()
    }

    pub fn all(&self) -> Vec<Device> {
        self.devices.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.devices.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.read().is_empty()
    }

    pub fn add(&self, device: Device) -> Result<()> {
        let mut devices = self.devices.write();
        if devices.contains_key(&device.name) {
            return Err(Error::duplicate(format!(
                "device {} already exists in cache",
                device.name
            )));
        }
        if let Some(metrics) = &self.metrics {
            metrics.register_device(&device.name, device.last_connected);
        }
        devices.insert(device.name.clone(), device);
        Ok(())
    }

    /// Replaces a cached device, keeping the larger last-connected timestamp.
    pub fn update(&self, mut device: Device) -> Result<()> {
        let mut devices = self.devices.write();
        let existing = devices
            .get(&device.name)
            .ok_or_else(|| not_found(&device.name))?;
        device.last_connected = device.last_connected.max(existing.last_connected);
        devices.insert(device.name.clone(), device);
        Ok(())
    }

    pub fn remove_by_name(&self, name: &str) -> Result<Device> {
        let removed = self
            .devices
            .write()
            .remove(name)
            .ok_or_else(|| not_found(name))?;
        if let Some(metrics) = &self.metrics {
            metrics.unregister_device(name);
        }
        Ok(removed)
    }

    /// Sets the admin state from its wire form (`LOCKED` / `UNLOCKED`).
    pub fn update_admin_state(&self, name: &str, state: &str) -> Result<()> {
        let state: AdminState = state.parse()?;
        let mut devices = self.devices.write();
        let device = devices.get_mut(name).ok_or_else(|| not_found(name))?;
        device.admin_state = state;
        Ok(())
    }

    /// Sets the operating state, returning the previous one.
    pub fn update_operating_state(&self, name: &str, state: OperatingState) -> Result<OperatingState> {
        let mut devices = self.devices.write();
        let device = devices.get_mut(name).ok_or_else(|| not_found(name))?;
        Ok(std::mem::replace(&mut device.operating_state, state))
    }

    /// Stamps the device as contacted now and returns the stored timestamp.
    ///
    /// The stored value never decreases, even if the wall clock steps back.
    pub fn set_last_connected_by_name(&self, name: &str) -> Result<i64> {
        let now = chrono::Utc::now().timestamp_millis();
        let stamped = {
            let mut devices = self.devices.write();
            let device = devices.get_mut(name).ok_or_else(|| not_found(name))?;
            device.last_connected = device.last_connected.max(now);
            device.last_connected
        };
        if let Some(metrics) = &self.metrics {
            metrics.set_last_connected(name, stamped);
        }
        Ok(stamped)
    }

    pub fn last_connected(&self, name: &str) -> Option<i64> {
        self.devices.read().get(name).map(|d| d.last_connected)
    }

    /// Names of devices referencing `profile`.
    pub fn names_for_profile(&self, profile: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .devices
            .read()
            .values()
            .filter(|d| d.profile_name == profile)
            .map(|d| d.name.clone())
            .collect();
        names.sort();
        names
    }
}

fn not_found(name: &str) -> Error {
    edge_err!(EntityDoesNotExist, "device {} not found in cache", name)
}
