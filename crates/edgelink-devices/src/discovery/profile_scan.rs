//! Profile generation by scanning a device.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{error, info};

use edgelink_core::models::ProfileScanRequest;
use edgelink_core::{Error, Result};

use crate::cache::Caches;
use crate::driver::ProtocolDriver;
use crate::metadata::MetadataClient;

/// At most one scan per device; scans of different devices run concurrently.
pub struct ProfileScanManager {
    driver: Arc<dyn ProtocolDriver>,
    caches: Arc<Caches>,
    metadata: Arc<dyn MetadataClient>,
    busy: Mutex<HashSet<String>>,
}

impl ProfileScanManager {
    pub fn new(
        driver: Arc<dyn ProtocolDriver>,
        caches: Arc<Caches>,
        metadata: Arc<dyn MetadataClient>,
    ) -> Self {
        Self {
            driver,
            caches,
            metadata,
            busy: Mutex::new(HashSet::new()),
        }
    }

    pub fn is_scanning(&self, device_name: &str) -> bool {
        self.busy.lock().contains(device_name)
    }

    /// Starts a scan in the background.
    ///
    /// The generated profile is added to metadata and to the profile cache.
    pub fn profile_scan(self: &Arc<Self>, mut request: ProfileScanRequest) -> Result<()> {
        if self.driver.profile_scanner().is_none() {
            return Err(Error::not_implemented("driver does not support profile scan"));
        }
        if request.device_name.is_empty() {
            return Err(Error::contract_invalid("device name must not be empty"));
        }
        if self.caches.devices.for_name(&request.device_name).is_none() {
            return Err(Error::not_found(format!(
                "device {} not found",
                request.device_name
            )));
        }
        if !self.busy.lock().insert(request.device_name.clone()) {
            return Err(Error::conflict(format!(
                "profile scan for device {} is already running",
                request.device_name
            )));
        }
        request.profile_name = request.effective_profile_name();

        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let device = request.device_name.clone();
            if let Err(e) = manager.run_scan(&request).await {
                error!(device = %device, request_id = %request.request_id, error = %e, "Profile scan failed");
            }
            manager.busy.lock().remove(&device);
        });
        Ok(())
    }

    async fn run_scan(&self, request: &ProfileScanRequest) -> Result<()> {
        let scanner = self
            .driver
            .profile_scanner()
            .ok_or_else(|| Error::not_implemented("driver does not support profile scan"))?;
        info!(device = %request.device_name, profile = %request.profile_name, "Profile scan started");
        let mut profile = scanner.profile_scan(request).await?;
        if profile.name.is_empty() {
            profile.name = request.profile_name.clone();
        }
        self.metadata
            .add_profile(profile.clone())
            .await
            .map_err(|e| e.context(format!("failed to add profile {}", profile.name)))?;
        info!(device = %request.device_name, profile = %profile.name, "Profile scan finished");
        self.caches.profiles.upsert(profile);
        Ok(())
    }

    /// Asks the driver to stop the scan running for `device_name`.
    pub async fn stop_profile_scan(
        &self,
        device_name: &str,
        options: &HashMap<String, serde_json::Value>,
    ) -> Result<()> {
        let scanner = self
            .driver
            .profile_scanner()
            .ok_or_else(|| Error::not_implemented("driver does not support profile scan"))?;
        if !self.is_scanning(device_name) {
            return Err(Error::not_found(format!(
                "no profile scan running for device {device_name}"
            )));
        }
        scanner.stop_profile_scan(device_name, options).await
    }
}
