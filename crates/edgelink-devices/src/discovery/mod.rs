//! Device discovery and profile scanning.
//!
//! [`DiscoveryManager`] runs one discovery at a time, on request or on a
//! timer, and turns the driver's results into devices through the
//! provision watchers. [`ProfileScanManager`] runs at most one profile scan
//! per device.

pub mod matcher;
pub mod profile_scan;

pub use profile_scan::ProfileScanManager;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use edgelink_core::{Error, ErrorKind, Result};

use crate::cache::Caches;
use crate::driver::{DiscoveredDevice, ProtocolDriver};
use crate::metadata::MetadataClient;
use crate::state::ServiceState;

/// Single-flight wrapper around the driver's discovery.
pub struct DiscoveryManager {
    driver: Arc<dyn ProtocolDriver>,
    caches: Arc<Caches>,
    metadata: Arc<dyn MetadataClient>,
    state: Arc<ServiceState>,
    enabled: bool,
    /// Request id of the discovery in flight.
    in_flight: Mutex<Option<String>>,
}

impl DiscoveryManager {
    pub fn new(
        driver: Arc<dyn ProtocolDriver>,
        caches: Arc<Caches>,
        metadata: Arc<dyn MetadataClient>,
        state: Arc<ServiceState>,
        enabled: bool,
    ) -> Self {
        Self {
            driver,
            caches,
            metadata,
            state,
            enabled,
            in_flight: Mutex::new(None),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.lock().is_some()
    }

    /// Starts a discovery run in the background and returns its request id.
    pub fn discover(self: &Arc<Self>) -> Result<String> {
        if self.state.is_locked() {
            return Err(Error::locked(format!(
                "service {} is locked",
                self.state.name()
            )));
        }
        if !self.enabled {
            return Err(Error::unavailable("device discovery is disabled"));
        }
        let request_id = uuid::Uuid::new_v4().to_string();
        {
            let mut in_flight = self.in_flight.lock();
            if let Some(current) = in_flight.as_ref() {
                return Err(Error::conflict(format!(
                    "discovery {current} is already running"
                )));
            }
            *in_flight = Some(request_id.clone());
        }

        let manager = Arc::clone(self);
        let id = request_id.clone();
        tokio::spawn(async move {
            let _guard = InFlightGuard(&manager.in_flight);
            info!(request_id = %id, "Discovery started");
            match manager.driver.discover().await {
                Ok(()) => debug!(request_id = %id, "Driver discovery returned"),
                Err(e) => error!(request_id = %id, error = %e, "Discovery failed"),
            }
        });
        Ok(request_id)
    }

    /// Asks the driver to stop the running discovery.
    ///
    /// With a `request_id`, it must name the discovery in flight.
    pub async fn stop_discovery(
        &self,
        request_id: Option<&str>,
        options: &HashMap<String, serde_json::Value>,
    ) -> Result<()> {
        let control = self
            .driver
            .discovery_control()
            .ok_or_else(|| Error::not_implemented("driver cannot stop device discovery"))?;
        if let Some(id) = request_id {
            let running = self.in_flight.lock().clone();
            if running.as_deref() != Some(id) {
                return Err(Error::not_found(format!("no discovery with request id {id}")));
            }
        }
        control.stop_device_discovery(options).await
    }

    /// Runs discovery every `interval` until cancelled.
    pub async fn run_periodic(self: Arc<Self>, interval: Duration, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if let Err(e) = self.discover() {
                match e.kind() {
                    ErrorKind::StatusConflict => debug!("Previous discovery still running"),
                    _ => warn!(error = %e, "Periodic discovery skipped"),
                }
            }
        }
    }

    /// Consumes discovery results until the channel closes or `shutdown` fires.
    pub async fn consume(
        self: Arc<Self>,
        mut results: mpsc::Receiver<Vec<DiscoveredDevice>>,
        shutdown: CancellationToken,
    ) {
        loop {
            let batch = tokio::select! {
                _ = shutdown.cancelled() => break,
                batch = results.recv() => batch,
            };
            let Some(batch) = batch else { break };
            let added = self.process_discovered(batch).await;
            debug!(added, "Processed discovery results");
        }
    }

    /// Creates a device in metadata for each discovered device a watcher accepts.
    ///
    /// Returns the number of devices created.
    pub async fn process_discovered(&self, devices: Vec<DiscoveredDevice>) -> usize {
        let watchers = self.caches.watchers.all();
        let service_name = self.state.name();
        let mut added = 0;
        for discovered in devices {
            if self.caches.devices.for_name(&discovered.name).is_some() {
                debug!(device = %discovered.name, "Discovered device already exists");
                continue;
            }
            let Some(watcher) = matcher::find_watcher(&watchers, &discovered) else {
                debug!(device = %discovered.name, "No provision watcher matched");
                continue;
            };
            let device = matcher::build_device(watcher, &discovered, &service_name);
            match self.metadata.add_device(device).await {
                Ok(id) => {
                    info!(device = %discovered.name, watcher = %watcher.name, id = %id, "Discovered device added");
                    added += 1;
                }
                Err(e) => {
                    warn!(device = %discovered.name, error = %e, "Failed to add discovered device");
                }
            }
        }
        added
    }
}

/// Clears the in-flight request id when the discovery task ends, even by panic.
struct InFlightGuard<'a>(&'a Mutex<Option<String>>);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        *self.0.lock() = None;
    }
}
