//! Applies metadata system events to the caches, the driver and AutoEvents.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use edgelink_core::models::{
    Device, DeviceProfile, DeviceServiceInfo, ProvisionWatcher, SystemEvent, SystemEventAction,
    SystemEventType,
};
use edgelink_core::{MessageBus, MessageEnvelope, Result};

use crate::autoevent::AutoEventManager;
use crate::cache::Caches;
use crate::driver::ProtocolDriver;
use crate::failure::FailureTracker;
use crate::metadata::MetadataClient;
use crate::state::ServiceState;

/// Source name of system events emitted by the metadata service.
pub const METADATA_SOURCE: &str = "core-metadata";

/// Keeps local state in line with metadata.
pub struct Reconciler {
    instance: String,
    base_service: String,
    allowed_fails: i64,
    caches: Arc<Caches>,
    driver: Arc<dyn ProtocolDriver>,
    tracker: Arc<FailureTracker>,
    metadata: Arc<dyn MetadataClient>,
    state: Arc<ServiceState>,
    autoevents: Arc<AutoEventManager>,
}

impl Reconciler {
    pub fn new(
        instance: impl Into<String>,
        base_service: impl Into<String>,
        allowed_fails: i64,
        caches: Arc<Caches>,
        driver: Arc<dyn ProtocolDriver>,
        tracker: Arc<FailureTracker>,
        metadata: Arc<dyn MetadataClient>,
        state: Arc<ServiceState>,
        autoevents: Arc<AutoEventManager>,
    ) -> Self {
        Self {
            instance: instance.into(),
            base_service: base_service.into(),
            allowed_fails,
            caches,
            driver,
            tracker,
            metadata,
            state,
            autoevents,
        }
    }

    /// Subscribes to `patterns` and spawns the consuming loop.
    ///
    /// The loop handles messages one at a time and ends only on cancellation
    /// or when the bus closes the subscription.
    pub async fn start(
        self: Arc<Self>,
        bus: &dyn MessageBus,
        patterns: &[String],
        shutdown: CancellationToken,
    ) -> Result<JoinHandle<()>> {
        let mut subscription = bus.subscribe(patterns).await?;
        info!(patterns = ?patterns, "Listening for system events");
        Ok(tokio::spawn(async move {
            loop {
                let envelope = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    envelope = subscription.recv() => envelope,
                };
                let Some(envelope) = envelope else { break };
                if let Err(e) = self.handle(&envelope).await {
                    error!(
                        correlation_id = %envelope.correlation_id,
                        topic = %envelope.received_topic,
                        error = %e,
                        "Failed to apply system event"
                    );
                }
            }
            debug!("System event loop stopped");
        }))
    }

    /// Applies one system event envelope.
    pub async fn handle(&self, envelope: &MessageEnvelope) -> Result<()> {
        let event: SystemEvent = envelope.decode()?;
        if !self.accepts(&event) {
            debug!(owner = %event.owner, event_type = %event.event_type, "Ignoring system event of another service");
            return Ok(());
        }
        debug!(
            correlation_id = %envelope.correlation_id,
            event_type = %event.event_type,
            action = %event.action,
            "Applying system event"
        );

        match (event.event_type, event.action) {
            (SystemEventType::Device, SystemEventAction::Add) => {
                self.device_added(event.decode_details()?).await
            }
            (SystemEventType::Device, SystemEventAction::Update) => {
                self.device_updated(event.decode_details()?).await
            }
            (SystemEventType::Device, SystemEventAction::Delete) => {
                let device: Device = event.decode_details()?;
                self.device_deleted(&device.name).await
            }
            (SystemEventType::Profile, SystemEventAction::Update) => {
                self.profile_updated(event.decode_details()?).await
            }
            (SystemEventType::Profile, SystemEventAction::Delete) => {
                let profile: DeviceProfile = event.decode_details()?;
                self.profile_deleted(&profile.name)
            }
            (SystemEventType::Profile, SystemEventAction::Add) => Ok(()),
            (SystemEventType::ProvisionWatcher, action) => {
                self.watcher_changed(action, event.decode_details()?).await
            }
            (SystemEventType::DeviceService, SystemEventAction::Update) => {
                let service: DeviceServiceInfo = event.decode_details()?;
                if service.name == self.instance {
                    info!(admin_state = %service.admin_state, "Device service updated");
                    self.state.apply_update(&service);
                }
                Ok(())
            }
            (SystemEventType::DeviceService, _) => Ok(()),
        }
    }

    fn accepts(&self, event: &SystemEvent) -> bool {
        event.owner == self.instance
            || event.owner == self.base_service
            || (event.event_type == SystemEventType::Profile
                && event.action == SystemEventAction::Delete
                && event.source == METADATA_SOURCE)
    }

    async fn device_added(&self, device: Device) -> Result<()> {
        if self.caches.devices.for_name(&device.name).is_some() {
            debug!(device = %device.name, "Device already cached, ignoring add");
            return Ok(());
        }
        self.ensure_profile(&device.profile_name).await?;
        let name = device.name.clone();
        let protocols = device.protocols.clone();
        let admin_state = device.admin_state;
        self.caches.devices.add(device)?;
        if let Err(e) = self.driver.add_device(&name, &protocols, admin_state).await {
            error!(device = %name, error = %e, "Driver failed to add device");
        }
        self.tracker.set(&name, self.allowed_fails);
        self.autoevents.restart_for_device(&name);
        info!(device = %name, "Device added");
        Ok(())
    }

    async fn device_updated(&self, device: Device) -> Result<()> {
        let cached = self.caches.devices.for_name(&device.name).is_some();
        if device.service_name != self.instance {
            if cached {
                info!(device = %device.name, service = %device.service_name, "Device moved to another service");
                return self.device_deleted(&device.name).await;
            }
            return Ok(());
        }
        if !cached {
            return self.device_added(device).await;
        }

        self.ensure_profile(&device.profile_name).await?;
        let name = device.name.clone();
        let protocols = device.protocols.clone();
        let admin_state = device.admin_state;
        self.caches.devices.update(device)?;
        if let Err(e) = self.driver.update_device(&name, &protocols, admin_state).await {
            error!(device = %name, error = %e, "Driver failed to update device");
        }
        if admin_state.is_locked() {
            self.autoevents.stop_for_device(&name);
        } else {
            self.autoevents.restart_for_device(&name);
        }
        info!(device = %name, "Device updated");
        Ok(())
    }

    async fn device_deleted(&self, name: &str) -> Result<()> {
        self.autoevents.stop_for_device(name);
        let removed = self.caches.devices.remove_by_name(name)?;
        if let Err(e) = self.driver.remove_device(name, &removed.protocols).await {
            error!(device = name, error = %e, "Driver failed to remove device");
        }
        self.tracker.remove(name);
        info!(device = name, "Device removed");
        Ok(())
    }

    async fn profile_updated(&self, profile: DeviceProfile) -> Result<()> {
        if !self.caches.profiles.contains(&profile.name) {
            debug!(profile = %profile.name, "Profile not used by this service, ignoring update");
            return Ok(());
        }
        let name = profile.name.clone();
        self.caches.profiles.update(profile)?;
        for device_name in self.caches.devices.names_for_profile(&name) {
            let Some(device) = self.caches.devices.for_name(&device_name) else {
                continue;
            };
            if let Err(e) = self
                .driver
                .update_device(&device.name, &device.protocols, device.admin_state)
                .await
            {
                warn!(device = %device.name, profile = %name, error = %e, "Driver failed to apply profile update");
            }
        }
        info!(profile = %name, "Profile updated");
        Ok(())
    }

    fn profile_deleted(&self, name: &str) -> Result<()> {
        if !self.caches.profiles.contains(name) {
            return Ok(());
        }
        self.caches.check_profile_not_used(name)?;
        self.caches.profiles.remove_by_name(name)?;
        info!(profile = name, "Profile removed");
        Ok(())
    }

    async fn watcher_changed(
        &self,
        action: SystemEventAction,
        watcher: ProvisionWatcher,
    ) -> Result<()> {
        match action {
            SystemEventAction::Add | SystemEventAction::Update => {
                self.ensure_profile(&watcher.discovered_device.profile_name)
                    .await?;
                let name = watcher.name.clone();
                if self.caches.watchers.for_name(&name).is_some() {
                    self.caches.watchers.update(watcher)?;
                } else {
                    self.caches.watchers.add(watcher)?;
                }
                info!(watcher = %name, action = %action, "Provision watcher applied");
            }
            SystemEventAction::Delete => {
                self.caches.watchers.remove_by_name(&watcher.name)?;
                info!(watcher = %watcher.name, "Provision watcher removed");
            }
        }
        Ok(())
    }

    /// Fetches `name` from metadata into the profile cache.
    async fn ensure_profile(&self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Ok(());
        }
        let profile = self
            .metadata
            .profile(name)
            .await
            .map_err(|e| e.context(format!("failed to fetch profile {name}")))?;
        self.caches.profiles.upsert(profile);
        Ok(())
    }
}
