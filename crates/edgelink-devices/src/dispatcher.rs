//! Command dispatcher: the single path from a GET/SET request to the driver.
//!
//! Every request passes the same gates (service lock, device lock, operating
//! state, profile), is resolved against the device's profile, handed to the
//! driver and finally turned into an [`Event`]. Driver outcomes feed the
//! failure tracker, which drives the UP/DOWN state machine.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use edgelink_core::models::{
    Device, DeviceProfile, DeviceResource, Event, OperatingState, ReadWrite, ResourceOperation,
};
use edgelink_core::{CommandValue, Error, ErrorKind, Result, ServiceConfig};

use crate::cache::Caches;
use crate::codec::{self, EventOptions};
use crate::driver::{CommandRequest, ProtocolDriver, URL_RAW_QUERY};
use crate::failure::FailureTracker;
use crate::metadata::MetadataClient;
use crate::recovery;
use crate::state::ServiceState;
use crate::transform;

/// Settings the dispatcher reads on every request.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchConfig {
    pub data_transform: bool,
    pub max_cmd_ops: usize,
    /// Zero disables failure tracking.
    pub allowed_fails: i64,
    /// `None` disables recovery polling.
    pub device_down_timeout: Option<Duration>,
}

impl DispatchConfig {
    pub fn from_config(config: &ServiceConfig) -> Self {
        Self {
            data_transform: config.device.data_transform,
            max_cmd_ops: config.device.max_cmd_ops,
            allowed_fails: config.device.allowed_fails,
            device_down_timeout: config.device_down_timeout(),
        }
    }
}

/// What a request resolved to.
enum Target {
    Command(Vec<(DeviceResource, Option<ResourceOperation>)>, ReadWrite),
    Resource(DeviceResource),
    Pattern(Vec<DeviceResource>),
}

/// Executes read and write commands against the protocol driver.
pub struct CommandDispatcher {
    config: DispatchConfig,
    caches: Arc<Caches>,
    driver: Arc<dyn ProtocolDriver>,
    tracker: Arc<FailureTracker>,
    metadata: Arc<dyn MetadataClient>,
    state: Arc<ServiceState>,
    /// Devices with a recovery probe in flight; they bypass the DOWN gate.
    probing: DashSet<String>,
    /// Devices with a running recovery poller.
    pollers: DashSet<String>,
    shutdown: CancellationToken,
}

impl CommandDispatcher {
    pub fn new(
        config: DispatchConfig,
        caches: Arc<Caches>,
        driver: Arc<dyn ProtocolDriver>,
        tracker: Arc<FailureTracker>,
        metadata: Arc<dyn MetadataClient>,
        state: Arc<ServiceState>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config,
            caches,
            driver,
            tracker,
            metadata,
            state,
            probing: DashSet::new(),
            pollers: DashSet::new(),
            shutdown,
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn caches(&self) -> &Arc<Caches> {
        &self.caches
    }

    /// Reads `command` from `device_name`.
    ///
    /// `command` is looked up as a device command first, then as an exact
    /// resource name. With `regex` set and no exact match it is a pattern
    /// selecting every readable resource whose name matches it.
    pub async fn get_command(
        self: &Arc<Self>,
        device_name: &str,
        command: &str,
        raw_query: &str,
        regex: bool,
    ) -> Result<Event> {
        let device = self.check_device(device_name, command)?;
        let profile = self.profile_of(&device)?;

        let resources: Vec<DeviceResource> = match self.resolve(&profile, command, regex)? {
            Target::Command(ops, read_write) => {
                if !read_write.readable() {
                    return Err(Error::not_allowed(format!(
                        "command {command} is write-only and cannot be read"
                    )));
                }
                ops.into_iter().map(|(resource, _)| resource).collect()
            }
            Target::Resource(resource) => {
                if !resource.properties.read_write.readable() {
                    return Err(Error::not_allowed(format!(
                        "resource {command} is write-only and cannot be read"
                    )));
                }
                vec![resource]
            }
            Target::Pattern(resources) => {
                let readable: Vec<DeviceResource> = resources
                    .into_iter()
                    .filter(|r| r.properties.read_write.readable())
                    .collect();
                if readable.is_empty() {
                    return Err(Error::not_found(format!(
                        "no readable resource matches {command} in profile {}",
                        profile.name
                    )));
                }
                readable
            }
        };

        let requests: Vec<CommandRequest> = resources
            .iter()
            .map(|r| command_request(r, raw_query))
            .collect();

        debug!(device = %device.name, source = command, count = requests.len(), "Reading from driver");
        let values = match self
            .driver
            .handle_read_commands(&device.name, &device.protocols, &requests)
            .await
        {
            Ok(values) => values,
            Err(e) => {
                self.on_driver_failure(&device.name).await;
                return Err(Error::with_cause(
                    ErrorKind::ServerError,
                    format!("failed to read {command} from device {}", device.name),
                    e,
                ));
            }
        };
        self.on_driver_success(&device.name).await;

        codec::command_values_to_event(
            values,
            &device,
            command,
            &self.caches.profiles,
            EventOptions::read(self.config.data_transform),
        )
    }

    /// Writes `params` (resource name → raw value) to `command` of `device_name`.
    ///
    /// Returns the applied values as an event unless the target is write-only.
    pub async fn set_command(
        self: &Arc<Self>,
        device_name: &str,
        command: &str,
        raw_query: &str,
        params: &HashMap<String, serde_json::Value>,
    ) -> Result<Option<Event>> {
        let device = self.check_device(device_name, command)?;
        let profile = self.profile_of(&device)?;

        let (targets, read_write) = match self.resolve(&profile, command, false)? {
            Target::Command(ops, read_write) => (ops, read_write),
            Target::Resource(resource) => {
                let read_write = resource.properties.read_write;
                (vec![(resource, None)], read_write)
            }
            Target::Pattern(_) => {
                return Err(Error::contract_invalid(format!(
                    "{command} is a pattern and cannot be written"
                )))
            }
        };
        if !read_write.writable() {
            return Err(Error::not_allowed(format!(
                "{command} is read-only and cannot be written"
            )));
        }

        let mut requests = Vec::with_capacity(targets.len());
        let mut values = Vec::with_capacity(targets.len());
        for (resource, operation) in &targets {
            let value = self.write_value(resource, operation.as_ref(), params)?;
            requests.push(command_request(resource, raw_query));
            values.push(value);
        }

        debug!(device = %device.name, source = command, count = requests.len(), "Writing to driver");
        if let Err(e) = self
            .driver
            .handle_write_commands(&device.name, &device.protocols, &requests, &values)
            .await
        {
            self.on_driver_failure(&device.name).await;
            return Err(Error::with_cause(
                ErrorKind::ServerError,
                format!("failed to write {command} to device {}", device.name),
                e,
            ));
        }
        self.on_driver_success(&device.name).await;

        if read_write.write_only() {
            return Ok(None);
        }
        codec::command_values_to_event(
            values,
            &device,
            command,
            &self.caches.profiles,
            EventOptions::written(),
        )
        .map(Some)
    }

    /// Gates a request and returns a snapshot of the device.
    fn check_device(&self, device_name: &str, command: &str) -> Result<Device> {
        if device_name.is_empty() || command.is_empty() {
            return Err(Error::contract_invalid(
                "device name and command name must not be empty",
            ));
        }
        if self.state.is_locked() {
            return Err(Error::locked(format!(
                "service {} is locked",
                self.state.name()
            )));
        }
        let device = self
            .caches
            .devices
            .for_name(device_name)
            .ok_or_else(|| Error::not_found(format!("device {device_name} not found")))?;
        if device.is_locked() {
            return Err(Error::locked(format!("device {device_name} is locked")));
        }
        if device.is_down() && !self.probing.contains(device_name) {
            return Err(Error::locked(format!("device {device_name} is down")));
        }
        if device.profile_name.is_empty() {
            return Err(Error::locked(format!(
                "device {device_name} has no profile"
            )));
        }
        Ok(device)
    }

    fn profile_of(&self, device: &Device) -> Result<DeviceProfile> {
        self.caches
            .profiles
            .for_name(&device.profile_name)
            .ok_or_else(|| {
                Error::not_found(format!(
                    "profile {} of device {} not found",
                    device.profile_name, device.name
                ))
            })
    }

    fn resolve(&self, profile: &DeviceProfile, command: &str, regex: bool) -> Result<Target> {
        if let Some(cmd) = profile.command(command) {
            if cmd.resource_operations.len() > self.config.max_cmd_ops {
                return Err(Error::server(format!(
                    "command {command} has {} resource operations, more than the allowed {}",
                    cmd.resource_operations.len(),
                    self.config.max_cmd_ops
                )));
            }
            let mut ops = Vec::with_capacity(cmd.resource_operations.len());
            for op in &cmd.resource_operations {
                let resource = profile.resource(&op.device_resource).ok_or_else(|| {
                    Error::not_found(format!(
                        "resource {} of command {command} not found in profile {}",
                        op.device_resource, profile.name
                    ))
                })?;
                ops.push((resource.clone(), Some(op.clone())));
            }
            return Ok(Target::Command(ops, cmd.read_write));
        }

        if let Some(resource) = profile.resource(command) {
            return Ok(Target::Resource(resource.clone()));
        }
        if !regex {
            return Err(Error::not_found(format!(
                "command or resource {command} not found in profile {}",
                profile.name
            )));
        }
        let matched = self
            .caches
            .profiles
            .device_resources_by_regex(&profile.name, command)?;
        if matched.is_empty() {
            return Err(Error::not_found(format!(
                "no resource matches {command} in profile {}",
                profile.name
            )));
        }
        Ok(Target::Pattern(matched))
    }

    /// Builds the value handed to the driver for one resource of a SET.
    fn write_value(
        &self,
        resource: &DeviceResource,
        operation: Option<&ResourceOperation>,
        params: &HashMap<String, serde_json::Value>,
    ) -> Result<CommandValue> {
        let requested = match params.get(&resource.name) {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => operation
                .map(|op| op.default_value.clone())
                .filter(|v| !v.is_empty())
                .or_else(|| {
                    Some(resource.properties.default_value.clone()).filter(|v| !v.is_empty())
                })
                .ok_or_else(|| {
                    Error::server(format!(
                        "no value given and no default value for resource {}",
                        resource.name
                    ))
                })?,
        };

        let raw = match operation.filter(|op| !op.mappings.is_empty()) {
            Some(op) => transform::map_write_value(&requested, &op.mappings).unwrap_or(requested),
            None => requested,
        };

        let mut value = codec::create_command_value(resource, &raw)?;
        if self.config.data_transform && value.value_type().is_numeric() {
            transform::check_range(&value.value, &resource.properties)?;
            value.value = transform::transform_write_value(&value.value, &resource.properties)
                .map_err(|e| {
                    e.context(format!("failed to transform value for {}", resource.name))
                })?;
        }
        Ok(value)
    }

    async fn on_driver_failure(self: &Arc<Self>, device_name: &str) {
        if self.config.allowed_fails <= 0 {
            return;
        }
        if self.tracker.decrease(device_name) != 0 {
            return;
        }
        let previous = match self
            .caches
            .devices
            .update_operating_state(device_name, OperatingState::Down)
        {
            Ok(previous) => previous,
            Err(_) => return,
        };
        if previous == OperatingState::Down {
            return;
        }
        warn!(device = device_name, "Device exceeded allowed failures, marking it DOWN");
        if let Err(e) = self
            .metadata
            .update_device_operating_state(device_name, OperatingState::Down)
            .await
        {
            warn!(device = device_name, error = %e, "Failed to update operating state in metadata");
        }
        if let Some(timeout) = self.config.device_down_timeout {
            self.spawn_recovery(device_name, timeout);
        }
    }

    async fn on_driver_success(&self, device_name: &str) {
        if self.config.allowed_fails > 0 {
            self.tracker.set(device_name, self.config.allowed_fails);
        }
        if let Ok(OperatingState::Down) = self
            .caches
            .devices
            .update_operating_state(device_name, OperatingState::Up)
        {
            info!(device = device_name, "Device is reachable again, marking it UP");
            if let Err(e) = self
                .metadata
                .update_device_operating_state(device_name, OperatingState::Up)
                .await
            {
                warn!(device = device_name, error = %e, "Failed to update operating state in metadata");
            }
        }
        if let Err(e) = self.caches.devices.set_last_connected_by_name(device_name) {
            debug!(device = device_name, error = %e, "Device vanished before last-connected update");
        }
    }

    fn spawn_recovery(self: &Arc<Self>, device_name: &str, timeout: Duration) {
        if !self.pollers.insert(device_name.to_string()) {
            return;
        }
        let dispatcher = Arc::clone(self);
        let device = device_name.to_string();
        let shutdown = self.shutdown.child_token();
        tokio::spawn(async move {
            recovery::run(&dispatcher, &device, timeout, shutdown).await;
            dispatcher.pollers.remove(&device);
        });
    }

    /// Reads one resource while letting the request through the DOWN gate.
    pub(crate) async fn probe(self: &Arc<Self>, device_name: &str, resource: &str) -> Result<Event> {
        let _guard = ProbeGuard::new(&self.probing, device_name);
        self.get_command(device_name, resource, "", false).await
    }

    /// Whether a recovery poller is running for `device_name`.
    pub fn is_recovering(&self, device_name: &str) -> bool {
        self.pollers.contains(device_name)
    }
}

struct ProbeGuard<'a> {
    probing: &'a DashSet<String>,
    device: String,
}

impl<'a> ProbeGuard<'a> {
    fn new(probing: &'a DashSet<String>, device: &str) -> Self {
        probing.insert(device.to_string());
        Self {
            probing,
            device: device.to_string(),
        }
    }
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        self.probing.remove(&self.device);
    }
}

fn command_request(resource: &DeviceResource, raw_query: &str) -> CommandRequest {
    let mut attributes = resource.attributes.clone();
    if !raw_query.is_empty() {
        attributes.insert(
            URL_RAW_QUERY.to_string(),
            serde_json::Value::String(raw_query.to_string()),
        );
    }
    CommandRequest {
        device_resource_name: resource.name.clone(),
        attributes,
        value_type: resource.properties.value_type,
    }
}
