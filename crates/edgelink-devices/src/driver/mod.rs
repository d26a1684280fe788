//! Protocol driver contract.
//!
//! The embedder supplies one [`ProtocolDriver`]. Optional capabilities
//! (stopping discovery, profile scanning) are exposed through accessor methods
//! returning extension traits; a driver without them yields `NotImplemented`
//! at the call site instead of failing to compile.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use edgelink_core::models::{AdminState, Device, DeviceProfile, ProfileScanRequest, Protocols};
use edgelink_core::{CommandValue, Error, Result, ValueType};

pub mod sdk;

pub use sdk::DriverSdk;

/// Attribute key under which the request's raw URL query is handed to drivers.
pub const URL_RAW_QUERY: &str = "urlRawQuery";

/// One resource to read or write.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandRequest {
    pub device_resource_name: String,
    /// Resource attributes from the profile, plus [`URL_RAW_QUERY`] when present.
    pub attributes: HashMap<String, serde_json::Value>,
    pub value_type: ValueType,
}

/// Values pushed by the driver outside of any request.
#[derive(Debug, Clone, PartialEq)]
pub struct AsyncValues {
    pub device_name: String,
    pub source_name: String,
    pub values: Vec<CommandValue>,
}

/// A device found by a discovery run.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredDevice {
    pub name: String,
    #[serde(default)]
    pub protocols: Protocols,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub properties: HashMap<String, serde_json::Value>,
}

impl DiscoveredDevice {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_protocol(
        mut self,
        protocol: impl Into<String>,
        properties: HashMap<String, serde_json::Value>,
    ) -> Self {
        self.protocols.insert(protocol.into(), properties);
        self
    }
}

/// Capabilities every protocol driver provides.
#[async_trait]
pub trait ProtocolDriver: Send + Sync {
    /// Called once during startup, before any other callback.
    async fn initialize(&self, sdk: DriverSdk) -> Result<()>;

    async fn handle_read_commands(
        &self,
        device_name: &str,
        protocols: &Protocols,
        requests: &[CommandRequest],
    ) -> Result<Vec<CommandValue>>;

    async fn handle_write_commands(
        &self,
        device_name: &str,
        protocols: &Protocols,
        requests: &[CommandRequest],
        params: &[CommandValue],
    ) -> Result<()>;

    async fn add_device(
        &self,
        device_name: &str,
        protocols: &Protocols,
        admin_state: AdminState,
    ) -> Result<()>;

    async fn update_device(
        &self,
        device_name: &str,
        protocols: &Protocols,
        admin_state: AdminState,
    ) -> Result<()>;

    async fn remove_device(&self, device_name: &str, protocols: &Protocols) -> Result<()>;

    /// Starts a discovery run. Results go to the SDK's discovered-device channel.
    async fn discover(&self) -> Result<()> {
        Err(Error::not_implemented("driver does not support discovery"))
    }

    /// Checks protocol properties before a device is accepted by metadata.
    async fn validate_device(&self, _device: &Device) -> Result<()> {
        Ok(())
    }

    /// Called once startup finished.
    async fn start(&self) -> Result<()>;

    async fn stop(&self, force: bool) -> Result<()>;

    fn discovery_control(&self) -> Option<&dyn DiscoveryControl> {
        None
    }

    fn profile_scanner(&self) -> Option<&dyn ProfileScanner> {
        None
    }
}

/// Optional: cancel an in-flight discovery run.
#[async_trait]
pub trait DiscoveryControl: Send + Sync {
    async fn stop_device_discovery(&self, options: &HashMap<String, serde_json::Value>)
        -> Result<()>;
}

/// Optional: build a profile by probing a device.
#[async_trait]
pub trait ProfileScanner: Send + Sync {
    async fn profile_scan(&self, request: &ProfileScanRequest) -> Result<DeviceProfile>;

    async fn stop_profile_scan(
        &self,
        device_name: &str,
        options: &HashMap<String, serde_json::Value>,
    ) -> Result<()>;
}

/// Optional capabilities detected on a driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DriverCapabilities {
    pub stop_discovery: bool,
    pub profile_scan: bool,
}

impl DriverCapabilities {
    pub fn probe(driver: &dyn ProtocolDriver) -> Self {
        Self {
            stop_discovery: driver.discovery_control().is_some(),
            profile_scan: driver.profile_scanner().is_some(),
        }
    }
}
