//! Service configuration.
//!
//! Configuration is read from a TOML file with PascalCase keys and can then be
//! overridden per key through `EDGELINK_<SECTION>_<KEY>` environment variables,
//! for example `EDGELINK_DEVICE_ALLOWEDFAILS=3`.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Environment variable names.
pub mod env_vars {
    /// Prefix of per-key override variables.
    pub const OVERRIDE_PREFIX: &str = "EDGELINK_";
    /// Path of the configuration file.
    pub const CONFIG_FILE: &str = "EDGELINK_CONFIG_FILE";
    /// Enables JSON log output when `true`.
    pub const LOG_JSON: &str = "EDGELINK_LOG_JSON";
}

/// Default values.
pub mod defaults {
    pub const SERVICE_NAME: &str = "device-simple";
    pub const HOST: &str = "localhost";
    pub const PORT: u16 = 59999;
    pub const REQUEST_TIMEOUT: &str = "5s";
    pub const STARTUP_RETRIES: u32 = 3;
    pub const MAX_CMD_OPS: usize = 128;
    pub const ASYNC_BUFFER_SIZE: usize = 16;
    pub const DISCOVERY_INTERVAL: &str = "0s";
    pub const MQTT_PORT: u16 = 1883;
    pub const BASE_TOPIC_PREFIX: &str = "edgex";
    pub const METADATA_URL: &str = "http://localhost:59881";
    pub const CONFIG_FILE: &str = "res/configuration.toml";
}

/// `[Service]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ServiceSection {
    pub name: String,
    pub host: String,
    pub port: u16,
    /// Timeout of each metadata probe at startup.
    pub request_timeout: String,
    /// Number of metadata probes before startup gives up.
    pub startup_retries: u32,
    /// Service name shared by every instance; watchers are scoped to it.
    /// Empty means "same as `Name`".
    pub base_service_name: String,
}

impl Default for ServiceSection {
    fn default() -> Self {
        Self {
            name: defaults::SERVICE_NAME.to_string(),
            host: defaults::HOST.to_string(),
            port: defaults::PORT,
            request_timeout: defaults::REQUEST_TIMEOUT.to_string(),
            startup_retries: defaults::STARTUP_RETRIES,
            base_service_name: String::new(),
        }
    }
}

/// `[Device.Discovery]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct DiscoverySection {
    pub enabled: bool,
    /// Duration between discovery runs; zero disables periodic discovery.
    pub interval: String,
}

impl Default for DiscoverySection {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: defaults::DISCOVERY_INTERVAL.to_string(),
        }
    }
}

/// `[Device]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct DeviceSection {
    pub data_transform: bool,
    pub max_cmd_ops: usize,
    pub async_buffer_size: usize,
    pub enable_async_readings: bool,
    /// Failures tolerated before a device goes DOWN; zero disables tracking.
    pub allowed_fails: i64,
    /// Seconds between recovery probes; zero disables recovery.
    pub device_down_timeout: u64,
    pub profiles_dir: String,
    pub devices_dir: String,
    pub provision_watchers_dir: String,
    pub discovery: DiscoverySection,
}

impl Default for DeviceSection {
    fn default() -> Self {
        Self {
            data_transform: true,
            max_cmd_ops: defaults::MAX_CMD_OPS,
            async_buffer_size: defaults::ASYNC_BUFFER_SIZE,
            enable_async_readings: true,
            allowed_fails: 0,
            device_down_timeout: 0,
            profiles_dir: String::new(),
            devices_dir: String::new(),
            provision_watchers_dir: String::new(),
            discovery: DiscoverySection::default(),
        }
    }
}

/// Message bus implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageBusType {
    #[default]
    Memory,
    Mqtt,
}

/// `[MessageBus]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct MessageBusSection {
    #[serde(rename = "Type")]
    pub bus_type: MessageBusType,
    pub host: String,
    pub port: u16,
    /// MQTT client id; empty means the service name.
    pub client_id: String,
    pub base_topic_prefix: String,
}

impl Default for MessageBusSection {
    fn default() -> Self {
        Self {
            bus_type: MessageBusType::Memory,
            host: defaults::HOST.to_string(),
            port: defaults::MQTT_PORT,
            client_id: String::new(),
            base_topic_prefix: defaults::BASE_TOPIC_PREFIX.to_string(),
        }
    }
}

/// Metadata client implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetadataType {
    #[default]
    Memory,
    Http,
}

/// `[Metadata]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct MetadataSection {
    #[serde(rename = "Type")]
    pub metadata_type: MetadataType,
    pub base_url: String,
}

impl Default for MetadataSection {
    fn default() -> Self {
        Self {
            metadata_type: MetadataType::Memory,
            base_url: defaults::METADATA_URL.to_string(),
        }
    }
}

/// Complete service configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ServiceConfig {
    pub service: ServiceSection,
    pub device: DeviceSection,
    pub message_bus: MessageBusSection,
    pub metadata: MetadataSection,
    /// Maximum serialized event size in bytes; zero means unlimited.
    pub max_event_size: usize,
    /// Driver-specific settings handed to the driver untouched.
    pub driver: HashMap<String, String>,
}

impl ServiceConfig {
    /// Loads and validates a TOML configuration file, applying environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::with_cause(
                crate::error::ErrorKind::ContractInvalid,
                format!("failed to read configuration {}", path.display()),
                e,
            )
        })?;
        let mut config = Self::from_toml_str(&text)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Applies `EDGELINK_<SECTION>_<KEY>` variables from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        let vars: Vec<(String, String)> = std::env::vars()
            .filter(|(k, _)| k.starts_with(env_vars::OVERRIDE_PREFIX))
            .collect();
        self.apply_overrides(vars)
    }

    /// Applies overrides given as `(EDGELINK_<SECTION>_<KEY>, value)` pairs.
    ///
    /// Unknown keys are ignored.
    pub fn apply_overrides<I, K, V>(&mut self, overrides: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in overrides {
            let Some(key) = key.as_ref().strip_prefix(env_vars::OVERRIDE_PREFIX) else {
                continue;
            };
            self.apply_override(&key.to_ascii_uppercase(), value.as_ref())?;
        }
        Ok(())
    }

    fn apply_override(&mut self, key: &str, value: &str) -> Result<()> {
        fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
            value.trim().parse().map_err(|_| {
                Error::contract_invalid(format!("invalid value {value:?} for override {key}"))
            })
        }

        match key {
            "SERVICE_NAME" => self.service.name = value.to_string(),
            "SERVICE_HOST" => self.service.host = value.to_string(),
            "SERVICE_PORT" => self.service.port = parse(key, value)?,
            "SERVICE_REQUESTTIMEOUT" => self.service.request_timeout = value.to_string(),
            "SERVICE_STARTUPRETRIES" => self.service.startup_retries = parse(key, value)?,
            "SERVICE_BASESERVICENAME" => self.service.base_service_name = value.to_string(),
            "DEVICE_DATATRANSFORM" => self.device.data_transform = parse(key, value)?,
            "DEVICE_MAXCMDOPS" => self.device.max_cmd_ops = parse(key, value)?,
            "DEVICE_ASYNCBUFFERSIZE" => self.device.async_buffer_size = parse(key, value)?,
            "DEVICE_ENABLEASYNCREADINGS" => {
                self.device.enable_async_readings = parse(key, value)?
            }
            "DEVICE_ALLOWEDFAILS" => self.device.allowed_fails = parse(key, value)?,
            "DEVICE_DEVICEDOWNTIMEOUT" => self.device.device_down_timeout = parse(key, value)?,
            "DEVICE_PROFILESDIR" => self.device.profiles_dir = value.to_string(),
            "DEVICE_DEVICESDIR" => self.device.devices_dir = value.to_string(),
            "DEVICE_PROVISIONWATCHERSDIR" => {
                self.device.provision_watchers_dir = value.to_string()
            }
            "DEVICE_DISCOVERY_ENABLED" => self.device.discovery.enabled = parse(key, value)?,
            "DEVICE_DISCOVERY_INTERVAL" => self.device.discovery.interval = value.to_string(),
            "MESSAGEBUS_TYPE" => {
                self.message_bus.bus_type = match value.to_ascii_lowercase().as_str() {
                    "memory" => MessageBusType::Memory,
                    "mqtt" => MessageBusType::Mqtt,
                    other => {
                        return Err(Error::contract_invalid(format!(
                            "unknown message bus type {other}"
                        )))
                    }
                }
            }
            "MESSAGEBUS_HOST" => self.message_bus.host = value.to_string(),
            "MESSAGEBUS_PORT" => self.message_bus.port = parse(key, value)?,
            "MESSAGEBUS_CLIENTID" => self.message_bus.client_id = value.to_string(),
            "MESSAGEBUS_BASETOPICPREFIX" => self.message_bus.base_topic_prefix = value.to_string(),
            "METADATA_TYPE" => {
                self.metadata.metadata_type = match value.to_ascii_lowercase().as_str() {
                    "memory" => MetadataType::Memory,
                    "http" => MetadataType::Http,
                    other => {
                        return Err(Error::contract_invalid(format!(
                            "unknown metadata type {other}"
                        )))
                    }
                }
            }
            "METADATA_BASEURL" => self.metadata.base_url = value.to_string(),
            "MAXEVENTSIZE" => self.max_event_size = parse(key, value)?,
            _ => {}
        }
        Ok(())
    }

    /// Checks the configuration for values the service cannot start with.
    pub fn validate(&self) -> Result<()> {
        if self.service.name.trim().is_empty() {
            return Err(Error::contract_invalid("Service.Name must not be empty"));
        }
        if self.device.max_cmd_ops == 0 {
            return Err(Error::contract_invalid("Device.MaxCmdOps must be greater than 0"));
        }
        if self.device.async_buffer_size == 0 {
            return Err(Error::contract_invalid(
                "Device.AsyncBufferSize must be greater than 0",
            ));
        }
        if self.device.allowed_fails < 0 {
            return Err(Error::contract_invalid("Device.AllowedFails must not be negative"));
        }
        self.request_timeout()?;
        self.discovery_interval()?;
        Ok(())
    }

    pub fn request_timeout(&self) -> Result<Duration> {
        parse_duration(&self.service.request_timeout)
    }

    /// Periodic discovery interval, `None` when disabled.
    pub fn discovery_interval(&self) -> Result<Option<Duration>> {
        let interval = parse_duration(&self.device.discovery.interval)?;
        Ok((!interval.is_zero()).then_some(interval))
    }

    /// Recovery probe interval, `None` when recovery is disabled.
    pub fn device_down_timeout(&self) -> Option<Duration> {
        (self.device.device_down_timeout > 0)
            .then(|| Duration::from_secs(self.device.device_down_timeout))
    }

    /// Base service name, falling back to the instance name.
    pub fn base_service_name(&self) -> &str {
        if self.service.base_service_name.is_empty() {
            &self.service.name
        } else {
            &self.service.base_service_name
        }
    }
}

/// Parses a humantime duration; an empty string is zero.
pub fn parse_duration(text: &str) -> Result<Duration> {
    let text = text.trim();
    if text.is_empty() || text == "0" {
        return Ok(Duration::ZERO);
    }
    Ok(humantime::parse_duration(text)?)
}
