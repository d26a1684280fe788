//! Device, admin/operating state and auto-event definitions.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Protocol name mapped to that protocol's properties.
pub type Protocols = HashMap<String, ProtocolProperties>;

/// Properties of one protocol; values are free-form JSON.
pub type ProtocolProperties = HashMap<String, serde_json::Value>;

/// Administrative state of a device, watcher or service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AdminState {
    Locked,
    #[default]
    Unlocked,
}

impl AdminState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Locked => "LOCKED",
            Self::Unlocked => "UNLOCKED",
        }
    }

    pub const fn is_locked(self) -> bool {
        matches!(self, Self::Locked)
    }
}

impl fmt::Display for AdminState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AdminState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LOCKED" => Ok(Self::Locked),
            "UNLOCKED" => Ok(Self::Unlocked),
            other => Err(Error::contract_invalid(format!(
                "invalid admin state {other}"
            ))),
        }
    }
}

/// Operating state of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OperatingState {
    #[default]
    Up,
    Down,
    Unknown,
}

impl OperatingState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Up => "UP",
            Self::Down => "DOWN",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for OperatingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperatingState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "UP" => Ok(Self::Up),
            "DOWN" => Ok(Self::Down),
            "UNKNOWN" => Ok(Self::Unknown),
            other => Err(Error::contract_invalid(format!(
                "invalid operating state {other}"
            ))),
        }
    }
}

/// A periodic self-initiated read of a resource or command.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoEvent {
    /// Interval as a duration string such as `"10s"`.
    pub interval: String,
    #[serde(default)]
    pub on_change: bool,
    /// Absolute difference below (or equal to) which numeric readings count as unchanged.
    #[serde(default)]
    pub on_change_threshold: f64,
    /// DeviceResource or DeviceCommand name.
    pub source_name: String,
}

impl AutoEvent {
    pub fn new(source_name: impl Into<String>, interval: impl Into<String>) -> Self {
        Self {
            interval: interval.into(),
            source_name: source_name.into(),
            ..Default::default()
        }
    }

    /// Enables on-change filtering with the given threshold.
    pub fn on_change(mut self, threshold: f64) -> Self {
        self.on_change = true;
        self.on_change_threshold = threshold;
        self
    }
}

/// A physical device managed by this service.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    /// Metadata id, empty until metadata assigns one.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    /// Unique device name.
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default)]
    pub admin_state: AdminState,
    #[serde(default)]
    pub operating_state: OperatingState,
    /// Name of the owning device service.
    #[serde(default)]
    pub service_name: String,
    #[serde(default)]
    pub profile_name: String,
    #[serde(default)]
    pub protocols: Protocols,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub auto_events: Vec<AutoEvent>,
    /// Free-form properties attached by discovery or provisioning.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub properties: HashMap<String, serde_json::Value>,
    /// Last successful driver contact, milliseconds since the epoch.
    #[serde(default)]
    pub last_connected: i64,
}

impl Device {
    pub fn new(name: impl Into<String>, profile_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            profile_name: profile_name.into(),
            ..Default::default()
        }
    }

    pub fn with_service(mut self, service_name: impl Into<String>) -> Self {
        self.service_name = service_name.into();
        self
    }

    pub fn with_admin_state(mut self, state: AdminState) -> Self {
        self.admin_state = state;
        self
    }

    pub fn with_operating_state(mut self, state: OperatingState) -> Self {
        self.operating_state = state;
        self
    }

    pub fn with_protocol(mut self, name: impl Into<String>, properties: ProtocolProperties) -> Self {
        self.protocols.insert(name.into(), properties);
        self
    }

    pub fn with_auto_event(mut self, auto_event: AutoEvent) -> Self {
        self.auto_events.push(auto_event);
        self
    }

    pub fn is_locked(&self) -> bool {
        self.admin_state == AdminState::Locked
    }

    pub fn is_down(&self) -> bool {
        self.operating_state == OperatingState::Down
    }
}
