//! Device profiles: resources, commands and resource operations.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::value::ValueType;

/// Access direction of a resource or command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ReadWrite {
    #[serde(rename = "R")]
    Read,
    #[serde(rename = "W")]
    Write,
    #[default]
    #[serde(rename = "RW")]
    ReadWrite,
    #[serde(rename = "WR")]
    WriteRead,
}

impl ReadWrite {
    pub const fn readable(self) -> bool {
        !matches!(self, Self::Write)
    }

    pub const fn writable(self) -> bool {
        !matches!(self, Self::Read)
    }

    pub const fn write_only(self) -> bool {
        matches!(self, Self::Write)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Read => "R",
            Self::Write => "W",
            Self::ReadWrite => "RW",
            Self::WriteRead => "WR",
        }
    }
}

impl fmt::Display for ReadWrite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed properties of a device resource, including transformation parameters.
///
/// Every transformation parameter is optional; an absent or zero parameter
/// leaves the value untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceProperties {
    pub value_type: ValueType,
    #[serde(default)]
    pub read_write: ReadWrite,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub units: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub default_value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mask: Option<u64>,
    /// Positive values shift left, negative values shift right.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shift: Option<i64>,
    /// Literal the reading must equal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assertion: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub media_type: String,
}

impl ResourceProperties {
    pub fn new(value_type: ValueType, read_write: ReadWrite) -> Self {
        Self {
            value_type,
            read_write,
            units: String::new(),
            default_value: String::new(),
            minimum: None,
            maximum: None,
            base: None,
            scale: None,
            offset: None,
            mask: None,
            shift: None,
            assertion: None,
            media_type: String::new(),
        }
    }
}

/// An individually addressable data point of a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceResource {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default)]
    pub is_hidden: bool,
    pub properties: ResourceProperties,
    /// Protocol-specific attributes handed to the driver.
    #[serde(default)]
    pub attributes: HashMap<String, serde_json::Value>,
    /// Tags copied onto every reading of this resource.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub tags: HashMap<String, String>,
}

impl DeviceResource {
    pub fn new(name: impl Into<String>, properties: ResourceProperties) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            is_hidden: false,
            properties,
            attributes: HashMap::new(),
            tags: HashMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }
}

/// One step of a device command.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceOperation {
    pub device_resource: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub default_value: String,
    /// Raw value to presented value.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub mappings: HashMap<String, String>,
}

impl ResourceOperation {
    pub fn new(device_resource: impl Into<String>) -> Self {
        Self {
            device_resource: device_resource.into(),
            ..Default::default()
        }
    }

    pub fn with_mapping(mut self, raw: impl Into<String>, presented: impl Into<String>) -> Self {
        self.mappings.insert(raw.into(), presented.into());
        self
    }
}

/// A named composite operation over several resources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceCommand {
    pub name: String,
    #[serde(default)]
    pub is_hidden: bool,
    #[serde(default)]
    pub read_write: ReadWrite,
    #[serde(default)]
    pub resource_operations: Vec<ResourceOperation>,
}

impl DeviceCommand {
    pub fn new(name: impl Into<String>, read_write: ReadWrite) -> Self {
        Self {
            name: name.into(),
            is_hidden: false,
            read_write,
            resource_operations: Vec::new(),
        }
    }

    pub fn with_operation(mut self, op: ResourceOperation) -> Self {
        self.resource_operations.push(op);
        self
    }
}

/// A device profile.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceProfile {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub manufacturer: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub model: String,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub device_resources: Vec<DeviceResource>,
    #[serde(default)]
    pub device_commands: Vec<DeviceCommand>,
}

impl DeviceProfile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_resource(mut self, resource: DeviceResource) -> Self {
        self.device_resources.push(resource);
        self
    }

    pub fn with_command(mut self, command: DeviceCommand) -> Self {
        self.device_commands.push(command);
        self
    }

    pub fn resource(&self, name: &str) -> Option<&DeviceResource> {
        self.device_resources.iter().find(|r| r.name == name)
    }

    pub fn command(&self, name: &str) -> Option<&DeviceCommand> {
        self.device_commands.iter().find(|c| c.name == name)
    }
}
