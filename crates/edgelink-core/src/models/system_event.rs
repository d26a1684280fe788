//! System events broadcast by the metadata service when entities change.

use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Entity type carried by a system event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemEventType {
    Device,
    #[serde(rename = "deviceprofile")]
    Profile,
    ProvisionWatcher,
    #[serde(rename = "deviceservice")]
    DeviceService,
}

impl SystemEventType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Device => "device",
            Self::Profile => "deviceprofile",
            Self::ProvisionWatcher => "provisionwatcher",
            Self::DeviceService => "deviceservice",
        }
    }
}

impl fmt::Display for SystemEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SystemEventType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "device" => Ok(Self::Device),
            "deviceprofile" => Ok(Self::Profile),
            "provisionwatcher" => Ok(Self::ProvisionWatcher),
            "deviceservice" => Ok(Self::DeviceService),
            other => Err(Error::contract_invalid(format!(
                "unknown system event type {other}"
            ))),
        }
    }
}

/// Change applied to the entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemEventAction {
    Add,
    Update,
    Delete,
}

impl SystemEventAction {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for SystemEventAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A system event envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemEvent {
    #[serde(default)]
    pub api_version: String,
    #[serde(rename = "type")]
    pub event_type: SystemEventType,
    pub action: SystemEventAction,
    /// Service that emitted the event, usually the metadata service.
    #[serde(default)]
    pub source: String,
    /// Device service the entity belongs to.
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub timestamp: i64,
    /// The changed entity; its shape depends on `event_type`.
    #[serde(default)]
    pub details: serde_json::Value,
}

impl SystemEvent {
    pub fn new<T: Serialize>(
        event_type: SystemEventType,
        action: SystemEventAction,
        source: impl Into<String>,
        owner: impl Into<String>,
        details: &T,
    ) -> Result<Self> {
        Ok(Self {
            api_version: crate::API_VERSION.to_string(),
            event_type,
            action,
            source: source.into(),
            owner: owner.into(),
            timestamp: super::event::now_nanos(),
            details: serde_json::to_value(details)?,
        })
    }

    /// Decodes `details` into the entity type.
    pub fn decode_details<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.details.clone()).map_err(|e| {
            Error::with_cause(
                crate::error::ErrorKind::ContractInvalid,
                format!("failed to decode {} system event details", self.event_type),
                e,
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Device;

    #[test]
    fn test_system_event_round_trip() {
        let device = Device::new("d5", "p1");
        let event = SystemEvent::new(
            SystemEventType::Device,
            SystemEventAction::Add,
            "core-metadata",
            "device-simple",
            &device,
        )
        .unwrap();
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"device""#));
        assert!(json.contains(r#""action":"add""#));

        let back: SystemEvent = serde_json::from_str(&json).unwrap();
        let decoded: Device = back.decode_details().unwrap();
        assert_eq!(decoded.name, "d5");
    }

    #[test]
    fn test_type_names() {
        assert_eq!(
            "deviceprofile".parse::<SystemEventType>().unwrap(),
            SystemEventType::Profile
        );
        assert_eq!(SystemEventType::ProvisionWatcher.as_str(), "provisionwatcher");
        assert!("widget".parse::<SystemEventType>().is_err());
    }
}
