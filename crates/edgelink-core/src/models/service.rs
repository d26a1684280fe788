//! The device-service entity registered in metadata.

use serde::{Deserialize, Serialize};

use super::device::AdminState;

/// Registration record of this device service.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceServiceInfo {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default)]
    pub base_address: String,
    #[serde(default)]
    pub admin_state: AdminState,
    #[serde(default)]
    pub labels: Vec<String>,
}

impl DeviceServiceInfo {
    pub fn new(name: impl Into<String>, base_address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_address: base_address.into(),
            ..Default::default()
        }
    }
}
