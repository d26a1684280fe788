//! Request and response bodies shared by the HTTP and message-bus surfaces.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::device::Device;

/// Request to generate a profile by scanning a device.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileScanRequest {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub request_id: String,
    pub device_name: String,
    /// Name for the generated profile; defaults to `<device>_profile`.
    #[serde(default)]
    pub profile_name: String,
    #[serde(default)]
    pub options: HashMap<String, serde_json::Value>,
}

impl ProfileScanRequest {
    pub fn new(device_name: impl Into<String>) -> Self {
        Self {
            device_name: device_name.into(),
            ..Default::default()
        }
    }

    pub fn effective_profile_name(&self) -> String {
        if self.profile_name.is_empty() {
            format!("{}_profile", self.device_name)
        } else {
            self.profile_name.clone()
        }
    }
}

/// Device submitted for validation or creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddDeviceRequest {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub request_id: String,
    pub device: Device,
}

impl AddDeviceRequest {
    pub fn new(device: Device) -> Self {
        Self {
            api_version: crate::API_VERSION.to_string(),
            request_id: uuid::Uuid::new_v4().to_string(),
            device,
        }
    }
}

/// Generic acknowledgement carrying a request id, e.g. for accepted discovery runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaseResponse {
    pub api_version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub request_id: String,
    pub status_code: u16,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

impl BaseResponse {
    pub fn new(request_id: impl Into<String>, status_code: u16, message: impl Into<String>) -> Self {
        Self {
            api_version: crate::API_VERSION.to_string(),
            request_id: request_id.into(),
            status_code,
            message: message.into(),
        }
    }
}
