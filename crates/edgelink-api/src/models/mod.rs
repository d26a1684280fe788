//! Response bodies of the HTTP surface.

use serde::{Deserialize, Serialize};

pub mod error;

pub use error::{ApiResult, ErrorResponse};

/// Body of `GET /ping`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PingResponse {
    pub api_version: String,
    pub timestamp: String,
    pub service_name: String,
}

/// Body of `GET /version`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionResponse {
    pub api_version: String,
    pub version: String,
    pub sdk_version: String,
    pub service_name: String,
}

/// Body of `GET /config`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigResponse {
    pub api_version: String,
    pub service_name: String,
    pub config: serde_json::Value,
}

/// Body of `POST /discovery`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryResponse {
    pub api_version: String,
    pub status_code: u16,
    pub request_id: String,
}
