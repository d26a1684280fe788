//! Events and readings published by the service.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::value::ValueType;

/// Current time in nanoseconds since the epoch.
pub fn now_nanos() -> i64 {
    chrono::Utc::now()
        .timestamp_nanos_opt()
        .unwrap_or_else(|| chrono::Utc::now().timestamp_micros() * 1_000)
}

/// A single value read from one device resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reading {
    pub id: String,
    pub origin: i64,
    pub device_name: String,
    pub resource_name: String,
    pub profile_name: String,
    pub value_type: ValueType,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub units: String,
    /// String payload for every non-binary, non-object type.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub value: String,
    #[serde(default, with = "base64_bytes", skip_serializing_if = "Vec::is_empty")]
    pub binary_value: Vec<u8>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub media_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_value: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub tags: HashMap<String, String>,
}

impl Reading {
    fn base(
        device_name: &str,
        profile_name: &str,
        resource_name: &str,
        value_type: ValueType,
        origin: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            origin,
            device_name: device_name.to_string(),
            resource_name: resource_name.to_string(),
            profile_name: profile_name.to_string(),
            value_type,
            units: String::new(),
            value: String::new(),
            binary_value: Vec::new(),
            media_type: String::new(),
            object_value: None,
            tags: HashMap::new(),
        }
    }

    pub fn simple(
        device_name: &str,
        profile_name: &str,
        resource_name: &str,
        value_type: ValueType,
        value: impl Into<String>,
        origin: i64,
    ) -> Self {
        let mut reading = Self::base(device_name, profile_name, resource_name, value_type, origin);
        reading.value = value.into();
        reading
    }

    pub fn binary(
        device_name: &str,
        profile_name: &str,
        resource_name: &str,
        payload: Vec<u8>,
        media_type: impl Into<String>,
        origin: i64,
    ) -> Self {
        let mut reading =
            Self::base(device_name, profile_name, resource_name, ValueType::Binary, origin);
        reading.binary_value = payload;
        reading.media_type = media_type.into();
        reading
    }

    pub fn object(
        device_name: &str,
        profile_name: &str,
        resource_name: &str,
        value_type: ValueType,
        value: serde_json::Value,
        origin: i64,
    ) -> Self {
        let mut reading = Self::base(device_name, profile_name, resource_name, value_type, origin);
        reading.object_value = Some(value);
        reading
    }
}

/// A set of readings taken from one device source at one time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: String,
    pub device_name: String,
    pub profile_name: String,
    pub source_name: String,
    pub origin: i64,
    #[serde(default)]
    pub readings: Vec<Reading>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub tags: HashMap<String, String>,
}

impl Event {
    pub fn new(
        profile_name: impl Into<String>,
        device_name: impl Into<String>,
        source_name: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            device_name: device_name.into(),
            profile_name: profile_name.into(),
            source_name: source_name.into(),
            origin: now_nanos(),
            readings: Vec::new(),
            tags: HashMap::new(),
        }
    }

    pub fn reading(&self, resource_name: &str) -> Option<&Reading> {
        self.readings.iter().find(|r| r.resource_name == resource_name)
    }
}

/// Event wrapped for publication, carrying the request id it answers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddEventRequest {
    pub api_version: String,
    pub request_id: String,
    pub event: Event,
}

impl AddEventRequest {
    pub fn new(event: Event) -> Self {
        Self {
            api_version: crate::API_VERSION.to_string(),
            request_id: Uuid::new_v4().to_string(),
            event,
        }
    }
}

/// Response body of a command returning an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventResponse {
    pub api_version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub request_id: String,
    pub status_code: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<Event>,
}

impl EventResponse {
    pub fn new(request_id: impl Into<String>, event: Option<Event>) -> Self {
        Self {
            api_version: crate::API_VERSION.to_string(),
            request_id: request_id.into(),
            status_code: 200,
            event,
        }
    }
}

/// Serde adapter encoding byte vectors as base64 strings.
pub mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
        STANDARD.decode(s).map_err(serde::de::Error::custom)
    }
}
