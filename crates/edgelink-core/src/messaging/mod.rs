//! Message bus abstraction.
//!
//! Every message travels inside a [`MessageEnvelope`]. Implementations are
//! [`MemoryMessageBus`] (in process, used by tests and standalone mode) and,
//! with the `mqtt` feature, [`MqttMessageBus`].

use std::collections::HashMap;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::{Error, ErrorKind, Result};
use crate::models::event::base64_bytes;

pub mod memory;
#[cfg(feature = "mqtt")]
pub mod mqtt;
pub mod topics;

pub use memory::MemoryMessageBus;
#[cfg(feature = "mqtt")]
pub use mqtt::MqttMessageBus;
pub use topics::{topic_matches, CommandMethod, CommandTopic, Topics};

pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Error code of a successful response envelope.
pub const ERROR_CODE_OK: u8 = 0;
/// Error code of a failed response envelope.
pub const ERROR_CODE_FAILED: u8 = 1;

/// Capacity of the channel behind each [`Subscription`].
pub const SUBSCRIPTION_CAPACITY: usize = 256;

/// A message as carried on the bus.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEnvelope {
    #[serde(default)]
    pub api_version: String,
    #[serde(default, rename = "requestID")]
    pub request_id: String,
    #[serde(default, rename = "correlationID")]
    pub correlation_id: String,
    /// Topic the message arrived on; filled in by the receiving bus.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub received_topic: String,
    #[serde(default)]
    pub error_code: u8,
    #[serde(default)]
    pub content_type: String,
    #[serde(default, with = "base64_bytes")]
    pub payload: Vec<u8>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub query_params: HashMap<String, String>,
}

impl MessageEnvelope {
    pub fn new(payload: Vec<u8>, content_type: impl Into<String>) -> Self {
        Self {
            api_version: crate::API_VERSION.to_string(),
            request_id: uuid::Uuid::new_v4().to_string(),
            correlation_id: uuid::Uuid::new_v4().to_string(),
            content_type: content_type.into(),
            payload,
            ..Default::default()
        }
    }

    /// Envelope with a JSON-encoded payload.
    pub fn json<T: Serialize>(value: &T) -> Result<Self> {
        Ok(Self::new(serde_json::to_vec(value)?, CONTENT_TYPE_JSON))
    }

    /// Response envelope answering `request`, carrying a JSON payload.
    pub fn response_to<T: Serialize>(request: &MessageEnvelope, value: &T) -> Result<Self> {
        let mut envelope = Self::json(value)?;
        envelope.request_id = request.request_id.clone();
        envelope.correlation_id = request.correlation_id.clone();
        Ok(envelope)
    }

    /// Error response answering `request`; the payload is the error text.
    pub fn error_response(request: &MessageEnvelope, err: &Error) -> Self {
        let mut envelope = Self::new(err.to_string().into_bytes(), "text/plain");
        envelope.request_id = request.request_id.clone();
        envelope.correlation_id = request.correlation_id.clone();
        envelope.error_code = ERROR_CODE_FAILED;
        envelope
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }

    pub fn with_query_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query_params.insert(key.into(), value.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.error_code != ERROR_CODE_OK
    }

    /// Decodes the JSON payload.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.payload).map_err(|e| {
            Error::with_cause(
                ErrorKind::ContractInvalid,
                format!("failed to decode payload received on {}", self.received_topic),
                e,
            )
        })
    }
}

/// Stream of envelopes matching the subscribed patterns.
pub struct Subscription {
    rx: mpsc::Receiver<MessageEnvelope>,
}

impl Subscription {
    pub fn new(rx: mpsc::Receiver<MessageEnvelope>) -> Self {
        Self { rx }
    }

    /// Next envelope, or `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<MessageEnvelope> {
        self.rx.recv().await
    }

    /// Envelope already queued, if any.
    pub fn try_recv(&mut self) -> Option<MessageEnvelope> {
        self.rx.try_recv().ok()
    }
}

/// Publish/subscribe transport.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publishes `envelope` on `topic`.
    async fn publish(&self, topic: &str, envelope: MessageEnvelope) -> Result<()>;

    /// Subscribes to MQTT-style topic patterns (`+` one level, `#` the rest).
    async fn subscribe(&self, patterns: &[String]) -> Result<Subscription>;

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_json_shape() {
        let envelope = MessageEnvelope::json(&serde_json::json!({"a": 1}))
            .unwrap()
            .with_request_id("r1")
            .with_query_param("ds-pushevent", "true");
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["requestID"], "r1");
        assert_eq!(json["contentType"], CONTENT_TYPE_JSON);
        assert_eq!(json["queryParams"]["ds-pushevent"], "true");

        let back: MessageEnvelope = serde_json::from_value(json).unwrap();
        let payload: serde_json::Value = back.decode().unwrap();
        assert_eq!(payload["a"], 1);
    }

    #[test]
    fn test_error_response_keeps_ids() {
        let request = MessageEnvelope::new(Vec::new(), CONTENT_TYPE_JSON).with_correlation_id("c1");
        let response = MessageEnvelope::error_response(&request, &Error::locked("device d1 is locked"));
        assert!(response.is_error());
        assert_eq!(response.request_id, request.request_id);
        assert_eq!(response.correlation_id, "c1");
        assert_eq!(response.payload, b"device d1 is locked");
    }
}
