//! Device-service metrics.

use prometheus::{Encoder, IntGaugeVec, Opts, Registry, TextEncoder};

use edgelink_core::{Error, Result};

/// Last successful driver contact per device, milliseconds since the epoch.
pub const DEVICE_LAST_CONNECTED: &str = "device_last_connected";

/// Metric handles owned by one service instance.
#[derive(Clone)]
pub struct DeviceMetrics {
    registry: Registry,
    last_connected: IntGaugeVec,
}

impl DeviceMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let last_connected = IntGaugeVec::new(
            Opts::new(
                DEVICE_LAST_CONNECTED,
                "Last time the device was successfully contacted (ms since epoch)",
            ),
            &["device"],
        )
        .map_err(metrics_error)?;
        registry
            .register(Box::new(last_connected.clone()))
            .map_err(metrics_error)?;
        Ok(Self {
            registry,
            last_connected,
        })
    }

    /// Registry drivers can add their own collectors to.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn register_device(&self, device: &str, last_connected: i64) {
        self.last_connected
            .with_label_values(&[device])
            .set(last_connected);
    }

    pub fn unregister_device(&self, device: &str) {
        // Missing series is fine.
        let _ = self.last_connected.remove_label_values(&[device]);
    }

    pub fn set_last_connected(&self, device: &str, millis: i64) {
        self.last_connected.with_label_values(&[device]).set(millis);
    }

    /// Text exposition of every registered metric.
    pub fn gather_text(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(metrics_error)?;
        String::from_utf8(buffer).map_err(|e| Error::server(e.to_string()))
    }
}

fn metrics_error(e: prometheus::Error) -> Error {
    Error::server(format!("metrics: {e}"))
}
