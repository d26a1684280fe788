//! Handle given to the driver in [`ProtocolDriver::initialize`](super::ProtocolDriver::initialize).

use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use tokio::sync::mpsc;

use edgelink_core::models::Device;
use edgelink_core::{Error, ErrorKind, Result};

use super::{AsyncValues, DiscoveredDevice};
use crate::cache::Caches;
use crate::metrics::DeviceMetrics;

/// What a driver may use from the runtime.
#[derive(Clone)]
pub struct DriverSdk {
    service_name: String,
    async_values: mpsc::Sender<AsyncValues>,
    discovered: mpsc::Sender<Vec<DiscoveredDevice>>,
    driver_config: HashMap<String, String>,
    caches: Arc<Caches>,
    metrics: DeviceMetrics,
}

impl DriverSdk {
    pub fn new(
        service_name: impl Into<String>,
        async_values: mpsc::Sender<AsyncValues>,
        discovered: mpsc::Sender<Vec<DiscoveredDevice>>,
        driver_config: HashMap<String, String>,
        caches: Arc<Caches>,
        metrics: DeviceMetrics,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            async_values,
            discovered,
            driver_config,
            caches,
            metrics,
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Channel for readings the driver produces on its own.
    pub fn async_values(&self) -> mpsc::Sender<AsyncValues> {
        self.async_values.clone()
    }

    /// Channel for discovery results.
    pub fn discovered_devices(&self) -> mpsc::Sender<Vec<DiscoveredDevice>> {
        self.discovered.clone()
    }

    /// Sends async values; fails when async readings are disabled.
    pub async fn push_values(&self, values: AsyncValues) -> Result<()> {
        self.async_values
            .send(values)
            .await
            .map_err(|_| Error::unavailable("async readings are not accepted"))
    }

    pub async fn push_discovered(&self, devices: Vec<DiscoveredDevice>) -> Result<()> {
        self.discovered
            .send(devices)
            .await
            .map_err(|_| Error::unavailable("discovery results are not accepted"))
    }

    /// The `[Driver]` configuration section.
    pub fn driver_config(&self) -> &HashMap<String, String> {
        &self.driver_config
    }

    /// Decodes the `[Driver]` section into a driver-specific struct.
    pub fn load_custom_config<T: DeserializeOwned>(&self) -> Result<T> {
        let value = serde_json::to_value(&self.driver_config)?;
        serde_json::from_value(value).map_err(|e| {
            Error::with_cause(ErrorKind::ContractInvalid, "invalid driver configuration", e)
        })
    }

    pub fn devices(&self) -> Vec<Device> {
        self.caches.devices.all()
    }

    pub fn device(&self, name: &str) -> Option<Device> {
        self.caches.devices.for_name(name)
    }

    pub fn metrics_registry(&self) -> &prometheus::Registry {
        self.metrics.registry()
    }
}
