//! Protocol-free driver that fabricates readings.
//!
//! Reads return the last value written to a resource, or a random value of
//! the resource's type. Numeric ranges come from the `minimum` and `maximum`
//! resource attributes. Discovery reports the devices named in the
//! `DiscoveredDevices` driver setting (comma separated).

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use serde_json::json;
use tracing::{debug, info};

use edgelink_core::models::{AdminState, Protocols};
use edgelink_core::{CommandValue, Error, Result, Value, ValueType};
use edgelink_devices::{CommandRequest, DiscoveredDevice, DriverSdk, ProtocolDriver};

/// Protocol name of simulated devices.
pub const PROTOCOL: &str = "simulated";

const DISCOVERED_DEVICES: &str = "DiscoveredDevices";

#[derive(Default)]
pub struct SimulatedDriver {
    sdk: RwLock<Option<DriverSdk>>,
    /// (device, resource) → last written value
    written: Mutex<HashMap<(String, String), Value>>,
}

impl SimulatedDriver {
    pub fn new() -> Self {
        Self::default()
    }

    fn sdk(&self) -> Result<DriverSdk> {
        self.sdk
            .read()
            .clone()
            .ok_or_else(|| Error::server("simulated driver used before initialize"))
    }
}

fn range(request: &CommandRequest, default: (f64, f64)) -> (f64, f64) {
    let bound = |key: &str| request.attributes.get(key).and_then(serde_json::Value::as_f64);
    let min = bound("minimum").unwrap_or(default.0);
    let max = bound("maximum").unwrap_or(default.1);
    if min < max {
        (min, max)
    } else {
        default
    }
}

/// A random value of the requested type.
fn random_value(request: &CommandRequest) -> Result<Value> {
    let mut rng = rand::thread_rng();
    let mut float = |default: (f64, f64)| {
        let (min, max) = range(request, default);
        rng.gen_range(min..max)
    };
    let value = match request.value_type {
        ValueType::Bool => Value::Bool(rand::random()),
        ValueType::String => Value::String(format!("simulated-{}", rand::random::<u16>())),
        ValueType::Uint8 => Value::Uint8(float((0.0, 255.0)) as u8),
        ValueType::Uint16 => Value::Uint16(float((0.0, 1000.0)) as u16),
        ValueType::Uint32 => Value::Uint32(float((0.0, 1000.0)) as u32),
        ValueType::Uint64 => Value::Uint64(float((0.0, 1000.0)) as u64),
        ValueType::Int8 => Value::Int8(float((-100.0, 100.0)) as i8),
        ValueType::Int16 => Value::Int16(float((-1000.0, 1000.0)) as i16),
        ValueType::Int32 => Value::Int32(float((-1000.0, 1000.0)) as i32),
        ValueType::Int64 => Value::Int64(float((-1000.0, 1000.0)) as i64),
        ValueType::Float32 => Value::Float32(float((0.0, 100.0)) as f32),
        ValueType::Float64 => Value::Float64(float((0.0, 100.0))),
        ValueType::BoolArray => Value::BoolArray(vec![rand::random(), rand::random()]),
        ValueType::Int32Array => Value::Int32Array(vec![
            float((-1000.0, 1000.0)) as i32,
            float((-1000.0, 1000.0)) as i32,
        ]),
        ValueType::Float64Array => {
            Value::Float64Array(vec![float((0.0, 100.0)), float((0.0, 100.0))])
        }
        ValueType::Binary => Value::Binary((0..8).map(|_| rand::random::<u8>()).collect()),
        ValueType::Object => Value::Object(json!({ "sample": float((0.0, 100.0)) })),
        other => {
            return Err(Error::not_implemented(format!(
                "simulated driver cannot produce {other} values"
            )))
        }
    };
    Ok(value)
}

#[async_trait]
impl ProtocolDriver for SimulatedDriver {
    async fn initialize(&self, sdk: DriverSdk) -> Result<()> {
        info!(service = sdk.service_name(), "Simulated driver initialized");
        *self.sdk.write() = Some(sdk);
        Ok(())
    }

    async fn handle_read_commands(
        &self,
        device_name: &str,
        _protocols: &Protocols,
        requests: &[CommandRequest],
    ) -> Result<Vec<CommandValue>> {
        let written = self.written.lock();
        requests
            .iter()
            .map(|request| {
                let key = (device_name.to_string(), request.device_resource_name.clone());
                let value = match written.get(&key) {
                    Some(value) => value.clone(),
                    None => random_value(request)?,
                };
                Ok(CommandValue::new(request.device_resource_name.clone(), value))
            })
            .collect()
    }

    async fn handle_write_commands(
        &self,
        device_name: &str,
        _protocols: &Protocols,
        _requests: &[CommandRequest],
        params: &[CommandValue],
    ) -> Result<()> {
        let mut written = self.written.lock();
        for value in params {
            debug!(device = device_name, resource = %value.device_resource_name, "Simulated write");
            written.insert(
                (device_name.to_string(), value.device_resource_name.clone()),
                value.value.clone(),
            );
        }
        Ok(())
    }

    async fn add_device(&self, name: &str, _: &Protocols, state: AdminState) -> Result<()> {
        info!(device = name, admin_state = %state, "Simulated device added");
        Ok(())
    }

    async fn update_device(&self, name: &str, _: &Protocols, state: AdminState) -> Result<()> {
        debug!(device = name, admin_state = %state, "Simulated device updated");
        Ok(())
    }

    async fn remove_device(&self, name: &str, _: &Protocols) -> Result<()> {
        self.written.lock().retain(|(device, _), _| device != name);
        info!(device = name, "Simulated device removed");
        Ok(())
    }

    async fn discover(&self) -> Result<()> {
        let sdk = self.sdk()?;
        let found: Vec<DiscoveredDevice> = sdk
            .driver_config()
            .get(DISCOVERED_DEVICES)
            .map(|names| {
                names
                    .split(',')
                    .map(str::trim)
                    .filter(|n| !n.is_empty())
                    .map(|name| {
                        DiscoveredDevice::new(name).with_protocol(
                            PROTOCOL,
                            HashMap::from([("address".to_string(), json!(name))]),
                        )
                    })
                    .collect()
            })
            .unwrap_or_default();
        info!(count = found.len(), "Simulated discovery finished");
        sdk.push_discovered(found).await
    }

    async fn start(&self) -> Result<()> {
        info!("Simulated driver started");
        Ok(())
    }

    async fn stop(&self, force: bool) -> Result<()> {
        info!(force, "Simulated driver stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(name: &str, value_type: ValueType) -> CommandRequest {
        CommandRequest {
            device_resource_name: name.to_string(),
            attributes: HashMap::from([
                ("minimum".to_string(), json!(10)),
                ("maximum".to_string(), json!(20)),
            ]),
            value_type,
        }
    }

    #[tokio::test]
    async fn test_reads_respect_attribute_range() {
        let driver = SimulatedDriver::new();
        let values = driver
            .handle_read_commands("d1", &Protocols::new(), &[request("t", ValueType::Float64)])
            .await
            .unwrap();
        match values[0].value {
            Value::Float64(v) => assert!((10.0..20.0).contains(&v)),
            ref other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_reads_return_written_values() {
        let driver = SimulatedDriver::new();
        driver
            .handle_write_commands(
                "d1",
                &Protocols::new(),
                &[],
                &[CommandValue::new("mode", Value::String("eco".into()))],
            )
            .await
            .unwrap();
        let values = driver
            .handle_read_commands("d1", &Protocols::new(), &[request("mode", ValueType::String)])
            .await
            .unwrap();
        assert_eq!(values[0].value, Value::String("eco".into()));

        driver.remove_device("d1", &Protocols::new()).await.unwrap();
        let values = driver
            .handle_read_commands("d1", &Protocols::new(), &[request("mode", ValueType::String)])
            .await
            .unwrap();
        assert_ne!(values[0].value, Value::String("eco".into()));
    }

    #[tokio::test]
    async fn test_unsupported_type() {
        let driver = SimulatedDriver::new();
        let err = driver
            .handle_read_commands("d1", &Protocols::new(), &[request("x", ValueType::Uint64Array)])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), edgelink_core::ErrorKind::NotImplemented);
    }
}
