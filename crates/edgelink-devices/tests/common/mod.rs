//! Shared fixtures: a scripted driver and seeded in-memory collaborators.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use edgelink_core::messaging::MemoryMessageBus;
use edgelink_core::models::{
    AdminState, Device, DeviceCommand, DeviceProfile, DeviceResource, ProfileScanRequest,
    Protocols, ReadWrite, ResourceOperation, ResourceProperties,
};
use edgelink_core::{CommandValue, Error, Result, ServiceConfig, Value, ValueType};
use edgelink_devices::{
    CommandRequest, DeviceService, DiscoveredDevice, DiscoveryControl, DriverSdk,
    InMemoryMetadata, ProfileScanner, ProtocolDriver,
};

pub const SERVICE: &str = "device-simple";

type ReadScript = Box<dyn Fn(&str, &[CommandRequest]) -> Result<Vec<CommandValue>> + Send + Sync>;

/// Driver whose read results are scripted and whose calls are recorded.
pub struct MockDriver {
    read_script: Mutex<ReadScript>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    pub reads: AtomicUsize,
    pub read_requests: Mutex<Vec<Vec<CommandRequest>>>,
    pub writes: Mutex<Vec<Vec<CommandValue>>>,
    pub added: Mutex<Vec<String>>,
    pub updated: Mutex<Vec<String>>,
    pub removed: Mutex<Vec<String>>,
    pub discovery_results: Mutex<Vec<DiscoveredDevice>>,
    pub discover_calls: AtomicUsize,
    /// When set, `discover` waits for a permit before reporting results.
    pub discover_gate: Mutex<Option<Arc<Notify>>>,
    pub panic_on_discover: AtomicBool,
    pub scanned: Mutex<Vec<String>>,
    pub scan_delay: Mutex<Duration>,
    pub invalid_devices: Mutex<Vec<String>>,
    extensions: bool,
    sdk: Mutex<Option<DriverSdk>>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::build(false)
    }

    /// Driver also implementing stop-discovery and profile scan.
    pub fn with_extensions() -> Self {
        Self::build(true)
    }

    fn build(extensions: bool) -> Self {
        Self {
            read_script: Mutex::new(Box::new(|_, requests| {
                Ok(requests
                    .iter()
                    .map(|r| CommandValue::new(r.device_resource_name.clone(), default_value(r.value_type)))
                    .collect())
            })),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            reads: AtomicUsize::new(0),
            read_requests: Mutex::new(Vec::new()),
            writes: Mutex::new(Vec::new()),
            added: Mutex::new(Vec::new()),
            updated: Mutex::new(Vec::new()),
            removed: Mutex::new(Vec::new()),
            discovery_results: Mutex::new(Vec::new()),
            discover_calls: AtomicUsize::new(0),
            discover_gate: Mutex::new(None),
            panic_on_discover: AtomicBool::new(false),
            scanned: Mutex::new(Vec::new()),
            scan_delay: Mutex::new(Duration::ZERO),
            invalid_devices: Mutex::new(Vec::new()),
            extensions,
            sdk: Mutex::new(None),
        }
    }

    pub fn script_reads<F>(&self, script: F)
    where
        F: Fn(&str, &[CommandRequest]) -> Result<Vec<CommandValue>> + Send + Sync + 'static,
    {
        *self.read_script.lock() = Box::new(script);
    }

    /// Every read answers `value` for each requested resource.
    pub fn always_read(&self, value: Value) {
        self.script_reads(move |_, requests| {
            Ok(requests
                .iter()
                .map(|r| CommandValue::new(r.device_resource_name.clone(), value.clone()))
                .collect())
        });
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Makes `discover` block until the returned handle is notified.
    pub fn gate_discovery(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.discover_gate.lock() = Some(gate.clone());
        gate
    }

    pub fn sdk(&self) -> Option<DriverSdk> {
        self.sdk.lock().clone()
    }
}

fn default_value(value_type: ValueType) -> Value {
    match value_type {
        ValueType::Bool => Value::Bool(true),
        ValueType::String => Value::String("ok".to_string()),
        ValueType::Float32 => Value::Float32(1.0),
        ValueType::Float64 => Value::Float64(1.0),
        _ => Value::Int32(1),
    }
}

#[async_trait]
impl ProtocolDriver for MockDriver {
    async fn initialize(&self, sdk: DriverSdk) -> Result<()> {
        *self.sdk.lock() = Some(sdk);
        Ok(())
    }

    async fn handle_read_commands(
        &self,
        device_name: &str,
        _protocols: &Protocols,
        requests: &[CommandRequest],
    ) -> Result<Vec<CommandValue>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.read_requests.lock().push(requests.to_vec());
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Error::unavailable(format!("device {device_name} does not answer")));
        }
        (self.read_script.lock())(device_name, requests)
    }

    async fn handle_write_commands(
        &self,
        device_name: &str,
        _protocols: &Protocols,
        _requests: &[CommandRequest],
        params: &[CommandValue],
    ) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::unavailable(format!("device {device_name} rejected write")));
        }
        self.writes.lock().push(params.to_vec());
        Ok(())
    }

    async fn add_device(&self, name: &str, _: &Protocols, _: AdminState) -> Result<()> {
        self.added.lock().push(name.to_string());
        Ok(())
    }

    async fn update_device(&self, name: &str, _: &Protocols, _: AdminState) -> Result<()> {
        self.updated.lock().push(name.to_string());
        Ok(())
    }

    async fn remove_device(&self, name: &str, _: &Protocols) -> Result<()> {
        self.removed.lock().push(name.to_string());
        Ok(())
    }

    async fn discover(&self) -> Result<()> {
        self.discover_calls.fetch_add(1, Ordering::SeqCst);
        if self.panic_on_discover.load(Ordering::SeqCst) {
            panic!("discovery crashed");
        }
        let gate = self.discover_gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let found = self.discovery_results.lock().clone();
        let sdk = self.sdk().ok_or_else(|| Error::server("driver not initialized"))?;
        sdk.push_discovered(found).await
    }

    async fn validate_device(&self, device: &Device) -> Result<()> {
        if self.invalid_devices.lock().contains(&device.name) {
            return Err(Error::contract_invalid(format!("bad protocols for {}", device.name)));
        }
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        Ok(())
    }

    async fn stop(&self, _force: bool) -> Result<()> {
        Ok(())
    }

    fn discovery_control(&self) -> Option<&dyn DiscoveryControl> {
        self.extensions.then_some(self as &dyn DiscoveryControl)
    }

    fn profile_scanner(&self) -> Option<&dyn ProfileScanner> {
        self.extensions.then_some(self as &dyn ProfileScanner)
    }
}

#[async_trait]
impl DiscoveryControl for MockDriver {
    async fn stop_device_discovery(&self, _: &HashMap<String, serde_json::Value>) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl ProfileScanner for MockDriver {
    async fn profile_scan(&self, request: &ProfileScanRequest) -> Result<DeviceProfile> {
        let delay = *self.scan_delay.lock();
        tokio::time::sleep(delay).await;
        self.scanned.lock().push(request.device_name.clone());
        Ok(DeviceProfile::new(request.profile_name.clone()).with_resource(DeviceResource::new(
            "scanned",
            ResourceProperties::new(ValueType::Int16, ReadWrite::Read),
        )))
    }

    async fn stop_profile_scan(&self, _: &str, _: &HashMap<String, serde_json::Value>) -> Result<()> {
        Ok(())
    }
}

/// `p1`: `temp` (Float32, RW, scale 0.1, offset 2) and `humidity` (Int16, R).
pub fn profile_p1() -> DeviceProfile {
    let mut temp = ResourceProperties::new(ValueType::Float32, ReadWrite::ReadWrite);
    temp.scale = Some(0.1);
    temp.offset = Some(2.0);
    temp.units = "C".to_string();
    DeviceProfile::new("p1")
        .with_resource(DeviceResource::new("temp", temp))
        .with_resource(DeviceResource::new(
            "humidity",
            ResourceProperties::new(ValueType::Int16, ReadWrite::Read),
        ))
        .with_resource(DeviceResource::new(
            "reset",
            ResourceProperties::new(ValueType::Bool, ReadWrite::Write),
        ))
}

/// `p2`: `mode` (String, RW) behind a mapped `mode` command.
pub fn profile_p2() -> DeviceProfile {
    DeviceProfile::new("p2")
        .with_resource(DeviceResource::new(
            "mode",
            ResourceProperties::new(ValueType::String, ReadWrite::ReadWrite),
        ))
        .with_command(
            DeviceCommand::new("mode", ReadWrite::ReadWrite).with_operation(
                ResourceOperation::new("mode")
                    .with_mapping("on", "1")
                    .with_mapping("off", "0"),
            ),
        )
}

pub fn device(name: &str, profile: &str) -> Device {
    Device::new(name, profile).with_service(SERVICE)
}

pub fn config() -> ServiceConfig {
    let mut config = ServiceConfig::default();
    config.service.name = SERVICE.to_string();
    config.service.startup_retries = 1;
    config
}

/// A started service plus handles on its collaborators.
pub struct Harness {
    pub service: DeviceService,
    pub driver: Arc<MockDriver>,
    pub bus: Arc<MemoryMessageBus>,
    pub metadata: Arc<InMemoryMetadata>,
}

pub async fn start(
    config: ServiceConfig,
    driver: MockDriver,
    metadata: InMemoryMetadata,
) -> Harness {
    let driver = Arc::new(driver);
    let bus = Arc::new(MemoryMessageBus::new());
    let metadata = Arc::new(metadata);
    let service = DeviceService::new(config, driver.clone(), bus.clone(), metadata.clone())
        .expect("service builds");
    service.start().await.expect("service starts");
    Harness {
        service,
        driver,
        bus,
        metadata,
    }
}

/// Metadata seeded with both profiles.
pub fn metadata() -> InMemoryMetadata {
    InMemoryMetadata::new()
        .with_profile(profile_p1())
        .with_profile(profile_p2())
}
