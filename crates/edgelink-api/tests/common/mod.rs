//! A started device service behind the router.

#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use tower::ServiceExt;

use edgelink_api::{create_router_with_state, ServerState};
use edgelink_core::messaging::MemoryMessageBus;
use edgelink_core::models::{
    AdminState, Device, DeviceProfile, DeviceResource, Protocols, ReadWrite, ResourceProperties,
};
use edgelink_core::{CommandValue, Result, ServiceConfig, Value, ValueType};
use edgelink_devices::{CommandRequest, DeviceService, DriverSdk, InMemoryMetadata, ProtocolDriver};

pub const SERVICE: &str = "device-http";

/// Answers every read with 217 and accepts every write.
pub struct FixedDriver;

#[async_trait]
impl ProtocolDriver for FixedDriver {
    async fn initialize(&self, _sdk: DriverSdk) -> Result<()> {
        Ok(())
    }

    async fn handle_read_commands(
        &self,
        _device_name: &str,
        _protocols: &Protocols,
        requests: &[CommandRequest],
    ) -> Result<Vec<CommandValue>> {
        Ok(requests
            .iter()
            .map(|r| CommandValue::new(r.device_resource_name.clone(), Value::Float32(217.0)))
            .collect())
    }

    async fn handle_write_commands(
        &self,
        _device_name: &str,
        _protocols: &Protocols,
        _requests: &[CommandRequest],
        _params: &[CommandValue],
    ) -> Result<()> {
        Ok(())
    }

    async fn add_device(&self, _: &str, _: &Protocols, _: AdminState) -> Result<()> {
        Ok(())
    }

    async fn update_device(&self, _: &str, _: &Protocols, _: AdminState) -> Result<()> {
        Ok(())
    }

    async fn remove_device(&self, _: &str, _: &Protocols) -> Result<()> {
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        Ok(())
    }

    async fn stop(&self, _force: bool) -> Result<()> {
        Ok(())
    }
}

fn profile() -> DeviceProfile {
    let mut temp = ResourceProperties::new(ValueType::Float32, ReadWrite::ReadWrite);
    temp.scale = Some(0.1);
    temp.offset = Some(2.0);
    DeviceProfile::new("thermo")
        .with_resource(DeviceResource::new("temp", temp))
        .with_resource(DeviceResource::new(
            "setpoint",
            ResourceProperties::new(ValueType::Float32, ReadWrite::Write),
        ))
}

pub async fn router_with(config: ServiceConfig) -> (Router, Arc<DeviceService>) {
    let metadata = InMemoryMetadata::new()
        .with_profile(profile())
        .with_device(Device::new("t1", "thermo").with_service(SERVICE))
        .with_device(
            Device::new("t2", "thermo")
                .with_service(SERVICE)
                .with_admin_state(AdminState::Locked),
        );
    let service = DeviceService::new(
        config,
        Arc::new(FixedDriver),
        Arc::new(MemoryMessageBus::new()),
        Arc::new(metadata),
    )
    .expect("service builds");
    service.start().await.expect("service starts");
    let service = Arc::new(service);
    (create_router_with_state(ServerState::new(service.clone())), service)
}

pub fn config() -> ServiceConfig {
    let mut config = ServiceConfig::default();
    config.service.name = SERVICE.to_string();
    config.service.startup_retries = 1;
    config
}

pub async fn router() -> Router {
    router_with(config()).await.0
}

/// Sends a request and returns the status and the body as JSON (Null when empty).
pub async fn send(router: &Router, method: &str, uri: &str, body: &str) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request builds");
    let response = router.clone().oneshot(request).await.expect("router answers");
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body readable");
    let json = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| serde_json::Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    (status, json)
}
