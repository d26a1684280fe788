//! Metadata collaborator.
//!
//! [`InMemoryMetadata`] backs tests and standalone mode; it records every
//! device submitted to it. [`HttpMetadataClient`] talks to a metadata REST
//! service (feature `http`).

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use edgelink_core::models::{
    Device, DeviceProfile, DeviceServiceInfo, OperatingState, ProvisionWatcher,
};
use edgelink_core::{Error, Result};

/// Entities the service reads from and writes to metadata.
#[async_trait]
pub trait MetadataClient: Send + Sync {
    async fn ping(&self) -> Result<()>;

    async fn device_service(&self, name: &str) -> Result<DeviceServiceInfo>;

    async fn add_device_service(&self, service: DeviceServiceInfo) -> Result<()>;

    async fn devices_for_service(&self, service: &str) -> Result<Vec<Device>>;

    async fn device(&self, name: &str) -> Result<Device>;

    /// Adds a device and returns its id.
    async fn add_device(&self, device: Device) -> Result<String>;

    async fn update_device_operating_state(&self, name: &str, state: OperatingState) -> Result<()>;

    async fn profile(&self, name: &str) -> Result<DeviceProfile>;

    async fn add_profile(&self, profile: DeviceProfile) -> Result<()>;

    async fn watchers_for_service(&self, service: &str) -> Result<Vec<ProvisionWatcher>>;

    async fn add_watcher(&self, watcher: ProvisionWatcher) -> Result<()>;
}

#[derive(Default)]
struct Store {
    services: HashMap<String, DeviceServiceInfo>,
    devices: HashMap<String, Device>,
    profiles: HashMap<String, DeviceProfile>,
    watchers: HashMap<String, ProvisionWatcher>,
    submitted: Vec<Device>,
    state_updates: Vec<(String, OperatingState)>,
}

/// Metadata kept in process memory.
#[derive(Default)]
pub struct InMemoryMetadata {
    store: RwLock<Store>,
    unavailable: RwLock<bool>,
}

impl InMemoryMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profile(self, profile: DeviceProfile) -> Self {
        self.store
            .write()
            .profiles
            .insert(profile.name.clone(), profile);
        self
    }

    pub fn with_device(self, device: Device) -> Self {
        self.store.write().devices.insert(device.name.clone(), device);
        self
    }

    pub fn with_watcher(self, watcher: ProvisionWatcher) -> Self {
        self.store
            .write()
            .watchers
            .insert(watcher.name.clone(), watcher);
        self
    }

    pub fn with_service(self, service: DeviceServiceInfo) -> Self {
        self.store
            .write()
            .services
            .insert(service.name.clone(), service);
        self
    }

    /// Makes every call fail with `ServiceUnavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.write() = unavailable;
    }

    /// Devices submitted through [`MetadataClient::add_device`], in order.
    pub fn submitted_devices(&self) -> Vec<Device> {
        self.store.read().submitted.clone()
    }

    /// Operating-state updates received, in order.
    pub fn operating_state_updates(&self) -> Vec<(String, OperatingState)> {
        self.store.read().state_updates.clone()
    }

    fn check_available(&self) -> Result<()> {
        if *self.unavailable.read() {
            Err(Error::unavailable("metadata service is unavailable"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl MetadataClient for InMemoryMetadata {
    async fn ping(&self) -> Result<()> {
        self.check_available()
    }

    async fn device_service(&self, name: &str) -> Result<DeviceServiceInfo> {
        self.check_available()?;
        self.store
            .read()
            .services
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("device service {name} not found")))
    }

    async fn add_device_service(&self, service: DeviceServiceInfo) -> Result<()> {
        self.check_available()?;
        let mut store = self.store.write();
        if store.services.contains_key(&service.name) {
            return Err(Error::duplicate(format!(
                "device service {} already exists",
                service.name
            )));
        }
        store.services.insert(service.name.clone(), service);
        Ok(())
    }

    async fn devices_for_service(&self, service: &str) -> Result<Vec<Device>> {
        self.check_available()?;
        Ok(self
            .store
            .read()
            .devices
            .values()
            .filter(|d| d.service_name == service)
            .cloned()
            .collect())
    }

    async fn device(&self, name: &str) -> Result<Device> {
        self.check_available()?;
        self.store
            .read()
            .devices
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("device {name} not found")))
    }

    async fn add_device(&self, mut device: Device) -> Result<String> {
        self.check_available()?;
        let mut store = self.store.write();
        if store.devices.contains_key(&device.name) {
            return Err(Error::duplicate(format!("device {} already exists", device.name)));
        }
        if device.id.is_empty() {
            device.id = uuid::Uuid::new_v4().to_string();
        }
        let id = device.id.clone();
        store.submitted.push(device.clone());
        store.devices.insert(device.name.clone(), device);
        Ok(id)
    }

    async fn update_device_operating_state(&self, name: &str, state: OperatingState) -> Result<()> {
        self.check_available()?;
        let mut store = self.store.write();
        let device = store
            .devices
            .get_mut(name)
            .ok_or_else(|| Error::not_found(format!("device {name} not found")))?;
        device.operating_state = state;
        store.state_updates.push((name.to_string(), state));
        Ok(())
    }

    async fn profile(&self, name: &str) -> Result<DeviceProfile> {
        self.check_available()?;
        self.store
            .read()
            .profiles
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("profile {name} not found")))
    }

    async fn add_profile(&self, profile: DeviceProfile) -> Result<()> {
        self.check_available()?;
        let mut store = self.store.write();
        if store.profiles.contains_key(&profile.name) {
            return Err(Error::duplicate(format!("profile {} already exists", profile.name)));
        }
        store.profiles.insert(profile.name.clone(), profile);
        Ok(())
    }

    async fn watchers_for_service(&self, service: &str) -> Result<Vec<ProvisionWatcher>> {
        self.check_available()?;
        Ok(self
            .store
            .read()
            .watchers
            .values()
            .filter(|w| w.service_name == service)
            .cloned()
            .collect())
    }

    async fn add_watcher(&self, watcher: ProvisionWatcher) -> Result<()> {
        self.check_available()?;
        let mut store = self.store.write();
        if store.watchers.contains_key(&watcher.name) {
            return Err(Error::duplicate(format!(
                "provision watcher {} already exists",
                watcher.name
            )));
        }
        store.watchers.insert(watcher.name.clone(), watcher);
        Ok(())
    }
}

#[cfg(feature = "http")]
pub use http::HttpMetadataClient;

#[cfg(feature = "http")]
mod http {
    use std::time::Duration;

    use async_trait::async_trait;
    use serde::de::DeserializeOwned;
    use serde_json::{json, Value};

    use edgelink_core::models::{
        Device, DeviceProfile, DeviceServiceInfo, OperatingState, ProvisionWatcher,
    };
    use edgelink_core::{Error, ErrorKind, Result, API_VERSION};

    use super::MetadataClient;

    /// Client for the metadata REST API (`/api/v3/...`).
    pub struct HttpMetadataClient {
        client: reqwest::Client,
        base_url: String,
    }

    impl HttpMetadataClient {
        pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
            let client = reqwest::Client::builder().timeout(timeout).build()?;
            let base_url: String = base_url.into();
            Ok(Self {
                client,
                base_url: base_url.trim_end_matches('/').to_string(),
            })
        }

        fn url(&self, path: &str) -> String {
            format!("{}/api/{}/{}", self.base_url, API_VERSION, path)
        }

        fn escape(name: &str) -> String {
            urlencoding::encode(name).into_owned()
        }

        async fn get_json(&self, path: &str) -> Result<Value> {
            let response = self.client.get(self.url(path)).send().await?;
            let status = response.status();
            let body: Value = response.json().await.unwrap_or(Value::Null);
            if status.is_success() {
                Ok(body)
            } else {
                Err(status_error(status.as_u16(), &body, path))
            }
        }

        async fn send_json(&self, method: reqwest::Method, path: &str, body: Value) -> Result<Value> {
            let response = self
                .client
                .request(method, self.url(path))
                .json(&body)
                .send()
                .await?;
            let status = response.status();
            let body: Value = response.json().await.unwrap_or(Value::Null);
            if !status.is_success() {
                return Err(status_error(status.as_u16(), &body, path));
            }
            // Batch endpoints answer 207 with one status per item.
            if let Some(first) = body.as_array().and_then(|items| items.first()) {
                let code = first
                    .get("statusCode")
                    .and_then(Value::as_u64)
                    .unwrap_or(200) as u16;
                if code >= 300 {
                    return Err(status_error(code, first, path));
                }
                return Ok(first.clone());
            }
            Ok(body)
        }

        fn field<T: DeserializeOwned>(body: Value, key: &str) -> Result<T> {
            let value = body
                .get(key)
                .cloned()
                .ok_or_else(|| Error::server(format!("metadata response has no {key}")))?;
            serde_json::from_value(value).map_err(|e| {
                Error::with_cause(ErrorKind::ServerError, format!("invalid {key} in metadata response"), e)
            })
        }
    }

    fn status_error(code: u16, body: &Value, path: &str) -> Error {
        let message = body
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("request failed");
        let kind = match code {
            400 => ErrorKind::ContractInvalid,
            404 => ErrorKind::EntityDoesNotExist,
            409 => ErrorKind::DuplicateName,
            423 => ErrorKind::ServiceLocked,
            503 => ErrorKind::ServiceUnavailable,
            _ => ErrorKind::ServerError,
        };
        Error::new(kind, format!("metadata {path}: {code} {message}"))
    }

    #[async_trait]
    impl MetadataClient for HttpMetadataClient {
        async fn ping(&self) -> Result<()> {
            self.get_json("ping").await.map(|_| ())
        }

        async fn device_service(&self, name: &str) -> Result<DeviceServiceInfo> {
            let body = self
                .get_json(&format!("deviceservice/name/{}", Self::escape(name)))
                .await?;
            Self::field(body, "service")
        }

        async fn add_device_service(&self, service: DeviceServiceInfo) -> Result<()> {
            let body = json!([{ "apiVersion": API_VERSION, "service": service }]);
            self.send_json(reqwest::Method::POST, "deviceservice", body)
                .await
                .map(|_| ())
        }

        async fn devices_for_service(&self, service: &str) -> Result<Vec<Device>> {
            let body = self
                .get_json(&format!(
                    "device/service/name/{}?limit=-1",
                    Self::escape(service)
                ))
                .await?;
            Ok(Self::field::<Option<Vec<Device>>>(body, "devices")?.unwrap_or_default())
        }

        async fn device(&self, name: &str) -> Result<Device> {
            let body = self
                .get_json(&format!("device/name/{}", Self::escape(name)))
                .await?;
            Self::field(body, "device")
        }

        async fn add_device(&self, device: Device) -> Result<String> {
            let body = json!([{ "apiVersion": API_VERSION, "device": device }]);
            let response = self.send_json(reqwest::Method::POST, "device", body).await?;
            Ok(response
                .get("id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string())
        }

        async fn update_device_operating_state(
            &self,
            name: &str,
            state: OperatingState,
        ) -> Result<()> {
            let body = json!([{
                "apiVersion": API_VERSION,
                "device": { "name": name, "operatingState": state }
            }]);
            self.send_json(reqwest::Method::PATCH, "device", body)
                .await
                .map(|_| ())
        }

        async fn profile(&self, name: &str) -> Result<DeviceProfile> {
            let body = self
                .get_json(&format!("deviceprofile/name/{}", Self::escape(name)))
                .await?;
            Self::field(body, "profile")
        }

        async fn add_profile(&self, profile: DeviceProfile) -> Result<()> {
            let body = json!([{ "apiVersion": API_VERSION, "profile": profile }]);
            self.send_json(reqwest::Method::POST, "deviceprofile", body)
                .await
                .map(|_| ())
        }

        async fn watchers_for_service(&self, service: &str) -> Result<Vec<ProvisionWatcher>> {
            let body = self
                .get_json(&format!(
                    "provisionwatcher/service/name/{}?limit=-1",
                    Self::escape(service)
                ))
                .await?;
            Ok(Self::field::<Option<Vec<ProvisionWatcher>>>(body, "provisionWatchers")?
                .unwrap_or_default())
        }

        async fn add_watcher(&self, watcher: ProvisionWatcher) -> Result<()> {
            let body = json!([{ "apiVersion": API_VERSION, "provisionWatcher": watcher }]);
            self.send_json(reqwest::Method::POST, "provisionwatcher", body)
                .await
                .map(|_| ())
        }
    }
}
