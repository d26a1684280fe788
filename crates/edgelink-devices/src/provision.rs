//! Seeding metadata and the caches from profile, device and watcher files.
//!
//! A location is a directory, a single file, or an `http(s)` URL of an
//! index document listing file names (JSON array, or object whose values
//! are file names). Files are YAML (`.yaml`, `.yml`) or JSON (`.json`).

use std::path::Path;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info, warn};

use edgelink_core::config::DeviceSection;
use edgelink_core::models::{Device, DeviceProfile, ProvisionWatcher};
use edgelink_core::{Error, ErrorKind, Result};

use crate::cache::Caches;
use crate::failure::FailureTracker;
use crate::metadata::MetadataClient;

/// A provisioning document: file name and contents.
struct Document {
    name: String,
    text: String,
}

/// A devices file: a `deviceList` wrapper, a bare list or a single device.
#[derive(Deserialize)]
#[serde(untagged)]
enum DeviceFile {
    Wrapped {
        #[serde(rename = "deviceList")]
        device_list: Vec<Device>,
    },
    List(Vec<Device>),
    Single(Box<Device>),
}

impl DeviceFile {
    fn into_devices(self) -> Vec<Device> {
        match self {
            Self::Wrapped { device_list } => device_list,
            Self::List(devices) => devices,
            Self::Single(device) => vec![*device],
        }
    }
}

/// Loads seed entities into metadata and the caches.
///
/// The driver is not called; devices reach it once the service starts.
pub struct Provisioner {
    instance: String,
    allowed_fails: i64,
    caches: Arc<Caches>,
    metadata: Arc<dyn MetadataClient>,
    tracker: Arc<FailureTracker>,
}

impl Provisioner {
    pub fn new(
        instance: impl Into<String>,
        allowed_fails: i64,
        caches: Arc<Caches>,
        metadata: Arc<dyn MetadataClient>,
        tracker: Arc<FailureTracker>,
    ) -> Self {
        Self {
            instance: instance.into(),
            allowed_fails,
            caches,
            metadata,
            tracker,
        }
    }

    /// Provisions every configured location, profiles first.
    pub async fn run(&self, section: &DeviceSection) -> Result<()> {
        if !section.profiles_dir.is_empty() {
            self.provision_profiles(&section.profiles_dir).await?;
        }
        if !section.devices_dir.is_empty() {
            self.provision_devices(&section.devices_dir).await?;
        }
        if !section.provision_watchers_dir.is_empty() {
            self.provision_watchers(&section.provision_watchers_dir).await?;
        }
        Ok(())
    }

    /// Returns the number of profiles added to metadata.
    pub async fn provision_profiles(&self, location: &str) -> Result<usize> {
        let mut added = 0;
        for doc in load_documents(location).await? {
            let profile: DeviceProfile = parse(&doc)?;
            if self.metadata.profile(&profile.name).await.is_ok() {
                debug!(profile = %profile.name, "Profile exists in metadata");
                self.caches.profiles.upsert(profile);
                continue;
            }
            self.metadata
                .add_profile(profile.clone())
                .await
                .map_err(|e| e.context(format!("failed to add profile from {}", doc.name)))?;
            info!(profile = %profile.name, file = %doc.name, "Profile provisioned");
            self.caches.profiles.upsert(profile);
            added += 1;
        }
        Ok(added)
    }

    /// Returns the number of devices added to metadata.
    pub async fn provision_devices(&self, location: &str) -> Result<usize> {
        let mut added = 0;
        for doc in load_documents(location).await? {
            let file: DeviceFile = parse(&doc)?;
            for mut device in file.into_devices() {
                if self.caches.devices.for_name(&device.name).is_some() {
                    debug!(device = %device.name, "Device already provisioned");
                    continue;
                }
                device.service_name = self.instance.clone();
                if !device.profile_name.is_empty()
                    && !self.caches.profiles.contains(&device.profile_name)
                {
                    let profile = self.metadata.profile(&device.profile_name).await.map_err(
                        |e| e.context(format!("profile of device {} is missing", device.name)),
                    )?;
                    self.caches.profiles.upsert(profile);
                }
                match self.metadata.add_device(device.clone()).await {
                    Ok(id) => device.id = id,
                    Err(e) if e.kind() == ErrorKind::DuplicateName => {
                        warn!(device = %device.name, "Device exists in metadata under another service");
                        continue;
                    }
                    Err(e) => return Err(e.context(format!("failed to add device {}", device.name))),
                }
                let name = device.name.clone();
                self.caches.devices.add(device)?;
                self.tracker.set(&name, self.allowed_fails);
                info!(device = %name, file = %doc.name, "Device provisioned");
                added += 1;
            }
        }
        Ok(added)
    }

    /// Returns the number of watchers added to metadata.
    pub async fn provision_watchers(&self, location: &str) -> Result<usize> {
        let mut added = 0;
        for doc in load_documents(location).await? {
            let mut watcher: ProvisionWatcher = parse(&doc)?;
            if self.caches.watchers.for_name(&watcher.name).is_some() {
                continue;
            }
            watcher.service_name = self.instance.clone();
            match self.metadata.add_watcher(watcher.clone()).await {
                Ok(()) => added += 1,
                Err(e) if e.kind() == ErrorKind::DuplicateName => {
                    debug!(watcher = %watcher.name, "Provision watcher exists in metadata");
                }
                Err(e) => {
                    return Err(e.context(format!("failed to add provision watcher {}", watcher.name)))
                }
            }
            info!(watcher = %watcher.name, file = %doc.name, "Provision watcher provisioned");
            self.caches.watchers.add(watcher)?;
        }
        Ok(added)
    }
}

fn is_supported(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.ends_with(".yaml") || lower.ends_with(".yml") || lower.ends_with(".json")
}

fn parse<T: DeserializeOwned>(doc: &Document) -> Result<T> {
    let parsed = if doc.name.to_ascii_lowercase().ends_with(".json") {
        serde_json::from_str(&doc.text).map_err(Error::from)
    } else {
        serde_yaml::from_str(&doc.text).map_err(Error::from)
    };
    parsed.map_err(|e| e.context(format!("failed to parse {}", doc.name)))
}

async fn load_documents(location: &str) -> Result<Vec<Document>> {
    if location.starts_with("http://") || location.starts_with("https://") {
        return load_remote(location).await;
    }
    let path = Path::new(location);
    let metadata = tokio::fs::metadata(path).await.map_err(|e| {
        Error::with_cause(
            ErrorKind::ContractInvalid,
            format!("cannot access provisioning location {location}"),
            e,
        )
    })?;
    if metadata.is_file() {
        let text = tokio::fs::read_to_string(path).await?;
        return Ok(vec![Document {
            name: location.to_string(),
            text,
        }]);
    }

    let mut names = Vec::new();
    let mut entries = tokio::fs::read_dir(path).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if entry.file_type().await?.is_file() && is_supported(&name) {
            names.push(name);
        }
    }
    names.sort();

    let mut docs = Vec::with_capacity(names.len());
    for name in names {
        let text = tokio::fs::read_to_string(path.join(&name)).await?;
        docs.push(Document { name, text });
    }
    Ok(docs)
}

#[cfg(feature = "http")]
async fn load_remote(index_url: &str) -> Result<Vec<Document>> {
    let client = reqwest::Client::new();
    let index: serde_json::Value = client
        .get(index_url)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    let names: Vec<String> = match index {
        serde_json::Value::Array(items) => items
            .into_iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        serde_json::Value::Object(map) => map
            .into_iter()
            .filter_map(|(_, v)| v.as_str().map(str::to_string))
            .collect(),
        _ => {
            return Err(Error::contract_invalid(format!(
                "index {index_url} must be a JSON array or object"
            )))
        }
    };

    let base = match index_url.rsplit_once('/') {
        Some((base, last)) if last.contains('.') => base,
        _ => index_url.trim_end_matches('/'),
    };
    let mut docs = Vec::with_capacity(names.len());
    for name in names.into_iter().filter(|n| is_supported(n)) {
        let url = format!("{base}/{name}");
        let text = client.get(&url).send().await?.error_for_status()?.text().await?;
        docs.push(Document { name, text });
    }
    Ok(docs)
}

#[cfg(not(feature = "http"))]
async fn load_remote(index_url: &str) -> Result<Vec<Document>> {
    Err(Error::not_implemented(format!(
        "cannot fetch {index_url}: built without the http feature"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::InMemoryMetadata;

    const PROFILE: &str = r#"
name: p1
deviceResources:
  - name: temp
    properties:
      valueType: Float32
      readWrite: R
"#;

    const DEVICES: &str = r#"
deviceList:
  - name: d1
    profileName: p1
    autoEvents:
      - interval: 1s
        sourceName: temp
  - name: d2
    profileName: p1
"#;

    const WATCHER: &str = r#"{
  "name": "w1",
  "identifiers": { "Address": "^simple.*" },
  "discoveredDevice": { "profileName": "p1" }
}"#;

    fn provisioner(metadata: Arc<InMemoryMetadata>) -> (Provisioner, Arc<Caches>, Arc<FailureTracker>) {
        let caches = Arc::new(Caches::default());
        let tracker = Arc::new(FailureTracker::new());
        let p = Provisioner::new("device-simple", 3, caches.clone(), metadata, tracker.clone());
        (p, caches, tracker)
    }

    #[tokio::test]
    async fn test_provision_from_directories() {
        let dir = tempfile::tempdir().unwrap();
        let profiles = dir.path().join("profiles");
        let devices = dir.path().join("devices");
        let watchers = dir.path().join("watchers");
        for d in [&profiles, &devices, &watchers] {
            std::fs::create_dir(d).unwrap();
        }
        std::fs::write(profiles.join("p1.yaml"), PROFILE).unwrap();
        std::fs::write(profiles.join("README.md"), "ignored").unwrap();
        std::fs::write(devices.join("devices.yml"), DEVICES).unwrap();
        std::fs::write(watchers.join("w1.json"), WATCHER).unwrap();

        let metadata = Arc::new(InMemoryMetadata::new());
        let (p, caches, tracker) = provisioner(metadata.clone());
        let section = DeviceSection {
            profiles_dir: profiles.to_string_lossy().into_owned(),
            devices_dir: devices.to_string_lossy().into_owned(),
            provision_watchers_dir: watchers.to_string_lossy().into_owned(),
            ..Default::default()
        };
        p.run(&section).await.unwrap();

        assert!(caches.profiles.contains("p1"));
        let d1 = caches.devices.for_name("d1").unwrap();
        assert_eq!(d1.service_name, "device-simple");
        assert!(!d1.id.is_empty());
        assert_eq!(d1.auto_events.len(), 1);
        assert!(caches.devices.for_name("d2").is_some());
        assert_eq!(tracker.value("d1"), 3);
        assert_eq!(metadata.submitted_devices().len(), 2);
        assert_eq!(caches.watchers.for_name("w1").unwrap().service_name, "device-simple");

        // A second run finds everything in place.
        p.run(&section).await.unwrap();
        assert_eq!(metadata.submitted_devices().len(), 2);
    }

    #[tokio::test]
    async fn test_single_file_location() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("p1.yaml");
        std::fs::write(&file, PROFILE).unwrap();

        let metadata = Arc::new(InMemoryMetadata::new());
        let (p, caches, _) = provisioner(metadata);
        assert_eq!(p.provision_profiles(&file.to_string_lossy()).await.unwrap(), 1);
        assert!(caches.profiles.device_resource("p1", "temp").is_some());
    }

    #[tokio::test]
    async fn test_invalid_document_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.yaml"), "name: [unclosed").unwrap();

        let metadata = Arc::new(InMemoryMetadata::new());
        let (p, _, _) = provisioner(metadata);
        let err = p
            .provision_profiles(&dir.path().to_string_lossy())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ContractInvalid);
    }

    #[tokio::test]
    async fn test_missing_location() {
        let metadata = Arc::new(InMemoryMetadata::new());
        let (p, _, _) = provisioner(metadata);
        let err = p.provision_profiles("/does/not/exist").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ContractInvalid);
    }
}
