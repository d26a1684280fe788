//! Metadata entities and the payloads built from them.

pub mod device;
pub mod event;
pub mod profile;
pub mod requests;
pub mod service;
pub mod system_event;
pub mod watcher;

pub use device::{AdminState, AutoEvent, Device, OperatingState, ProtocolProperties, Protocols};
pub use event::{now_nanos, AddEventRequest, Event, EventResponse, Reading};
pub use profile::{
    DeviceCommand, DeviceProfile, DeviceResource, ReadWrite, ResourceOperation,
    ResourceProperties,
};
pub use requests::{AddDeviceRequest, BaseResponse, ProfileScanRequest};
pub use service::DeviceServiceInfo;
pub use system_event::{SystemEvent, SystemEventAction, SystemEventType};
pub use watcher::{DiscoveredDeviceTemplate, ProvisionWatcher};
