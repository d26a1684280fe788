//! Core types for EdgeLink device services.
//!
//! This crate holds what every other EdgeLink crate shares: the metadata
//! entities, typed values, the unified error, configuration, logging
//! bootstrap and the message-bus abstraction.

pub mod config;
pub mod error;
pub mod logging;
pub mod messaging;
pub mod models;
pub mod value;

/// API version stamped on every envelope and DTO.
pub const API_VERSION: &str = "v3";

pub use config::ServiceConfig;
pub use error::{Error, ErrorKind, Result};
pub use messaging::{MessageBus, MessageEnvelope, Subscription};
pub use value::{CommandValue, Value, ValueType};

/// Re-exports commonly used types.
pub mod prelude {
    pub use crate::config::ServiceConfig;
    pub use crate::error::{Error, ErrorKind, Result};
    pub use crate::messaging::{MessageBus, MessageEnvelope, Topics};
    pub use crate::models::{
        AdminState, AutoEvent, Device, DeviceCommand, DeviceProfile, DeviceResource, Event,
        OperatingState, ProvisionWatcher, ReadWrite, Reading, ResourceOperation,
    };
    pub use crate::value::{CommandValue, Value, ValueType};
}
