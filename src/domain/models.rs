use crate::domain::identifier::CanonicalId;
use crate::domain::value::WideCell;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque device identifier assigned by the platform at selection time
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceHandle(String);

impl DeviceHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceHandle {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for DeviceHandle {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&DeviceHandle> for DeviceHandle {
    fn from(handle: &DeviceHandle) -> Self {
        handle.clone()
    }
}

/// What the platform chooser hands back
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformDevice {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// A selected device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    pub handle: DeviceHandle,
    pub name: Option<String>,
}

impl From<PlatformDevice> for Device {
    fn from(device: PlatformDevice) -> Self {
        Self {
            handle: DeviceHandle(device.id),
            name: device.name,
        }
    }
}

/// Routing key of a notification subscription
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NotifyKey {
    pub device: DeviceHandle,
    pub service: CanonicalId,
    pub characteristic: CanonicalId,
}

impl fmt::Display for NotifyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.device, self.service, self.characteristic)
    }
}

/// A decoded characteristic value change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicValueChanged {
    pub device: DeviceHandle,
    pub service: CanonicalId,
    pub characteristic: CanonicalId,
    pub value: Vec<u8>,
}

/// Events delivered to the application
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigatorEvent {
    DeviceDisconnected(DeviceHandle),
    CharacteristicValueChanged(CharacteristicValueChanged),
}

/// Raw callbacks delivered by the platform through the bridge
///
/// Identifiers are still in whatever form the platform used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformEvent {
    ValueChanged {
        device: String,
        service: String,
        characteristic: String,
        value: Vec<WideCell>,
    },
    Disconnected {
        device: String,
    },
}
