//! Platform Bluetooth client seam
//!
//! [`PlatformBluetoothClient`] is the only surface of the host Bluetooth stack
//! the navigator talks to. Keys handed to it are always canonical. Values move
//! as wide cells; see [`crate::domain::value`].
//!
//! Asynchronous callbacks come back the other way through a single
//! [`PlatformBridge`], attached once per navigator.

use crate::domain::error::PlatformError;
use crate::domain::identifier::CanonicalId;
use crate::domain::models::{DeviceHandle, PlatformDevice, PlatformEvent};
use crate::domain::value::WideCell;
use async_trait::async_trait;
use std::fmt;
use std::sync::{Arc, Weak};

pub type PlatformResult<T> = std::result::Result<T, PlatformError>;

/// Client-facing surface of the host Bluetooth stack
#[async_trait]
pub trait PlatformBluetoothClient: Send + Sync {
    /// Register the callback bridge. Called once, before any other operation.
    async fn attach_bridge(&self, bridge: PlatformBridge) -> PlatformResult<()>;

    /// Run the device chooser with a serialized selection query
    async fn request_device(&self, query: &serde_json::Value) -> PlatformResult<PlatformDevice>;

    async fn read_characteristic(
        &self,
        device: &DeviceHandle,
        service: &CanonicalId,
        characteristic: &CanonicalId,
    ) -> PlatformResult<Vec<WideCell>>;

    async fn write_characteristic(
        &self,
        device: &DeviceHandle,
        service: &CanonicalId,
        characteristic: &CanonicalId,
        value: &[WideCell],
    ) -> PlatformResult<()>;

    /// Start value-change notifications, delivered through the bridge
    async fn subscribe(
        &self,
        device: &DeviceHandle,
        service: &CanonicalId,
        characteristic: &CanonicalId,
    ) -> PlatformResult<()>;

    async fn unsubscribe(
        &self,
        device: &DeviceHandle,
        service: &CanonicalId,
        characteristic: &CanonicalId,
    ) -> PlatformResult<()>;

    async fn disconnect(&self, device: &DeviceHandle) -> PlatformResult<()>;
}

/// Receiver side of the bridge
pub trait PlatformEventSink: Send + Sync {
    fn deliver(&self, event: PlatformEvent);
}

/// Callback handle given to the platform
///
/// Holds the navigator weakly: the platform may keep it for the process
/// lifetime, and events arriving after the navigator is gone are dropped.
#[derive(Clone)]
pub struct PlatformBridge {
    sink: Weak<dyn PlatformEventSink>,
}

impl PlatformBridge {
    pub fn new<S: PlatformEventSink + 'static>(sink: &Arc<S>) -> Self {
        let sink: Arc<dyn PlatformEventSink> = sink.clone();
        Self {
            sink: Arc::downgrade(&sink),
        }
    }

    pub fn deliver(&self, event: PlatformEvent) {
        match self.sink.upgrade() {
            Some(sink) => sink.deliver(event),
            None => tracing::trace!("Bridge target dropped, discarding {:?}", event),
        }
    }

    /// A subscribed characteristic changed
    pub fn value_changed(
        &self,
        device: &str,
        service: &str,
        characteristic: &str,
        value: &[WideCell],
    ) {
        self.deliver(PlatformEvent::ValueChanged {
            device: device.to_string(),
            service: service.to_string(),
            characteristic: characteristic.to_string(),
            value: value.to_vec(),
        });
    }

    /// The platform lost (or closed) the connection to a device
    pub fn device_disconnected(&self, device: &str) {
        self.deliver(PlatformEvent::Disconnected {
            device: device.to_string(),
        });
    }
}

impl fmt::Debug for PlatformBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlatformBridge")
            .field("attached", &(self.sink.strong_count() > 0))
            .finish()
    }
}
