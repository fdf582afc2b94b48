//! In-memory platform for tests
//!
//! Records every call, answers from scripted responses, and exposes the
//! attached bridge so tests can inject notifications and disconnects.

use crate::domain::error::PlatformError;
use crate::domain::identifier::CanonicalId;
use crate::domain::models::{DeviceHandle, PlatformDevice};
use crate::domain::value::WideCell;
use crate::infrastructure::bluetooth::platform::{
    PlatformBluetoothClient, PlatformBridge, PlatformResult,
};
use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, OnceLock};
use tokio::sync::Notify;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformCall {
    AttachBridge,
    RequestDevice(serde_json::Value),
    Read {
        device: String,
        service: String,
        characteristic: String,
    },
    Write {
        device: String,
        service: String,
        characteristic: String,
        value: Vec<WideCell>,
    },
    Subscribe {
        device: String,
        service: String,
        characteristic: String,
    },
    Unsubscribe {
        device: String,
        service: String,
        characteristic: String,
    },
    Disconnect(String),
}

/// Scripted answer for a read
pub enum ReadResponse {
    Value(Vec<WideCell>),
    Fail(PlatformError),
    /// Never resolves
    Hang,
}

#[derive(Default)]
pub struct RecordingPlatform {
    calls: Mutex<Vec<PlatformCall>>,
    bridge: OnceLock<PlatformBridge>,
    devices: Mutex<VecDeque<PlatformResult<PlatformDevice>>>,
    reads: Mutex<VecDeque<ReadResponse>>,
    write_error: Mutex<Option<PlatformError>>,
    subscribe_error: Mutex<Option<PlatformError>>,
    unsubscribe_error: Mutex<Option<PlatformError>>,
    disconnect_error: Mutex<Option<PlatformError>>,
    /// Devices whose subscribe never resolves
    hung_subscribes: Mutex<HashSet<String>>,
    /// Signalled when a read reaches the platform
    pub read_started: Notify,
    /// Signalled when a subscribe reaches the platform
    pub subscribe_started: Notify,
}

impl RecordingPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Platform whose chooser returns one device
    pub fn with_device(id: &str, name: Option<&str>) -> Self {
        let platform = Self::new();
        platform.push_device(Ok(PlatformDevice {
            id: id.to_string(),
            name: name.map(str::to_string),
        }));
        platform
    }

    pub fn push_device(&self, device: PlatformResult<PlatformDevice>) {
        self.devices.lock().unwrap().push_back(device);
    }

    pub fn push_read(&self, response: ReadResponse) {
        self.reads.lock().unwrap().push_back(response);
    }

    pub fn fail_writes(&self, err: PlatformError) {
        *self.write_error.lock().unwrap() = Some(err);
    }

    pub fn fail_subscribes(&self, err: PlatformError) {
        *self.subscribe_error.lock().unwrap() = Some(err);
    }

    pub fn fail_unsubscribes(&self, err: PlatformError) {
        *self.unsubscribe_error.lock().unwrap() = Some(err);
    }

    /// Every later subscribe for this device hangs
    pub fn hang_subscribes(&self, device: &str) {
        self.hung_subscribes.lock().unwrap().insert(device.to_string());
    }

    pub fn fail_disconnects(&self, err: PlatformError) {
        *self.disconnect_error.lock().unwrap() = Some(err);
    }

    pub fn calls(&self) -> Vec<PlatformCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&PlatformCall) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| pred(c)).count()
    }

    /// The bridge the navigator attached
    pub fn bridge(&self) -> &PlatformBridge {
        self.bridge.get().expect("bridge not attached")
    }

    fn record(&self, call: PlatformCall) {
        self.calls.lock().unwrap().push(call);
    }
}

fn keys(
    device: &DeviceHandle,
    service: &CanonicalId,
    characteristic: &CanonicalId,
) -> (String, String, String) {
    (
        device.to_string(),
        service.to_string(),
        characteristic.to_string(),
    )
}

#[async_trait]
impl PlatformBluetoothClient for RecordingPlatform {
    async fn attach_bridge(&self, bridge: PlatformBridge) -> PlatformResult<()> {
        self.record(PlatformCall::AttachBridge);
        self.bridge
            .set(bridge)
            .map_err(|_| PlatformError::Failed("bridge attached twice".into()))
    }

    async fn request_device(&self, query: &serde_json::Value) -> PlatformResult<PlatformDevice> {
        self.record(PlatformCall::RequestDevice(query.clone()));
        self.devices
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(PlatformError::NoMatchingDevice))
    }

    async fn read_characteristic(
        &self,
        device: &DeviceHandle,
        service: &CanonicalId,
        characteristic: &CanonicalId,
    ) -> PlatformResult<Vec<WideCell>> {
        let (device, service, characteristic) = keys(device, service, characteristic);
        self.record(PlatformCall::Read {
            device,
            service,
            characteristic,
        });
        let response = self.reads.lock().unwrap().pop_front();
        self.read_started.notify_one();
        match response {
            Some(ReadResponse::Value(value)) => Ok(value),
            Some(ReadResponse::Fail(err)) => Err(err),
            Some(ReadResponse::Hang) => std::future::pending().await,
            None => Ok(Vec::new()),
        }
    }

    async fn write_characteristic(
        &self,
        device: &DeviceHandle,
        service: &CanonicalId,
        characteristic: &CanonicalId,
        value: &[WideCell],
    ) -> PlatformResult<()> {
        let (device, service, characteristic) = keys(device, service, characteristic);
        self.record(PlatformCall::Write {
            device,
            service,
            characteristic,
            value: value.to_vec(),
        });
        match self.write_error.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn subscribe(
        &self,
        device: &DeviceHandle,
        service: &CanonicalId,
        characteristic: &CanonicalId,
    ) -> PlatformResult<()> {
        let (device, service, characteristic) = keys(device, service, characteristic);
        let hang = self.hung_subscribes.lock().unwrap().contains(&device);
        self.record(PlatformCall::Subscribe {
            device,
            service,
            characteristic,
        });
        self.subscribe_started.notify_one();
        if hang {
            return std::future::pending().await;
        }
        match self.subscribe_error.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn unsubscribe(
        &self,
        device: &DeviceHandle,
        service: &CanonicalId,
        characteristic: &CanonicalId,
    ) -> PlatformResult<()> {
        let (device, service, characteristic) = keys(device, service, characteristic);
        self.record(PlatformCall::Unsubscribe {
            device,
            service,
            characteristic,
        });
        match self.unsubscribe_error.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn disconnect(&self, device: &DeviceHandle) -> PlatformResult<()> {
        self.record(PlatformCall::Disconnect(device.to_string()));
        match self.disconnect_error.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
