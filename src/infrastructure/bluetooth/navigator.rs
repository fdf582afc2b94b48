//! Bluetooth Navigator
//!
//! Public entry point of the facade. Owns the session registry and the
//! notification router, and drives the platform client on behalf of the
//! application.

use crate::domain::error::{BluetoothError, PlatformError, Result};
use crate::domain::identifier::{normalize, CanonicalId, GattId};
use crate::domain::models::{
    CharacteristicValueChanged, Device, DeviceHandle, NavigatorEvent, NotifyKey, PlatformEvent,
};
use crate::domain::query::RequestDeviceQuery;
use crate::domain::settings::BluetoothSettings;
use crate::domain::value::{self, WideCell};
use crate::infrastructure::bluetooth::platform::{
    PlatformBluetoothClient, PlatformBridge, PlatformEventSink,
};
use crate::infrastructure::bluetooth::router::{NotificationRouter, SubscriptionId};
use crate::infrastructure::bluetooth::session::{
    gatt_error, selection_error, DeviceSession, DisconnectGuard, Operation,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, OnceCell, OwnedMutexGuard};
use tracing::{debug, info, trace, warn};

/// Configuration for navigator behavior
#[derive(Debug, Clone)]
pub struct NavigatorConfig {
    /// Tear down the platform subscription when its last subscriber leaves
    pub unsubscribe_when_idle: bool,
}

impl Default for NavigatorConfig {
    fn default() -> Self {
        Self {
            unsubscribe_when_idle: true,
        }
    }
}

impl From<&BluetoothSettings> for NavigatorConfig {
    fn from(settings: &BluetoothSettings) -> Self {
        Self {
            unsubscribe_when_idle: settings.unsubscribe_when_idle,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State shared with the platform bridge
///
/// Lock order is `sessions` before `router`. Neither lock is held across an
/// await or while subscriber callbacks run.
struct NavigatorState {
    sessions: Mutex<HashMap<DeviceHandle, DeviceSession>>,
    router: Mutex<NotificationRouter>,
    event_sender: mpsc::UnboundedSender<NavigatorEvent>,
}

impl NavigatorState {
    fn guard(&self, device: &DeviceHandle) -> Result<DisconnectGuard> {
        lock(&self.sessions)
            .get(device)
            .map(DeviceSession::guard)
            .ok_or_else(|| BluetoothError::DeviceNotConnected(device.clone()))
    }

    /// Destroy a session. Returns false if the device had none.
    fn handle_disconnect(&self, device: &DeviceHandle) -> bool {
        let dropped = {
            let mut sessions = lock(&self.sessions);
            let Some(session) = sessions.remove(device) else {
                debug!("Disconnect for unknown device {}, ignoring", device);
                return false;
            };
            session.close();
            lock(&self.router).clear_device(device)
        };

        info!(
            "Device {} disconnected, dropped {} notification routes",
            device,
            dropped.len()
        );
        let _ = self
            .event_sender
            .send(NavigatorEvent::DeviceDisconnected(device.clone()));
        true
    }

    fn handle_value_changed(
        &self,
        device: String,
        service: &str,
        characteristic: &str,
        cells: &[WideCell],
    ) {
        let (service, characteristic) =
            match (CanonicalId::parse(service), CanonicalId::parse(characteristic)) {
                (Ok(s), Ok(c)) => (s, c),
                (Err(e), _) | (_, Err(e)) => {
                    warn!("Dropping notification with unroutable identifier: {}", e);
                    return;
                }
            };
        let key = NotifyKey {
            device: DeviceHandle::new(device),
            service,
            characteristic,
        };

        let callbacks = lock(&self.router).callbacks(&key);
        if callbacks.is_empty() {
            trace!("No subscribers for {}, dropping notification", key);
            return;
        }

        let event = CharacteristicValueChanged {
            device: key.device,
            service: key.service,
            characteristic: key.characteristic,
            value: value::decode(cells),
        };
        trace!(
            "Dispatching {} bytes to {} subscribers",
            event.value.len(),
            callbacks.len()
        );
        for callback in &callbacks {
            callback(&event);
        }
        let _ = self
            .event_sender
            .send(NavigatorEvent::CharacteristicValueChanged(event));
    }
}

impl PlatformEventSink for NavigatorState {
    fn deliver(&self, event: PlatformEvent) {
        match event {
            PlatformEvent::ValueChanged {
                device,
                service,
                characteristic,
                value,
            } => self.handle_value_changed(device, &service, &characteristic, &value),
            PlatformEvent::Disconnected { device } => {
                self.handle_disconnect(&DeviceHandle::new(device));
            }
        }
    }
}

/// Serializes platform subscribe/unsubscribe per notification key
///
/// Calls for different keys never wait on each other. An entry lives only
/// while some caller holds or waits for it.
#[derive(Default)]
struct SetupLocks {
    locks: Mutex<HashMap<NotifyKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl SetupLocks {
    async fn acquire(&self, key: &NotifyKey) -> SetupGuard<'_> {
        let mutex = lock(&self.locks).entry(key.clone()).or_default().clone();
        let guard = mutex.lock_owned().await;
        SetupGuard {
            locks: self,
            key: key.clone(),
            guard: Some(guard),
        }
    }
}

struct SetupGuard<'a> {
    locks: &'a SetupLocks,
    key: NotifyKey,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for SetupGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = lock(&self.locks.locks);
        if locks
            .get(&self.key)
            .is_some_and(|mutex| Arc::strong_count(mutex) == 1)
        {
            locks.remove(&self.key);
        }
    }
}

/// Facade over a platform BLE GATT client
pub struct BluetoothNavigator {
    platform: Arc<dyn PlatformBluetoothClient>,
    state: Arc<NavigatorState>,
    bridge_attached: OnceCell<()>,
    notify_setup: SetupLocks,
    config: NavigatorConfig,
}

impl BluetoothNavigator {
    /// Create a navigator; application events go to `event_sender`
    pub fn new(
        platform: Arc<dyn PlatformBluetoothClient>,
        event_sender: mpsc::UnboundedSender<NavigatorEvent>,
        config: NavigatorConfig,
    ) -> Self {
        Self {
            platform,
            state: Arc::new(NavigatorState {
                sessions: Mutex::new(HashMap::new()),
                router: Mutex::new(NotificationRouter::new()),
                event_sender,
            }),
            bridge_attached: OnceCell::new(),
            notify_setup: SetupLocks::default(),
            config,
        }
    }

    async fn ensure_bridge(&self) -> std::result::Result<(), PlatformError> {
        self.bridge_attached
            .get_or_try_init(|| async {
                debug!("Attaching platform bridge");
                self.platform
                    .attach_bridge(PlatformBridge::new(&self.state))
                    .await
            })
            .await?;
        Ok(())
    }

    /// Select a device through the platform chooser
    pub async fn request_device(&self, query: &RequestDeviceQuery) -> Result<Device> {
        let request = query.to_platform_json()?;
        self.ensure_bridge().await.map_err(selection_error)?;

        debug!("Requesting device: {}", request);
        let device = Device::from(
            self.platform
                .request_device(&request)
                .await
                .map_err(selection_error)?,
        );

        let mut sessions = lock(&self.state.sessions);
        if sessions.contains_key(&device.handle) {
            debug!("Device {} already has a session", device.handle);
        } else {
            info!(
                "Device selected: {} ({})",
                device.handle,
                device.name.as_deref().unwrap_or("unnamed")
            );
            sessions.insert(
                device.handle.clone(),
                DeviceSession::new(device.handle.clone(), device.name.clone()),
            );
        }
        Ok(device)
    }

    /// Read a characteristic value
    pub async fn read_value(
        &self,
        device: impl Into<DeviceHandle>,
        service: impl Into<GattId>,
        characteristic: impl Into<GattId>,
    ) -> Result<Vec<u8>> {
        let device = device.into();
        let service = normalize(service)?;
        let characteristic = normalize(characteristic)?;
        let guard = self.state.guard(&device)?;

        debug!("Reading {}/{}/{}", device, service, characteristic);
        let cells = guard
            .run(
                self.platform
                    .read_characteristic(&device, &service, &characteristic),
            )
            .await
            .map_err(|e| gatt_error(e, &device, Operation::Read, &service, &characteristic))?;
        Ok(value::decode(&cells))
    }

    /// Write a characteristic value
    pub async fn write_value(
        &self,
        device: impl Into<DeviceHandle>,
        service: impl Into<GattId>,
        characteristic: impl Into<GattId>,
        value: &[u8],
    ) -> Result<()> {
        let device = device.into();
        let service = normalize(service)?;
        let characteristic = normalize(characteristic)?;
        let guard = self.state.guard(&device)?;

        debug!(
            "Writing {} bytes to {}/{}/{}",
            value.len(),
            device,
            service,
            characteristic
        );
        let cells = value::encode(value);
        guard
            .run(
                self.platform
                    .write_characteristic(&device, &service, &characteristic, &cells),
            )
            .await
            .map_err(|e| {
                let op = Operation::Write { len: value.len() };
                gatt_error(e, &device, op, &service, &characteristic)
            })
    }

    /// Subscribe to value changes of a characteristic
    ///
    /// The platform subscription is installed on the first call for a key;
    /// later calls only add another subscriber. Subscribers of one key are
    /// called in registration order.
    pub async fn setup_notify<F>(
        &self,
        device: impl Into<DeviceHandle>,
        service: impl Into<GattId>,
        characteristic: impl Into<GattId>,
        callback: F,
    ) -> Result<SubscriptionId>
    where
        F: Fn(&CharacteristicValueChanged) + Send + Sync + 'static,
    {
        let device = device.into();
        let service = normalize(service)?;
        let characteristic = normalize(characteristic)?;

        let key = NotifyKey {
            device: device.clone(),
            service: service.clone(),
            characteristic: characteristic.clone(),
        };
        let _setup = self.notify_setup.acquire(&key).await;
        let guard = self.state.guard(&device)?;

        let installed = lock(&self.state.router).is_subscribed(&key);
        if !installed {
            debug!("Installing platform subscription for {}", key);
            guard
                .run(self.platform.subscribe(&device, &service, &characteristic))
                .await
                .map_err(|e| {
                    gatt_error(e, &device, Operation::Subscribe, &service, &characteristic)
                })?;
        }

        let sessions = lock(&self.state.sessions);
        // The device may have dropped while the platform call was in flight
        if !sessions.contains_key(&device) {
            return Err(BluetoothError::DeviceNotConnected(device));
        }
        let id = lock(&self.state.router).add(key, Arc::new(callback));
        debug!("Subscriber {} added for {}/{}", id, service, characteristic);
        Ok(id)
    }

    /// Remove one subscriber
    ///
    /// Returns false if the subscription no longer exists, which is the case
    /// after its device disconnected. Once this returns true the callback is
    /// never called again, even if tearing down the platform subscription
    /// failed; the key then stays subscribed with no subscribers.
    pub async fn stop_notify(&self, id: SubscriptionId) -> Result<bool> {
        let key = lock(&self.state.router).key_of(id);
        let Some(key) = key else {
            return Ok(false);
        };
        let _setup = self.notify_setup.acquire(&key).await;
        let removed = lock(&self.state.router).remove(id);
        let Some((key, idle)) = removed else {
            return Ok(false);
        };
        debug!("Subscriber {} removed from {}", id, key);

        if !idle || !self.config.unsubscribe_when_idle {
            return Ok(true);
        }

        // A disconnect already cleared every route of the device
        let Ok(guard) = self.state.guard(&key.device) else {
            return Ok(true);
        };
        debug!("Removing platform subscription for {}", key);
        let result = guard
            .run(
                self.platform
                    .unsubscribe(&key.device, &key.service, &key.characteristic),
            )
            .await;
        match result {
            Ok(()) => {
                lock(&self.state.router).unroute(&key);
            }
            Err(e) => {
                let err = gatt_error(
                    e,
                    &key.device,
                    Operation::Unsubscribe,
                    &key.service,
                    &key.characteristic,
                );
                warn!("Platform unsubscribe for {} failed, route kept: {}", key, err);
            }
        }
        Ok(true)
    }

    /// Disconnect a device and drop its subscriptions
    ///
    /// Disconnecting a device without a session does nothing.
    pub async fn disconnect(&self, device: impl Into<DeviceHandle>) -> Result<()> {
        let device = device.into();
        if !self.is_connected(&device) {
            debug!("Device {} has no session, nothing to disconnect", device);
            return Ok(());
        }

        info!("Disconnecting device {}", device);
        match self.platform.disconnect(&device).await {
            Ok(()) | Err(PlatformError::NotConnected) => {
                self.state.handle_disconnect(&device);
                Ok(())
            }
            Err(err) => Err(BluetoothError::DisconnectFailed(err.to_string())),
        }
    }

    pub fn is_connected(&self, device: &DeviceHandle) -> bool {
        lock(&self.state.sessions).contains_key(device)
    }

    pub fn connected_devices(&self) -> Vec<DeviceHandle> {
        let mut devices: Vec<DeviceHandle> = lock(&self.state.sessions).keys().cloned().collect();
        devices.sort();
        devices
    }

    /// Subscribed keys of a device
    pub fn subscriptions(&self, device: &DeviceHandle) -> Vec<NotifyKey> {
        lock(&self.state.router).keys_for(device)
    }

    /// Advertised name reported at selection time
    pub fn device_name(&self, device: &DeviceHandle) -> Option<String> {
        lock(&self.state.sessions)
            .get(device)
            .and_then(|session| session.name().map(str::to_string))
    }
}
