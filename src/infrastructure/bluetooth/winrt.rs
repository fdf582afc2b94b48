//! WinRT Platform Backend
//!
//! Implements [`PlatformBluetoothClient`] on top of `Windows.Devices.Bluetooth`.
//! The chooser is an active advertisement scan that takes the first
//! advertiser matching the selection query. Device handles are the 48-bit
//! Bluetooth address in hex.

use crate::domain::error::PlatformError;
use crate::domain::identifier::CanonicalId;
use crate::domain::models::{DeviceHandle, PlatformDevice};
use crate::domain::query::PlatformQuery;
use crate::domain::value::{self, WideCell};
use crate::infrastructure::bluetooth::platform::{
    PlatformBluetoothClient, PlatformBridge, PlatformResult,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;
use windows::core::GUID;
use windows::Devices::Bluetooth::Advertisement::{
    BluetoothLEAdvertisementReceivedEventArgs, BluetoothLEAdvertisementWatcher,
    BluetoothLEScanningMode,
};
use windows::Devices::Bluetooth::GenericAttributeProfile::{
    GattCharacteristic, GattCharacteristicProperties,
    GattClientCharacteristicConfigurationDescriptorValue, GattCommunicationStatus,
    GattValueChangedEventArgs,
};
use windows::Devices::Bluetooth::{BluetoothCacheMode, BluetoothConnectionStatus, BluetoothLEDevice};
use windows::Foundation::{IReference, TypedEventHandler};
use windows::Storage::Streams::{DataReader, DataWriter, IBuffer};

/// HRESULT_FROM_WIN32(ERROR_CANCELLED), raised when a consent dialog is dismissed
const HRESULT_CANCELLED: i32 = 0x800704C7_u32 as i32;
const HRESULT_ACCESS_DENIED: i32 = 0x80070005_u32 as i32;

/// ATT error code: Invalid Attribute Value Length
const ATT_INVALID_ATTRIBUTE_VALUE_LENGTH: u8 = 0x0D;

impl From<windows::core::Error> for PlatformError {
    fn from(err: windows::core::Error) -> Self {
        match err.code().0 {
            HRESULT_CANCELLED => PlatformError::Cancelled,
            HRESULT_ACCESS_DENIED => PlatformError::PermissionDenied,
            _ => PlatformError::Failed(err.message().to_string()),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn guid(id: &CanonicalId) -> GUID {
    GUID::from_u128(id.to_uuid().as_u128())
}

fn canonical(guid: GUID) -> CanonicalId {
    CanonicalId::from(Uuid::from_u128(guid.to_u128()))
}

fn address(handle: &DeviceHandle) -> PlatformResult<u64> {
    u64::from_str_radix(handle.as_str(), 16).map_err(|_| PlatformError::NotConnected)
}

/// ATT error code carried by a GATT result, if any
fn att_error(code: windows::core::Result<IReference<u8>>) -> Option<u8> {
    code.and_then(|code| code.Value()).ok()
}

/// Map a GATT status (plus ATT protocol error, if any) onto a failure class
fn check_status(status: GattCommunicationStatus, protocol_error: Option<u8>) -> PlatformResult<()> {
    match status {
        GattCommunicationStatus::Success => Ok(()),
        GattCommunicationStatus::Unreachable => Err(PlatformError::NotConnected),
        GattCommunicationStatus::AccessDenied => Err(PlatformError::PermissionDenied),
        GattCommunicationStatus::ProtocolError => {
            match protocol_error {
                Some(ATT_INVALID_ATTRIBUTE_VALUE_LENGTH) => Err(PlatformError::InvalidLength),
                Some(code) => Err(PlatformError::Failed(format!(
                    "ATT protocol error 0x{:02X}",
                    code
                ))),
                None => Err(PlatformError::Failed("ATT protocol error".to_string())),
            }
        }
        other => Err(PlatformError::Failed(format!(
            "GATT communication status {:?}",
            other
        ))),
    }
}

fn buffer_bytes(buffer: &IBuffer) -> windows::core::Result<Vec<u8>> {
    let reader = DataReader::FromBuffer(buffer)?;
    let mut bytes = vec![0u8; reader.UnconsumedBufferLength()? as usize];
    reader.ReadBytes(&mut bytes)?;
    Ok(bytes)
}

/// One advertisement seen during a chooser scan
struct Advertiser {
    address: u64,
    name: Option<String>,
    services: Vec<CanonicalId>,
}

/// Registered WinRT state that must be unhooked when dropped from a table
trait Release {
    fn release(self);
}

/// Insert, releasing whatever the key held before
fn replace<K: Eq + Hash, V: Release>(table: &mut HashMap<K, V>, key: K, value: V) {
    if let Some(previous) = table.insert(key, value) {
        previous.release();
    }
}

/// Remove and release an entry. The lock is not held while releasing.
fn evict<K: Eq + Hash, V: Release>(table: &Mutex<HashMap<K, V>>, key: &K) -> bool {
    let removed = lock(table).remove(key);
    match removed {
        Some(value) => {
            value.release();
            true
        }
        None => false,
    }
}

struct Subscription {
    characteristic: GattCharacteristic,
    token: i64,
}

impl Release for Subscription {
    fn release(self) {
        let _ = self.characteristic.RemoveValueChanged(self.token);
    }
}

struct Connection {
    device: BluetoothLEDevice,
    name: Option<String>,
    status_token: i64,
    subscriptions: HashMap<(CanonicalId, CanonicalId), Subscription>,
}

impl Release for Connection {
    fn release(self) {
        for (_, subscription) in self.subscriptions {
            subscription.release();
        }
        let _ = self.device.RemoveConnectionStatusChanged(self.status_token);
        let _ = self.device.Close();
    }
}

type Connections = Mutex<HashMap<DeviceHandle, Connection>>;

/// Windows Runtime Bluetooth LE backend
pub struct WinRtPlatform {
    scan_timeout: Duration,
    bridge: OnceLock<PlatformBridge>,
    connections: Arc<Connections>,
}

impl WinRtPlatform {
    pub fn new(scan_timeout: Duration) -> Self {
        Self {
            scan_timeout,
            bridge: OnceLock::new(),
            connections: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn bridge(&self) -> PlatformResult<&PlatformBridge> {
        self.bridge
            .get()
            .ok_or_else(|| PlatformError::Failed("platform bridge not attached".to_string()))
    }

    fn device(&self, handle: &DeviceHandle) -> PlatformResult<BluetoothLEDevice> {
        lock(&self.connections)
            .get(handle)
            .map(|connection| connection.device.clone())
            .ok_or(PlatformError::NotConnected)
    }

    /// Scan until an advertiser satisfies the query or the timeout expires
    async fn scan(&self, query: &PlatformQuery) -> PlatformResult<Advertiser> {
        let watcher = BluetoothLEAdvertisementWatcher::new()?;
        watcher.SetScanningMode(BluetoothLEScanningMode::Active)?;

        let (sender, mut receiver) = mpsc::unbounded_channel();
        let handler = TypedEventHandler::new(
            move |_: windows::core::Ref<BluetoothLEAdvertisementWatcher>,
                  args: windows::core::Ref<BluetoothLEAdvertisementReceivedEventArgs>| {
                if let Some(args) = args.as_ref() {
                    let adv = args.Advertisement()?;
                    let uuids = adv.ServiceUuids()?;
                    let mut services = Vec::with_capacity(uuids.Size()? as usize);
                    for i in 0..uuids.Size()? {
                        services.push(canonical(uuids.GetAt(i)?));
                    }
                    let name = adv.LocalName()?.to_string();
                    let _ = sender.send(Advertiser {
                        address: args.BluetoothAddress()?,
                        name: (!name.is_empty()).then_some(name),
                        services,
                    });
                }
                Ok(())
            },
        );
        let token = watcher.Received(&handler)?;

        info!("Scanning for matching advertisers ({:?})", self.scan_timeout);
        watcher.Start()?;

        let found = tokio::time::timeout(self.scan_timeout, async {
            while let Some(advertiser) = receiver.recv().await {
                if query.matches(advertiser.name.as_deref(), &advertiser.services) {
                    return Some(advertiser);
                }
            }
            None
        })
        .await;

        let _ = watcher.Stop();
        let _ = watcher.RemoveReceived(token);

        match found {
            Ok(Some(advertiser)) => Ok(advertiser),
            Ok(None) | Err(_) => {
                warn!("No advertiser matched within {:?}", self.scan_timeout);
                Err(PlatformError::NoMatchingDevice)
            }
        }
    }

    async fn characteristic(
        &self,
        handle: &DeviceHandle,
        service: &CanonicalId,
        characteristic: &CanonicalId,
    ) -> PlatformResult<GattCharacteristic> {
        let device = self.device(handle)?;

        let services_result = device.GetGattServicesForUuidAsync(guid(service))?.await?;
        check_status(services_result.Status()?, att_error(services_result.ProtocolError()))?;
        let services = services_result.Services()?;
        if services.Size()? == 0 {
            debug!("Service {} not found on {}", service, handle);
            return Err(PlatformError::NotFound);
        }
        let gatt_service = services.GetAt(0)?;

        let chars_result = gatt_service
            .GetCharacteristicsForUuidAsync(guid(characteristic))?
            .await?;
        check_status(chars_result.Status()?, att_error(chars_result.ProtocolError()))?;
        let characteristics = chars_result.Characteristics()?;
        if characteristics.Size()? == 0 {
            debug!("Characteristic {} not found in {}", characteristic, service);
            return Err(PlatformError::NotFound);
        }
        Ok(characteristics.GetAt(0)?)
    }

    /// Forget a device the remote side dropped, then tell the bridge
    ///
    /// The table is held weakly: the handler is owned by the device it
    /// watches, which the table itself owns.
    fn connection_status_handler(
        bridge: PlatformBridge,
        connections: Weak<Connections>,
        handle: DeviceHandle,
    ) -> TypedEventHandler<BluetoothLEDevice, windows::core::IInspectable> {
        TypedEventHandler::new(move |dev: windows::core::Ref<BluetoothLEDevice>, _| {
            if let Some(dev) = dev.as_ref() {
                if dev.ConnectionStatus()? == BluetoothConnectionStatus::Disconnected {
                    info!("Device {} reported disconnected", handle);
                    if let Some(connections) = connections.upgrade() {
                        evict(&connections, &handle);
                    }
                    bridge.device_disconnected(handle.as_str());
                }
            }
            Ok(())
        })
    }

    fn value_changed_handler(
        bridge: PlatformBridge,
        handle: DeviceHandle,
        service: CanonicalId,
        characteristic: CanonicalId,
    ) -> TypedEventHandler<GattCharacteristic, GattValueChangedEventArgs> {
        TypedEventHandler::new(
            move |_: windows::core::Ref<GattCharacteristic>,
                  args: windows::core::Ref<GattValueChangedEventArgs>| {
                if let Some(args) = args.as_ref() {
                    let bytes = buffer_bytes(&args.CharacteristicValue()?)?;
                    bridge.value_changed(
                        handle.as_str(),
                        service.as_str(),
                        characteristic.as_str(),
                        &value::encode(&bytes),
                    );
                }
                Ok(())
            },
        )
    }
}

#[async_trait]
impl PlatformBluetoothClient for WinRtPlatform {
    async fn attach_bridge(&self, bridge: PlatformBridge) -> PlatformResult<()> {
        self.bridge
            .set(bridge)
            .map_err(|_| PlatformError::Failed("platform bridge already attached".to_string()))
    }

    async fn request_device(&self, query: &serde_json::Value) -> PlatformResult<PlatformDevice> {
        let query: PlatformQuery = serde_json::from_value(query.clone())
            .map_err(|e| PlatformError::Failed(format!("Malformed device query: {}", e)))?;
        let bridge = self.bridge()?.clone();

        let advertiser = self.scan(&query).await?;
        let handle = DeviceHandle::new(format!("{:012X}", advertiser.address));

        if let Some(connection) = lock(&self.connections).get(&handle) {
            debug!("Reusing connection to {}", handle);
            return Ok(PlatformDevice {
                id: handle.to_string(),
                name: connection.name.clone(),
            });
        }

        info!("Connecting to Bluetooth device: {}", handle);
        let device = BluetoothLEDevice::FromBluetoothAddressAsync(advertiser.address)?.await?;
        let name = advertiser
            .name
            .or_else(|| device.Name().ok().map(|n| n.to_string()))
            .filter(|n| !n.is_empty());

        let handler = Self::connection_status_handler(
            bridge,
            Arc::downgrade(&self.connections),
            handle.clone(),
        );
        let status_token = device.ConnectionStatusChanged(&handler)?;

        replace(
            &mut lock(&self.connections),
            handle.clone(),
            Connection {
                device,
                name: name.clone(),
                status_token,
                subscriptions: HashMap::new(),
            },
        );
        Ok(PlatformDevice {
            id: handle.to_string(),
            name,
        })
    }

    async fn read_characteristic(
        &self,
        device: &DeviceHandle,
        service: &CanonicalId,
        characteristic: &CanonicalId,
    ) -> PlatformResult<Vec<WideCell>> {
        let gatt = self.characteristic(device, service, characteristic).await?;
        let result = gatt
            .ReadValueWithCacheModeAsync(BluetoothCacheMode::Uncached)?
            .await?;
        check_status(result.Status()?, att_error(result.ProtocolError()))?;
        let bytes = buffer_bytes(&result.Value()?)?;
        Ok(value::encode(&bytes))
    }

    async fn write_characteristic(
        &self,
        device: &DeviceHandle,
        service: &CanonicalId,
        characteristic: &CanonicalId,
        value: &[WideCell],
    ) -> PlatformResult<()> {
        let gatt = self.characteristic(device, service, characteristic).await?;
        let writer = DataWriter::new()?;
        writer.WriteBytes(&value::decode(value))?;
        let buffer = writer.DetachBuffer()?;

        let result = gatt.WriteValueWithResultAsync(&buffer)?.await?;
        check_status(result.Status()?, att_error(result.ProtocolError()))
    }

    async fn subscribe(
        &self,
        device: &DeviceHandle,
        service: &CanonicalId,
        characteristic: &CanonicalId,
    ) -> PlatformResult<()> {
        let bridge = self.bridge()?.clone();
        let gatt = self.characteristic(device, service, characteristic).await?;

        let properties = gatt.CharacteristicProperties()?;
        let descriptor = if properties.0 & GattCharacteristicProperties::Notify.0 != 0 {
            GattClientCharacteristicConfigurationDescriptorValue::Notify
        } else if properties.0 & GattCharacteristicProperties::Indicate.0 != 0 {
            GattClientCharacteristicConfigurationDescriptorValue::Indicate
        } else {
            return Err(PlatformError::Failed(format!(
                "Characteristic {} does not support notifications",
                characteristic
            )));
        };

        let handler = Self::value_changed_handler(
            bridge,
            device.clone(),
            service.clone(),
            characteristic.clone(),
        );
        let token = gatt.ValueChanged(&handler)?;

        let status = gatt
            .WriteClientCharacteristicConfigurationDescriptorAsync(descriptor)?
            .await;
        let status = match status {
            Ok(status) => check_status(status, None),
            Err(e) => Err(PlatformError::from(e)),
        };
        if let Err(err) = status {
            warn!("Enabling notifications on {} failed: {}", characteristic, err);
            let _ = gatt.RemoveValueChanged(token);
            return Err(err);
        }

        let mut connections = lock(&self.connections);
        let Some(connection) = connections.get_mut(device) else {
            let _ = gatt.RemoveValueChanged(token);
            return Err(PlatformError::NotConnected);
        };
        replace(
            &mut connection.subscriptions,
            (service.clone(), characteristic.clone()),
            Subscription {
                characteristic: gatt,
                token,
            },
        );
        info!("Notifications enabled for {}/{}", service, characteristic);
        Ok(())
    }

    async fn unsubscribe(
        &self,
        device: &DeviceHandle,
        service: &CanonicalId,
        characteristic: &CanonicalId,
    ) -> PlatformResult<()> {
        let subscription = lock(&self.connections)
            .get_mut(device)
            .ok_or(PlatformError::NotConnected)?
            .subscriptions
            .remove(&(service.clone(), characteristic.clone()));
        let Some(subscription) = subscription else {
            return Ok(());
        };

        let gatt = subscription.characteristic.clone();
        subscription.release();
        let status = gatt
            .WriteClientCharacteristicConfigurationDescriptorAsync(
                GattClientCharacteristicConfigurationDescriptorValue::None,
            )?
            .await?;
        check_status(status, None)?;
        info!("Notifications disabled for {}/{}", service, characteristic);
        Ok(())
    }

    async fn disconnect(&self, device: &DeviceHandle) -> PlatformResult<()> {
        address(device)?;
        if !evict(&self.connections, device) {
            return Err(PlatformError::NotConnected);
        }
        info!("Disconnected from device {}", device);
        Ok(())
    }
}

impl Drop for WinRtPlatform {
    fn drop(&mut self) {
        let connections: Vec<Connection> = lock(&self.connections)
            .drain()
            .map(|(_, connection)| connection)
            .collect();
        for connection in connections {
            connection.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guid_round_trip() {
        let id = CanonicalId::parse("180d").unwrap();
        let g = guid(&id);
        assert_eq!(g, GUID::from_u128(0x0000180d_0000_1000_8000_00805f9b34fb));
        assert_eq!(canonical(g), id);
    }

    #[test]
    fn test_status_mapping() {
        assert!(check_status(GattCommunicationStatus::Success, None).is_ok());
        assert_eq!(
            check_status(GattCommunicationStatus::Unreachable, None),
            Err(PlatformError::NotConnected)
        );
        assert_eq!(
            check_status(GattCommunicationStatus::AccessDenied, None),
            Err(PlatformError::PermissionDenied)
        );
        assert_eq!(
            check_status(GattCommunicationStatus::ProtocolError, Some(0x0D)),
            Err(PlatformError::InvalidLength)
        );
        assert!(matches!(
            check_status(GattCommunicationStatus::ProtocolError, Some(0x03)),
            Err(PlatformError::Failed(reason)) if reason.contains("0x03")
        ));
    }

    struct Hook {
        id: u32,
        released: Arc<Mutex<Vec<u32>>>,
    }

    impl Release for Hook {
        fn release(self) {
            self.released.lock().unwrap().push(self.id);
        }
    }

    fn hook(id: u32, released: &Arc<Mutex<Vec<u32>>>) -> Hook {
        Hook {
            id,
            released: released.clone(),
        }
    }

    #[test]
    fn test_replace_releases_previous_entry() {
        let released = Arc::new(Mutex::new(Vec::new()));
        let mut table = HashMap::new();

        replace(&mut table, "2a37", hook(1, &released));
        assert!(released.lock().unwrap().is_empty());

        // Subscribing the same key again must not leave the first handler hooked
        replace(&mut table, "2a37", hook(2, &released));
        assert_eq!(*released.lock().unwrap(), vec![1]);
        assert_eq!(table.len(), 1);
        assert_eq!(table["2a37"].id, 2);
    }

    #[test]
    fn test_evict_releases_and_forgets() {
        let released = Arc::new(Mutex::new(Vec::new()));
        let table = Mutex::new(HashMap::new());
        lock(&table).insert(DeviceHandle::new("001A7DDA7113"), hook(7, &released));

        assert!(evict(&table, &DeviceHandle::new("001A7DDA7113")));
        assert_eq!(*released.lock().unwrap(), vec![7]);
        assert!(lock(&table).is_empty());

        // A second drop report for the same device finds nothing
        assert!(!evict(&table, &DeviceHandle::new("001A7DDA7113")));
        assert_eq!(released.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_handle_is_hex_address() {
        assert_eq!(address(&DeviceHandle::new("001A7DDA7113")).unwrap(), 0x001A7DDA7113);
        assert_eq!(address(&DeviceHandle::new("dev-1")), Err(PlatformError::NotConnected));
    }
}
