//! BLE Navigator
//!
//! Asynchronous facade over a host Bluetooth LE GATT client: device selection
//! through a platform chooser, characteristic read/write, and value-change
//! notifications fanned out to any number of subscribers.
//!
//! Services and characteristics may be named by full UUID, short alias or
//! assigned name; see [`domain::identifier`].

pub mod domain;
pub mod infrastructure;

pub use domain::error::{BluetoothError, PlatformError, Result};
pub use domain::identifier::{normalize, CanonicalId, GattId};
pub use domain::models::{CharacteristicValueChanged, Device, DeviceHandle, NavigatorEvent};
pub use domain::query::{DeviceFilter, RequestDeviceQuery};
pub use infrastructure::bluetooth::{BluetoothNavigator, NavigatorConfig, SubscriptionId};
