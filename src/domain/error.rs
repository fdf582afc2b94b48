//! Error types for the Bluetooth facade
//!
//! [`BluetoothError`] is what application code sees. [`PlatformError`] is the
//! coarse failure class a platform backend reports; each navigator operation
//! maps it onto the error taxonomy of that operation.

use crate::domain::models::DeviceHandle;
use thiserror::Error;

/// Errors surfaced by [`BluetoothNavigator`](crate::BluetoothNavigator) operations
#[derive(Error, Debug)]
pub enum BluetoothError {
    // ===== Local validation =====
    /// Identifier could not be parsed as a UUID or a known alias
    #[error("Invalid GATT identifier {input:?}: {reason}")]
    InvalidIdentifier {
        /// The identifier as supplied by the caller
        input: String,
        /// Why it was rejected
        reason: String,
    },

    /// Device query could not be encoded for the platform
    #[error("Failed to encode device query: {0}")]
    Serialization(#[from] serde_json::Error),

    // ===== Device selection =====
    /// User dismissed the platform chooser
    #[error("Device selection cancelled")]
    DeviceSelectionCancelled,

    /// Platform could not produce a device
    #[error("Device selection failed: {0}")]
    DeviceSelectionFailed(String),

    // ===== GATT operations =====
    /// Device has no live session
    #[error("Device {0} is not connected")]
    DeviceNotConnected(DeviceHandle),

    /// Service or characteristic does not exist on the device
    #[error("Characteristic {characteristic} not found in service {service}")]
    CharacteristicNotFound {
        service: String,
        characteristic: String,
    },

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Write failed: {0}")]
    WriteFailed(String),

    /// Characteristic rejected the payload size
    #[error("Characteristic rejected a {len}-byte value")]
    InvalidValueLength { len: usize },

    #[error("Subscription failed: {0}")]
    SubscriptionFailed(String),

    #[error("Disconnect failed: {0}")]
    DisconnectFailed(String),
}

pub type Result<T> = std::result::Result<T, BluetoothError>;

/// Failure classes reported by a platform backend
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlatformError {
    /// User dismissed a chooser or consent dialog
    #[error("cancelled by user")]
    Cancelled,

    #[error("no matching device")]
    NoMatchingDevice,

    #[error("permission denied")]
    PermissionDenied,

    #[error("device not connected")]
    NotConnected,

    /// Service or characteristic is missing on the remote device
    #[error("attribute not found")]
    NotFound,

    #[error("invalid attribute value length")]
    InvalidLength,

    #[error("{0}")]
    Failed(String),
}
