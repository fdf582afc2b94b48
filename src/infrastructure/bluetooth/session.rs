//! Device Session Module
//!
//! Per-device state held by the navigator, and the mapping of platform
//! failure classes onto each operation's errors.

use crate::domain::error::{BluetoothError, PlatformError};
use crate::domain::identifier::CanonicalId;
use crate::domain::models::DeviceHandle;
use std::future::Future;
use tokio::sync::watch;

/// One connected remote device
#[derive(Debug)]
pub struct DeviceSession {
    handle: DeviceHandle,
    name: Option<String>,
    disconnected: watch::Sender<bool>,
}

impl DeviceSession {
    pub fn new(handle: DeviceHandle, name: Option<String>) -> Self {
        let (disconnected, _) = watch::channel(false);
        Self {
            handle,
            name,
            disconnected,
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Guard for one operation against this device
    pub fn guard(&self) -> DisconnectGuard {
        DisconnectGuard {
            device: self.handle.clone(),
            disconnected: self.disconnected.subscribe(),
        }
    }

    /// Wake every in-flight operation; they complete with `DeviceNotConnected`
    pub fn close(self) {
        self.disconnected.send_replace(true);
    }
}

/// Races a platform call against the disconnect of its device
pub struct DisconnectGuard {
    device: DeviceHandle,
    disconnected: watch::Receiver<bool>,
}

impl DisconnectGuard {
    pub async fn run<T, F>(mut self, call: F) -> Result<T, Interrupted>
    where
        F: Future<Output = Result<T, PlatformError>>,
    {
        tokio::select! {
            biased;
            _ = self.disconnected.wait_for(|gone| *gone) => {
                Err(Interrupted::Disconnected(self.device))
            }
            result = call => result.map_err(Interrupted::Platform),
        }
    }
}

/// Why a guarded platform call did not produce a value
#[derive(Debug)]
pub enum Interrupted {
    Disconnected(DeviceHandle),
    Platform(PlatformError),
}

/// GATT operation kind, for error mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Read,
    Write { len: usize },
    Subscribe,
    Unsubscribe,
}

/// Map onto the error taxonomy of a characteristic operation
pub fn gatt_error(
    interrupted: Interrupted,
    device: &DeviceHandle,
    op: Operation,
    service: &CanonicalId,
    characteristic: &CanonicalId,
) -> BluetoothError {
    let err = match interrupted {
        Interrupted::Disconnected(device) => return BluetoothError::DeviceNotConnected(device),
        Interrupted::Platform(err) => err,
    };
    match (err, op) {
        (PlatformError::NotConnected, _) => BluetoothError::DeviceNotConnected(device.clone()),
        (PlatformError::NotFound, _) => BluetoothError::CharacteristicNotFound {
            service: service.to_string(),
            characteristic: characteristic.to_string(),
        },
        (PlatformError::InvalidLength, Operation::Write { len }) => {
            BluetoothError::InvalidValueLength { len }
        }
        (err, Operation::Read) => BluetoothError::ReadFailed(err.to_string()),
        (err, Operation::Write { .. }) => BluetoothError::WriteFailed(err.to_string()),
        (err, Operation::Subscribe | Operation::Unsubscribe) => {
            BluetoothError::SubscriptionFailed(err.to_string())
        }
    }
}

/// Map a chooser failure
pub fn selection_error(err: PlatformError) -> BluetoothError {
    match err {
        PlatformError::Cancelled => BluetoothError::DeviceSelectionCancelled,
        other => BluetoothError::DeviceSelectionFailed(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn ids() -> (CanonicalId, CanonicalId) {
        (
            CanonicalId::parse("180d").unwrap(),
            CanonicalId::parse("2a37").unwrap(),
        )
    }

    #[tokio::test]
    async fn test_guard_passes_platform_result_through() {
        let session = DeviceSession::new(DeviceHandle::new("dev-1"), None);
        let value = session.guard().run(async { Ok(vec![1u32]) }).await.unwrap();
        assert_eq!(value, vec![1]);

        let err = session
            .guard()
            .run(async { Err::<(), _>(PlatformError::NotFound) })
            .await
            .unwrap_err();
        assert!(matches!(err, Interrupted::Platform(PlatformError::NotFound)));
    }

    #[tokio::test]
    async fn test_close_interrupts_pending_call() {
        let session = DeviceSession::new(DeviceHandle::new("dev-1"), Some("HRM".into()));
        assert_eq!(session.name(), Some("HRM"));
        let guard = session.guard();
        let pending = tokio::spawn(guard.run(std::future::pending::<Result<(), PlatformError>>()));

        tokio::time::sleep(Duration::from_millis(10)).await;
        session.close();

        let result = tokio::time::timeout(Duration::from_secs(1), pending)
            .await
            .expect("pending call should be interrupted")
            .unwrap();
        assert!(matches!(result, Err(Interrupted::Disconnected(d)) if d.as_str() == "dev-1"));
    }

    #[test]
    fn test_gatt_error_mapping() {
        let (service, characteristic) = ids();
        let device = DeviceHandle::new("dev-1");
        let map = |err: PlatformError, op: Operation| {
            gatt_error(Interrupted::Platform(err), &device, op, &service, &characteristic)
        };

        assert!(matches!(
            map(PlatformError::NotFound, Operation::Read),
            BluetoothError::CharacteristicNotFound { service, characteristic }
                if service == "180d" && characteristic == "2a37"
        ));
        assert!(matches!(
            map(PlatformError::NotConnected, Operation::Write { len: 3 }),
            BluetoothError::DeviceNotConnected(d) if d.as_str() == "dev-1"
        ));
        assert!(matches!(
            map(PlatformError::InvalidLength, Operation::Write { len: 600 }),
            BluetoothError::InvalidValueLength { len: 600 }
        ));
        assert!(matches!(
            map(PlatformError::InvalidLength, Operation::Read),
            BluetoothError::ReadFailed(_)
        ));
        assert!(matches!(
            map(PlatformError::Failed("busy".into()), Operation::Write { len: 1 }),
            BluetoothError::WriteFailed(reason) if reason == "busy"
        ));
        assert!(matches!(
            map(PlatformError::PermissionDenied, Operation::Subscribe),
            BluetoothError::SubscriptionFailed(_)
        ));
    }

    #[test]
    fn test_selection_error_mapping() {
        assert!(matches!(
            selection_error(PlatformError::Cancelled),
            BluetoothError::DeviceSelectionCancelled
        ));
        assert!(matches!(
            selection_error(PlatformError::NoMatchingDevice),
            BluetoothError::DeviceSelectionFailed(_)
        ));
        assert!(matches!(
            selection_error(PlatformError::PermissionDenied),
            BluetoothError::DeviceSelectionFailed(_)
        ));
    }
}
