//! Bluetooth Module
//!
//! Facade over a host Bluetooth LE GATT client.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                   BluetoothNavigator                     │
//! │  (Public API - normalizes ids, owns sessions)            │
//! └──────────┬──────────────────────────────────▲───────────┘
//!            │ canonical keys,                  │ PlatformBridge
//!            │ wide cells                       │ (value changes,
//!            ▼                                  │  disconnects)
//! ┌─────────────────────────────────────────────┴───────────┐
//! │              PlatformBluetoothClient                     │
//! │  (WinRtPlatform on Windows, a recording fake in tests)   │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`navigator`] - Main facade coordinating sessions and notifications
//! - [`platform`] - Platform client trait and the callback bridge
//! - [`router`] - Per-characteristic subscriber registry
//! - [`session`] - Per-device state and error mapping
//! - `winrt` - Windows Runtime backend (Windows only)

pub mod navigator;
pub mod platform;
pub mod router;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

#[cfg(windows)]
pub mod winrt;

// Re-export main types for convenience
pub use navigator::{BluetoothNavigator, NavigatorConfig};
pub use platform::{PlatformBluetoothClient, PlatformBridge, PlatformEventSink};
pub use router::SubscriptionId;

#[cfg(windows)]
pub use winrt::WinRtPlatform;
