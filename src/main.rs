use anyhow::Context;
use ble_navigator::domain::settings::{BluetoothSettings, SettingsService};
use ble_navigator::infrastructure::bluetooth::PlatformBluetoothClient;
use ble_navigator::infrastructure::logging;
use ble_navigator::{BluetoothNavigator, NavigatorConfig, NavigatorEvent};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

#[cfg(windows)]
fn platform(settings: &BluetoothSettings) -> anyhow::Result<Arc<dyn PlatformBluetoothClient>> {
    use ble_navigator::infrastructure::bluetooth::WinRtPlatform;
    use std::time::Duration;

    Ok(Arc::new(WinRtPlatform::new(Duration::from_millis(
        settings.scan_timeout_ms,
    ))))
}

#[cfg(not(windows))]
fn platform(_settings: &BluetoothSettings) -> anyhow::Result<Arc<dyn PlatformBluetoothClient>> {
    anyhow::bail!("No Bluetooth backend is available for this platform (WinRT only)")
}

fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings_service = SettingsService::new()?;
    let settings = settings_service.get().clone();

    let _logging_guard = logging::init_logger(&settings.log_settings)
        .map_err(|e| eprintln!("Failed to initialize logging: {}", e))
        .ok();

    info!("Starting BLE Navigator");
    debug!("Settings loaded from {}", settings_service.path().display());

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let navigator = BluetoothNavigator::new(
        platform(&settings.bluetooth)?,
        event_tx,
        NavigatorConfig::from(&settings.bluetooth),
    );

    let device = navigator
        .request_device(&settings.monitor.query)
        .await
        .context("Device selection failed")?;
    info!(
        "Connected to {} ({})",
        device.handle,
        device.name.as_deref().unwrap_or("unnamed")
    );

    for watched in &settings.monitor.watch {
        let result = navigator
            .setup_notify(
                &device.handle,
                watched.service.clone(),
                watched.characteristic.clone(),
                |event| {
                    info!(
                        "{}/{}: {}",
                        event.service,
                        event.characteristic,
                        hex(&event.value)
                    );
                },
            )
            .await;
        match result {
            Ok(id) => info!("Watching {:?}/{:?} as {}", watched.service, watched.characteristic, id),
            Err(e) => warn!(
                "Could not watch {:?}/{:?}: {}",
                watched.service, watched.characteristic, e
            ),
        }
    }

    loop {
        tokio::select! {
            event = event_rx.recv() => match event {
                Some(NavigatorEvent::DeviceDisconnected(handle)) if handle == device.handle => {
                    warn!("Device {} disconnected", handle);
                    return Ok(());
                }
                Some(event) => debug!("Event: {:?}", event),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }
        }
    }

    if let Err(e) = navigator.disconnect(&device.handle).await {
        error!("Disconnect failed: {}", e);
    }
    Ok(())
}
