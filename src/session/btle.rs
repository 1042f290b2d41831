use std::time::Duration;

use btleplug::api::{Central, Manager as _, Peripheral as _, PeripheralProperties, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::transport::{BleTransport, GattCharacteristic, Notification, NotificationStream, RawDevice};
use crate::errors::AppError;

/// [`BleTransport`] on top of the first adapter btleplug finds.
#[derive(Default)]
pub struct BtleplugTransport {
    adapter: Mutex<Option<Adapter>>,
    peripheral: Mutex<Option<Peripheral>>,
}

impl BtleplugTransport {
    pub fn new() -> Self {
        Self::default()
    }

    async fn adapter(&self) -> Result<Adapter, AppError> {
        let mut cached = self.adapter.lock().await;
        if let Some(adapter) = cached.as_ref() {
            return Ok(adapter.clone());
        }
        let manager = Manager::new()
            .await
            .map_err(|e| AppError::unavailable("Failed to create manager", e))?;
        let adapter = manager
            .adapters()
            .await
            .map_err(|e| AppError::unavailable("Failed to list adapters", e))?
            .into_iter()
            .next()
            .ok_or_else(|| {
                AppError::DeviceUnavailable(
                    "No Bluetooth adapters found! Make sure it's plugged in and enabled."
                        .to_string(),
                )
            })?;
        *cached = Some(adapter.clone());
        Ok(adapter)
    }

    async fn connected_peripheral(&self) -> Result<Peripheral, AppError> {
        self.peripheral
            .lock()
            .await
            .clone()
            .ok_or_else(|| AppError::DeviceUnavailable("No device connected".to_string()))
    }

    async fn find_characteristic(
        &self,
        uuid: Uuid,
    ) -> Result<(Peripheral, btleplug::api::Characteristic), AppError> {
        let device = self.connected_peripheral().await?;
        let characteristic = device
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)
            .ok_or_else(|| {
                AppError::DeviceUnavailable(format!("Characteristic {uuid} not found on device"))
            })?;
        Ok((device, characteristic))
    }
}

fn address_of(peripheral: &Peripheral, properties: &PeripheralProperties) -> String {
    // CoreBluetooth hides MAC addresses and reports all zeroes
    let address = properties.address.to_string();
    if properties.address == btleplug::api::BDAddr::default() {
        peripheral.id().to_string()
    } else {
        address
    }
}

impl BleTransport for BtleplugTransport {
    async fn adapter_available(&self) -> Result<bool, AppError> {
        let adapter = self.adapter().await?;
        let info = adapter
            .adapter_info()
            .await
            .map_err(|e| AppError::unavailable("Adapter didn't respond", e))?;
        debug!("Using adapter: {info}");
        Ok(true)
    }

    async fn discover(&self, duration: Duration) -> Result<Vec<RawDevice>, AppError> {
        let central = self.adapter().await?;
        central
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| AppError::unavailable("Scanning failure", e))?;
        debug!("Scanning for {} seconds", duration.as_secs_f32());
        tokio::time::sleep(duration).await;
        if let Err(e) = central.stop_scan().await {
            warn!("Failed to stop scan: {e}");
        }

        let peripherals = central
            .peripherals()
            .await
            .map_err(|e| AppError::unavailable("Failed to read discovered devices", e))?;
        let mut devices = Vec::with_capacity(peripherals.len());
        for peripheral in peripherals {
            let properties = match peripheral.properties().await {
                Ok(properties) => properties.unwrap_or_default(),
                Err(e) => {
                    debug!("Skipping {}: {e}", peripheral.id());
                    continue;
                }
            };
            devices.push(RawDevice {
                address: address_of(&peripheral, &properties),
                name: properties.local_name,
                rssi: properties.rssi,
                services: properties.services,
            });
        }
        Ok(devices)
    }

    async fn connect(&self, address: &str) -> Result<(), AppError> {
        let central = self.adapter().await?;
        let peripherals = central
            .peripherals()
            .await
            .map_err(|e| AppError::unavailable("Failed to read discovered devices", e))?;
        let mut device = None;
        for peripheral in peripherals {
            let properties = peripheral
                .properties()
                .await
                .ok()
                .flatten()
                .unwrap_or_default();
            if address_of(&peripheral, &properties).eq_ignore_ascii_case(address) {
                device = Some(peripheral);
                break;
            }
        }
        let device = device.ok_or_else(|| {
            AppError::DeviceUnavailable(format!("Device {address} hasn't been seen, scan first"))
        })?;

        info!("Connecting to {address}");
        device
            .connect()
            .await
            .map_err(|e| AppError::unavailable("BLE Connection error", e))?;
        // Held from here on, so a cancelled connect can still be closed by `disconnect`
        *self.peripheral.lock().await = Some(device.clone());
        if let Err(e) = device.discover_services().await {
            self.peripheral.lock().await.take();
            if let Err(close_error) = device.disconnect().await {
                warn!("Failed to close half-open link to {address}: {close_error}");
            }
            return Err(AppError::unavailable(
                "Couldn't read services from connected device",
                e,
            ));
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), AppError> {
        let Some(device) = self.peripheral.lock().await.take() else {
            return Ok(());
        };
        if device.is_connected().await.unwrap_or(false) {
            device
                .disconnect()
                .await
                .map_err(|e| AppError::unavailable("Failed to disconnect", e))?;
        }
        Ok(())
    }

    async fn list_services(&self) -> Result<Vec<GattCharacteristic>, AppError> {
        let device = self.connected_peripheral().await?;
        Ok(device
            .characteristics()
            .into_iter()
            .map(|c| GattCharacteristic {
                service: c.service_uuid,
                uuid: c.uuid,
            })
            .collect())
    }

    async fn subscribe(&self, characteristic: Uuid) -> Result<(), AppError> {
        let (device, characteristic) = self.find_characteristic(characteristic).await?;
        device
            .subscribe(&characteristic)
            .await
            .map_err(|e| AppError::unavailable("Failed to subscribe", e))
    }

    async fn unsubscribe(&self, characteristic: Uuid) -> Result<(), AppError> {
        let (device, characteristic) = self.find_characteristic(characteristic).await?;
        device
            .unsubscribe(&characteristic)
            .await
            .map_err(|e| AppError::unavailable("Failed to unsubscribe", e))
    }

    async fn notifications(&self) -> Result<NotificationStream, AppError> {
        let device = self.connected_peripheral().await?;
        let stream = device
            .notifications()
            .await
            .map_err(|e| AppError::unavailable("Failed to get BLE notification stream", e))?;
        Ok(Box::pin(stream.map(|n| Notification {
            uuid: n.uuid,
            value: n.value,
        })))
    }

    async fn is_connected(&self) -> bool {
        match self.connected_peripheral().await {
            Ok(device) => device.is_connected().await.unwrap_or(false),
            Err(_) => false,
        }
    }
}
