use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use futures::Stream;
use uuid::Uuid;

use crate::errors::AppError;

/// One unsolicited value push from a subscribed characteristic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub uuid: Uuid,
    pub value: Vec<u8>,
}

pub type NotificationStream = Pin<Box<dyn Stream<Item = Notification> + Send>>;

/// A peripheral as the radio reported it, before any filtering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDevice {
    pub name: Option<String>,
    pub address: String,
    pub rssi: Option<i16>,
    pub services: Vec<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GattCharacteristic {
    pub service: Uuid,
    pub uuid: Uuid,
}

/// What the session and scanner need from a BLE stack.
///
/// A transport holds at most one connected peripheral at a time.
pub trait BleTransport: Send + Sync + 'static {
    /// Whether a usable adapter is present and powered.
    fn adapter_available(&self) -> impl Future<Output = Result<bool, AppError>> + Send;

    /// Listens for advertisements for `duration` and returns everything seen.
    fn discover(
        &self,
        duration: Duration,
    ) -> impl Future<Output = Result<Vec<RawDevice>, AppError>> + Send;

    fn connect(&self, address: &str) -> impl Future<Output = Result<(), AppError>> + Send;

    fn disconnect(&self) -> impl Future<Output = Result<(), AppError>> + Send;

    fn list_services(
        &self,
    ) -> impl Future<Output = Result<Vec<GattCharacteristic>, AppError>> + Send;

    fn subscribe(&self, characteristic: Uuid) -> impl Future<Output = Result<(), AppError>> + Send;

    fn unsubscribe(
        &self,
        characteristic: Uuid,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Stream of notifications for every subscribed characteristic of the connected device.
    fn notifications(&self) -> impl Future<Output = Result<NotificationStream, AppError>> + Send;

    fn is_connected(&self) -> impl Future<Output = bool> + Send;
}
