#![allow(dead_code)]

use std::sync::Mutex;
use std::time::Duration;

use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use uuid::Uuid;

use town_bike::decoder::{
    FITNESS_MACHINE_SERVICE_UUID, HEART_RATE_MEASUREMENT_CHARACTERISTIC_UUID,
    HEART_RATE_SERVICE_UUID, INDOOR_BIKE_DATA_CHARACTERISTIC_UUID,
};
use town_bike::errors::AppError;
use town_bike::session::transport::{
    BleTransport, GattCharacteristic, Notification, NotificationStream, RawDevice,
};

/// Everything the mock was asked to do, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    AdapterAvailable,
    Discover,
    Connect(String),
    Disconnect,
    ListServices,
    Subscribe(Uuid),
    Unsubscribe(Uuid),
    Notifications,
}

#[derive(Default)]
struct MockState {
    connected: bool,
    subscribed: Vec<Uuid>,
    calls: Vec<Call>,
}

/// In-memory stand-in for a BLE stack. Notifications are pushed in by the test.
pub struct MockTransport {
    pub available: bool,
    pub devices: Vec<RawDevice>,
    pub services: Vec<GattCharacteristic>,
    pub fail_connect: bool,
    /// `connect` never completes
    pub hang_connect: bool,
    /// `connect` succeeds but `list_services` never completes
    pub hang_list_services: bool,
    pub(crate) state: Mutex<MockState>,
    pub(crate) sender: UnboundedSender<Notification>,
    pub(crate) receiver: Mutex<Option<UnboundedReceiver<Notification>>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        let (sender, receiver) = unbounded();
        Self {
            available: true,
            devices: Vec::new(),
            services: vec![
                GattCharacteristic {
                    service: HEART_RATE_SERVICE_UUID,
                    uuid: HEART_RATE_MEASUREMENT_CHARACTERISTIC_UUID,
                },
                GattCharacteristic {
                    service: FITNESS_MACHINE_SERVICE_UUID,
                    uuid: INDOOR_BIKE_DATA_CHARACTERISTIC_UUID,
                },
            ],
            fail_connect: false,
            hang_connect: false,
            hang_list_services: false,
            state: Mutex::new(MockState::default()),
            sender,
            receiver: Mutex::new(Some(receiver)),
        }
    }
}

impl MockTransport {
    pub fn push(&self, uuid: Uuid, value: &[u8]) {
        self.sender
            .unbounded_send(Notification {
                uuid,
                value: value.to_vec(),
            })
            .unwrap();
    }

    /// Ends the notification stream, as a device walking out of range does.
    pub fn close_notifications(&self) {
        self.sender.close_channel();
    }

    /// Drops the radio link without telling the session.
    pub fn drop_link(&self) {
        self.state.lock().unwrap().connected = false;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn subscribed(&self) -> Vec<Uuid> {
        self.state.lock().unwrap().subscribed.clone()
    }

    pub fn connected(&self) -> bool {
        self.state.lock().unwrap().connected
    }

    fn record(&self, call: Call) {
        self.state.lock().unwrap().calls.push(call);
    }
}

impl BleTransport for MockTransport {
    async fn adapter_available(&self) -> Result<bool, AppError> {
        self.record(Call::AdapterAvailable);
        Ok(self.available)
    }

    async fn discover(&self, _duration: Duration) -> Result<Vec<RawDevice>, AppError> {
        self.record(Call::Discover);
        Ok(self.devices.clone())
    }

    async fn connect(&self, address: &str) -> Result<(), AppError> {
        self.record(Call::Connect(address.to_owned()));
        if self.hang_connect {
            std::future::pending::<()>().await;
        }
        if self.fail_connect {
            return Err(AppError::unavailable(
                "BLE Connection error",
                btleplug::Error::DeviceNotFound,
            ));
        }
        self.state.lock().unwrap().connected = true;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), AppError> {
        self.record(Call::Disconnect);
        self.state.lock().unwrap().connected = false;
        Ok(())
    }

    async fn list_services(&self) -> Result<Vec<GattCharacteristic>, AppError> {
        self.record(Call::ListServices);
        if self.hang_list_services {
            std::future::pending::<()>().await;
        }
        Ok(self.services.clone())
    }

    async fn subscribe(&self, characteristic: Uuid) -> Result<(), AppError> {
        self.record(Call::Subscribe(characteristic));
        self.state.lock().unwrap().subscribed.push(characteristic);
        Ok(())
    }

    async fn unsubscribe(&self, characteristic: Uuid) -> Result<(), AppError> {
        self.record(Call::Unsubscribe(characteristic));
        self.state
            .lock()
            .unwrap()
            .subscribed
            .retain(|uuid| *uuid != characteristic);
        Ok(())
    }

    async fn notifications(&self) -> Result<NotificationStream, AppError> {
        self.record(Call::Notifications);
        let receiver = self
            .receiver
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| AppError::Unexpected("notification stream already taken".into()))?;
        Ok(Box::pin(receiver))
    }

    async fn is_connected(&self) -> bool {
        self.connected()
    }
}

pub fn raw_device(name: Option<&str>, address: &str, rssi: Option<i16>) -> RawDevice {
    RawDevice {
        name: name.map(str::to_owned),
        address: address.to_owned(),
        rssi,
        services: Vec::new(),
    }
}
