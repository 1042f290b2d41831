use std::sync::Arc;
use std::time::Duration;

use serde_derive::Serialize;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::availability::check_available;
use crate::decoder::FITNESS_SERVICE_UUIDS;
use crate::errors::AppError;
use crate::session::transport::{BleTransport, RawDevice};

const FITNESS_KEYWORDS: [&str; 7] = ["bike", "cycle", "fitness", "heart", "polar", "wahoo", "garmin"];

// Extra time the transport gets past the listening window before the scan is abandoned
const SCAN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceDescriptor {
    pub name: String,
    pub address: String,
    /// dBm
    pub signal_strength: i16,
}

/// Fixed results handed out when running without real hardware.
pub fn mock_devices() -> Vec<DeviceDescriptor> {
    vec![
        DeviceDescriptor {
            name: "Mock Smart Bike".to_string(),
            address: "00:11:22:33:44:66".to_string(),
            signal_strength: -70,
        },
        DeviceDescriptor {
            name: "Mock Heart Rate Monitor".to_string(),
            address: "00:11:22:33:44:55".to_string(),
            signal_strength: -65,
        },
    ]
}

/// Case-insensitive keyword match on the advertised name. Nameless devices never match.
pub fn is_fitness_device(name: Option<&str>) -> bool {
    name.map(str::to_lowercase).is_some_and(|name| {
        FITNESS_KEYWORDS
            .iter()
            .any(|keyword| name.contains(keyword))
    })
}

/// Strongest signal first.
pub fn rank_by_signal(devices: &mut [DeviceDescriptor]) {
    devices.sort_by(|a, b| b.signal_strength.cmp(&a.signal_strength));
}

fn describe(device: RawDevice) -> Option<DeviceDescriptor> {
    if !is_fitness_device(device.name.as_deref()) {
        return None;
    }
    if device
        .services
        .iter()
        .any(|uuid| FITNESS_SERVICE_UUIDS.contains(uuid))
    {
        debug!("{:?} advertises a fitness service", device.name);
    }
    Some(DeviceDescriptor {
        name: device.name?,
        address: device.address,
        signal_strength: device.rssi.unwrap_or(i16::MIN),
    })
}

pub struct Scanner<T: BleTransport> {
    transport: Arc<T>,
    scan_duration: Duration,
    simulated: bool,
}

impl<T: BleTransport> Scanner<T> {
    pub fn new(transport: Arc<T>, scan_duration: Duration, simulated: bool) -> Self {
        Self {
            transport,
            scan_duration,
            simulated,
        }
    }

    /// Nearby fitness devices, strongest signal first.
    pub async fn scan(&self) -> Result<Vec<DeviceDescriptor>, AppError> {
        if self.simulated {
            let mut devices = mock_devices();
            rank_by_signal(&mut devices);
            return Ok(devices);
        }

        if !check_available(self.transport.as_ref()).await {
            return Err(AppError::DeviceUnavailable(
                "Bluetooth is not available on this host".to_string(),
            ));
        }

        info!("Scanning for fitness devices...");
        let raw = timeout(
            self.scan_duration + SCAN_GRACE,
            self.transport.discover(self.scan_duration),
        )
        .await
        .map_err(|_| AppError::DeviceUnavailable("Scan timed out".to_string()))??;
        let seen = raw.len();

        let mut devices: Vec<DeviceDescriptor> = raw.into_iter().filter_map(describe).collect();
        rank_by_signal(&mut devices);
        info!("Found {} fitness devices out of {seen} seen", devices.len());
        Ok(devices)
    }
}
