use tracing::{debug, warn};

use crate::session::transport::BleTransport;

/// Best-effort check that the host can do BLE at all.
///
/// Any probe failure reads as "unavailable"; it only ever gates scanning.
pub async fn check_available<T: BleTransport>(transport: &T) -> bool {
    match transport.adapter_available().await {
        Ok(true) => {
            debug!("Bluetooth adapter available");
            true
        }
        Ok(false) => {
            warn!("Bluetooth adapter present but not usable");
            false
        }
        Err(e) => {
            warn!("Bluetooth availability probe failed: {e}");
            false
        }
    }
}
