pub mod btle;
pub mod simulated;
pub mod transport;

use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::decoder::{decode_notification, SUBSCRIBED_CHARACTERISTICS};
use crate::errors::AppError;
use crate::metrics::MetricsStore;
use simulated::simulation_thread;
use transport::{BleTransport, Notification, NotificationStream};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// Called once a connection is fully set up, e.g. to refresh a dashboard.
pub type PostConnect = Box<dyn FnOnce() + Send>;

#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Feed the store from the generator instead of a real device
    pub simulated: bool,
    pub connect_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            simulated: false,
            connect_timeout: Duration::from_secs(15),
        }
    }
}

/// A background task plus the token that stops it.
struct SessionTask {
    cancel_token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl SessionTask {
    fn spawn<F, Fut>(task: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(task(cancel_token.clone()));
        Self {
            cancel_token,
            handle: Some(handle),
        }
    }

    fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Returns once the task has actually finished.
    async fn stop(mut self) {
        self.cancel_token.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                error!("Session task ended abnormally: {e}");
            }
        }
    }
}

impl Drop for SessionTask {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

/// Decodes one notification and appends whatever it carried to the store.
///
/// Malformed payloads are logged and dropped here, they never reach the store.
/// Returns how many samples were appended.
pub fn route_notification(store: &MetricsStore, notification: &Notification) -> usize {
    match decode_notification(notification.uuid, &notification.value) {
        Ok(Some(metrics)) => {
            let timestamp = store.now();
            metrics
                .into_iter()
                .filter(|&(metric, value)| store.append(metric, value, timestamp))
                .count()
        }
        Ok(None) => {
            trace!("Ignoring notification from {}", notification.uuid);
            0
        }
        Err(e) => {
            warn!(
                "Dropping malformed notification from {}: {e} ({:02x?})",
                notification.uuid, notification.value
            );
            0
        }
    }
}

async fn notification_thread(
    mut notification_stream: NotificationStream,
    store: MetricsStore,
    cancel_token: CancellationToken,
) {
    loop {
        tokio::select! {
            item = notification_stream.next() => {
                match item {
                    Some(notification) => {
                        route_notification(&store, &notification);
                    }
                    None => {
                        warn!("Notification stream closed, device link is gone");
                        return;
                    }
                }
            }
            _ = cancel_token.cancelled() => {
                info!("Shutting down notification thread!");
                return;
            }
        }
    }
}

/// Anything the caller didn't already get a classified error for becomes `Unexpected`.
fn classify(error: AppError) -> AppError {
    match error {
        AppError::DeviceUnavailable(_) | AppError::SessionActive | AppError::Unexpected(_) => error,
        other => AppError::Unexpected(other.to_string()),
    }
}

/// The one live link between a device (or the simulator) and a [`MetricsStore`].
pub struct ConnectionSession<T: BleTransport> {
    transport: Arc<T>,
    store: MetricsStore,
    options: SessionOptions,
    state: ConnectionState,
    address: Option<String>,
    subscriptions: Vec<Uuid>,
    task: Option<SessionTask>,
}

impl<T: BleTransport> ConnectionSession<T> {
    pub fn new(transport: Arc<T>, store: MetricsStore, options: SessionOptions) -> Self {
        Self {
            transport,
            store,
            options,
            state: ConnectionState::Disconnected,
            address: None,
            subscriptions: Vec::new(),
            task: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// `Connected` and its data source (notification stream or simulator) still running.
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
            && self.task.as_ref().is_some_and(SessionTask::is_running)
    }

    /// Like [`Self::is_connected`], but also asks the transport whether the radio link is up.
    pub async fn link_alive(&self) -> bool {
        if !self.is_connected() {
            return false;
        }
        self.options.simulated || self.transport.is_connected().await
    }

    pub fn is_simulated(&self) -> bool {
        self.options.simulated
    }

    pub fn store(&self) -> &MetricsStore {
        &self.store
    }

    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    pub fn subscriptions(&self) -> &[Uuid] {
        &self.subscriptions
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            debug!("Session state: {:?} -> {:?}", self.state, state);
            self.state = state;
        }
    }

    /// Connects to `address` and starts feeding the store.
    ///
    /// Only valid from `Disconnected`. On failure everything that was set up is torn
    /// down again and the session is back to `Disconnected`.
    pub async fn connect(
        &mut self,
        address: &str,
        on_connected: Option<PostConnect>,
    ) -> Result<(), AppError> {
        if self.state != ConnectionState::Disconnected {
            warn!("Refusing to connect to {address}, session is {:?}", self.state);
            return Err(AppError::SessionActive);
        }
        self.set_state(ConnectionState::Connecting);
        self.address = Some(address.to_owned());

        let result = if self.options.simulated {
            info!("Starting simulated session for {address}");
            let store = self.store.clone();
            self.task = Some(SessionTask::spawn(|token| {
                simulation_thread(store, token)
            }));
            Ok(())
        } else {
            let connect_timeout = self.options.connect_timeout;
            match timeout(connect_timeout, self.connect_transport(address)).await {
                Ok(result) => result,
                Err(_) => Err(AppError::DeviceUnavailable(format!(
                    "Connecting to {address} timed out after {}s",
                    connect_timeout.as_secs()
                ))),
            }
        };

        if let Err(e) = result {
            error!("Connection to {address} failed: {e}");
            if let Err(teardown_error) = self.teardown().await {
                warn!("Cleanup after failed connect also failed: {teardown_error}");
            }
            return Err(classify(e));
        }

        self.set_state(ConnectionState::Connected);
        info!("Connected to {address}");
        if let Some(callback) = on_connected {
            if catch_unwind(AssertUnwindSafe(callback)).is_err() {
                error!("Post-connect callback panicked");
            }
        }
        Ok(())
    }

    async fn connect_transport(&mut self, address: &str) -> Result<(), AppError> {
        info!("Connecting to device! Address: {address}");
        self.transport.connect(address).await?;

        let characteristics = self.transport.list_services().await?;
        debug!("Found {} characteristics", characteristics.len());

        for (service, characteristic) in SUBSCRIBED_CHARACTERISTICS {
            if !characteristics.iter().any(|c| c.uuid == characteristic) {
                continue;
            }
            self.transport.subscribe(characteristic).await?;
            // Recorded immediately so a cancelled connect can still be cleaned up
            self.subscriptions.push(characteristic);
            info!("Subscribed to {characteristic} (service {service})");
        }
        if self.subscriptions.is_empty() {
            return Err(AppError::DeviceUnavailable(format!(
                "{address} has no supported fitness characteristics"
            )));
        }

        let notification_stream = self.transport.notifications().await?;
        let store = self.store.clone();
        self.task = Some(SessionTask::spawn(|token| {
            notification_thread(notification_stream, store, token)
        }));
        Ok(())
    }

    /// Stops the data source, drops every subscription, then closes the link.
    ///
    /// Calling this on a session that is already disconnected does nothing.
    pub async fn disconnect(&mut self) -> Result<(), AppError> {
        if self.state == ConnectionState::Disconnected
            && self.task.is_none()
            && self.subscriptions.is_empty()
        {
            debug!("Disconnect requested but session is already disconnected");
            return Ok(());
        }
        self.set_state(ConnectionState::Disconnecting);
        let result = self.teardown().await.map_err(classify);
        info!("Session disconnected");
        result
    }

    async fn teardown(&mut self) -> Result<(), AppError> {
        if let Some(task) = self.task.take() {
            task.stop().await;
        }

        let mut result = Ok(());
        if !self.options.simulated {
            for characteristic in std::mem::take(&mut self.subscriptions) {
                // The device may already be gone, closing the link still has to happen
                if let Err(e) = self.transport.unsubscribe(characteristic).await {
                    warn!("Failed to unsubscribe from {characteristic}: {e}");
                }
            }
            result = self.transport.disconnect().await;
        }

        self.subscriptions.clear();
        self.address = None;
        self.set_state(ConnectionState::Disconnected);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::{
        HEART_RATE_MEASUREMENT_CHARACTERISTIC_UUID, INDOOR_BIKE_DATA_CHARACTERISTIC_UUID,
    };
    use crate::metrics::{ManualClock, Metric};

    fn store() -> MetricsStore {
        MetricsStore::new(Arc::new(ManualClock::new(1_700_000_000.0)))
    }

    #[test]
    fn routes_heart_rate() {
        let store = store();
        let notification = Notification {
            uuid: HEART_RATE_MEASUREMENT_CHARACTERISTIC_UUID,
            value: vec![0x00, 0x8C],
        };
        assert_eq!(route_notification(&store, &notification), 1);
        assert_eq!(store.latest(Metric::HeartRate).map(|s| s.value), Some(140.0));
    }

    #[test]
    fn malformed_notification_leaves_store_untouched() {
        let store = store();
        let notification = Notification {
            uuid: INDOOR_BIKE_DATA_CHARACTERISTIC_UUID,
            value: vec![0b0100_0100, 0x00, 0x64, 0x00, 0xB4],
        };
        assert_eq!(route_notification(&store, &notification), 0);
        assert!(store.is_empty());
    }

    #[test]
    fn unknown_characteristic_ignored() {
        let store = store();
        let notification = Notification {
            uuid: Uuid::from_u128(0x00002a19_0000_1000_8000_00805f9b34fb),
            value: vec![100],
        };
        assert_eq!(route_notification(&store, &notification), 0);
        assert!(store.is_empty());
    }

    #[test]
    fn classification() {
        assert!(matches!(
            classify(AppError::Io(std::io::Error::other("boom"))),
            AppError::Unexpected(_)
        ));
        assert!(matches!(
            classify(AppError::DeviceUnavailable("gone".into())),
            AppError::DeviceUnavailable(_)
        ));
        assert!(matches!(classify(AppError::SessionActive), AppError::SessionActive));
    }
}
