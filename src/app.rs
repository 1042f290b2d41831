use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::errors::AppError;
use crate::metrics::{Metric, MetricsStore};
use crate::scan::{DeviceDescriptor, Scanner};
use crate::session::transport::BleTransport;
use crate::session::{ConnectionSession, ConnectionState};
use crate::settings::Settings;
use crate::storage::{session_id, WorkoutEntry, WorkoutStorage};
use crate::summary::{summarize, WorkoutSummary};
use crate::targets::{target_for, TargetStatus};

/// Wires the scanner, the single connection session, its store and the archive together.
pub struct App<T: BleTransport> {
    pub settings: Settings,
    pub cancel_app: CancellationToken,
    store: MetricsStore,
    scanner: Scanner<T>,
    session: ConnectionSession<T>,
    storage: WorkoutStorage,
}

impl<T: BleTransport> App<T> {
    pub fn build(
        settings: Settings,
        transport: Arc<T>,
        store: MetricsStore,
        cancel_app: CancellationToken,
    ) -> Self {
        let options = settings.session_options();
        let scanner = Scanner::new(
            Arc::clone(&transport),
            settings.scan_duration(),
            options.simulated,
        );
        let session = ConnectionSession::new(transport, store.clone(), options);
        let storage = WorkoutStorage::new(&settings.storage.workouts_dir);
        Self {
            settings,
            cancel_app,
            store,
            scanner,
            session,
            storage,
        }
    }

    pub fn store(&self) -> &MetricsStore {
        &self.store
    }

    pub fn session_state(&self) -> ConnectionState {
        self.session.state()
    }

    pub async fn scan(&self) -> Result<Vec<DeviceDescriptor>, AppError> {
        self.scanner.scan().await
    }

    /// Explicit request, then the saved device if it's nearby, then the strongest signal.
    fn pick_device(&self, devices: &[DeviceDescriptor], requested: Option<&str>) -> Option<String> {
        if let Some(address) = requested {
            return Some(address.to_owned());
        }
        let saved = &self.settings.ble.saved_address;
        if !saved.is_empty() {
            if let Some(device) = devices
                .iter()
                .find(|d| d.address.eq_ignore_ascii_case(saved))
            {
                return Some(device.address.clone());
            }
            info!("Saved device {saved} not found nearby");
        }
        devices.first().map(|d| d.address.clone())
    }

    /// Records until `cancel_app` fires, then archives the ride and returns its summary.
    pub async fn ride(&mut self, requested: Option<&str>) -> Result<WorkoutSummary, AppError> {
        let devices = self.scan().await?;
        let address = self
            .pick_device(&devices, requested)
            .ok_or_else(|| AppError::DeviceUnavailable("No fitness devices found".to_string()))?;
        let name = devices
            .iter()
            .find(|d| d.address == address)
            .map_or_else(|| address.clone(), |d| d.name.clone());

        let connected_name = name.clone();
        self.session
            .connect(
                &address,
                Some(Box::new(move || {
                    info!("{connected_name} is live, metrics will start flowing");
                })),
            )
            .await?;
        if !self.session.is_simulated() {
            self.settings.ble.saved_address = address;
        }

        let mut report_interval = tokio::time::interval(self.settings.report_interval());
        loop {
            tokio::select! {
                _ = report_interval.tick() => {
                    if !self.session.link_alive().await {
                        warn!("Lost connection to {name}, ending ride");
                        break;
                    }
                    self.report();
                }
                _ = self.cancel_app.cancelled() => {
                    info!("Ending ride with {name}");
                    break;
                }
            }
        }

        Ok(self.finish().await)
    }

    /// Logs the newest value of every metric along with how it sits against its target.
    fn report(&self) {
        for metric in Metric::ALL {
            let Some(sample) = self.store.latest(metric) else {
                continue;
            };
            let unit = metric.unit();
            match target_for(&self.settings.targets, metric).map(|t| t.classify(sample.value)) {
                Some(TargetStatus::Below) => {
                    warn!("{metric}: {:.1} {unit} (below target)", sample.value)
                }
                Some(TargetStatus::Above) => {
                    warn!("{metric}: {:.1} {unit} (above target)", sample.value)
                }
                Some(TargetStatus::Within) => {
                    info!("{metric}: {:.1} {unit} (on target)", sample.value)
                }
                Some(TargetStatus::Disabled) | None => {
                    info!("{metric}: {:.1} {unit}", sample.value)
                }
            }
        }
    }

    /// Disconnects, archives whatever was recorded and clears the store once it's safely saved.
    pub async fn finish(&mut self) -> WorkoutSummary {
        if let Err(e) = self.session.disconnect().await {
            error!("Disconnect failed: {e}");
        }
        let snapshot = self.store.snapshot();
        let summary = summarize(&snapshot);
        if summary.metrics.is_empty() {
            info!("Nothing was recorded, skipping save");
            return summary;
        }
        if self.storage.save(&session_id(), &snapshot).await {
            self.store.reset();
        } else {
            warn!("Workout wasn't saved, keeping samples in memory");
        }
        summary
    }

    pub async fn history(&self) -> Vec<WorkoutEntry> {
        self.storage.list().await
    }

    pub async fn summary_of(&self, path: &Path) -> WorkoutSummary {
        summarize(&self.storage.get(path).await)
    }
}

pub fn format_duration(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    format!("{:02}:{:02}", total / 60, total % 60)
}

pub fn print_summary(summary: &WorkoutSummary) {
    println!("Duration: {}", format_duration(summary.duration_seconds));
    for (metric, stats) in &summary.metrics {
        match stats.avg {
            Some(avg) => println!(
                "{metric}: avg {avg:.1} {unit}, max {max:.1} {unit}",
                max = stats.max,
                unit = stats.unit
            ),
            None => println!("{metric}: {:.2} {}", stats.max, stats.unit),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations() {
        assert_eq!(format_duration(0.0), "00:00");
        assert_eq!(format_duration(61.9), "01:01");
        assert_eq!(format_duration(3600.0), "60:00");
        assert_eq!(format_duration(-5.0), "00:00");
    }
}
