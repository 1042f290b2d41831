use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde_derive::{Deserialize, Serialize};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::{error, info, warn};

use crate::errors::AppError;
use crate::metrics::{Metric, MetricSample, MetricSeries, MetricsSnapshot};

const WORKOUT_FILE_PREFIX: &str = "workout_";
const SESSION_ID_FORMAT: &str = "%Y%m%d_%H%M%S";

/// `YYYYMMDD_HHMMSS` in local time, used both as the session id and in the file name.
pub fn session_id() -> String {
    Local::now().format(SESSION_ID_FORMAT).to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeriesRecord {
    pub values: Vec<f64>,
    pub timestamps: Vec<f64>,
}

/// On-disk shape of one archived workout.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkoutRecord {
    pub timestamp: String,
    pub metrics: BTreeMap<Metric, SeriesRecord>,
}

impl WorkoutRecord {
    /// Metrics without any samples are left out.
    pub fn from_snapshot(session_id: &str, snapshot: &MetricsSnapshot) -> Self {
        let metrics = snapshot
            .iter()
            .filter(|(_, series)| !series.is_empty())
            .map(|(&metric, series)| {
                let record = SeriesRecord {
                    values: series.values().collect(),
                    timestamps: series.timestamps().collect(),
                };
                (metric, record)
            })
            .collect();
        Self {
            timestamp: session_id.to_owned(),
            metrics,
        }
    }

    pub fn into_snapshot(self) -> MetricsSnapshot {
        self.metrics
            .into_iter()
            .map(|(metric, record)| {
                if record.values.len() != record.timestamps.len() {
                    warn!(
                        "{metric}: {} values but {} timestamps, truncating",
                        record.values.len(),
                        record.timestamps.len()
                    );
                }
                let samples = record
                    .values
                    .into_iter()
                    .zip(record.timestamps)
                    .map(|(value, timestamp)| MetricSample { value, timestamp })
                    .collect();
                (metric, MetricSeries::from_samples(samples))
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkoutEntry {
    pub name: String,
    pub path: PathBuf,
    pub modified: DateTime<Local>,
}

/// Archive of finished workouts, one JSON file each.
///
/// Saving is a side errand to riding, so failures are logged and reported as
/// `false`/empty rather than raised.
#[derive(Debug, Clone)]
pub struct WorkoutStorage {
    dir: PathBuf,
}

impl WorkoutStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, session_id: &str) -> PathBuf {
        self.dir
            .join(format!("{WORKOUT_FILE_PREFIX}{session_id}.json"))
    }

    pub async fn save(&self, session_id: &str, snapshot: &MetricsSnapshot) -> bool {
        match self.try_save(session_id, snapshot).await {
            Ok(path) => {
                info!("Saved workout to {}", path.display());
                true
            }
            Err(e) => {
                error!("Error saving workout data: {e}");
                false
            }
        }
    }

    async fn try_save(
        &self,
        session_id: &str,
        snapshot: &MetricsSnapshot,
    ) -> Result<PathBuf, AppError> {
        if !self.dir.exists() {
            fs::create_dir_all(&self.dir)
                .await
                .map_err(|e| AppError::CreateDir {
                    path: self.dir.clone(),
                    source: e,
                })?;
        }
        let record = WorkoutRecord::from_snapshot(session_id, snapshot);
        let buffer = serde_json::to_string_pretty(&record)?;
        let path = self.path_for(session_id);
        let mut file = File::create(&path).await?;
        file.write_all(buffer.as_bytes()).await?;
        file.flush().await?;
        file.sync_all().await?;
        Ok(path)
    }

    /// Newest first.
    pub async fn list(&self) -> Vec<WorkoutEntry> {
        match self.try_list().await {
            Ok(entries) => entries,
            Err(e) => {
                error!("Failed to list workouts in {}: {e}", self.dir.display());
                Vec::new()
            }
        }
    }

    async fn try_list(&self) -> Result<Vec<WorkoutEntry>, AppError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut entries = Vec::new();
        let mut dir = fs::read_dir(&self.dir).await?;
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with(WORKOUT_FILE_PREFIX) || !name.ends_with(".json") {
                continue;
            }
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            entries.push(WorkoutEntry {
                name,
                path: entry.path(),
                modified: metadata.modified()?.into(),
            });
        }
        entries.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| b.name.cmp(&a.name)));
        Ok(entries)
    }

    /// The archived series, or an empty snapshot if the file can't be read.
    pub async fn get(&self, path: &Path) -> MetricsSnapshot {
        self.get_record(path).await.into_snapshot()
    }

    pub async fn get_record(&self, path: &Path) -> WorkoutRecord {
        match self.try_get(path).await {
            Ok(record) => record,
            Err(e) => {
                error!("Error retrieving workout {}: {e}", path.display());
                WorkoutRecord::default()
            }
        }
    }

    async fn try_get(&self, path: &Path) -> Result<WorkoutRecord, AppError> {
        let buffer = fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&buffer)?)
    }
}
