use config::{Config, ConfigError, Environment, File as ConfigFile};
use serde_derive::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing_subscriber::filter::LevelFilter;

use crate::errors::AppError;
use crate::session::SessionOptions;
use crate::targets::{default_targets, TargetRange};

pub const CONFIG_FILE_NAME: &str = "town-bike.toml";
const ENV_PREFIX: &str = "TOWN_BIKE";

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct BLESettings {
    pub saved_address: String,
    pub scan_duration_secs: u64,
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct SimulationSettings {
    // When enabled, no Bluetooth hardware is touched at all
    pub enabled: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct StorageSettings {
    pub workouts_dir: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct MiscSettings {
    log_level: String,
    pub report_interval_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    pub ble: BLESettings,
    pub simulation: SimulationSettings,
    pub storage: StorageSettings,
    pub misc: MiscSettings,
    #[serde(default = "default_targets")]
    pub targets: Vec<TargetRange>,
}

impl Settings {
    /// Defaults, then the TOML file at `config_path` (if present, or required),
    /// then `TOWN_BIKE_<SECTION>__<KEY>` environment variables.
    pub fn load(config_path: &Path, required: bool) -> Result<Self, ConfigError> {
        Self::build(config_path, required, true)
    }

    /// Defaults and the TOML file only, i.e. what `save` should write back.
    pub fn load_from_file(config_path: &Path, required: bool) -> Result<Self, ConfigError> {
        Self::build(config_path, required, false)
    }

    fn build(config_path: &Path, required: bool, with_env: bool) -> Result<Self, ConfigError> {
        let default_log_level = if cfg!(debug_assertions) {
            "debug"
        } else {
            "info"
        };

        let mut builder =
            Config::builder().add_source(ConfigFile::from(config_path).required(required));
        if with_env {
            builder = builder.add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );
        }
        let s = builder
            .set_default("ble.saved_address", "")?
            .set_default("ble.scan_duration_secs", 5)?
            .set_default("ble.connect_timeout_secs", 15)?
            .set_default("simulation.enabled", false)?
            .set_default("storage.workouts_dir", "workouts")?
            .set_default("misc.log_level", default_log_level)?
            .set_default("misc.report_interval_secs", 5)?
            .build()?;

        s.try_deserialize()
    }

    pub async fn save(&self, config_path: &Path) -> Result<(), AppError> {
        let toml_string = toml::to_string(self)?;
        let mut file = File::create(config_path).await?;
        file.write_all(toml_string.as_bytes()).await?;
        file.flush().await?;
        file.sync_all().await?;
        Ok(())
    }

    pub fn get_log_level(&self) -> LevelFilter {
        match self.misc.log_level.to_lowercase().as_str() {
            "off" => LevelFilter::OFF,
            "error" => LevelFilter::ERROR,
            "warn" => LevelFilter::WARN,
            "info" => LevelFilter::INFO,
            "debug" => LevelFilter::DEBUG,
            "trace" => LevelFilter::TRACE,
            _ => LevelFilter::INFO,
        }
    }

    pub fn scan_duration(&self) -> Duration {
        Duration::from_secs(self.ble.scan_duration_secs.max(1))
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.misc.report_interval_secs.max(1))
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            simulated: self.simulation.enabled,
            connect_timeout: Duration::from_secs(self.ble.connect_timeout_secs.max(1)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Metric;
    use std::io::Write;

    #[test]
    fn defaults_without_file() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(&dir.path().join("missing.toml"), false).unwrap();
        assert_eq!(settings.ble.scan_duration_secs, 5);
        assert_eq!(settings.storage.workouts_dir, "workouts");
        assert_eq!(settings.targets.len(), 5);
        assert_eq!(settings.session_options().connect_timeout, Duration::from_secs(15));
    }

    #[test]
    fn required_file_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Settings::load(&dir.path().join("missing.toml"), true).is_err());
    }

    #[test]
    fn file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
[ble]
saved_address = "AA:BB:CC:DD:EE:FF"

[misc]
log_level = "trace"

[[targets]]
metric = "power"
min = 200.0
max = 250.0
enabled = true
"#
        )
        .unwrap();
        let settings = Settings::load(&path, true).unwrap();
        assert_eq!(settings.ble.saved_address, "AA:BB:CC:DD:EE:FF");
        assert_eq!(settings.ble.connect_timeout_secs, 15);
        assert_eq!(settings.get_log_level(), LevelFilter::TRACE);
        assert_eq!(settings.targets.len(), 1);
        assert_eq!(settings.targets[0].metric, Metric::Power);
    }

    #[test]
    fn environment_overrides_stay_out_of_file_view() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "[simulation]\nenabled = false\n").unwrap();

        std::env::set_var("TOWN_BIKE_SIMULATION__ENABLED", "true");
        let effective = Settings::load(&path, true);
        let from_file = Settings::load_from_file(&path, true);
        std::env::remove_var("TOWN_BIKE_SIMULATION__ENABLED");

        assert!(effective.unwrap().simulation.enabled);
        assert!(!from_file.unwrap().simulation.enabled);
    }

    #[tokio::test]
    async fn save_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        let settings = Settings::load(&path, false).unwrap();
        settings.save(&path).await.unwrap();
        let reloaded = Settings::load(&path, true).unwrap();
        assert_eq!(reloaded.targets, settings.targets);
        assert_eq!(reloaded.misc.report_interval_secs, 5);
    }
}
