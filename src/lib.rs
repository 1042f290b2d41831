#![deny(unused_must_use)]

use std::path::PathBuf;
use std::sync::Arc;

use args::{SubCommands, TopLevelCmd};
use errors::AppError;
use tokio::fs::create_dir;
use tokio_util::sync::CancellationToken;

use rolling_file::{BasicRollingFileAppender, RollingConditionBasic};
use tracing::{info, warn};
use tracing_subscriber::{filter, prelude::*};
use tracing_subscriber::{fmt::time::ChronoLocal, layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(not(any(debug_assertions, feature = "portable")))]
use directories::BaseDirs;

pub mod args;
pub mod errors;

pub mod availability;
pub mod decoder;
pub mod metrics;
pub mod scan;
pub mod session;
pub mod settings;
pub mod storage;
pub mod summary;
pub mod targets;

mod app;

pub use app::{format_duration, print_summary, App};

use metrics::MetricsStore;
use session::btle::BtleplugTransport;
use settings::{Settings, CONFIG_FILE_NAME};

pub async fn run(args: TopLevelCmd, cancel_app: CancellationToken) -> Result<(), AppError> {
    let working_directory = determine_working_directory().ok_or(AppError::WorkDir)?;
    // Relative paths on the command line are meant against where the user ran us from
    let launch_dir = std::env::current_dir()?;
    let config_path = match &args.config_override {
        Some(path) if path.is_relative() => launch_dir.join(path),
        Some(path) => path.clone(),
        None => working_directory.join(CONFIG_FILE_NAME),
    };
    if !working_directory.exists() {
        create_dir(&working_directory)
            .await
            .map_err(|e| AppError::CreateDir {
                path: working_directory.clone(),
                source: e,
            })?;
    }
    std::env::set_current_dir(&working_directory)?;

    let log_name = std::env::current_exe()?
        .with_extension("log")
        .file_name()
        .ok_or(AppError::WorkDir)?
        .to_owned();
    let file_appender = BasicRollingFileAppender::new(
        log_name,
        RollingConditionBasic::new().max_size(1024 * 1024 * 5),
        2,
    )?;
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let time_fmt = ChronoLocal::new("%Y-%m-%d %H:%M:%S%.6f".to_owned());
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_file(false)
        .with_ansi(false)
        .with_target(true)
        .with_timer(time_fmt)
        .with_line_number(true);
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact();
    // Starting off at DEBUG, and setting to whatever user has defined
    let (level_layer, reload_handle) =
        tracing_subscriber::reload::Layer::new(filter::LevelFilter::DEBUG);
    // Allow everything through but keep the platform BLE stacks to info, they're chatty
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new("trace,btleplug=info,bluez_async=info")
    });
    tracing_subscriber::registry()
        .with(level_layer)
        .with(env_filter)
        .with(file_layer)
        .with(stderr_layer)
        .init();

    info!("Starting app... v{}", env!("CARGO_PKG_VERSION"));

    let mut settings = Settings::load(&config_path, args.config_required)?;
    // Simulation is a per-run choice when it comes from the CLI or environment
    let persisted_simulation =
        Settings::load_from_file(&config_path, args.config_required)?.simulation.enabled;
    info!("Loaded config from: {}", config_path.display());
    if let Err(e) = reload_handle.reload(settings.get_log_level()) {
        warn!("Couldn't apply configured log level: {e}");
    }
    if args.simulate {
        settings.simulation.enabled = true;
    }
    if settings.simulation.enabled {
        info!("Simulation mode, Bluetooth won't be used");
    }

    let transport = Arc::new(BtleplugTransport::new());
    let mut app = App::build(settings, transport, MetricsStore::default(), cancel_app);

    match &args.subcommands {
        SubCommands::Scan(_) => {
            let devices = app.scan().await?;
            if devices.is_empty() {
                println!("No fitness devices found");
            }
            for device in devices {
                println!(
                    "{} ({}) - Signal: {} dBm",
                    device.name, device.address, device.signal_strength
                );
            }
        }
        SubCommands::Ride(ride) => {
            let summary = app.ride(ride.address.as_deref()).await?;
            print_summary(&summary);
        }
        SubCommands::History(_) => {
            let workouts = app.history().await;
            if workouts.is_empty() {
                println!("No workout history found");
            }
            for workout in workouts {
                println!(
                    "{} - {}",
                    workout.modified.format("%B %d, %Y %I:%M %p"),
                    working_directory.join(&workout.path).display()
                );
            }
        }
        SubCommands::Summary(summary) => {
            let launch_relative = launch_dir.join(&summary.path);
            let path = if summary.path.is_relative() && launch_relative.exists() {
                launch_relative
            } else {
                summary.path.clone()
            };
            print_summary(&app.summary_of(&path).await);
        }
    }

    if !args.no_save {
        app.settings.simulation.enabled = persisted_simulation;
        app.settings.save(&config_path).await?;
    }

    info!("Shutting down gracefully...");
    Ok(())
}

/// Returns the directory that logs, config, and other files should be placed in by default.
// If the app is built with the portable feature, it will just return it's parent directory.
// If there is a config file present adjacent to the executable, the executable's parent path is returned.
// Otherwise, it will return the `directories` `config_dir` output.
//
// Debug builds are always portable. Release builds can optionally have the "portable" feature enabled.
fn determine_working_directory() -> Option<PathBuf> {
    let exe_path = std::env::current_exe().ok()?;
    let exe_parent = exe_path.parent()?.to_path_buf();

    if is_portable() || exe_parent.join(CONFIG_FILE_NAME).exists() {
        Some(exe_parent)
    } else {
        get_user_dir()
    }
}

#[cfg(any(debug_assertions, feature = "portable"))]
fn is_portable() -> bool {
    true
}

#[cfg(not(any(debug_assertions, feature = "portable")))]
fn is_portable() -> bool {
    false
}

#[cfg(any(debug_assertions, feature = "portable"))]
fn get_user_dir() -> Option<PathBuf> {
    None
}

#[cfg(not(any(debug_assertions, feature = "portable")))]
fn get_user_dir() -> Option<PathBuf> {
    if let Some(base_dirs) = BaseDirs::new() {
        let mut config_dir = base_dirs.config_dir().to_owned();
        config_dir.push(env!("CARGO_PKG_NAME"));
        Some(config_dir)
    } else {
        None
    }
}
