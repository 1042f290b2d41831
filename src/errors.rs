use std::path::PathBuf;

use thiserror::Error;

/// Represents all possible errors that can occur during the app's lifecycle
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Failed to create directory \"{path}\": {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Error parsing config: {0}")]
    Config(#[from] config::ConfigError),
    #[error("TOML Serialization Error: {0}")]
    TomlSer(#[from] toml::ser::Error),
    #[error("JSON Error: {0}")]
    Json(#[from] serde_json::Error),
    // My errors
    #[error("Failed to get working directory")]
    WorkDir,
    #[error("Bluetooth device unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("A device session is already active, disconnect it first")]
    SessionActive,
    #[error("Unexpected session failure: {0}")]
    Unexpected(String),
}

impl AppError {
    /// Folds transport-level failures into the single "device unavailable" class
    /// callers are expected to handle, keeping the cause for the message.
    pub fn unavailable(context: &str, err: impl std::fmt::Display) -> Self {
        AppError::DeviceUnavailable(format!("{context}: {err}"))
    }
}
