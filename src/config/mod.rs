//! Configuration loading for rosterwatch.
//!
//! Settings come from an optional TOML file, then `ROSTERWATCH_*`
//! environment variables (a `.env` file is loaded by the binary first).

mod settings;

pub use settings::{LimitsConfig, Settings};

use std::path::{Path, PathBuf};

use tracing::debug;

/// Config file looked up in the working directory when none is given.
pub const DEFAULT_CONFIG_FILENAME: &str = "rosterwatch.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse TOML config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Invalid value for {var}: '{value}'")]
    Env { var: String, value: String },
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Load settings from `path`, or from `rosterwatch.toml` if present, then
/// apply environment overrides and validate.
pub async fn load_settings(path: Option<&Path>) -> Result<Settings, ConfigError> {
    let mut settings = match path {
        Some(path) => Settings::load_from_path(path).await?,
        None => {
            let default_path = Path::new(DEFAULT_CONFIG_FILENAME);
            if tokio::fs::try_exists(default_path).await.unwrap_or(false) {
                Settings::load_from_path(default_path).await?
            } else {
                debug!("No {} found, using defaults", DEFAULT_CONFIG_FILENAME);
                Settings::default()
            }
        }
    };

    settings.apply_env(|var| std::env::var(var).ok())?;
    settings.validate()?;
    Ok(settings)
}
