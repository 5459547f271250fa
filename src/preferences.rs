//! Operator preferences: port settings, sampling intervals and the log location.
//!
//! Values are layered: built-in defaults, then a TOML file, then environment
//! variables prefixed `DC_LOGGER_` (for example `DC_LOGGER_BAUD=9600`).

use std::{
    fs,
    path::{Path, PathBuf},
};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use fugit::MillisDurationU32;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::{instrument::PortId, logfile::with_default_extension};

pub const ENV_PREFIX: &str = "DC_LOGGER_";
pub const DEFAULT_FILE_NAME: &str = "preferences.toml";

#[derive(Error, Debug)]
pub enum PreferencesError {
    #[error("Failed to load preferences: {0}")]
    Load(#[from] Box<figment::Error>),
    #[error("Failed to serialize preferences: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Failed to write preferences to \"{}\": {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    pub port: PortId,
    pub baud: u32,
    pub timeout_secs: f64,
    pub display_interval_secs: f64,
    pub file_log_interval_secs: f64,
    pub log_dir: PathBuf,
    pub file_name: String,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            port: PortId::from("1"),
            baud: 38400,
            timeout_secs: 2.0,
            display_interval_secs: 60.0,
            file_log_interval_secs: 60.0,
            log_dir: PathBuf::from("."),
            file_name: "dc_load_log.csv".to_string(),
        }
    }
}

impl Preferences {
    /// Defaults overlaid with `path` (if it exists) and the environment.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, PreferencesError> {
        let path = path.as_ref();
        debug!(path = %path.display(), "loading preferences");
        Figment::from(Serialized::defaults(Preferences::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX))
            .extract()
            .map_err(|e| PreferencesError::Load(Box::new(e)))
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<(), PreferencesError> {
        let path = path.as_ref();
        let text = toml::to_string_pretty(self)?;
        fs::write(path, text).map_err(|source| PreferencesError::Write {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "preferences saved");
        Ok(())
    }

    /// Full path of the log file.
    pub fn log_path(&self) -> PathBuf {
        with_default_extension(self.log_dir.join(&self.file_name))
    }

    /// Point the log at `path`, splitting it into directory and file name.
    pub fn set_log_path(&mut self, path: impl AsRef<Path>) {
        let path = with_default_extension(path);
        if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            self.log_dir = dir.to_path_buf();
        }
        if let Some(name) = path.file_name() {
            self.file_name = name.to_string_lossy().into_owned();
        }
    }

    /// Serial timeout, clamped to what a `u32` of milliseconds can hold.
    pub fn timeout(&self) -> MillisDurationU32 {
        let millis = (self.timeout_secs.max(0.0) * 1000.0).round();
        MillisDurationU32::millis(millis.min(u32::MAX as f64) as u32)
    }
}
