use crate::core::config::data::{path_display, ApiTokens, Settings};
use directories::ProjectDirs;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::error::Error as StdError;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

pub const CONFIGURATION_DIR: &str = "configuration";
pub const SETTINGS_FILE: &str = "settings.json";
pub const API_FILE: &str = "api.json";

/// Errors that can occur when loading or saving configuration files.
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    Read {
        /// Path to the configuration file that could not be read.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the configuration file as JSON.
    Parse {
        /// Path to the configuration file with invalid JSON.
        path: PathBuf,
        /// The JSON deserialization error.
        source: serde_json::Error,
    },

    /// Failed to write the configuration file.
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    /// No platform data directory could be determined.
    NoDataDir,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "Failed to read config at {}: {}", path_display(path), source)
            }
            ConfigError::Parse { path, source } => {
                write!(f, "Failed to parse config at {}: {}", path_display(path), source)
            }
            ConfigError::Write { path, source } => {
                write!(f, "Failed to write config at {}: {}", path_display(path), source)
            }
            ConfigError::NoDataDir => write!(f, "Failed to determine data directory"),
        }
    }
}

impl StdError for ConfigError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            ConfigError::Write { source, .. } => Some(source),
            ConfigError::NoDataDir => None,
        }
    }
}

/// Locations of the persisted JSON files under one data root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPaths {
    root: PathBuf,
}

impl DataPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Platform data directory, e.g. `~/.local/share/soul-of-waifu`.
    pub fn platform_default() -> Result<Self, ConfigError> {
        let proj_dirs =
            ProjectDirs::from("org", "soul-of-waifu", "soul-of-waifu").ok_or(ConfigError::NoDataDir)?;
        Ok(Self::new(proj_dirs.data_dir()))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn configuration_dir(&self) -> PathBuf {
        self.root.join(CONFIGURATION_DIR)
    }

    pub fn settings_path(&self) -> PathBuf {
        self.configuration_dir().join(SETTINGS_FILE)
    }

    pub fn api_path(&self) -> PathBuf {
        self.configuration_dir().join(API_FILE)
    }

    pub fn characters_path(&self) -> PathBuf {
        self.configuration_dir()
            .join(crate::core::store::CHARACTERS_FILE)
    }

    /// Directory synthesized speech clips are written to.
    pub fn audio_dir(&self) -> PathBuf {
        self.root.join("audio")
    }
}

pub(crate) fn load_json<T>(path: &Path) -> Result<T, ConfigError>
where
    T: DeserializeOwned + Default,
{
    if !path.exists() {
        return Ok(T::default());
    }
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    if contents.trim().is_empty() {
        return Ok(T::default());
    }
    serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

pub(crate) fn save_json<T: Serialize>(value: &T, path: &Path) -> Result<(), ConfigError> {
    let write_err = |source: std::io::Error| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    };
    let parent = path.parent().filter(|dir| !dir.as_os_str().is_empty());

    if let Some(dir) = parent {
        fs::create_dir_all(dir).map_err(write_err)?;
    }

    let contents = serde_json::to_string_pretty(value).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    let mut temp_file = match parent {
        Some(dir) => NamedTempFile::new_in(dir),
        None => NamedTempFile::new(),
    }
    .map_err(write_err)?;

    temp_file.write_all(contents.as_bytes()).map_err(write_err)?;
    temp_file.as_file_mut().sync_all().map_err(write_err)?;
    temp_file.persist(path).map_err(|err| write_err(err.error))?;
    Ok(())
}

impl Settings {
    pub fn load_from_path(path: &Path) -> Result<Settings, ConfigError> {
        load_json(path)
    }

    pub fn save_to_path(&self, path: &Path) -> Result<(), ConfigError> {
        save_json(self, path)
    }
}

impl ApiTokens {
    pub fn load_from_path(path: &Path) -> Result<ApiTokens, ConfigError> {
        load_json(path)
    }

    pub fn save_to_path(&self, path: &Path) -> Result<(), ConfigError> {
        save_json(self, path)
    }
}
