use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// The single per-device configuration record.
///
/// Every field defaults so that configs written by older or newer versions
/// still parse; unknown keys are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub user_secret: String,
    pub is_enabled: bool,
    pub device_id: String,
    /// Raw `history 1` line of the most recently captured bash command.
    pub last_saved_history_line: String,
}

impl ClientConfig {
    /// A fresh, enabled config with a newly generated device id.
    pub fn new(user_secret: String) -> Self {
        Self {
            user_secret,
            is_enabled: true,
            device_id: uuid::Uuid::new_v4().to_string(),
            last_saved_history_line: String::new(),
        }
    }
}

/// Reads and writes `config.json` inside the hishtory directory.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    dir: PathBuf,
}

impl ConfigStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store rooted at [`crate::paths::user_dir`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NoHomeDir`] if no home directory can be found.
    pub fn from_env() -> Result<Self, ConfigError> {
        crate::paths::user_dir()
            .map(Self::new)
            .ok_or(ConfigError::NoHomeDir)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(crate::paths::CONFIG_FILE)
    }

    /// Load the config.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotFound`] when the file is absent (the device is
    /// not set up), otherwise I/O or parse failures.
    pub fn get(&self) -> Result<ClientConfig, ConfigError> {
        let path = self.path();
        let data = match std::fs::read(&path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ConfigError::NotFound { path });
            }
            Err(source) => {
                return Err(ConfigError::IoFailure {
                    op: "read config",
                    path,
                    source,
                });
            }
        };
        serde_json::from_slice(&data).map_err(|source| ConfigError::ParseFailure { path, source })
    }

    /// Persist the config, creating the directory if needed. The file is
    /// written owner-read/write only because it holds the user secret.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file cannot be written.
    pub fn set(&self, config: &ClientConfig) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.dir).map_err(|source| ConfigError::IoFailure {
            op: "create",
            path: self.dir.clone(),
            source,
        })?;
        let path = self.path();
        let body = serde_json::to_vec(config).map_err(|source| ConfigError::ParseFailure {
            path: path.clone(),
            source,
        })?;
        crate::fs::write_private_file(&path, &body).map_err(|source| ConfigError::IoFailure {
            op: "write config",
            path,
            source,
        })
    }

    /// Whether a config record exists, treating any other error as fatal.
    ///
    /// # Errors
    ///
    /// Propagates errors other than [`ConfigError::NotFound`].
    pub fn is_installed(&self) -> Result<bool, ConfigError> {
        match self.get() {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// # Errors
    ///
    /// Returns an error if the config cannot be read.
    pub fn is_enabled(&self) -> Result<bool, ConfigError> {
        Ok(self.get()?.is_enabled)
    }

    /// # Errors
    ///
    /// Returns an error if the config cannot be read or written.
    pub fn enable(&self) -> Result<(), ConfigError> {
        self.set_enabled(true)
    }

    /// # Errors
    ///
    /// Returns an error if the config cannot be read or written.
    pub fn disable(&self) -> Result<(), ConfigError> {
        self.set_enabled(false)
    }

    fn set_enabled(&self, enabled: bool) -> Result<(), ConfigError> {
        let mut config = self.get()?;
        config.is_enabled = enabled;
        self.set(&config)
    }

    /// Record `line` as the last captured raw history line.
    ///
    /// Returns `false` without writing if `line` equals the stored marker,
    /// meaning the shell re-delivered a command that was already saved.
    ///
    /// # Errors
    ///
    /// Returns an error if the config cannot be read or written.
    pub fn advance_last_line(&self, line: &str) -> Result<bool, ConfigError> {
        let mut config = self.get()?;
        if config.last_saved_history_line == line {
            return Ok(false);
        }
        config.last_saved_history_line = line.to_owned();
        self.set(&config)?;
        Ok(true)
    }
}
