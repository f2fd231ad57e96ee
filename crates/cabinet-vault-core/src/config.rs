//! Runtime configuration read from the environment
//!
//! Everything is validated up front. A missing or malformed key fails here,
//! before the gateway or the filesystem is touched.

use chrono::NaiveTime;
use std::path::PathBuf;

use crate::cipher::EncryptionKey;

pub const ENV_ENCRYPTION_KEY: &str = "ENCRYPTION_KEY";
pub const ENV_BACKUP_DIR: &str = "CABINET_BACKUP_DIR";
pub const ENV_DB_PATH: &str = "CABINET_DB_PATH";
pub const ENV_BACKUP_TIME: &str = "CABINET_BACKUP_TIME";

pub const DEFAULT_BACKUP_DIR: &str = "backup";
pub const DEFAULT_DB_PATH: &str = "cabinet.sqlite3";
pub const DEFAULT_BACKUP_TIME: &str = "23:00";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),
    #[error("{var} is invalid: {reason}")]
    Invalid { var: &'static str, reason: String },
    #[error("encryption key must be 64 hex characters (32 bytes)")]
    InvalidKey,
}

#[derive(Debug, Clone)]
pub struct VaultConfig {
    pub encryption_key: EncryptionKey,
    pub backup_dir: PathBuf,
    pub database_path: PathBuf,
    /// Raw `CABINET_BACKUP_TIME`, checked by [`VaultConfig::backup_time`]
    backup_time: Option<String>,
}

impl VaultConfig {
    /// Read configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when `ENCRYPTION_KEY` is missing or malformed.
    /// `CABINET_BACKUP_TIME` is only checked when a schedule asks for it.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`VaultConfig::from_env`] with an explicit variable source.
    ///
    /// # Errors
    ///
    /// See [`VaultConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let raw_key = non_empty(ENV_ENCRYPTION_KEY).ok_or(ConfigError::Missing(ENV_ENCRYPTION_KEY))?;
        let encryption_key =
            EncryptionKey::from_hex(&raw_key).map_err(|_| ConfigError::InvalidKey)?;

        let backup_dir = non_empty(ENV_BACKUP_DIR)
            .map_or_else(|| PathBuf::from(DEFAULT_BACKUP_DIR), PathBuf::from);
        let database_path =
            non_empty(ENV_DB_PATH).map_or_else(|| PathBuf::from(DEFAULT_DB_PATH), PathBuf::from);
        let backup_time = non_empty(ENV_BACKUP_TIME);

        Ok(Self {
            encryption_key,
            backup_dir,
            database_path,
            backup_time,
        })
    }

    #[must_use]
    pub fn with_backup_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.backup_dir = dir.into();
        self
    }

    #[must_use]
    pub fn with_database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.database_path = path.into();
        self
    }

    #[must_use]
    pub fn with_backup_time(mut self, at: NaiveTime) -> Self {
        self.backup_time = Some(at.format("%H:%M").to_string());
        self
    }

    /// Local wall-clock time of the daily backup, 23:00 when unset.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when `CABINET_BACKUP_TIME` is not
    /// `HH:MM`.
    pub fn backup_time(&self) -> Result<NaiveTime, ConfigError> {
        parse_backup_time(self.backup_time.as_deref().unwrap_or(DEFAULT_BACKUP_TIME))
    }
}

/// Parse an `HH:MM` wall-clock time.
///
/// # Errors
///
/// Returns [`ConfigError::Invalid`] for anything else.
pub fn parse_backup_time(value: &str) -> Result<NaiveTime, ConfigError> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M").map_err(|e| ConfigError::Invalid {
        var: ENV_BACKUP_TIME,
        reason: format!("expected HH:MM, got {value:?} ({e})"),
    })
}
