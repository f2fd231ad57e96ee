//! Entry point for embedding code and the CLI
//!
//! `Vault` owns the gateway, the key and the backup directory, and holds the
//! locks that keep backups and restores from interleaving:
//!
//! - restore guard: a second concurrent restore fails with
//!   [`VaultError::RestoreInProgress`] instead of waiting
//! - dataset lock: backup capture reads under it, restore apply writes
//! - write lock: whole backup runs are serialized, so scheduled and manual
//!   runs never race on the same daily file

use chrono::NaiveTime;
use parking_lot::{Mutex, RwLock};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::backup;
use crate::cipher::EncryptionKey;
use crate::clock::{Clock, SystemClock};
use crate::config::VaultConfig;
use crate::error::VaultError;
use crate::gateway::PersistenceGateway;
use crate::restore::{self, RestorePhase, RestoreReport};
use crate::schedule::ScheduleTrigger;
use crate::snapshot::{self, SnapshotSummary};

pub struct Vault<G> {
    gateway: G,
    key: EncryptionKey,
    backup_dir: PathBuf,
    clock: Arc<dyn Clock>,
    restore_guard: Mutex<()>,
    dataset_lock: RwLock<()>,
    write_lock: Mutex<()>,
}

impl<G> std::fmt::Debug for Vault<G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vault")
            .field("backup_dir", &self.backup_dir)
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl<G: PersistenceGateway> Vault<G> {
    pub fn new(gateway: G, key: EncryptionKey, backup_dir: impl Into<PathBuf>) -> Self {
        Self::with_clock(gateway, key, backup_dir, Arc::new(SystemClock))
    }

    pub fn with_clock(
        gateway: G,
        key: EncryptionKey,
        backup_dir: impl Into<PathBuf>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            gateway,
            key,
            backup_dir: backup_dir.into(),
            clock,
            restore_guard: Mutex::new(()),
            dataset_lock: RwLock::new(()),
            write_lock: Mutex::new(()),
        }
    }

    pub fn from_config(gateway: G, config: &VaultConfig) -> Self {
        Self::new(gateway, config.encryption_key.clone(), &config.backup_dir)
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    /// Write today's artifact and return its path.
    ///
    /// # Errors
    ///
    /// See [`backup::run`].
    pub fn backup(&self) -> Result<PathBuf, VaultError> {
        let _writer = self.write_lock.lock();
        let snapshot = {
            let _read = self.dataset_lock.read();
            snapshot::capture(&self.gateway, self.clock.as_ref())?
        };
        backup::write_snapshot(&snapshot, &self.key, self.clock.today(), &self.backup_dir)
    }

    /// Replace the dataset with the contents of `artifact`.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::RestoreInProgress`] right away if another
    /// restore is running, otherwise see [`restore::run`].
    pub fn restore(&self, artifact: &Path) -> Result<RestoreReport, VaultError> {
        let Some(_guard) = self.restore_guard.try_lock() else {
            tracing::warn!(
                "Rejected restore of {}: another restore is running",
                artifact.display()
            );
            return Err(VaultError::RestoreInProgress);
        };

        let snapshot = restore::load(artifact, &self.key)?;
        restore::enter(RestorePhase::Applying, artifact);
        let applied = {
            let _write = self.dataset_lock.write();
            restore::apply(&self.gateway, &snapshot)
        };
        let report = match applied {
            Ok(report) => {
                restore::enter(RestorePhase::Committed, artifact);
                report
            }
            Err(e) => {
                restore::enter(RestorePhase::RolledBack, artifact);
                return Err(e);
            }
        };
        tracing::info!(
            "Restored {} ({} patients, {} consultations, {} documents, {} payments)",
            artifact.display(),
            report.patients,
            report.consultations,
            report.documents,
            report.payments
        );
        Ok(report)
    }

    /// # Errors
    ///
    /// See [`restore::inspect`].
    pub fn inspect(&self, artifact: &Path) -> Result<SnapshotSummary, VaultError> {
        restore::inspect(artifact, &self.key)
    }
}

impl<G: PersistenceGateway + 'static> Vault<G> {
    /// Daily trigger that runs [`Vault::backup`] at `at`, local time.
    #[must_use]
    pub fn schedule(self: &Arc<Self>, at: NaiveTime) -> ScheduleTrigger {
        let vault = Arc::clone(self);
        ScheduleTrigger::new(at, move || vault.backup())
    }
}
