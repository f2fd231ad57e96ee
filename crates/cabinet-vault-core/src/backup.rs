//! Backup writer
//!
//! capture → serialize → seal → atomic write of `backup-<yyyy-MM-dd>.enc`.
//! The artifact is written to a temp file in the target directory, synced
//! and renamed into place, so a crash leaves either the previous artifact or
//! the new one, never a truncated file. A second run on the same day
//! replaces the first.

use chrono::NaiveDate;
use std::fs;
use std::io::Write;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use crate::cipher::{self, EncryptionKey};
use crate::clock::Clock;
use crate::error::VaultError;
use crate::gateway::PersistenceGateway;
use crate::snapshot::{self, Snapshot};

const ARTIFACT_PREFIX: &str = "backup-";
const ARTIFACT_EXTENSION: &str = "enc";

#[cfg(unix)]
const DIR_PERMISSIONS: u32 = 0o700;
#[cfg(unix)]
const FILE_PERMISSIONS: u32 = 0o600;

/// `backup-2024-03-01.enc`
#[must_use]
pub fn artifact_file_name(date: NaiveDate) -> String {
    format!(
        "{ARTIFACT_PREFIX}{}.{ARTIFACT_EXTENSION}",
        date.format("%Y-%m-%d")
    )
}

/// Capture the dataset and write today's artifact into `target_dir`.
///
/// Takes no locks. Callers that may race with a restore or another backup
/// go through [`crate::Vault::backup`].
///
/// # Errors
///
/// Propagates every failure: gateway reads, encoding, encryption and I/O.
pub fn run<G>(
    gateway: &G,
    key: &EncryptionKey,
    clock: &dyn Clock,
    target_dir: &Path,
) -> Result<PathBuf, VaultError>
where
    G: PersistenceGateway + ?Sized,
{
    let snapshot = snapshot::capture(gateway, clock)?;
    write_snapshot(&snapshot, key, clock.today(), target_dir)
}

/// Encrypt an already captured snapshot and write it as the artifact for
/// `date`.
///
/// # Errors
///
/// Returns [`VaultError::Io`] if the directory or file cannot be written,
/// or an encoding/encryption error.
pub fn write_snapshot(
    snapshot: &Snapshot,
    key: &EncryptionKey,
    date: NaiveDate,
    target_dir: &Path,
) -> Result<PathBuf, VaultError> {
    let plaintext = snapshot::serialize(snapshot)?;
    let envelope = cipher::seal(&plaintext, key)?;
    let contents = envelope.to_artifact_bytes()?;

    ensure_backup_dir(target_dir)?;
    let path = target_dir.join(artifact_file_name(date));
    write_atomic(&path, &contents)?;

    let summary = snapshot.summary();
    tracing::info!(
        "Backup written to {} ({} patients, {} consultations, {} documents, {} payments)",
        path.display(),
        summary.patients,
        summary.consultations,
        summary.documents,
        summary.payments
    );
    Ok(path)
}

fn ensure_backup_dir(dir: &Path) -> std::io::Result<()> {
    if dir.is_dir() {
        return Ok(());
    }
    fs::create_dir_all(dir)?;
    #[cfg(unix)]
    fs::set_permissions(dir, fs::Permissions::from_mode(DIR_PERMISSIONS))?;
    tracing::info!("Created backup directory: {:?}", dir);
    Ok(())
}

fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| std::io::Error::other("artifact path has no parent directory"))?;

    let mut temp = tempfile::Builder::new()
        .prefix(".backup-")
        .suffix(".tmp")
        .tempfile_in(parent)?;
    temp.write_all(contents)?;
    temp.as_file().sync_all()?;
    #[cfg(unix)]
    temp.as_file()
        .set_permissions(fs::Permissions::from_mode(FILE_PERMISSIONS))?;

    temp.persist(path).map_err(|e| e.error)?;

    // make the rename itself durable
    #[cfg(unix)]
    fs::File::open(parent)?.sync_all()?;
    Ok(())
}
