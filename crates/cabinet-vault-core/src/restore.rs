//! Restore orchestrator
//!
//! Reading → Decrypting → Deserializing → Applying → Committed | RolledBack.
//!
//! Nothing before `Applying` touches the gateway. The apply phase runs in a
//! single gateway transaction: delete children before parents, then insert
//! parents before children. Any failure rolls the whole transaction back.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::path::Path;

use crate::cipher::{self, EncryptionKey, Envelope};
use crate::error::VaultError;
use crate::gateway::{GatewayError, GatewayTransaction, PersistenceGateway};
use crate::snapshot::{self, Snapshot, SnapshotSummary};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestorePhase {
    Reading,
    Decrypting,
    Deserializing,
    Applying,
    Committed,
    RolledBack,
}

impl fmt::Display for RestorePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reading => write!(f, "reading"),
            Self::Decrypting => write!(f, "decrypting"),
            Self::Deserializing => write!(f, "deserializing"),
            Self::Applying => write!(f, "applying"),
            Self::Committed => write!(f, "committed"),
            Self::RolledBack => write!(f, "rolled_back"),
        }
    }
}

/// What a committed restore put back
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestoreReport {
    pub snapshot_timestamp: DateTime<Utc>,
    pub patients: usize,
    pub antecedents: usize,
    pub consultations: usize,
    pub documents: usize,
    pub payments: usize,
}

impl From<SnapshotSummary> for RestoreReport {
    fn from(summary: SnapshotSummary) -> Self {
        Self {
            snapshot_timestamp: summary.timestamp,
            patients: summary.patients,
            antecedents: summary.antecedents,
            consultations: summary.consultations,
            documents: summary.documents,
            payments: summary.payments,
        }
    }
}

pub(crate) fn enter(phase: RestorePhase, artifact: &Path) {
    tracing::debug!("Restore {}: {}", phase, artifact.display());
}

/// Read, decrypt and validate an artifact without applying it.
///
/// # Errors
///
/// Returns [`VaultError::ArtifactNotFound`], [`VaultError::MalformedArtifact`],
/// [`VaultError::Authentication`] or [`VaultError::MalformedSnapshot`].
pub fn load(artifact: &Path, key: &EncryptionKey) -> Result<Snapshot, VaultError> {
    enter(RestorePhase::Reading, artifact);
    let bytes = std::fs::read(artifact).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => VaultError::ArtifactNotFound(artifact.to_path_buf()),
        _ => VaultError::Io(e),
    })?;
    let envelope = Envelope::from_artifact_bytes(&bytes)?;

    enter(RestorePhase::Decrypting, artifact);
    let plaintext = cipher::open(&envelope, key)?;

    enter(RestorePhase::Deserializing, artifact);
    Ok(snapshot::deserialize(&plaintext)?)
}

/// Report what an artifact holds. Never touches a gateway.
///
/// # Errors
///
/// Same as [`load`].
pub fn inspect(artifact: &Path, key: &EncryptionKey) -> Result<SnapshotSummary, VaultError> {
    load(artifact, key).map(|snapshot| snapshot.summary())
}

/// Replace the gateway's whole dataset with `snapshot` in one transaction.
///
/// # Errors
///
/// Returns [`VaultError::MalformedSnapshot`] if the snapshot fails
/// validation (the gateway is not touched), or [`VaultError::Transaction`]
/// carrying the cause when the apply phase failed and was rolled back.
pub fn apply<G>(gateway: &G, snapshot: &Snapshot) -> Result<RestoreReport, VaultError>
where
    G: PersistenceGateway + ?Sized,
{
    snapshot.validate()?;

    gateway
        .run_transaction(&mut |tx| replace_all(tx, snapshot))
        .map_err(|source| {
            tracing::warn!("Restore rolled back: {}", source);
            VaultError::Transaction { source }
        })?;

    Ok(snapshot.summary().into())
}

/// Delete everything, then insert the snapshot. Deletes run payments,
/// documents, consultations, antecedents, patients; inserts run patients,
/// consultations, documents.
///
/// # Errors
///
/// Returns the first [`GatewayError`] raised by the transaction.
pub fn replace_all(
    tx: &mut dyn GatewayTransaction,
    snapshot: &Snapshot,
) -> Result<(), GatewayError> {
    tx.delete_all_payments()?;
    tx.delete_all_documents()?;
    tx.delete_all_consultations()?;
    tx.delete_all_antecedents()?;
    tx.delete_all_patients()?;

    for patient in &snapshot.data.patients {
        tx.create_patient_with_antecedents(patient, &patient.antecedents)?;
    }
    for consultation in &snapshot.data.consultations {
        tx.create_consultation_with_payment(consultation, consultation.paiement.as_ref())?;
    }
    tx.create_documents_bulk(&snapshot.data.documents)?;
    Ok(())
}

/// Restore `artifact` into `gateway`.
///
/// Takes no locks: a concurrent restore is not rejected and a concurrent
/// backup is not held off. Use [`crate::Vault::restore`] for that.
///
/// # Errors
///
/// Any error from [`load`] (gateway untouched) or [`apply`].
pub fn run<G>(
    artifact: &Path,
    key: &EncryptionKey,
    gateway: &G,
) -> Result<RestoreReport, VaultError>
where
    G: PersistenceGateway + ?Sized,
{
    let snapshot = load(artifact, key)?;
    enter(RestorePhase::Applying, artifact);
    match apply(gateway, &snapshot) {
        Ok(report) => {
            enter(RestorePhase::Committed, artifact);
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
        Err(e) => {
            enter(RestorePhase::RolledBack, artifact);
            Err(e)
        }
    }
}
