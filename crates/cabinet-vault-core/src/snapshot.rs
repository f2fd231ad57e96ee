//! Snapshot capture and encoding
//!
//! A snapshot is the whole dataset at one instant:
//!
//! ```text
//! { "version": 1, "timestamp": "2024-03-01T23:00:00.000Z",
//!   "data": { "patients": [...], "consultations": [...],
//!             "documents": [...], "paiements": [...] } }
//! ```
//!
//! Encoding follows struct declaration order, so an unchanged snapshot
//! always serializes to the same bytes. Decoding is strict: unknown keys,
//! missing collections and broken references are all rejected.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::clock::Clock;
use crate::gateway::{GatewayError, PersistenceGateway};
use crate::model::{Consultation, Document, Patient, Payment};

/// Current snapshot format version
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("invalid snapshot JSON: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("unsupported snapshot version {found}")]
    UnsupportedVersion { found: u32 },
    #[error("{0}")]
    Invalid(String),
    #[error("failed to encode snapshot: {0}")]
    Encode(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SnapshotData {
    pub patients: Vec<Patient>,
    pub consultations: Vec<Consultation>,
    pub documents: Vec<Document>,
    #[serde(rename = "paiements")]
    pub payments: Vec<Payment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Snapshot {
    /// Absent in snapshots written before versioning; read as version 1
    #[serde(default = "default_version")]
    pub version: u32,
    /// Always whole milliseconds; set only through [`Snapshot::new`] or
    /// decoding
    #[serde(with = "iso_millis")]
    timestamp: DateTime<Utc>,
    pub data: SnapshotData,
}

fn default_version() -> u32 {
    SNAPSHOT_VERSION
}

/// Record counts, for reports and `inspect`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotSummary {
    pub version: u32,
    pub timestamp: DateTime<Utc>,
    pub patients: usize,
    pub antecedents: usize,
    pub consultations: usize,
    pub documents: usize,
    pub payments: usize,
}

impl Snapshot {
    /// Build a snapshot at `timestamp`, truncated to milliseconds so that it
    /// survives an encode/decode cycle unchanged.
    #[must_use]
    pub fn new(timestamp: DateTime<Utc>, data: SnapshotData) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            timestamp: timestamp.trunc_subsecs(3),
            data,
        }
    }

    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    #[must_use]
    pub fn summary(&self) -> SnapshotSummary {
        SnapshotSummary {
            version: self.version,
            timestamp: self.timestamp,
            patients: self.data.patients.len(),
            antecedents: self
                .data
                .patients
                .iter()
                .map(|p| p.antecedents.len())
                .sum(),
            consultations: self.data.consultations.len(),
            documents: self.data.documents.len(),
            payments: self.data.payments.len(),
        }
    }

    /// Check the cross-record invariants a restore relies on.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::Invalid`] naming the first violation found.
    pub fn validate(&self) -> Result<(), SnapshotError> {
        let data = &self.data;

        let mut patient_ids = HashSet::new();
        let mut numeros = HashSet::new();
        for patient in &data.patients {
            if !patient_ids.insert(patient.id.as_str()) {
                return Err(invalid(format!("duplicate patient id {}", patient.id)));
            }
            if !numeros.insert(patient.numero.as_str()) {
                return Err(invalid(format!(
                    "duplicate patient number {}",
                    patient.numero
                )));
            }
            if let Some(a) = patient.antecedents.iter().find(|a| a.patient_id != patient.id) {
                return Err(invalid(format!(
                    "antecedent {} is nested under patient {} but references {}",
                    a.id, patient.id, a.patient_id
                )));
            }
        }

        let mut consultations = HashMap::new();
        for consultation in &data.consultations {
            if consultations
                .insert(consultation.id.as_str(), consultation)
                .is_some()
            {
                return Err(invalid(format!(
                    "duplicate consultation id {}",
                    consultation.id
                )));
            }
            if !patient_ids.contains(consultation.patient_id.as_str()) {
                return Err(invalid(format!(
                    "consultation {} references unknown patient {}",
                    consultation.id, consultation.patient_id
                )));
            }
            if let Some(payment) = &consultation.paiement {
                if payment.consultation_id != consultation.id {
                    return Err(invalid(format!(
                        "payment {} is nested under consultation {} but references {}",
                        payment.id, consultation.id, payment.consultation_id
                    )));
                }
            }
        }

        // payments are re-inserted from their consultation, so the standalone
        // list must hold exactly the nested payments
        let mut paid = HashSet::new();
        for payment in &data.payments {
            let Some(consultation) = consultations.get(payment.consultation_id.as_str()) else {
                return Err(invalid(format!(
                    "payment {} references unknown consultation {}",
                    payment.id, payment.consultation_id
                )));
            };
            if consultation.paiement.as_ref() != Some(payment) {
                return Err(invalid(format!(
                    "payment {} does not match the payment nested under consultation {}",
                    payment.id, consultation.id
                )));
            }
            if !paid.insert(consultation.id.as_str()) {
                return Err(invalid(format!(
                    "consultation {} has more than one payment",
                    consultation.id
                )));
            }
        }
        for consultation in &data.consultations {
            if let Some(payment) = &consultation.paiement {
                if !paid.contains(consultation.id.as_str()) {
                    return Err(invalid(format!(
                        "payment {} nested under consultation {} is missing from paiements",
                        payment.id, consultation.id
                    )));
                }
            }
        }

        let mut document_ids = HashSet::new();
        for document in &data.documents {
            if !document_ids.insert(document.id.as_str()) {
                return Err(invalid(format!("duplicate document id {}", document.id)));
            }
        }

        Ok(())
    }
}

fn invalid(message: String) -> SnapshotError {
    SnapshotError::Invalid(message)
}

/// Read the whole dataset from `gateway` into a new snapshot.
///
/// # Errors
///
/// Returns the first [`GatewayError`] raised while listing.
pub fn capture<G>(gateway: &G, clock: &dyn Clock) -> Result<Snapshot, GatewayError>
where
    G: PersistenceGateway + ?Sized,
{
    let patients = gateway.list_patients(true)?;
    let consultations = gateway.list_consultations(true)?;
    let documents = gateway.list_documents()?;
    let payments = gateway.list_payments()?;

    Ok(Snapshot::new(
        clock.now(),
        SnapshotData {
            patients,
            consultations,
            documents,
            payments,
        },
    ))
}

/// # Errors
///
/// Returns [`SnapshotError::Encode`] if JSON encoding fails.
pub fn serialize(snapshot: &Snapshot) -> Result<Vec<u8>, SnapshotError> {
    serde_json::to_vec(snapshot).map_err(|e| SnapshotError::Encode(e.to_string()))
}

/// Decode and validate a snapshot.
///
/// # Errors
///
/// Returns [`SnapshotError`] if the bytes are not a well-formed snapshot,
/// the version is newer than [`SNAPSHOT_VERSION`], or an invariant fails.
pub fn deserialize(bytes: &[u8]) -> Result<Snapshot, SnapshotError> {
    let snapshot: Snapshot = serde_json::from_slice(bytes)?;
    if snapshot.version > SNAPSHOT_VERSION {
        return Err(SnapshotError::UnsupportedVersion {
            found: snapshot.version,
        });
    }
    snapshot.validate()?;
    Ok(snapshot)
}

mod iso_millis {
    use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc).trunc_subsecs(3))
            .map_err(serde::de::Error::custom)
    }
}
