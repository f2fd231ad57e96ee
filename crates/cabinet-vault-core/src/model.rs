//! Practice records captured by a snapshot
//!
//! Field names follow the JSON keys the practice application already writes
//! (`numeroPatient`, `montant`, `paiement`, ...), so snapshots stay readable
//! by the rest of the application. Unknown keys are rejected on decode.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Mutual-insurance coverage of a patient
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Mutuelle {
    pub active: bool,
    pub nom: String,
}

/// Free-text medical history item owned by one patient
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Antecedent {
    pub id: String,
    #[serde(rename = "patientId")]
    pub patient_id: String,
    pub description: String,
}

/// Payment settling one consultation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Payment {
    pub id: String,
    #[serde(rename = "consultationId")]
    pub consultation_id: String,
    /// Amount exactly as entered at the desk, e.g. `"65,00"`
    pub montant: String,
    pub methode: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Consultation {
    pub id: String,
    #[serde(rename = "patientId")]
    pub patient_id: String,
    pub date: DateTime<Utc>,
    pub montant: String,
    /// Serialized as `null` when the consultation is unpaid
    #[serde(default)]
    pub paiement: Option<Payment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Document {
    pub id: String,
    /// Documents may exist without a patient, or outlive one
    #[serde(rename = "patientId")]
    pub patient_id: Option<String>,
    pub titre: String,
    pub contenu: String,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Patient {
    pub id: String,
    /// Unique and stable once assigned
    #[serde(rename = "numeroPatient")]
    pub numero: String,
    pub nom: String,
    pub prenom: String,
    pub telephone: String,
    pub email: String,
    pub ville: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secteur: Option<String>,
    pub cin: String,
    #[serde(rename = "dateNaissance")]
    pub date_naissance: String,
    pub mutuelle: Mutuelle,
    #[serde(default)]
    pub antecedents: Vec<Antecedent>,
    /// Captured for completeness; restore inserts consultations from the
    /// top-level collection, not from here
    #[serde(default)]
    pub consultations: Vec<Consultation>,
    #[serde(default)]
    pub documents: Vec<Document>,
}

impl Patient {
    /// Copy of the patient without nested collections, the shape a gateway
    /// stores in its patient table.
    #[must_use]
    pub fn without_nested(&self) -> Self {
        Self {
            antecedents: Vec::new(),
            consultations: Vec::new(),
            documents: Vec::new(),
            ..self.clone()
        }
    }
}

impl Consultation {
    #[must_use]
    pub fn without_payment(&self) -> Self {
        Self {
            paiement: None,
            ..self.clone()
        }
    }
}
