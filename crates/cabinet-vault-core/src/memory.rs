//! In-memory Persistence Gateway
//!
//! Holds the dataset behind one mutex. A transaction works on a copy and
//! swaps it in only on success, so a failed closure leaves nothing behind.

use parking_lot::Mutex;
use std::collections::HashSet;

use crate::gateway::{GatewayError, GatewayTransaction, PersistenceGateway, TransactionFn};
use crate::model::{Antecedent, Consultation, Document, Patient, Payment};

/// Flat tables, the way a relational store keeps them
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dataset {
    pub patients: Vec<Patient>,
    pub antecedents: Vec<Antecedent>,
    pub consultations: Vec<Consultation>,
    pub payments: Vec<Payment>,
    pub documents: Vec<Document>,
}

impl Dataset {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.patients.is_empty()
            && self.antecedents.is_empty()
            && self.consultations.is_empty()
            && self.payments.is_empty()
            && self.documents.is_empty()
    }

    fn payment_for(&self, consultation_id: &str) -> Option<&Payment> {
        self.payments
            .iter()
            .find(|p| p.consultation_id == consultation_id)
    }
}

#[derive(Debug, Default)]
pub struct MemoryGateway {
    state: Mutex<Dataset>,
}

impl MemoryGateway {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_dataset(dataset: Dataset) -> Self {
        Self {
            state: Mutex::new(dataset),
        }
    }

    /// Copy of the current tables
    #[must_use]
    pub fn dataset(&self) -> Dataset {
        self.state.lock().clone()
    }
}

impl PersistenceGateway for MemoryGateway {
    fn list_patients(&self, include_nested: bool) -> Result<Vec<Patient>, GatewayError> {
        let state = self.state.lock();
        let patients = state
            .patients
            .iter()
            .map(|patient| {
                let mut patient = patient.clone();
                if include_nested {
                    patient.antecedents = state
                        .antecedents
                        .iter()
                        .filter(|a| a.patient_id == patient.id)
                        .cloned()
                        .collect();
                    patient.consultations = state
                        .consultations
                        .iter()
                        .filter(|c| c.patient_id == patient.id)
                        .cloned()
                        .collect();
                    patient.documents = state
                        .documents
                        .iter()
                        .filter(|d| d.patient_id.as_deref() == Some(patient.id.as_str()))
                        .cloned()
                        .collect();
                }
                patient
            })
            .collect();
        Ok(patients)
    }

    fn list_consultations(&self, include_nested: bool) -> Result<Vec<Consultation>, GatewayError> {
        let state = self.state.lock();
        let consultations = state
            .consultations
            .iter()
            .map(|c| {
                let mut c = c.clone();
                if include_nested {
                    c.paiement = state.payment_for(&c.id).cloned();
                }
                c
            })
            .collect();
        Ok(consultations)
    }

    fn list_documents(&self) -> Result<Vec<Document>, GatewayError> {
        Ok(self.state.lock().documents.clone())
    }

    fn list_payments(&self) -> Result<Vec<Payment>, GatewayError> {
        Ok(self.state.lock().payments.clone())
    }

    fn run_transaction(&self, apply: &mut TransactionFn<'_>) -> Result<(), GatewayError> {
        let mut state = self.state.lock();
        let mut tx = MemoryTransaction {
            working: state.clone(),
        };
        apply(&mut tx)?;
        *state = tx.working;
        Ok(())
    }
}

struct MemoryTransaction {
    working: Dataset,
}

fn drain_count<T>(items: &mut Vec<T>) -> usize {
    let count = items.len();
    items.clear();
    count
}

impl GatewayTransaction for MemoryTransaction {
    fn delete_all_payments(&mut self) -> Result<usize, GatewayError> {
        Ok(drain_count(&mut self.working.payments))
    }

    fn delete_all_documents(&mut self) -> Result<usize, GatewayError> {
        Ok(drain_count(&mut self.working.documents))
    }

    fn delete_all_consultations(&mut self) -> Result<usize, GatewayError> {
        // payments cascade with their consultation
        self.working.payments.clear();
        Ok(drain_count(&mut self.working.consultations))
    }

    fn delete_all_antecedents(&mut self) -> Result<usize, GatewayError> {
        Ok(drain_count(&mut self.working.antecedents))
    }

    fn delete_all_patients(&mut self) -> Result<usize, GatewayError> {
        self.working.antecedents.clear();
        self.working.payments.clear();
        self.working.consultations.clear();
        Ok(drain_count(&mut self.working.patients))
    }

    fn create_patient_with_antecedents(
        &mut self,
        patient: &Patient,
        antecedents: &[Antecedent],
    ) -> Result<(), GatewayError> {
        let w = &mut self.working;
        if w.patients.iter().any(|p| p.id == patient.id) {
            return Err(GatewayError::Constraint(format!(
                "duplicate patient id {}",
                patient.id
            )));
        }
        if w.patients.iter().any(|p| p.numero == patient.numero) {
            return Err(GatewayError::Constraint(format!(
                "duplicate patient number {}",
                patient.numero
            )));
        }

        let mut seen: HashSet<&str> = w.antecedents.iter().map(|a| a.id.as_str()).collect();
        for antecedent in antecedents {
            if !seen.insert(antecedent.id.as_str()) {
                return Err(GatewayError::Constraint(format!(
                    "duplicate antecedent id {}",
                    antecedent.id
                )));
            }
        }

        w.patients.push(patient.without_nested());
        w.antecedents.extend(antecedents.iter().map(|a| Antecedent {
            patient_id: patient.id.clone(),
            ..a.clone()
        }));
        Ok(())
    }

    fn create_consultation_with_payment(
        &mut self,
        consultation: &Consultation,
        payment: Option<&Payment>,
    ) -> Result<(), GatewayError> {
        let w = &mut self.working;
        if !w.patients.iter().any(|p| p.id == consultation.patient_id) {
            return Err(GatewayError::Constraint(format!(
                "consultation {} references unknown patient {}",
                consultation.id, consultation.patient_id
            )));
        }
        if w.consultations.iter().any(|c| c.id == consultation.id) {
            return Err(GatewayError::Constraint(format!(
                "duplicate consultation id {}",
                consultation.id
            )));
        }
        if let Some(payment) = payment {
            if w.payments.iter().any(|p| p.id == payment.id) {
                return Err(GatewayError::Constraint(format!(
                    "duplicate payment id {}",
                    payment.id
                )));
            }
            w.payments.push(Payment {
                consultation_id: consultation.id.clone(),
                ..payment.clone()
            });
        }
        w.consultations.push(consultation.without_payment());
        Ok(())
    }

    fn create_documents_bulk(&mut self, documents: &[Document]) -> Result<usize, GatewayError> {
        let mut seen: HashSet<&str> = self.working.documents.iter().map(|d| d.id.as_str()).collect();
        for doc in documents {
            if !seen.insert(doc.id.as_str()) {
                return Err(GatewayError::Constraint(format!(
                    "duplicate document id {}",
                    doc.id
                )));
            }
        }
        self.working.documents.extend_from_slice(documents);
        Ok(documents.len())
    }
}
