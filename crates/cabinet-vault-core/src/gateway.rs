//! Persistence Gateway contract
//!
//! The practice's data layer implements these traits; the backup and restore
//! pipeline only consumes them. A gateway is always injected, never global.

use std::error::Error as StdError;
use std::sync::Arc;

use crate::model::{Antecedent, Consultation, Document, Patient, Payment};

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// A uniqueness or reference constraint was violated
    #[error("constraint violated: {0}")]
    Constraint(String),
    #[error("storage backend error: {0}")]
    Backend(#[source] Box<dyn StdError + Send + Sync>),
}

impl GatewayError {
    pub fn backend<E>(err: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        Self::Backend(err.into())
    }
}

/// Write operations available inside [`PersistenceGateway::run_transaction`]
///
/// Every method either succeeds or leaves the transaction to be rolled back
/// by the gateway once the closure returns an error.
pub trait GatewayTransaction {
    /// # Errors
    ///
    /// Returns [`GatewayError`] when the backend rejects the delete.
    fn delete_all_payments(&mut self) -> Result<usize, GatewayError>;

    /// # Errors
    ///
    /// Returns [`GatewayError`] when the backend rejects the delete.
    fn delete_all_documents(&mut self) -> Result<usize, GatewayError>;

    /// # Errors
    ///
    /// Returns [`GatewayError`] when the backend rejects the delete.
    fn delete_all_consultations(&mut self) -> Result<usize, GatewayError>;

    /// # Errors
    ///
    /// Returns [`GatewayError`] when the backend rejects the delete.
    fn delete_all_antecedents(&mut self) -> Result<usize, GatewayError>;

    /// # Errors
    ///
    /// Returns [`GatewayError`] when the backend rejects the delete.
    fn delete_all_patients(&mut self) -> Result<usize, GatewayError>;

    /// Insert one patient and its antecedents. Nested consultations and
    /// documents on `patient` are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Constraint`] on a duplicate id or patient
    /// number.
    fn create_patient_with_antecedents(
        &mut self,
        patient: &Patient,
        antecedents: &[Antecedent],
    ) -> Result<(), GatewayError>;

    /// # Errors
    ///
    /// Returns [`GatewayError::Constraint`] when the patient is missing or an
    /// id is already taken.
    fn create_consultation_with_payment(
        &mut self,
        consultation: &Consultation,
        payment: Option<&Payment>,
    ) -> Result<(), GatewayError>;

    /// # Errors
    ///
    /// Returns [`GatewayError::Constraint`] on a duplicate document id.
    fn create_documents_bulk(&mut self, documents: &[Document]) -> Result<usize, GatewayError>;
}

/// Closure run by [`PersistenceGateway::run_transaction`]
pub type TransactionFn<'a> = dyn FnMut(&mut dyn GatewayTransaction) -> Result<(), GatewayError> + 'a;

/// Read access to the dataset plus an exclusive transactional write path
pub trait PersistenceGateway: Send + Sync {
    /// List all patients. With `include_nested`, each patient carries its
    /// antecedents, consultations and documents.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] if the backend cannot be read.
    fn list_patients(&self, include_nested: bool) -> Result<Vec<Patient>, GatewayError>;

    /// List all consultations. With `include_nested`, each carries its
    /// payment when one exists.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] if the backend cannot be read.
    fn list_consultations(&self, include_nested: bool) -> Result<Vec<Consultation>, GatewayError>;

    /// # Errors
    ///
    /// Returns [`GatewayError`] if the backend cannot be read.
    fn list_documents(&self) -> Result<Vec<Document>, GatewayError>;

    /// # Errors
    ///
    /// Returns [`GatewayError`] if the backend cannot be read.
    fn list_payments(&self) -> Result<Vec<Payment>, GatewayError>;

    /// Run `apply` with exclusive write access. Commits when it returns
    /// `Ok`; on `Err` every change made inside is rolled back and the error
    /// is returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns the error raised by `apply`, or a backend error from begin or
    /// commit.
    fn run_transaction(&self, apply: &mut TransactionFn<'_>) -> Result<(), GatewayError>;
}

impl<G: PersistenceGateway + ?Sized> PersistenceGateway for Arc<G> {
    fn list_patients(&self, include_nested: bool) -> Result<Vec<Patient>, GatewayError> {
        (**self).list_patients(include_nested)
    }

    fn list_consultations(&self, include_nested: bool) -> Result<Vec<Consultation>, GatewayError> {
        (**self).list_consultations(include_nested)
    }

    fn list_documents(&self) -> Result<Vec<Document>, GatewayError> {
        (**self).list_documents()
    }

    fn list_payments(&self) -> Result<Vec<Payment>, GatewayError> {
        (**self).list_payments()
    }

    fn run_transaction(&self, apply: &mut TransactionFn<'_>) -> Result<(), GatewayError> {
        (**self).run_transaction(apply)
    }
}
