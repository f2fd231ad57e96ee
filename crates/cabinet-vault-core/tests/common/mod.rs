//! Shared fixtures for cabinet-vault-core integration tests
//!
//! Provides a sample practice dataset and a gateway wrapper that can record
//! the order of writes, fail on a chosen insert, or pause mid-transaction.

use cabinet_vault_core::gateway::{GatewayError, GatewayTransaction, PersistenceGateway, TransactionFn};
use cabinet_vault_core::memory::MemoryGateway;
use cabinet_vault_core::model::{Antecedent, Consultation, Document, Mutuelle, Patient, Payment};
use cabinet_vault_core::snapshot::{Snapshot, SnapshotData};
use cabinet_vault_core::{restore, FixedClock};
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use std::sync::mpsc;

#[allow(dead_code)]
pub fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
}

#[allow(dead_code)]
pub fn clock(y: i32, m: u32, d: u32) -> FixedClock {
    FixedClock::new(at(y, m, d, 23, 0))
}

fn patient(id: &str, numero: &str, nom: &str, prenom: &str) -> Patient {
    Patient {
        id: id.into(),
        numero: numero.into(),
        nom: nom.into(),
        prenom: prenom.into(),
        telephone: "0612345678".into(),
        email: format!("{}.{}@example.com", prenom.to_lowercase(), nom.to_lowercase()),
        ville: "Rabat".into(),
        secteur: None,
        cin: format!("CIN-{numero}"),
        date_naissance: "1978-06-21".into(),
        mutuelle: Mutuelle {
            active: false,
            nom: String::new(),
        },
        antecedents: Vec::new(),
        consultations: Vec::new(),
        documents: Vec::new(),
    }
}

/// Three patients; P001 has two antecedents and one paid consultation of
/// "65,00"; one document belongs to P002 and one to nobody.
#[allow(dead_code)]
pub fn sample_data() -> SnapshotData {
    let mut amina = patient("p1", "P001", "Idrissi", "Amina");
    amina.secteur = Some("Agdal".into());
    amina.mutuelle = Mutuelle {
        active: true,
        nom: "CNSS".into(),
    };
    amina.antecedents = vec![
        Antecedent {
            id: "a1".into(),
            patient_id: "p1".into(),
            description: "Asthme".into(),
        },
        Antecedent {
            id: "a2".into(),
            patient_id: "p1".into(),
            description: "Allergie penicilline".into(),
        },
    ];

    let payment = Payment {
        id: "pay1".into(),
        consultation_id: "c1".into(),
        montant: "65,00".into(),
        methode: "Especes".into(),
    };
    let consultation = Consultation {
        id: "c1".into(),
        patient_id: "p1".into(),
        date: at(2024, 2, 27, 10, 30),
        montant: "65,00".into(),
        paiement: Some(payment.clone()),
    };

    let documents = vec![
        Document {
            id: "d1".into(),
            patient_id: Some("p2".into()),
            titre: "Certificat medical".into(),
            contenu: "Repos de trois jours".into(),
            created_at: at(2024, 2, 28, 9, 0),
        },
        Document {
            id: "d2".into(),
            patient_id: None,
            titre: "Note interne".into(),
            contenu: "Commande de gants".into(),
            created_at: at(2024, 2, 29, 16, 45),
        },
    ];

    SnapshotData {
        patients: vec![
            amina,
            patient("p2", "P002", "Tazi", "Omar"),
            patient("p3", "P003", "Fassi", "Nadia"),
        ],
        consultations: vec![consultation],
        documents,
        payments: vec![payment],
    }
}

#[allow(dead_code)]
pub fn sample_snapshot() -> Snapshot {
    Snapshot::new(at(2024, 3, 1, 23, 0), sample_data())
}

/// In-memory gateway already holding the sample dataset
#[allow(dead_code)]
pub fn seeded_gateway() -> MemoryGateway {
    let gateway = MemoryGateway::new();
    restore::apply(&gateway, &sample_snapshot()).unwrap();
    gateway
}

/// A single patient with no history, distinct from the sample
#[allow(dead_code)]
pub fn other_snapshot() -> Snapshot {
    Snapshot::new(
        at(2024, 3, 2, 23, 0),
        SnapshotData {
            patients: vec![patient("p9", "P009", "Berrada", "Karim")],
            consultations: Vec::new(),
            documents: Vec::new(),
            payments: Vec::new(),
        },
    )
}

/// Pause point at the start of a transaction: signals `entered`, then waits
/// for a message on `release`.
#[allow(dead_code)]
pub struct Pause {
    entered: mpsc::Sender<()>,
    release: Mutex<mpsc::Receiver<()>>,
}

/// Wraps a gateway to observe and disturb its transactions
#[allow(dead_code)]
pub struct ProbeGateway<G> {
    pub inner: G,
    ops: Mutex<Vec<&'static str>>,
    fail_on_patient: Option<usize>,
    pause: Option<Pause>,
}

#[allow(dead_code)]
impl<G: PersistenceGateway> ProbeGateway<G> {
    pub fn new(inner: G) -> Self {
        Self {
            inner,
            ops: Mutex::new(Vec::new()),
            fail_on_patient: None,
            pause: None,
        }
    }

    /// Fail the `n`th patient insert (1-based) of every transaction
    pub fn failing_on_patient(mut self, n: usize) -> Self {
        self.fail_on_patient = Some(n);
        self
    }

    /// Returns the channels a test uses to observe and release the pause
    pub fn pausing(mut self) -> (Self, mpsc::Receiver<()>, mpsc::Sender<()>) {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        self.pause = Some(Pause {
            entered: entered_tx,
            release: Mutex::new(release_rx),
        });
        (self, entered_rx, release_tx)
    }

    pub fn ops(&self) -> Vec<&'static str> {
        self.ops.lock().clone()
    }
}

impl<G: PersistenceGateway> PersistenceGateway for ProbeGateway<G> {
    fn list_patients(&self, include_nested: bool) -> Result<Vec<Patient>, GatewayError> {
        self.inner.list_patients(include_nested)
    }

    fn list_consultations(&self, include_nested: bool) -> Result<Vec<Consultation>, GatewayError> {
        self.inner.list_consultations(include_nested)
    }

    fn list_documents(&self) -> Result<Vec<Document>, GatewayError> {
        self.inner.list_documents()
    }

    fn list_payments(&self) -> Result<Vec<Payment>, GatewayError> {
        self.inner.list_payments()
    }

    fn run_transaction(&self, apply: &mut TransactionFn<'_>) -> Result<(), GatewayError> {
        // pause before the inner gateway takes any lock of its own, so only
        // the caller's locks are held while paused
        if let Some(pause) = &self.pause {
            let _ = pause.entered.send(());
            let _ = pause.release.lock().recv();
        }
        self.inner.run_transaction(&mut |tx| {
            let mut probe = ProbeTx {
                inner: tx,
                ops: &self.ops,
                fail_on_patient: self.fail_on_patient,
                patients_created: 0,
            };
            apply(&mut probe)
        })
    }
}

#[allow(dead_code)]
struct ProbeTx<'a> {
    inner: &'a mut dyn GatewayTransaction,
    ops: &'a Mutex<Vec<&'static str>>,
    fail_on_patient: Option<usize>,
    patients_created: usize,
}

impl ProbeTx<'_> {
    fn record(&self, op: &'static str) {
        self.ops.lock().push(op);
    }
}

impl GatewayTransaction for ProbeTx<'_> {
    fn delete_all_payments(&mut self) -> Result<usize, GatewayError> {
        self.record("delete_payments");
        self.inner.delete_all_payments()
    }

    fn delete_all_documents(&mut self) -> Result<usize, GatewayError> {
        self.record("delete_documents");
        self.inner.delete_all_documents()
    }

    fn delete_all_consultations(&mut self) -> Result<usize, GatewayError> {
        self.record("delete_consultations");
        self.inner.delete_all_consultations()
    }

    fn delete_all_antecedents(&mut self) -> Result<usize, GatewayError> {
        self.record("delete_antecedents");
        self.inner.delete_all_antecedents()
    }

    fn delete_all_patients(&mut self) -> Result<usize, GatewayError> {
        self.record("delete_patients");
        self.inner.delete_all_patients()
    }

    fn create_patient_with_antecedents(
        &mut self,
        patient: &Patient,
        antecedents: &[Antecedent],
    ) -> Result<(), GatewayError> {
        self.record("create_patient");
        self.patients_created += 1;
        if self.fail_on_patient == Some(self.patients_created) {
            return Err(GatewayError::backend(format!(
                "injected failure inserting patient {}",
                patient.numero
            )));
        }
        self.inner.create_patient_with_antecedents(patient, antecedents)
    }

    fn create_consultation_with_payment(
        &mut self,
        consultation: &Consultation,
        payment: Option<&Payment>,
    ) -> Result<(), GatewayError> {
        self.record("create_consultation");
        self.inner.create_consultation_with_payment(consultation, payment)
    }

    fn create_documents_bulk(&mut self, documents: &[Document]) -> Result<usize, GatewayError> {
        self.record("create_documents");
        self.inner.create_documents_bulk(documents)
    }
}
